//! Shared types for the IoT Agent AMQP binding: devices, command
//! attributes and the routing-key scheme.

pub mod commands;
pub mod device;
pub mod topics;

pub use commands::*;
pub use device::*;
