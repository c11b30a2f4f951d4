//! AMQP routing keys, queue bindings and the inbound topic mapping.
//!
//! Routing key structure on the topic exchange:
//! ```text
//! .{api_key}.{device_id}.attrs[.{segment}...]   device → agent (measures)
//! .{api_key}.{device_id}.cmd                    agent  → device (command)
//! .{api_key}.{device_id}.cmdexe                 device → agent (command result)
//! ```
//!
//! The leading empty segment is part of the wire format and is kept for
//! compatibility with deployed devices. Inbound keys are handed to the
//! agent's message handler with every `.` replaced by `/`, so
//! `.KEY1.d1.attrs` becomes `/KEY1/d1/attrs`.

use std::fmt;

/// Exchange used when the configuration does not name one.
pub const AMQP_DEFAULT_EXCHANGE: &str = "iota";

/// Primary queue used when the configuration does not name one.
pub const AMQP_DEFAULT_QUEUE: &str = "iotaqueue";

/// Binding pattern for the primary (measures) queue.
pub const TELEMETRY_BINDING: &str = ".*.*.attrs.#";

/// Binding pattern for the command-result queue.
pub const COMMAND_EXE_BINDING: &str = ".*.*.cmdexe";

const DELIMITER: char = '.';
const TOPIC_SEPARATOR: char = '/';
const COMMANDS_QUEUE_SUFFIX: &str = "_commands";

const ATTRS: &str = "attrs";
const CMD: &str = "cmd";
const CMDEXE: &str = "cmdexe";

/// Name of the queue that receives command results for `queue`.
pub fn commands_queue(queue: &str) -> String {
    format!("{queue}{COMMANDS_QUEUE_SUFFIX}")
}

// ─── Typed routing key ───

/// What a routing key carries, i.e. its trailing segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Measures from the device; `attrs` plus any further segments.
    Attributes(Vec<String>),
    /// Command sent to the device.
    Command,
    /// Command execution result reported by the device.
    CommandExe,
}

/// A routing key with named segments.
///
/// This is the only place that knows the wire layout; everything else
/// builds a `RoutingKey` and formats it with `Display`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingKey {
    pub api_key: String,
    pub device_id: String,
    pub kind: MessageKind,
}

impl RoutingKey {
    pub fn command(api_key: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            device_id: device_id.into(),
            kind: MessageKind::Command,
        }
    }

    pub fn command_exe(api_key: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            device_id: device_id.into(),
            kind: MessageKind::CommandExe,
        }
    }

    pub fn attributes<I, S>(
        api_key: impl Into<String>,
        device_id: impl Into<String>,
        extra: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            api_key: api_key.into(),
            device_id: device_id.into(),
            kind: MessageKind::Attributes(extra.into_iter().map(Into::into).collect()),
        }
    }

    /// Parse a wire routing key (`.`-delimited).
    /// Returns `None` if the key doesn't match the expected format.
    pub fn parse(routing_key: &str) -> Option<Self> {
        parse_segments(routing_key.split(DELIMITER))
    }

    /// True when the API key or device id would not survive as a single
    /// routing-key segment: empty, or containing the delimiter or a
    /// broker wildcard. Such keys can be misrouted by the queue bindings.
    pub fn has_ambiguous_segments(&self) -> bool {
        [&self.api_key, &self.device_id]
            .iter()
            .any(|s| s.is_empty() || s.contains([DELIMITER, '*', '#']))
    }

    /// The topic representation handed to the agent's message handler.
    pub fn to_topic(&self) -> String {
        normalize_inbound(&self.to_string())
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{DELIMITER}{}{DELIMITER}{}{DELIMITER}", self.api_key, self.device_id)?;
        match &self.kind {
            MessageKind::Command => f.write_str(CMD),
            MessageKind::CommandExe => f.write_str(CMDEXE),
            MessageKind::Attributes(extra) => {
                f.write_str(ATTRS)?;
                for segment in extra {
                    write!(f, "{DELIMITER}{segment}")?;
                }
                Ok(())
            }
        }
    }
}

// ─── Builders and mapping ───

/// Routing key for a command addressed to `device_id`.
pub fn command_routing_key(api_key: &str, device_id: &str) -> String {
    RoutingKey::command(api_key, device_id).to_string()
}

/// Map an inbound routing key to the handler's topic representation.
pub fn normalize_inbound(routing_key: &str) -> String {
    routing_key.replace(DELIMITER, &TOPIC_SEPARATOR.to_string())
}

/// Parse a normalized topic (`/`-delimited) back into its components.
pub fn parse_topic(topic: &str) -> Option<RoutingKey> {
    parse_segments(topic.split(TOPIC_SEPARATOR))
}

fn parse_segments<'a>(segments: impl Iterator<Item = &'a str>) -> Option<RoutingKey> {
    let parts: Vec<&str> = segments.collect();

    if parts.len() < 4 || !parts[0].is_empty() || parts[1].is_empty() || parts[2].is_empty() {
        return None;
    }

    let kind = match (parts[3], parts.len()) {
        (CMD, 4) => MessageKind::Command,
        (CMDEXE, 4) => MessageKind::CommandExe,
        (ATTRS, _) => MessageKind::Attributes(parts[4..].iter().map(|s| s.to_string()).collect()),
        _ => return None,
    };

    Some(RoutingKey {
        api_key: parts[1].to_string(),
        device_id: parts[2].to_string(),
        kind,
    })
}
