//! Ultralight 2.0 command payloads.
//!
//! ```text
//! {device_id}@{command}|{key}={value}|{key}={value}   object / array value
//! {device_id}@{command}|{value}                       scalar value
//! {device_id}@{command}                               null or empty value
//! ```
//!
//! Array elements use their index as the key, so an empty array also
//! yields the bare `{device_id}@{command}`.

use serde_json::Value;

use iota_amqp_binding::PayloadCodec;
use iota_protocol::Device;

/// Encodes command attributes as Ultralight text.
#[derive(Debug, Clone, Copy, Default)]
pub struct UltralightCodec;

impl UltralightCodec {
    pub fn new() -> Self {
        Self
    }

    pub fn encode(&self, device_id: &str, command: &str, value: &Value) -> String {
        let params: Vec<String> = match value {
            Value::Null => Vec::new(),
            Value::Object(map) => map
                .iter()
                .map(|(key, v)| format!("{key}={}", render(v)))
                .collect(),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| format!("{i}={}", render(v)))
                .collect(),
            scalar => vec![render(scalar)],
        };

        let mut payload = format!("{device_id}@{command}");
        for param in params {
            payload.push('|');
            payload.push_str(&param);
        }
        payload
    }
}

impl PayloadCodec for UltralightCodec {
    fn command_payload(
        &self,
        device: &Device,
        command: &str,
        value: &Value,
    ) -> anyhow::Result<String> {
        Ok(self.encode(&device.id, command, value))
    }
}

// Strings go out unquoted; nested structures as compact JSON.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
