use serde::{Deserialize, Serialize};

/// One command invocation inside a command-execution request.
///
/// `name` is the command to run on the device; `value` carries its
/// arguments in whatever shape the upstream context broker sent. The
/// binding never looks inside `value`, only the payload codec does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAttribute {
    pub name: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl CommandAttribute {
    pub fn new(name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}
