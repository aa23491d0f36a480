pub mod config;
pub mod doctor;
pub mod migrate;
pub mod schemas;

use serde::Serialize;
use serde_json::{json, Value};

/// Why a subcommand failed. Each class owns a stable process exit code so scripts can
/// branch on it without parsing the message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    ConfigValidation,
    RuntimeInit,
    DataDir,
    DbConnectivity,
    Migration,
    SchemaValidation,
    Serialization,
}

impl ErrorClass {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::ConfigValidation => 2,
            Self::RuntimeInit | Self::Serialization => 3,
            Self::DataDir | Self::DbConnectivity => 4,
            Self::Migration => 5,
            Self::SchemaValidation => 7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

impl CommandResult {
    /// Output that is already formatted for the terminal.
    pub fn plain(exit_code: u8, output: impl Into<String>) -> Self {
        Self { exit_code, output: output.into() }
    }

    /// JSON envelope for a successful run; `details` is omitted when null.
    pub fn ok(command: &str, message: impl Into<String>, details: Value) -> Self {
        let mut envelope = json!({ "command": command, "status": "ok", "message": message.into() });
        if !details.is_null() {
            envelope["details"] = details;
        }
        Self::plain(0, envelope.to_string())
    }

    pub fn failed(command: &str, class: ErrorClass, message: impl Into<String>) -> Self {
        let envelope = json!({
            "command": command,
            "status": "error",
            "error_class": class,
            "message": message.into(),
        });
        Self::plain(class.exit_code(), envelope.to_string())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{CommandResult, ErrorClass};

    #[test]
    fn failures_carry_class_and_exit_code() {
        let result = CommandResult::failed("migrate", ErrorClass::Migration, "checksum mismatch");
        assert_eq!(result.exit_code, 5);

        let payload: Value = serde_json::from_str(&result.output).expect("json");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "migration");
        assert_eq!(payload["message"], "checksum mismatch");
    }

    #[test]
    fn success_details_are_optional() {
        let bare: Value =
            serde_json::from_str(&CommandResult::ok("migrate", "done", Value::Null).output).expect("json");
        assert!(bare.get("details").is_none());

        let detailed = CommandResult::ok("migrate", "done", json!({ "migrations": [] }));
        let payload: Value = serde_json::from_str(&detailed.output).expect("json");
        assert_eq!(payload["details"]["migrations"], json!([]));
    }
}
