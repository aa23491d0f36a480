use serde_json::Value;
use teamdesk_chat::discord::command_json;

use crate::commands::{CommandResult, ErrorClass};

/// Prints every persistent command schema as the JSON body sent when syncing commands.
pub fn run() -> CommandResult {
    let schemas = teamdesk_handlers::all_schemas();
    for schema in &schemas {
        if let Err(reason) = schema.validate() {
            return CommandResult::failed(
                "commands",
                ErrorClass::SchemaValidation,
                format!("`{}`: {reason}", schema.name),
            );
        }
    }

    let body = Value::Array(schemas.iter().map(command_json).collect());
    match serde_json::to_string_pretty(&body) {
        Ok(output) => CommandResult::plain(0, output),
        Err(error) => CommandResult::failed("commands", ErrorClass::Serialization, error.to_string()),
    }
}
