use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Command,
    Component,
    Modal,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Component => "component",
            Self::Modal => "modal",
        }
    }
}

/// Capability to answer one interaction: one initial response, then edits.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplyToken {
    pub interaction_id: String,
    pub token: String,
}

impl ReplyToken {
    pub fn new(interaction_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self { interaction_id: interaction_id.into(), token: token.into() }
    }
}

impl fmt::Display for ReplyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.interaction_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoker {
    pub id: String,
    pub username: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Boolean(bool),
    Integer(i64),
    String(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOption {
    pub name: String,
    pub value: OptionValue,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InteractionPayload {
    Command { subcommand: Option<String>, options: Vec<CommandOption> },
    Component { values: Vec<String> },
    Modal { fields: BTreeMap<String, String> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub kind: InteractionKind,
    /// Command name, component custom id, or modal custom id.
    pub identifier: String,
    pub invoker: Invoker,
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub payload: InteractionPayload,
    pub reply_token: ReplyToken,
}

impl Interaction {
    pub fn command(
        name: impl Into<String>,
        subcommand: Option<&str>,
        options: Vec<CommandOption>,
        invoker: Invoker,
        channel_id: impl Into<String>,
        reply_token: ReplyToken,
    ) -> Self {
        Self {
            kind: InteractionKind::Command,
            identifier: name.into(),
            invoker,
            channel_id: channel_id.into(),
            guild_id: None,
            payload: InteractionPayload::Command {
                subcommand: subcommand.map(str::to_owned),
                options,
            },
            reply_token,
        }
    }

    pub fn component(
        custom_id: impl Into<String>,
        invoker: Invoker,
        channel_id: impl Into<String>,
        reply_token: ReplyToken,
    ) -> Self {
        Self {
            kind: InteractionKind::Component,
            identifier: custom_id.into(),
            invoker,
            channel_id: channel_id.into(),
            guild_id: None,
            payload: InteractionPayload::Component { values: Vec::new() },
            reply_token,
        }
    }

    pub fn modal(
        custom_id: impl Into<String>,
        fields: BTreeMap<String, String>,
        invoker: Invoker,
        channel_id: impl Into<String>,
        reply_token: ReplyToken,
    ) -> Self {
        Self {
            kind: InteractionKind::Modal,
            identifier: custom_id.into(),
            invoker,
            channel_id: channel_id.into(),
            guild_id: None,
            payload: InteractionPayload::Modal { fields },
            reply_token,
        }
    }

    pub fn with_guild(mut self, guild_id: impl Into<String>) -> Self {
        self.guild_id = Some(guild_id.into());
        self
    }

    pub fn subcommand(&self) -> Option<&str> {
        match &self.payload {
            InteractionPayload::Command { subcommand, .. } => subcommand.as_deref(),
            _ => None,
        }
    }

    pub fn option(&self, name: &str) -> Option<&OptionValue> {
        match &self.payload {
            InteractionPayload::Command { options, .. } => {
                options.iter().find(|option| option.name == name).map(|option| &option.value)
            }
            _ => None,
        }
    }

    /// String option, trimmed; empty strings read as absent.
    pub fn string_option(&self, name: &str) -> Option<String> {
        match self.option(name)? {
            OptionValue::String(value) => {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_owned())
            }
            OptionValue::Integer(value) => Some(value.to_string()),
            OptionValue::Boolean(value) => Some(value.to_string()),
        }
    }

    pub fn integer_option(&self, name: &str) -> Option<i64> {
        match self.option(name)? {
            OptionValue::Integer(value) => Some(*value),
            OptionValue::String(value) => value.trim().parse().ok(),
            OptionValue::Boolean(_) => None,
        }
    }

    pub fn boolean_option(&self, name: &str) -> Option<bool> {
        match self.option(name)? {
            OptionValue::Boolean(value) => Some(*value),
            OptionValue::String(value) => value.trim().parse().ok(),
            OptionValue::Integer(_) => None,
        }
    }

    pub fn field(&self, custom_id: &str) -> Option<&str> {
        match &self.payload {
            InteractionPayload::Modal { fields } => fields.get(custom_id).map(String::as_str),
            _ => None,
        }
    }
}

pub fn string_option(name: &str, value: impl Into<String>) -> CommandOption {
    CommandOption { name: name.to_owned(), value: OptionValue::String(value.into()) }
}

pub fn integer_option(name: &str, value: i64) -> CommandOption {
    CommandOption { name: name.to_owned(), value: OptionValue::Integer(value) }
}

pub fn boolean_option(name: &str, value: bool) -> CommandOption {
    CommandOption { name: name.to_owned(), value: OptionValue::Boolean(value) }
}
