//! REST side of the Discord adapter.
//!
//! Payload builders are free functions so the wire shapes can be checked without HTTP.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, warn};

use teamdesk_core::config::DiscordConfig;

use crate::command::{CommandSchema, OptionKind, OptionSchema};
use crate::interaction::{
    CommandOption, Interaction, InteractionKind, InteractionPayload, Invoker, OptionValue, ReplyToken,
};
use crate::message::{ActionRow, ButtonStyle, Embed, ModalSpec, ReplyPayload, TextInputStyle};
use crate::responder::{InitialResponse, ReplyLedger, ResponseAdapter, TransportError};

const CALLBACK_MESSAGE: u8 = 4;
const CALLBACK_DEFERRED: u8 = 5;
const CALLBACK_MODAL: u8 = 9;
const FLAG_EPHEMERAL: u64 = 1 << 6;

const COMPONENT_ACTION_ROW: u8 = 1;
const COMPONENT_BUTTON: u8 = 2;
const COMPONENT_TEXT_INPUT: u8 = 4;

const INTERACTION_COMMAND: u64 = 2;
const INTERACTION_COMPONENT: u64 = 3;
const INTERACTION_MODAL: u64 = 5;

const OPTION_SUBCOMMAND: u8 = 1;

static NULL: Value = Value::Null;

pub struct DiscordClient {
    client: Client,
    api_base_url: String,
    bot_token: SecretString,
    application_id: Option<String>,
    ledger: ReplyLedger,
}

impl DiscordClient {
    pub fn new(
        api_base_url: impl Into<String>,
        bot_token: SecretString,
        application_id: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        Ok(Self {
            client,
            api_base_url: api_base_url.into().trim_end_matches('/').to_owned(),
            bot_token,
            application_id,
            ledger: ReplyLedger::new(),
        })
    }

    pub fn from_config(config: &DiscordConfig) -> Result<Self, TransportError> {
        Self::new(
            config.api_base_url.clone(),
            config.bot_token.clone(),
            config.application_id.clone(),
            Duration::from_secs(15),
        )
    }

    /// Replaces the guild's command set with `schemas`.
    pub async fn sync_commands(
        &self,
        guild_id: &str,
        schemas: &[CommandSchema],
    ) -> Result<usize, TransportError> {
        let application_id = self.application_id()?;
        let body = Value::Array(schemas.iter().map(command_json).collect());
        let path = format!("/applications/{application_id}/guilds/{guild_id}/commands");
        self.send(Method::PUT, &path, &body).await?;
        debug!(
            event_name = "chat.discord.commands_synced",
            guild_id,
            count = schemas.len(),
            "synchronised command schemas"
        );
        Ok(schemas.len())
    }

    fn application_id(&self) -> Result<&str, TransportError> {
        self.application_id
            .as_deref()
            .ok_or_else(|| TransportError::Request("discord application id is not configured".to_owned()))
    }

    async fn callback(&self, token: &ReplyToken, body: Value) -> Result<(), TransportError> {
        let path = format!("/interactions/{}/{}/callback", token.interaction_id, token.token);
        self.send(Method::POST, &path, &body).await
    }

    async fn send(&self, method: Method, path: &str, body: &Value) -> Result<(), TransportError> {
        let url = format!("{}{}", self.api_base_url, path);
        let response = self
            .client
            .request(method, &url)
            .header("Authorization", format!("Bot {}", self.bot_token.expose_secret()))
            .json(body)
            .send()
            .await
            .map_err(|error| TransportError::Request(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                event_name = "chat.discord.request_failed",
                status = %status,
                path = %redact_token(path),
                "discord api rejected request"
            );
            return Err(TransportError::Status { status: status.as_u16(), body });
        }
        Ok(())
    }
}

#[async_trait]
impl ResponseAdapter for DiscordClient {
    async fn reply_initial(&self, token: &ReplyToken, payload: ReplyPayload) -> Result<(), TransportError> {
        self.ledger.claim(token, InitialResponse::Message)?;
        self.callback(token, json!({ "type": CALLBACK_MESSAGE, "data": message_json(&payload) })).await
    }

    async fn reply_deferred(&self, token: &ReplyToken, ephemeral: bool) -> Result<(), TransportError> {
        self.ledger.claim(token, InitialResponse::Deferred)?;
        let flags = if ephemeral { FLAG_EPHEMERAL } else { 0 };
        self.callback(token, json!({ "type": CALLBACK_DEFERRED, "data": { "flags": flags } })).await
    }

    async fn edit(&self, token: &ReplyToken, payload: ReplyPayload) -> Result<(), TransportError> {
        self.ledger.require_editable(token)?;
        let path = format!("/webhooks/{}/{}/messages/@original", self.application_id()?, token.token);
        self.send(Method::PATCH, &path, &message_json(&payload)).await
    }

    async fn open_modal(&self, token: &ReplyToken, modal: ModalSpec) -> Result<(), TransportError> {
        self.ledger.claim(token, InitialResponse::Modal)?;
        self.callback(token, json!({ "type": CALLBACK_MODAL, "data": modal_json(&modal) })).await
    }

    async fn send_channel(&self, channel_id: &str, payload: ReplyPayload) -> Result<(), TransportError> {
        let path = format!("/channels/{channel_id}/messages");
        self.send(Method::POST, &path, &message_json(&payload)).await
    }
}

fn redact_token(path: &str) -> String {
    path.split('/')
        .map(|segment| if segment.len() > 48 { "<token>" } else { segment })
        .collect::<Vec<_>>()
        .join("/")
}

pub fn message_json(payload: &ReplyPayload) -> Value {
    let embeds: Vec<Value> = payload.embeds.iter().map(embed_json).collect();
    let components: Vec<Value> = payload.components.iter().map(action_row_json).collect();
    let mut body = json!({
        "content": payload.content_text(),
        "embeds": embeds,
        "components": components,
    });
    if payload.ephemeral {
        body["flags"] = json!(FLAG_EPHEMERAL);
    }
    body
}

fn embed_json(embed: &Embed) -> Value {
    let fields: Vec<Value> = embed
        .fields
        .iter()
        .map(|field| json!({ "name": field.name, "value": field.value, "inline": field.inline }))
        .collect();
    let mut value = json!({ "fields": fields });
    if let Some(title) = &embed.title {
        value["title"] = json!(title);
    }
    if let Some(description) = &embed.description {
        value["description"] = json!(description);
    }
    if let Some(url) = &embed.url {
        value["url"] = json!(url);
    }
    if let Some(footer) = &embed.footer {
        value["footer"] = json!({ "text": footer });
    }
    value
}

fn action_row_json(row: &ActionRow) -> Value {
    let buttons: Vec<Value> = row
        .buttons
        .iter()
        .map(|button| {
            json!({
                "type": COMPONENT_BUTTON,
                "custom_id": button.custom_id,
                "label": button.label,
                "style": button_style(button.style),
                "disabled": button.disabled,
            })
        })
        .collect();
    json!({ "type": COMPONENT_ACTION_ROW, "components": buttons })
}

fn button_style(style: ButtonStyle) -> u8 {
    match style {
        ButtonStyle::Primary => 1,
        ButtonStyle::Secondary => 2,
        ButtonStyle::Success => 3,
        ButtonStyle::Danger => 4,
    }
}

pub fn modal_json(modal: &ModalSpec) -> Value {
    let rows: Vec<Value> = modal
        .inputs
        .iter()
        .map(|input| {
            let style = match input.style {
                TextInputStyle::Short => 1,
                TextInputStyle::Paragraph => 2,
            };
            let mut component = json!({
                "type": COMPONENT_TEXT_INPUT,
                "custom_id": input.custom_id,
                "label": input.label,
                "style": style,
                "required": input.required,
            });
            if let Some(placeholder) = &input.placeholder {
                component["placeholder"] = json!(placeholder);
            }
            json!({ "type": COMPONENT_ACTION_ROW, "components": [component] })
        })
        .collect();
    json!({ "custom_id": modal.custom_id, "title": modal.title, "components": rows })
}

pub fn command_json(schema: &CommandSchema) -> Value {
    let options: Vec<Value> = if schema.subcommands.is_empty() {
        schema.options.iter().map(option_json).collect()
    } else {
        schema
            .subcommands
            .iter()
            .map(|subcommand| {
                let options: Vec<Value> = subcommand.options.iter().map(option_json).collect();
                json!({
                    "type": OPTION_SUBCOMMAND,
                    "name": subcommand.name,
                    "description": subcommand.description,
                    "options": options,
                })
            })
            .collect()
    };
    json!({ "name": schema.name, "description": schema.description, "options": options })
}

fn option_json(option: &OptionSchema) -> Value {
    let kind = match option.kind {
        OptionKind::String => 3,
        OptionKind::Integer => 4,
        OptionKind::Boolean => 5,
    };
    json!({
        "type": kind,
        "name": option.name,
        "description": option.description,
        "required": option.required,
    })
}

/// Converts a raw interaction object as delivered by the gateway. Pings and autocomplete
/// requests are not handled and come back as errors.
pub fn parse_interaction(raw: &Value) -> Result<Interaction, TransportError> {
    // Snowflakes arrive as strings on the wire but as integers from some gateway clients.
    let text = |value: &Value, key: &str| -> Result<String, TransportError> {
        match value.get(key) {
            Some(Value::String(text)) => Some(text.clone()),
            Some(Value::Number(number)) => Some(number.to_string()),
            _ => None,
        }
        .ok_or_else(|| TransportError::Receive(format!("interaction is missing `{key}`")))
    };

    let reply_token = ReplyToken::new(text(raw, "id")?, text(raw, "token")?);
    let channel_id = text(raw, "channel_id")?;
    let guild_id = raw.get("guild_id").and_then(Value::as_str).map(str::to_owned);
    let user = raw.pointer("/member/user").or_else(|| raw.get("user")).unwrap_or(&NULL);
    let invoker = Invoker { id: text(user, "id")?, username: text(user, "username")? };
    let data = raw.get("data").unwrap_or(&NULL);

    let (kind, identifier, payload) = match raw.get("type").and_then(Value::as_u64) {
        Some(INTERACTION_COMMAND) => {
            let (subcommand, options) = command_options(data);
            (InteractionKind::Command, text(data, "name")?, InteractionPayload::Command { subcommand, options })
        }
        Some(INTERACTION_COMPONENT) => {
            let values = data
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().filter_map(Value::as_str).map(str::to_owned).collect())
                .unwrap_or_default();
            (InteractionKind::Component, text(data, "custom_id")?, InteractionPayload::Component { values })
        }
        Some(INTERACTION_MODAL) => (
            InteractionKind::Modal,
            text(data, "custom_id")?,
            InteractionPayload::Modal { fields: modal_fields(data) },
        ),
        other => {
            return Err(TransportError::Receive(format!("unsupported interaction type {other:?}")));
        }
    };

    Ok(Interaction { kind, identifier, invoker, channel_id, guild_id, payload, reply_token })
}

fn command_options(data: &Value) -> (Option<String>, Vec<CommandOption>) {
    let top = data.get("options").and_then(Value::as_array).cloned().unwrap_or_default();
    let subcommand = top
        .iter()
        .find(|option| option.get("type").and_then(Value::as_u64) == Some(u64::from(OPTION_SUBCOMMAND)));

    let (name, options) = match subcommand {
        Some(subcommand) => (
            subcommand.get("name").and_then(Value::as_str).map(str::to_owned),
            subcommand.get("options").and_then(Value::as_array).cloned().unwrap_or_default(),
        ),
        None => (None, top.clone()),
    };

    let options = options
        .iter()
        .filter_map(|option| {
            let name = option.get("name")?.as_str()?.to_owned();
            let value = match option.get("value")? {
                Value::Bool(flag) => OptionValue::Boolean(*flag),
                Value::Number(number) => OptionValue::Integer(number.as_i64()?),
                Value::String(text) => OptionValue::String(text.clone()),
                _ => return None,
            };
            Some(CommandOption { name, value })
        })
        .collect();
    (name, options)
}

fn modal_fields(data: &Value) -> BTreeMap<String, String> {
    data.get("components")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|row| row.get("components").and_then(Value::as_array))
        .flatten()
        .filter_map(|input| {
            let custom_id = input.get("custom_id")?.as_str()?;
            let value = input.get("value")?.as_str()?;
            Some((custom_id.to_owned(), value.to_owned()))
        })
        .collect()
}
