use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use teamdesk_core::config::NaturalConfig;

const SYSTEM_PROMPT: &str = r#"You manage calendar events. Each request is a JSON object and each answer must be a single JSON object.
input: {"currentTime":string,"userRequest":string,"eventContext":{"title":string,"description":string,"start":string,"end":string,"location":string,"url":string,"attendees":[string]}}
output: {"success":bool,"action":"create"|"read"|"update"|"delete","description":string,"body":object}
body for create and update: {"title":string,"description":string,"start":string,"end":string,"location":string,"url":string,"attendees":[string]}
body for read: {"startDateToQuery":string,"endDateToQuery":string}
body for delete: {}
rules:
- Datetimes use DD/MM/YYYY HH:MM.
- Create needs a title and a start. Without an end, assume one hour.
- Read needs both query bounds and only succeeds for time based questions.
- Update needs eventContext; copy unchanged fields from it. Without it set success to false and say why.
- Delete only targets the event in eventContext; anything else sets success to false.
- Write descriptions in plain conversational language without questions."#;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NaturalError {
    #[error("natural language requests are disabled")]
    Disabled,
    #[error("natural language api key is not configured")]
    MissingApiKey,
    #[error("request text is blank")]
    EmptyRequest,
    #[error("natural language request failed: {0}")]
    Request(String),
    #[error("natural language api returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("natural language api returned no content")]
    EmptyResponse,
    #[error("failed to decode natural language response: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventContext {
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub start: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub end: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub location: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NaturalInput {
    pub current_time: String,
    pub user_request: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_context: Option<EventContext>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NaturalAction {
    Create,
    Read,
    Update,
    Delete,
    Unknown(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NaturalBody {
    #[serde(flatten)]
    pub event: EventContext,
    pub start_date_to_query: String,
    pub end_date_to_query: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NaturalOutput {
    pub success: bool,
    pub action: String,
    pub description: String,
    pub body: NaturalBody,
}

impl NaturalOutput {
    pub fn action(&self) -> NaturalAction {
        match self.action.trim().to_ascii_lowercase().as_str() {
            "create" => NaturalAction::Create,
            "read" => NaturalAction::Read,
            "update" => NaturalAction::Update,
            "delete" => NaturalAction::Delete,
            _ => NaturalAction::Unknown(self.action.clone()),
        }
    }
}

/// Turns a free-form request into a tagged event action.
#[async_trait]
pub trait NaturalLanguageClient: Send + Sync {
    async fn extract(&self, input: &NaturalInput) -> Result<NaturalOutput, NaturalError>;
}

/// OpenAI-compatible chat completions client (Groq by default).
pub struct ChatCompletionClient {
    client: Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
}

impl ChatCompletionClient {
    pub fn new(
        base_url: &str,
        api_key: SecretString,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NaturalError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| NaturalError::Request(error.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: model.into(),
        })
    }

    pub fn from_config(config: &NaturalConfig) -> Result<Self, NaturalError> {
        if !config.enabled {
            return Err(NaturalError::Disabled);
        }
        let api_key = config.api_key.clone().ok_or(NaturalError::MissingApiKey)?;
        Self::new(&config.base_url, api_key, config.model.clone(), Duration::from_secs(config.timeout_secs))
    }
}

#[async_trait]
impl NaturalLanguageClient for ChatCompletionClient {
    async fn extract(&self, input: &NaturalInput) -> Result<NaturalOutput, NaturalError> {
        if input.user_request.trim().is_empty() {
            return Err(NaturalError::EmptyRequest);
        }

        let body = completion_request(&self.model, input)?;
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|error| NaturalError::Request(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                event_name = "agent.natural.request_failed",
                status = %status,
                model = %self.model,
                "natural language api rejected request"
            );
            return Err(NaturalError::Status { status: status.as_u16(), body });
        }

        let completion: Value =
            response.json().await.map_err(|error| NaturalError::Decode(error.to_string()))?;
        let output = parse_completion(&completion)?;
        debug!(
            event_name = "agent.natural.extracted",
            action = %output.action,
            success = output.success,
            "natural language request extracted"
        );
        Ok(output)
    }
}

pub fn completion_request(model: &str, input: &NaturalInput) -> Result<Value, NaturalError> {
    let user = serde_json::to_string(input).map_err(|error| NaturalError::Decode(error.to_string()))?;
    Ok(json!({
        "model": model,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            { "role": "user", "content": user },
        ],
        "temperature": 1,
        "max_tokens": 1024,
        "top_p": 1,
        "stream": false,
        "response_format": { "type": "json_object" },
    }))
}

pub fn parse_completion(completion: &Value) -> Result<NaturalOutput, NaturalError> {
    let content = completion
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .filter(|content| !content.trim().is_empty())
        .ok_or(NaturalError::EmptyResponse)?;
    serde_json::from_str(content).map_err(|error| NaturalError::Decode(error.to_string()))
}

/// Returns queued outputs in order and remembers every input, for handler tests and dry runs.
#[derive(Default)]
pub struct ScriptedNaturalClient {
    outputs: Mutex<VecDeque<Result<NaturalOutput, NaturalError>>>,
    inputs: Mutex<Vec<NaturalInput>>,
}

impl ScriptedNaturalClient {
    pub fn new(outputs: Vec<Result<NaturalOutput, NaturalError>>) -> Self {
        Self { outputs: Mutex::new(outputs.into()), inputs: Mutex::new(Vec::new()) }
    }

    pub fn inputs(&self) -> Vec<NaturalInput> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl NaturalLanguageClient for ScriptedNaturalClient {
    async fn extract(&self, input: &NaturalInput) -> Result<NaturalOutput, NaturalError> {
        self.inputs.lock().push(input.clone());
        self.outputs.lock().pop_front().unwrap_or(Err(NaturalError::EmptyResponse))
    }
}
