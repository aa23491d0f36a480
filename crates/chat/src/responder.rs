use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::error;

use teamdesk_core::errors::HandlerError;

use crate::interaction::ReplyToken;
use crate::message::{ModalSpec, ReplyPayload};

/// Interaction tokens stop accepting edits after fifteen minutes.
pub const REPLY_TOKEN_LIFETIME: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
    #[error("interaction {interaction_id} already received its initial response")]
    AlreadyResponded { interaction_id: String },
    #[error("interaction {interaction_id} has no initial response to edit")]
    NotAcknowledged { interaction_id: String },
    #[error("chat request failed: {0}")]
    Request(String),
    #[error("chat api returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl From<TransportError> for HandlerError {
    fn from(value: TransportError) -> Self {
        match value {
            TransportError::AlreadyResponded { .. } | TransportError::NotAcknowledged { .. } => {
                Self::Programmer(value.to_string())
            }
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Operations a handler may perform against the chat platform.
#[async_trait]
pub trait ResponseAdapter: Send + Sync {
    async fn reply_initial(
        &self,
        token: &ReplyToken,
        payload: ReplyPayload,
    ) -> Result<(), TransportError>;
    async fn reply_deferred(&self, token: &ReplyToken, ephemeral: bool)
        -> Result<(), TransportError>;
    async fn edit(&self, token: &ReplyToken, payload: ReplyPayload) -> Result<(), TransportError>;
    async fn open_modal(&self, token: &ReplyToken, modal: ModalSpec) -> Result<(), TransportError>;
    async fn send_channel(
        &self,
        channel_id: &str,
        payload: ReplyPayload,
    ) -> Result<(), TransportError>;
}

pub type Session = Arc<dyn ResponseAdapter>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitialResponse {
    Message,
    Deferred,
    Modal,
}

/// Tracks which tokens have spent their single initial response.
#[derive(Default)]
pub struct ReplyLedger {
    responses: Mutex<HashMap<String, (InitialResponse, Instant)>>,
}

impl ReplyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, token: &ReplyToken, kind: InitialResponse) -> Result<(), TransportError> {
        let now = Instant::now();
        let mut responses = self.responses.lock();
        responses.retain(|_, (_, at)| now.duration_since(*at) < REPLY_TOKEN_LIFETIME);

        if let Some((previous, _)) = responses.get(&token.token) {
            error!(
                event_name = "chat.responder.double_initial_reply",
                interaction_id = %token.interaction_id,
                previous = ?previous,
                attempted = ?kind,
                "rejected second initial response for interaction"
            );
            return Err(TransportError::AlreadyResponded {
                interaction_id: token.interaction_id.clone(),
            });
        }
        responses.insert(token.token.clone(), (kind, now));
        Ok(())
    }

    /// Modals cannot be edited, so only message and deferred responses qualify.
    pub fn require_editable(&self, token: &ReplyToken) -> Result<(), TransportError> {
        match self.responses.lock().get(&token.token) {
            Some((InitialResponse::Message | InitialResponse::Deferred, _)) => Ok(()),
            _ => Err(TransportError::NotAcknowledged {
                interaction_id: token.interaction_id.clone(),
            }),
        }
    }

    pub fn initial_response(&self, token: &ReplyToken) -> Option<InitialResponse> {
        self.responses.lock().get(&token.token).map(|(kind, _)| *kind)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponderCall {
    Initial { token: ReplyToken, payload: ReplyPayload },
    Deferred { token: ReplyToken, ephemeral: bool },
    Edit { token: ReplyToken, payload: ReplyPayload },
    Modal { token: ReplyToken, modal: ModalSpec },
    Channel { channel_id: String, payload: ReplyPayload },
}

impl ResponderCall {
    pub fn token(&self) -> Option<&ReplyToken> {
        match self {
            Self::Initial { token, .. }
            | Self::Deferred { token, .. }
            | Self::Edit { token, .. }
            | Self::Modal { token, .. } => Some(token),
            Self::Channel { .. } => None,
        }
    }

    pub fn payload(&self) -> Option<&ReplyPayload> {
        match self {
            Self::Initial { payload, .. } | Self::Edit { payload, .. } | Self::Channel { payload, .. } => {
                Some(payload)
            }
            Self::Deferred { .. } | Self::Modal { .. } => None,
        }
    }
}

/// In-memory adapter that applies the same reply rules as the platform and records
/// every accepted call.
#[derive(Default)]
pub struct RecordingResponder {
    ledger: ReplyLedger,
    calls: Mutex<Vec<ResponderCall>>,
    rejected: Mutex<Vec<TransportError>>,
    fail_edits: Mutex<Option<String>>,
    changed: Notify,
}

impl RecordingResponder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ResponderCall> {
        self.calls.lock().clone()
    }

    pub fn rejected(&self) -> Vec<TransportError> {
        self.rejected.lock().clone()
    }

    /// Every later `edit` fails with a request error until cleared.
    pub fn fail_edits(&self, reason: Option<&str>) {
        *self.fail_edits.lock() = reason.map(str::to_owned);
    }

    pub fn payloads_for(&self, token: &ReplyToken) -> Vec<ReplyPayload> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.token() == Some(token))
            .filter_map(ResponderCall::payload)
            .cloned()
            .collect()
    }

    pub fn last_payload_for(&self, token: &ReplyToken) -> Option<ReplyPayload> {
        self.payloads_for(token).pop()
    }

    pub fn channel_messages(&self, channel_id: &str) -> Vec<ReplyPayload> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                ResponderCall::Channel { channel_id: target, payload } if target == channel_id => {
                    Some(payload.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Waits until a recorded call satisfies `predicate` and returns it.
    pub async fn wait_for<F>(&self, predicate: F) -> ResponderCall
    where
        F: Fn(&ResponderCall) -> bool,
    {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let found = self.calls.lock().iter().find(|call| predicate(call)).cloned();
            if let Some(call) = found {
                return call;
            }
            notified.await;
        }
    }

    fn record(&self, call: ResponderCall) {
        self.calls.lock().push(call);
        self.changed.notify_waiters();
    }

    fn reject(&self, error: TransportError) -> TransportError {
        self.rejected.lock().push(error.clone());
        error
    }
}

#[async_trait]
impl ResponseAdapter for RecordingResponder {
    async fn reply_initial(
        &self,
        token: &ReplyToken,
        payload: ReplyPayload,
    ) -> Result<(), TransportError> {
        self.ledger.claim(token, InitialResponse::Message).map_err(|error| self.reject(error))?;
        self.record(ResponderCall::Initial { token: token.clone(), payload });
        Ok(())
    }

    async fn reply_deferred(
        &self,
        token: &ReplyToken,
        ephemeral: bool,
    ) -> Result<(), TransportError> {
        self.ledger.claim(token, InitialResponse::Deferred).map_err(|error| self.reject(error))?;
        self.record(ResponderCall::Deferred { token: token.clone(), ephemeral });
        Ok(())
    }

    async fn edit(&self, token: &ReplyToken, payload: ReplyPayload) -> Result<(), TransportError> {
        let failure = self.fail_edits.lock().clone();
        if let Some(reason) = failure {
            return Err(self.reject(TransportError::Request(reason)));
        }
        self.ledger.require_editable(token).map_err(|error| self.reject(error))?;
        self.record(ResponderCall::Edit { token: token.clone(), payload });
        Ok(())
    }

    async fn open_modal(&self, token: &ReplyToken, modal: ModalSpec) -> Result<(), TransportError> {
        self.ledger.claim(token, InitialResponse::Modal).map_err(|error| self.reject(error))?;
        self.record(ResponderCall::Modal { token: token.clone(), modal });
        Ok(())
    }

    async fn send_channel(
        &self,
        channel_id: &str,
        payload: ReplyPayload,
    ) -> Result<(), TransportError> {
        self.record(ResponderCall::Channel { channel_id: channel_id.to_owned(), payload });
        Ok(())
    }
}
