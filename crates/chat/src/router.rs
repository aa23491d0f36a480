use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use teamdesk_core::errors::HandlerError;

use crate::interaction::{Interaction, InteractionKind};
use crate::message::ReplyPayload;
use crate::registry::{CommandRegistry, InteractionHandler, SharedHandler};
use crate::responder::Session;

pub const UNKNOWN_COMMAND_REPLY: &str = "Unknown command.";
pub const ACTION_EXPIRED_REPLY: &str = "Action expired";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    Handled,
    HandlerFailed,
    Fallback,
}

/// Resolves each interaction against the registry by exact identifier and runs the
/// handler. Nothing escapes `route`; failures are logged and the transport continues.
pub struct InteractionRouter {
    registry: Arc<CommandRegistry>,
}

impl InteractionRouter {
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    pub async fn route(&self, session: Session, interaction: Interaction) -> RouteOutcome {
        let kind = interaction.kind;
        let identifier = interaction.identifier.clone();
        let channel_id = interaction.channel_id.clone();

        let Some(handler) = self.registry.get(kind, &identifier) else {
            info!(
                event_name = "chat.router.miss",
                interaction_kind = kind.as_str(),
                identifier = %identifier,
                channel_id = %channel_id,
                "no handler registered for interaction"
            );
            send_fallback(&session, &interaction).await;
            return RouteOutcome::Fallback;
        };

        match handler.handle(session, interaction).await {
            Ok(()) => RouteOutcome::Handled,
            Err(handler_error) => {
                log_handler_error(kind, &identifier, &channel_id, &handler_error);
                RouteOutcome::HandlerFailed
            }
        }
    }
}

async fn send_fallback(session: &Session, interaction: &Interaction) {
    let text = match interaction.kind {
        InteractionKind::Command => UNKNOWN_COMMAND_REPLY,
        InteractionKind::Component | InteractionKind::Modal => ACTION_EXPIRED_REPLY,
    };
    if let Err(error) =
        session.reply_initial(&interaction.reply_token, ReplyPayload::text(text).ephemeral()).await
    {
        warn!(
            event_name = "chat.router.fallback_failed",
            identifier = %interaction.identifier,
            error = %error,
            "failed to send fallback reply"
        );
    }
}

fn log_handler_error(kind: InteractionKind, identifier: &str, channel_id: &str, handler_error: &HandlerError) {
    if handler_error.is_user_visible() {
        warn!(
            event_name = "chat.router.handler_failed",
            interaction_kind = kind.as_str(),
            identifier = %identifier,
            channel_id = %channel_id,
            error_kind = handler_error.kind().as_str(),
            error = %handler_error,
            "handler reported a recoverable failure"
        );
    } else {
        error!(
            event_name = "chat.router.handler_failed",
            interaction_kind = kind.as_str(),
            identifier = %identifier,
            channel_id = %channel_id,
            error_kind = handler_error.kind().as_str(),
            error = %handler_error,
            "handler failed"
        );
    }
}

/// Top-level handler for a command with subcommands. The inner table is fixed when the
/// command is registered.
pub struct SubcommandDispatcher {
    command: &'static str,
    subcommands: HashMap<&'static str, SharedHandler>,
}

impl SubcommandDispatcher {
    pub fn new(command: &'static str) -> Self {
        Self { command, subcommands: HashMap::new() }
    }

    pub fn with(mut self, name: &'static str, handler: SharedHandler) -> Self {
        self.subcommands.insert(name, handler);
        self
    }

    pub fn subcommand_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.subcommands.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl InteractionHandler for SubcommandDispatcher {
    async fn handle(&self, session: Session, interaction: Interaction) -> Result<(), HandlerError> {
        let handler = interaction.subcommand().and_then(|name| self.subcommands.get(name)).cloned();
        let Some(handler) = handler else {
            info!(
                event_name = "chat.router.miss",
                interaction_kind = "subcommand",
                identifier = %self.command,
                subcommand = interaction.subcommand().unwrap_or("<none>"),
                "no subcommand handler registered"
            );
            session
                .reply_initial(&interaction.reply_token, ReplyPayload::text(UNKNOWN_COMMAND_REPLY).ephemeral())
                .await?;
            return Ok(());
        };
        handler.handle(session, interaction).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use teamdesk_core::errors::HandlerError;

    use super::{InteractionRouter, RouteOutcome, SubcommandDispatcher, ACTION_EXPIRED_REPLY};
    use crate::interaction::{Interaction, InteractionKind, Invoker, ReplyToken};
    use crate::message::ReplyPayload;
    use crate::registry::{CommandRegistry, InteractionHandler};
    use crate::responder::{RecordingResponder, ResponderCall, Session};

    struct Counting {
        calls: AtomicUsize,
        result: Result<(), HandlerError>,
    }

    #[async_trait]
    impl InteractionHandler for Counting {
        async fn handle(&self, session: Session, interaction: Interaction) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            session.reply_initial(&interaction.reply_token, ReplyPayload::text("ok")).await?;
            self.result.clone()
        }
    }

    fn invoker() -> Invoker {
        Invoker { id: "U1".to_owned(), username: "ann".to_owned() }
    }

    fn command(name: &str, subcommand: Option<&str>, id: &str) -> Interaction {
        Interaction::command(name, subcommand, Vec::new(), invoker(), "C1", ReplyToken::new(id, id))
    }

    #[tokio::test]
    async fn unknown_component_gets_ephemeral_action_expired() {
        let router = InteractionRouter::new(Arc::new(CommandRegistry::new()));
        let responder = Arc::new(RecordingResponder::new());
        let interaction =
            Interaction::component("yes-nonexistent", invoker(), "C1", ReplyToken::new("i-1", "t-1"));

        let outcome = router.route(responder.clone(), interaction).await;

        assert_eq!(outcome, RouteOutcome::Fallback);
        match &responder.calls()[..] {
            [ResponderCall::Initial { payload, .. }] => {
                assert_eq!(payload.content_text(), ACTION_EXPIRED_REPLY);
                assert!(payload.ephemeral);
            }
            other => panic!("unexpected calls {other:?}"),
        }
    }

    #[tokio::test]
    async fn handler_errors_are_contained() {
        let registry = Arc::new(CommandRegistry::new());
        let handler = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            result: Err(HandlerError::Persistence("disk full".to_owned())),
        });
        registry.add(InteractionKind::Command, "ping", handler.clone());
        let router = InteractionRouter::new(registry);

        let outcome = router.route(Arc::new(RecordingResponder::new()), command("ping", None, "i-1")).await;

        assert_eq!(outcome, RouteOutcome::HandlerFailed);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subcommands_dispatch_through_the_inner_table() {
        let create = Arc::new(Counting { calls: AtomicUsize::new(0), result: Ok(()) });
        let registry = Arc::new(CommandRegistry::new());
        registry.add(
            InteractionKind::Command,
            "event",
            Arc::new(SubcommandDispatcher::new("event").with("create", create.clone())),
        );
        let router = InteractionRouter::new(registry);
        let responder = Arc::new(RecordingResponder::new());

        let handled = router.route(responder.clone(), command("event", Some("create"), "i-1")).await;
        let unknown = router.route(responder.clone(), command("event", Some("explode"), "i-2")).await;

        assert_eq!(handled, RouteOutcome::Handled);
        assert_eq!(unknown, RouteOutcome::Handled);
        assert_eq!(create.calls.load(Ordering::SeqCst), 1);
        let reply = responder.last_payload_for(&ReplyToken::new("i-2", "i-2")).expect("fallback");
        assert_eq!(reply.content_text(), "Unknown command.");
    }
}
