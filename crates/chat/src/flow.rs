//! Prompt-and-await conversations over buttons and modals.
//!
//! A [`Flow`] owns a uuid flow-id and registers short-lived handlers under identifiers that
//! embed it (`confirm-<flow>`, `cancel-<flow>`, `select-<n>-<flow>`, `modal-<flow>`).
//! Each prompt step waits for the first click or submission, or for the deadline.
//! Exactly one of those wins. Every identifier the flow registered is removed before the
//! step returns, and again when the flow is dropped.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use teamdesk_core::errors::HandlerError;

use crate::interaction::{Interaction, InteractionKind, ReplyToken};
use crate::message::{Button, ButtonStyle, ModalSpec, ReplyPayload};
use crate::registry::{CommandRegistry, InteractionHandler};
use crate::responder::{Session, TransportError};
use crate::router::ACTION_EXPIRED_REPLY;

pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(120);
pub const TIMEOUT_NOTICE: &str = "Timed out waiting for confirmation.";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FlowId(String);

impl FlowId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Carries the click, whose token is unused and must receive the next reply.
    Confirmed(Interaction),
    Cancelled(Interaction),
    Selected { index: usize, interaction: Interaction },
    Submitted(Interaction),
    TimedOut,
    Failed(TransportError),
}

impl FlowOutcome {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Confirmed(_) => "confirmed",
            Self::Cancelled(_) => "cancelled",
            Self::Selected { .. } => "selected",
            Self::Submitted(_) => "submitted",
            Self::TimedOut => "timed_out",
            Self::Failed(_) => "failed",
        }
    }
}

/// Labels for a two-button confirmation prompt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmLabels {
    pub confirm: String,
    pub cancel: String,
}

impl ConfirmLabels {
    pub fn new(confirm: impl Into<String>, cancel: impl Into<String>) -> Self {
        Self { confirm: confirm.into(), cancel: cancel.into() }
    }
}

impl Default for ConfirmLabels {
    fn default() -> Self {
        Self::new("Yes", "Cancel")
    }
}

/// Builds flows that share a registry, session and deadline.
#[derive(Clone)]
pub struct FlowCoordinator {
    registry: Arc<CommandRegistry>,
    deadline: Duration,
}

impl FlowCoordinator {
    pub fn new(registry: Arc<CommandRegistry>, deadline: Duration) -> Self {
        Self { registry, deadline }
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// `prompt_token` must already carry a deferred or message response so it can be edited.
    pub fn open(&self, session: Session, prompt_token: ReplyToken, channel_id: &str) -> Flow {
        Flow {
            id: FlowId::generate(),
            registry: self.registry.clone(),
            session,
            prompt_token,
            channel_id: channel_id.to_owned(),
            deadline: self.deadline,
            registered: Vec::new(),
        }
    }
}

pub struct Flow {
    id: FlowId,
    registry: Arc<CommandRegistry>,
    session: Session,
    prompt_token: ReplyToken,
    channel_id: String,
    deadline: Duration,
    registered: Vec<(InteractionKind, String)>,
}

impl Flow {
    pub fn id(&self) -> &FlowId {
        &self.id
    }

    pub fn prompt_token(&self) -> &ReplyToken {
        &self.prompt_token
    }

    /// Later prompts edit the reply behind `token` instead.
    pub fn retarget(&mut self, token: ReplyToken) {
        self.prompt_token = token;
    }

    pub fn confirm_id(&self) -> String {
        format!("confirm-{}", self.id)
    }

    pub fn cancel_id(&self) -> String {
        format!("cancel-{}", self.id)
    }

    pub fn select_id(&self, prefix: &str, index: usize) -> String {
        format!("{prefix}-{index}-{}", self.id)
    }

    pub fn modal_id(&self) -> String {
        format!("modal-{}", self.id)
    }

    /// Edits the prompt to show `prompt` with confirm and cancel buttons and waits.
    pub async fn confirm(&mut self, prompt: ReplyPayload, labels: ConfirmLabels) -> FlowOutcome {
        let rendezvous = Rendezvous::new();
        let confirm_id = self.confirm_id();
        let cancel_id = self.cancel_id();
        self.register(InteractionKind::Component, &confirm_id, &rendezvous, Choice::Confirm);
        self.register(InteractionKind::Component, &cancel_id, &rendezvous, Choice::Cancel);

        let prompt = prompt.with_buttons(vec![
            Button::new(confirm_id, labels.confirm).style(ButtonStyle::Success),
            Button::new(cancel_id, labels.cancel).style(ButtonStyle::Danger),
        ]);
        self.run_prompt(prompt, rendezvous).await
    }

    /// Shows one button per label; `id_prefix` names the buttons `<prefix>-<n>-<flow>`.
    pub async fn select(&mut self, prompt: ReplyPayload, labels: &[String], id_prefix: &str) -> FlowOutcome {
        let rendezvous = Rendezvous::new();
        let mut buttons = Vec::with_capacity(labels.len());
        for (index, label) in labels.iter().enumerate() {
            let custom_id = self.select_id(id_prefix, index);
            self.register(InteractionKind::Component, &custom_id, &rendezvous, Choice::Select(index));
            buttons.push(Button::new(custom_id, label.clone()).style(ButtonStyle::Primary));
        }
        self.run_prompt(prompt.with_buttons(buttons), rendezvous).await
    }

    /// Opens `modal` in response to `click`, whose token must still be unused.
    pub async fn modal(&mut self, click: &Interaction, mut modal: ModalSpec) -> FlowOutcome {
        let rendezvous = Rendezvous::new();
        let modal_id = self.modal_id();
        self.register(InteractionKind::Modal, &modal_id, &rendezvous, Choice::Submit);
        modal.custom_id = modal_id;

        if let Err(error) = self.session.open_modal(&click.reply_token, modal).await {
            warn!(
                event_name = "chat.flow.prompt_failed",
                flow_id = %self.id,
                channel_id = %self.channel_id,
                error = %error,
                "failed to open modal"
            );
            self.release();
            return self.finish(FlowOutcome::Failed(error));
        }

        let outcome = self.wait(rendezvous).await;
        self.release();
        self.finish(outcome)
    }

    /// Channel-level notice for when the deadline passed and no fresh token exists.
    pub async fn notify_timeout(&self) -> Result<(), HandlerError> {
        self.session.send_channel(&self.channel_id, ReplyPayload::text(TIMEOUT_NOTICE)).await?;
        Ok(())
    }

    async fn run_prompt(&mut self, prompt: ReplyPayload, rendezvous: Arc<Rendezvous>) -> FlowOutcome {
        if let Err(error) = self.session.edit(&self.prompt_token, prompt.clone()).await {
            warn!(
                event_name = "chat.flow.prompt_failed",
                flow_id = %self.id,
                channel_id = %self.channel_id,
                error = %error,
                "failed to deliver flow prompt"
            );
            self.release();
            return self.finish(FlowOutcome::Failed(error));
        }

        let outcome = self.wait(rendezvous).await;
        self.release();

        if let Err(error) = self.session.edit(&self.prompt_token, prompt.with_buttons_disabled()).await {
            debug!(
                event_name = "chat.flow.disable_failed",
                flow_id = %self.id,
                error = %error,
                "could not disable prompt buttons"
            );
        }
        self.finish(outcome)
    }

    async fn wait(&self, rendezvous: Arc<Rendezvous>) -> FlowOutcome {
        let Some(mut outcomes) = rendezvous.take_receiver() else {
            return FlowOutcome::TimedOut;
        };

        tokio::select! {
            biased;
            Some(outcome) = outcomes.recv() => outcome,
            () = tokio::time::sleep(self.deadline) => {
                if rendezvous.claim() {
                    FlowOutcome::TimedOut
                } else {
                    // A click claimed the flow just as the deadline passed; its send is
                    // already in flight.
                    outcomes.recv().await.unwrap_or(FlowOutcome::TimedOut)
                }
            }
        }
    }

    fn finish(&self, outcome: FlowOutcome) -> FlowOutcome {
        info!(
            event_name = "chat.flow.outcome",
            flow_id = %self.id,
            channel_id = %self.channel_id,
            outcome = outcome.name(),
            "flow step finished"
        );
        outcome
    }

    fn register(
        &mut self,
        kind: InteractionKind,
        identifier: &str,
        rendezvous: &Arc<Rendezvous>,
        choice: Choice,
    ) {
        let handler = TransientHandler { rendezvous: rendezvous.clone(), choice };
        self.registry.add(kind, identifier, Arc::new(handler));
        self.registered.push((kind, identifier.to_owned()));
    }

    fn release(&mut self) {
        for (kind, identifier) in self.registered.drain(..) {
            self.registry.remove(kind, &identifier);
        }
    }
}

impl Drop for Flow {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Clone, Copy, Debug)]
enum Choice {
    Confirm,
    Cancel,
    Select(usize),
    Submit,
}

impl Choice {
    fn outcome(self, interaction: Interaction) -> FlowOutcome {
        match self {
            Self::Confirm => FlowOutcome::Confirmed(interaction),
            Self::Cancel => FlowOutcome::Cancelled(interaction),
            Self::Select(index) => FlowOutcome::Selected { index, interaction },
            Self::Submit => FlowOutcome::Submitted(interaction),
        }
    }
}

/// Shared by every handler of one prompt step; the first claimant owns the outcome.
struct Rendezvous {
    claimed: AtomicBool,
    sender: mpsc::Sender<FlowOutcome>,
    receiver: parking_lot::Mutex<Option<mpsc::Receiver<FlowOutcome>>>,
}

impl Rendezvous {
    fn new() -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(1);
        Arc::new(Self {
            claimed: AtomicBool::new(false),
            sender,
            receiver: parking_lot::Mutex::new(Some(receiver)),
        })
    }

    fn claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::AcqRel)
    }

    fn take_receiver(&self) -> Option<mpsc::Receiver<FlowOutcome>> {
        self.receiver.lock().take()
    }
}

struct TransientHandler {
    rendezvous: Arc<Rendezvous>,
    choice: Choice,
}

#[async_trait]
impl InteractionHandler for TransientHandler {
    async fn handle(&self, session: Session, interaction: Interaction) -> Result<(), HandlerError> {
        if self.rendezvous.claim() {
            let identifier = interaction.identifier.clone();
            if self.rendezvous.sender.try_send(self.choice.outcome(interaction)).is_err() {
                debug!(
                    event_name = "chat.flow.outcome_dropped",
                    identifier = %identifier,
                    "flow stopped waiting before the outcome arrived"
                );
            }
            return Ok(());
        }

        debug!(
            event_name = "chat.flow.late_click",
            identifier = %interaction.identifier,
            "flow already settled"
        );
        session
            .reply_initial(&interaction.reply_token, ReplyPayload::text(ACTION_EXPIRED_REPLY).ephemeral())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{ConfirmLabels, Flow, FlowCoordinator, FlowOutcome};
    use crate::interaction::{Interaction, InteractionKind, Invoker, ReplyToken};
    use crate::message::{ModalSpec, ReplyPayload};
    use crate::registry::CommandRegistry;
    use crate::responder::{RecordingResponder, ResponderCall, ResponseAdapter, TransportError};
    use crate::router::{InteractionRouter, RouteOutcome, ACTION_EXPIRED_REPLY};

    struct Harness {
        registry: Arc<CommandRegistry>,
        router: InteractionRouter,
        responder: Arc<RecordingResponder>,
        coordinator: FlowCoordinator,
    }

    impl Harness {
        fn new(deadline: Duration) -> Self {
            let registry = Arc::new(CommandRegistry::new());
            Self {
                router: InteractionRouter::new(registry.clone()),
                coordinator: FlowCoordinator::new(registry.clone(), deadline),
                responder: Arc::new(RecordingResponder::new()),
                registry,
            }
        }

        async fn deferred_flow(&self, token: &str) -> Flow {
            let token = ReplyToken::new(format!("i-{token}"), format!("t-{token}"));
            self.responder.reply_deferred(&token, false).await.expect("defer");
            self.coordinator.open(self.responder.clone(), token, "C1")
        }

        async fn wait_for_prompt(&self, prompt: &ReplyToken) -> Vec<String> {
            let call = tokio::time::timeout(
                Duration::from_secs(5),
                self.responder.wait_for(|call| {
                    matches!(call, ResponderCall::Edit { token, payload }
                        if token == prompt && !payload.custom_ids().is_empty())
                }),
            )
            .await
            .expect("prompt was sent");
            match call {
                ResponderCall::Edit { payload, .. } => {
                    payload.custom_ids().into_iter().map(str::to_owned).collect()
                }
                other => panic!("unexpected call {other:?}"),
            }
        }

        async fn click(&self, custom_id: &str, token: &str) -> RouteOutcome {
            let interaction = Interaction::component(
                custom_id,
                Invoker { id: "U1".to_owned(), username: "ann".to_owned() },
                "C1",
                ReplyToken::new(format!("i-{token}"), format!("t-{token}")),
            );
            self.router.route(self.responder.clone(), interaction).await
        }
    }

    fn prompt() -> ReplyPayload {
        ReplyPayload::text("Is this correct?")
    }

    #[tokio::test]
    async fn confirm_click_wins_and_cleans_up() {
        let harness = Arc::new(Harness::new(Duration::from_secs(5)));
        let mut flow = harness.deferred_flow("cmd").await;
        let flow_id = flow.id().to_string();
        let prompt_token = flow.prompt_token().clone();

        let clicker = {
            let harness = harness.clone();
            tokio::spawn(async move {
                let ids = harness.wait_for_prompt(&prompt_token).await;
                harness.click(&ids[0], "click-1").await
            })
        };

        let outcome = flow.confirm(prompt(), ConfirmLabels::default()).await;
        assert_eq!(clicker.await.expect("join"), RouteOutcome::Handled);

        match outcome {
            FlowOutcome::Confirmed(click) => assert_eq!(click.reply_token.token, "t-click-1"),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(harness.registry.identifiers_containing(&flow_id).is_empty());

        let last = harness.responder.last_payload_for(flow.prompt_token()).expect("prompt");
        assert!(last.components[0].buttons.iter().all(|button| button.disabled));
    }

    #[tokio::test]
    async fn cancel_click_reports_cancelled() {
        let harness = Arc::new(Harness::new(Duration::from_secs(5)));
        let mut flow = harness.deferred_flow("cmd").await;
        let prompt_token = flow.prompt_token().clone();

        let clicker = {
            let harness = harness.clone();
            tokio::spawn(async move {
                let ids = harness.wait_for_prompt(&prompt_token).await;
                harness.click(&ids[1], "click-1").await
            })
        };

        let outcome = flow.confirm(prompt(), ConfirmLabels::default()).await;
        clicker.await.expect("join");

        assert!(matches!(outcome, FlowOutcome::Cancelled(_)));
        assert!(harness.registry.identifiers_containing(flow.id().as_str()).is_empty());
    }

    #[tokio::test]
    async fn deadline_without_click_times_out_and_cleans_up() {
        let harness = Harness::new(Duration::from_millis(50));
        let mut flow = harness.deferred_flow("cmd").await;

        let outcome = flow.confirm(prompt(), ConfirmLabels::default()).await;
        flow.notify_timeout().await.expect("notice");

        assert_eq!(outcome, FlowOutcome::TimedOut);
        assert!(harness.registry.identifiers_containing(flow.id().as_str()).is_empty());
        assert_eq!(
            harness.responder.channel_messages("C1")[0].content_text(),
            "Timed out waiting for confirmation."
        );
    }

    #[tokio::test]
    async fn prompt_delivery_failure_reports_failed_and_cleans_up() {
        let harness = Harness::new(Duration::from_secs(5));
        let mut flow = harness.deferred_flow("cmd").await;
        harness.responder.fail_edits(Some("gateway reset"));

        let outcome = flow.confirm(prompt(), ConfirmLabels::default()).await;

        assert_eq!(outcome, FlowOutcome::Failed(TransportError::Request("gateway reset".to_owned())));
        assert!(harness.registry.identifiers_containing(flow.id().as_str()).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn rapid_clicks_observe_a_single_outcome() {
        let harness = Arc::new(Harness::new(Duration::from_secs(5)));
        let mut flow = harness.deferred_flow("cmd").await;
        let prompt_token = flow.prompt_token().clone();

        let clickers = {
            let harness = harness.clone();
            tokio::spawn(async move {
                let ids = harness.wait_for_prompt(&prompt_token).await;
                let mut tasks = Vec::new();
                for (index, id) in ids.iter().cycle().take(6).enumerate() {
                    let harness = harness.clone();
                    let id = id.clone();
                    tasks.push(tokio::spawn(async move { harness.click(&id, &format!("c{index}")).await }));
                }
                for task in tasks {
                    task.await.expect("click");
                }
            })
        };

        let outcome = flow.confirm(prompt(), ConfirmLabels::default()).await;
        clickers.await.expect("join");

        assert!(matches!(outcome, FlowOutcome::Confirmed(_) | FlowOutcome::Cancelled(_)));
        let expired = harness
            .responder
            .calls()
            .iter()
            .filter(|call| {
                matches!(call, ResponderCall::Initial { payload, .. }
                    if payload.content_text() == ACTION_EXPIRED_REPLY)
            })
            .count();
        assert_eq!(expired, 5, "every losing click is told the action expired");
        assert!(harness.registry.identifiers_containing(flow.id().as_str()).is_empty());
    }

    #[tokio::test]
    async fn click_for_one_flow_never_wakes_another() {
        let harness = Arc::new(Harness::new(Duration::from_millis(300)));
        let mut first = harness.deferred_flow("one").await;
        let mut second = harness.deferred_flow("two").await;
        let first_token = first.prompt_token().clone();
        assert_ne!(first.id(), second.id());

        let clicker = {
            let harness = harness.clone();
            tokio::spawn(async move {
                let ids = harness.wait_for_prompt(&first_token).await;
                harness.click(&ids[0], "click-1").await
            })
        };

        let (first_outcome, second_outcome) = tokio::join!(
            first.confirm(prompt(), ConfirmLabels::default()),
            second.confirm(prompt(), ConfirmLabels::default()),
        );
        clicker.await.expect("join");

        assert!(matches!(first_outcome, FlowOutcome::Confirmed(_)));
        assert_eq!(second_outcome, FlowOutcome::TimedOut);
    }

    #[tokio::test]
    async fn indexed_selection_reports_the_clicked_index() {
        let harness = Arc::new(Harness::new(Duration::from_secs(5)));
        let mut flow = harness.deferred_flow("cmd").await;
        let prompt_token = flow.prompt_token().clone();
        let labels: Vec<String> = (1..=7).map(|n| n.to_string()).collect();

        let clicker = {
            let harness = harness.clone();
            tokio::spawn(async move {
                let ids = harness.wait_for_prompt(&prompt_token).await;
                assert!(ids[5].starts_with("revoke-session-5-"));
                harness.click(&ids[5], "click-1").await
            })
        };

        let outcome = flow.select(ReplyPayload::text("Which session?"), &labels, "revoke-session").await;
        clicker.await.expect("join");

        assert!(matches!(outcome, FlowOutcome::Selected { index: 5, .. }));
        assert!(harness.registry.identifiers_containing(flow.id().as_str()).is_empty());
    }

    #[tokio::test]
    async fn modal_step_opens_on_click_token_and_returns_submission() {
        let harness = Arc::new(Harness::new(Duration::from_secs(5)));
        let mut flow = harness.deferred_flow("cmd").await;
        let click = Interaction::component(
            flow.confirm_id(),
            Invoker { id: "U1".to_owned(), username: "ann".to_owned() },
            "C1",
            ReplyToken::new("i-click", "t-click"),
        );
        let modal_id = flow.modal_id();

        let submitter = {
            let harness = harness.clone();
            tokio::spawn(async move {
                harness.responder.wait_for(|call| matches!(call, ResponderCall::Modal { .. })).await;
                let fields = std::collections::BTreeMap::from([("name".to_owned(), "Holidays".to_owned())]);
                let submission = Interaction::modal(
                    modal_id,
                    fields,
                    Invoker { id: "U1".to_owned(), username: "ann".to_owned() },
                    "C1",
                    ReplyToken::new("i-modal", "t-modal"),
                );
                harness.router.route(harness.responder.clone(), submission).await
            })
        };

        let outcome =
            flow.modal(&click, ModalSpec::new("Enter a name for the calendar").short_input("name", "Name")).await;
        assert_eq!(submitter.await.expect("join"), RouteOutcome::Handled);

        match outcome {
            FlowOutcome::Submitted(submission) => assert_eq!(submission.field("name"), Some("Holidays")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(harness.registry.len(InteractionKind::Modal) == 0);
    }

    #[tokio::test]
    async fn dropping_a_flow_mid_wait_deregisters_its_handlers() {
        let harness = Arc::new(Harness::new(Duration::from_secs(30)));
        let mut flow = harness.deferred_flow("cmd").await;
        let flow_id = flow.id().to_string();
        let prompt_token = flow.prompt_token().clone();

        let waiting = tokio::spawn(async move {
            let _ = flow.confirm(prompt(), ConfirmLabels::default()).await;
        });
        harness.wait_for_prompt(&prompt_token).await;
        assert_eq!(harness.registry.identifiers_containing(&flow_id).len(), 2);

        waiting.abort();
        let _ = waiting.await;

        assert!(harness.registry.identifiers_containing(&flow_id).is_empty());
    }
}
