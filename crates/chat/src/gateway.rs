use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::interaction::Interaction;
use crate::responder::{Session, TransportError};
use crate::router::{InteractionRouter, RouteOutcome};

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Inbound side of the chat connection. `next_interaction` yields `None` once the stream
/// has closed cleanly.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_interaction(&self) -> Result<Option<Interaction>, TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Feeds interactions pushed through an in-process sender; closes when every sender drops.
pub struct ChannelTransport {
    receiver: Mutex<mpsc::Receiver<Interaction>>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> (Self, mpsc::Sender<Interaction>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { receiver: Mutex::new(receiver) }, sender)
    }
}

#[async_trait]
impl GatewayTransport for ChannelTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_interaction(&self) -> Result<Option<Interaction>, TransportError> {
        Ok(self.receiver.lock().await.recv().await)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

enum PumpEnd {
    StreamClosed,
    Shutdown,
}

/// Pulls interactions off the transport and routes each on its own task, so a handler
/// waiting on a flow never blocks the click that would resolve it.
pub struct GatewayRunner {
    transport: Arc<dyn GatewayTransport>,
    router: Arc<InteractionRouter>,
    session: Session,
    reconnect_policy: ReconnectPolicy,
    shutdown_grace: Duration,
}

impl GatewayRunner {
    pub fn new(
        transport: Arc<dyn GatewayTransport>,
        router: Arc<InteractionRouter>,
        session: Session,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, router, session, reconnect_policy, shutdown_grace: DEFAULT_SHUTDOWN_GRACE }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Runs until the stream closes, `shutdown` flips to true, or retries are exhausted.
    /// In-flight handlers get the shutdown grace period to finish.
    pub async fn start(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut in_flight = JoinSet::new();

        for attempt in 0..=self.reconnect_policy.max_retries {
            match self.connect_and_pump(attempt, &mut in_flight, &mut shutdown).await {
                Ok(PumpEnd::Shutdown) => break,
                Ok(PumpEnd::StreamClosed) => {
                    info!(event_name = "chat.gateway.closed", "chat gateway stream ended");
                    break;
                }
                Err(transport_error) => {
                    warn!(
                        event_name = "chat.gateway.transport_failed",
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "chat gateway transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "chat gateway retries exhausted; continuing process without crash"
                        );
                        break;
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        self.drain(in_flight).await;
        Ok(())
    }

    async fn connect_and_pump(
        &self,
        attempt: u32,
        in_flight: &mut JoinSet<RouteOutcome>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<PumpEnd, TransportError> {
        info!(attempt, "opening chat gateway connection");
        self.transport.connect().await?;
        info!(attempt, "chat gateway connected");

        loop {
            while in_flight.try_join_next().is_some() {}

            if *shutdown.borrow() {
                info!(event_name = "chat.gateway.shutdown", "shutdown requested; closing gateway");
                self.transport.disconnect().await?;
                return Ok(PumpEnd::Shutdown);
            }

            let next = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Sender dropped; treat it like a shutdown request.
                        self.transport.disconnect().await?;
                        return Ok(PumpEnd::Shutdown);
                    }
                    continue;
                }
                next = self.transport.next_interaction() => next?,
            };

            let Some(interaction) = next else {
                info!(attempt, "chat gateway stream closed");
                self.transport.disconnect().await?;
                return Ok(PumpEnd::StreamClosed);
            };

            debug!(
                event_name = "chat.gateway.interaction_received",
                interaction_id = %interaction.reply_token.interaction_id,
                interaction_kind = interaction.kind.as_str(),
                identifier = %interaction.identifier,
                channel_id = %interaction.channel_id,
                "received interaction"
            );

            let router = self.router.clone();
            let session = self.session.clone();
            in_flight.spawn(async move { router.route(session, interaction).await });
        }
    }

    async fn drain(&self, mut in_flight: JoinSet<RouteOutcome>) {
        if in_flight.is_empty() {
            return;
        }
        info!(pending = in_flight.len(), "waiting for in-flight interactions");

        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(joined) = in_flight.join_next().await {
                if let Err(join_error) = joined {
                    warn!(error = %join_error, "interaction task ended abnormally");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                pending = in_flight.len(),
                grace_ms = self.shutdown_grace.as_millis() as u64,
                "shutdown grace elapsed; aborting remaining interactions"
            );
            in_flight.abort_all();
        }
    }
}
