//! Gateway side of the Discord adapter.
//!
//! A serenity client holds the websocket; every interaction it receives is turned back
//! into its wire JSON and parsed by [`parse_interaction`], so the gateway and any
//! HTTP-delivered payloads share one conversion.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use serenity::all::{Client, Context, EventHandler, GatewayIntents, Interaction as RawInteraction, Ready};
use serenity::gateway::ShardManager;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use teamdesk_core::config::DiscordConfig;

use crate::discord::parse_interaction;
use crate::gateway::GatewayTransport;
use crate::interaction::Interaction;
use crate::responder::TransportError;

const INBOX_CAPACITY: usize = 256;

type Inbound = Result<Interaction, TransportError>;

struct Connection {
    shards: Arc<ShardManager>,
    task: JoinHandle<()>,
}

pub struct DiscordGateway {
    bot_token: SecretString,
    intents: GatewayIntents,
    inbox: mpsc::Sender<Inbound>,
    receiver: Mutex<mpsc::Receiver<Inbound>>,
    connection: Mutex<Option<Connection>>,
}

impl DiscordGateway {
    pub fn new(bot_token: SecretString) -> Self {
        let (inbox, receiver) = mpsc::channel(INBOX_CAPACITY);
        Self {
            bot_token,
            // Interactions are delivered without privileged intents.
            intents: GatewayIntents::GUILDS,
            inbox,
            receiver: Mutex::new(receiver),
            connection: Mutex::new(None),
        }
    }

    pub fn from_config(config: &DiscordConfig) -> Self {
        Self::new(config.bot_token.clone())
    }

    async fn close_connection(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            connection.shards.shutdown_all().await;
            connection.task.abort();
        }
    }
}

#[async_trait]
impl GatewayTransport for DiscordGateway {
    async fn connect(&self) -> Result<(), TransportError> {
        self.close_connection().await;

        let handler = Relay { inbox: self.inbox.clone() };
        let mut client = Client::builder(self.bot_token.expose_secret(), self.intents)
            .event_handler(handler)
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let shards = client.shard_manager.clone();

        let inbox = self.inbox.clone();
        let task = tokio::spawn(async move {
            let ended = match client.start().await {
                Ok(()) => TransportError::Receive("gateway client stopped".to_owned()),
                Err(error) => TransportError::Connect(error.to_string()),
            };
            // The runner reconnects on this error; a full inbox means it is already busy.
            let _ = inbox.send(Err(ended)).await;
        });

        *self.connection.lock().await = Some(Connection { shards, task });
        Ok(())
    }

    async fn next_interaction(&self) -> Result<Option<Interaction>, TransportError> {
        match self.receiver.lock().await.recv().await {
            Some(Ok(interaction)) => Ok(Some(interaction)),
            Some(Err(error)) => Err(error),
            None => Ok(None),
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.close_connection().await;
        Ok(())
    }
}

struct Relay {
    inbox: mpsc::Sender<Inbound>,
}

impl Relay {
    /// Forwards one raw interaction. Payloads the router cannot handle (pings,
    /// autocomplete) are logged and dropped so the connection stays up.
    async fn forward(&self, raw: Value) {
        match parse_interaction(&raw) {
            Ok(interaction) => {
                if self.inbox.send(Ok(interaction)).await.is_err() {
                    warn!(event_name = "chat.gateway.inbox_closed", "interaction dropped; gateway reader is gone");
                }
            }
            Err(error) => debug!(
                event_name = "chat.gateway.interaction_skipped",
                error = %error,
                "ignoring interaction the router does not handle"
            ),
        }
    }
}

#[async_trait]
impl EventHandler for Relay {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(event_name = "chat.gateway.ready", bot = %ready.user.name, "discord gateway session ready");
    }

    async fn interaction_create(&self, _ctx: Context, interaction: RawInteraction) {
        match wire_json(&interaction) {
            Ok(raw) => self.forward(raw).await,
            Err(error) => error!(
                event_name = "chat.gateway.interaction_unreadable",
                error = %error,
                "could not serialise gateway interaction"
            ),
        }
    }
}

fn wire_json(interaction: &RawInteraction) -> Result<Value, serde_json::Error> {
    let mut raw = serde_json::to_value(interaction)?;
    if let Some(object) = raw.as_object_mut() {
        object.entry("type").or_insert_with(|| Value::from(u8::from(interaction.kind())));
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{DiscordGateway, Relay};
    use crate::gateway::GatewayTransport;
    use crate::interaction::InteractionKind;
    use crate::responder::TransportError;

    fn relay_for(gateway: &DiscordGateway) -> Relay {
        Relay { inbox: gateway.inbox.clone() }
    }

    #[tokio::test]
    async fn forwarded_commands_reach_the_runner() {
        let gateway = DiscordGateway::new("bot-token".to_owned().into());
        let relay = relay_for(&gateway);

        relay
            .forward(json!({
                "id": "900",
                "token": "interaction-token",
                "type": 2,
                "channel_id": "C1",
                "guild_id": "G1",
                "member": { "user": { "id": "U1", "username": "ann" } },
                "data": { "name": "ping" }
            }))
            .await;

        let interaction = gateway.next_interaction().await.expect("receive").expect("interaction");
        assert_eq!(interaction.kind, InteractionKind::Command);
        assert_eq!(interaction.identifier, "ping");
        assert_eq!(interaction.reply_token.token, "interaction-token");
    }

    #[tokio::test]
    async fn unsupported_interactions_are_skipped() {
        let gateway = DiscordGateway::new("bot-token".to_owned().into());
        let relay = relay_for(&gateway);

        relay
            .forward(json!({ "id": "1", "token": "t", "type": 1, "channel_id": "C1", "user": { "id": "U", "username": "u" } }))
            .await;
        relay
            .forward(json!({
                "id": "2",
                "token": "t",
                "type": 3,
                "channel_id": "C1",
                "user": { "id": "U", "username": "u" },
                "data": { "custom_id": "cancel-f1" }
            }))
            .await;

        let interaction = gateway.next_interaction().await.expect("receive").expect("interaction");
        assert_eq!(interaction.identifier, "cancel-f1");
    }

    #[tokio::test]
    async fn client_failures_surface_as_transport_errors() {
        let gateway = DiscordGateway::new("bot-token".to_owned().into());
        gateway.inbox.send(Err(TransportError::Connect("invalid token".to_owned()))).await.expect("send");

        let error = gateway.next_interaction().await.expect_err("client failure");
        assert!(matches!(error, TransportError::Connect(message) if message == "invalid token"));
    }

    #[tokio::test]
    async fn disconnect_without_a_connection_is_a_no_op() {
        let gateway = DiscordGateway::new("bot-token".to_owned().into());
        gateway.disconnect().await.expect("disconnect");
    }
}
