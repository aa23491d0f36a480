use std::sync::Arc;
use std::time::Duration;

use teamdesk_agent::calendar_source::{CalendarSourceError, HttpCalendarSource};
use teamdesk_agent::natural::{ChatCompletionClient, NaturalError};
use teamdesk_chat::discord::DiscordClient;
use teamdesk_chat::discord_gateway::DiscordGateway;
use teamdesk_chat::gateway::{GatewayRunner, GatewayTransport, ReconnectPolicy};
use teamdesk_chat::{CommandRegistry, FlowCoordinator, InteractionRouter, Session, TransportError};
use teamdesk_core::config::{AppConfig, ConfigError, LoadOptions};
use teamdesk_core::time::DateParser;
use teamdesk_core::token::LoginTokenSigner;
use teamdesk_db::{connect_with_settings, ensure_data_dir, migrations, DbPool};
use teamdesk_handlers::{all_schemas, register_all, HandlerContext};
use thiserror::Error;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub registry: Arc<CommandRegistry>,
    pub handlers: Arc<HandlerContext>,
    pub gateway: GatewayRunner,
    discord: Option<Arc<DiscordClient>>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not create data directory: {0}")]
    DataDir(#[source] std::io::Error),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("discord client setup failed: {0}")]
    Discord(#[source] TransportError),
    #[error("calendar fetcher setup failed: {0}")]
    CalendarSource(#[source] CalendarSourceError),
    #[error("natural-language client setup failed: {0}")]
    Natural(#[source] NaturalError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

/// Production wiring: interactions arrive over the Discord gateway and replies go through
/// the REST adapter.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let discord = Arc::new(DiscordClient::from_config(&config.discord).map_err(BootstrapError::Discord)?);
    let session: Session = discord.clone();
    let transport = Arc::new(DiscordGateway::from_config(&config.discord));
    let mut app = assemble(config, session, transport).await?;
    app.discord = Some(discord);
    Ok(app)
}

pub async fn assemble(
    config: AppConfig,
    session: Session,
    transport: Arc<dyn GatewayTransport>,
) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    if config.database.url.starts_with("sqlite://") {
        ensure_data_dir(&config.storage.data_dir).await.map_err(BootstrapError::DataDir)?;
    }
    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let registry = Arc::new(CommandRegistry::new());
    let flows = FlowCoordinator::new(
        registry.clone(),
        Duration::from_secs(config.flow.confirmation_timeout_secs),
    );
    let calendar_source = HttpCalendarSource::new(
        Duration::from_secs(config.calendar.fetch_timeout_secs),
        config.timezone,
    )
    .map_err(BootstrapError::CalendarSource)?;

    let mut handlers = HandlerContext::new(db_pool.clone(), flows, Arc::new(calendar_source))
        .with_dates(DateParser::new(config.timezone))
        .with_signer(LoginTokenSigner::new(config.server.jwt_secret.clone()))
        .with_dashboard_url(config.server.public_url.clone());
    if config.natural.enabled {
        let client = ChatCompletionClient::from_config(&config.natural).map_err(BootstrapError::Natural)?;
        handlers = handlers.with_natural(Arc::new(client));
    }
    let handlers = Arc::new(handlers);
    let commands = register_all(&registry, handlers.clone());

    let router = Arc::new(InteractionRouter::new(registry.clone()));
    let gateway = GatewayRunner::new(transport, router, session, ReconnectPolicy::default())
        .with_shutdown_grace(Duration::from_secs(config.server.graceful_shutdown_secs));
    info!(
        event_name = "system.bootstrap.ready",
        commands,
        natural_enabled = config.natural.enabled,
        "application state assembled"
    );

    Ok(Application { config, db_pool, registry, handlers, gateway, discord: None })
}

impl Application {
    /// Pushes the command schemas to the configured guild. Failures are logged; the bot
    /// keeps serving whatever schema the platform already has.
    pub async fn sync_commands(&self) {
        let Some(discord) = self.discord.as_ref().filter(|_| self.config.discord.sync_commands) else {
            return;
        };
        match discord.sync_commands(&self.config.discord.guild_id, &all_schemas()).await {
            Ok(count) => info!(
                event_name = "system.bootstrap.commands_synced",
                guild_id = %self.config.discord.guild_id,
                count,
                "command schemas synchronised"
            ),
            Err(error) => warn!(
                event_name = "system.bootstrap.commands_sync_failed",
                error = %error,
                "could not synchronise command schemas"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use teamdesk_chat::gateway::ChannelTransport;
    use teamdesk_chat::{Interaction, InteractionKind, Invoker, RecordingResponder, ReplyToken};
    use teamdesk_core::config::{AppConfig, ConfigOverrides, LoadOptions};
    use tokio::sync::watch;

    use crate::bootstrap::{assemble, bootstrap};

    #[tokio::test]
    async fn bootstrap_fails_fast_without_a_bot_token() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                guild_id: Some("123456789".to_string()),
                jwt_secret: Some("secret".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("discord.bot_token"));
    }

    #[tokio::test]
    async fn bootstrap_registers_commands_and_applies_migrations() {
        let temp = tempfile::TempDir::new().expect("tempdir");
        let app = bootstrap(valid_options(&temp)).await.expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('events', 'calendars', 'kanban_items', 'session_tokens')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("tables");
        assert_eq!(table_count, 4);

        let mut commands = app.registry.identifiers(InteractionKind::Command);
        commands.sort();
        assert_eq!(commands, vec!["auth", "calendar", "event", "kanban", "ping"]);
        assert!(app.handlers.natural.is_none());

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn gateway_routes_interactions_until_the_stream_closes() {
        let temp = tempfile::TempDir::new().expect("tempdir");
        let config = AppConfig::load(valid_options(&temp)).expect("config");
        let responder = Arc::new(RecordingResponder::new());
        let (transport, sender) = ChannelTransport::new(4);
        let app = assemble(config, responder.clone(), Arc::new(transport)).await.expect("assemble");

        let reply = ReplyToken::new("interaction-1", "token-1");
        let invoker = Invoker { id: "u1".to_string(), username: "ada".to_string() };
        sender
            .send(Interaction::command("ping", None, Vec::new(), invoker, "c1", reply.clone()))
            .await
            .expect("send");
        drop(sender);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        app.gateway.start(shutdown_rx).await.expect("runner");

        let payload = responder.last_payload_for(&reply).expect("pong");
        assert_eq!(payload.content_text(), "Pong!");
    }

    fn valid_options(temp: &tempfile::TempDir) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                data_dir: Some(temp.path().join("data")),
                bot_token: Some("bot-token".to_string()),
                application_id: Some("987654321".to_string()),
                guild_id: Some("123456789".to_string()),
                jwt_secret: Some("secret".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }
}
