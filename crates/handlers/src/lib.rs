//! Command Handlers - the persistent slash commands
//!
//! One module per command group, each exposing its `schema()` and a dispatcher that maps
//! subcommands to handler structs:
//! - **ping** - liveness reply
//! - **event** - channel calendar: create, delete, list, modify, natural language
//! - **kanban** - groups and items of the channel board
//! - **auth** - dashboard login links, TOTP, session revocation
//! - **calendar** - import and delete external iCalendar feeds
//!
//! Handlers acknowledge with a deferred reply, validate, prompt through a flow when they
//! are about to write, and commit only after the confirming click.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use teamdesk_chat::{CommandRegistry, CommandSchema, Interaction, InteractionHandler, InteractionKind, Session, SharedHandler};
use teamdesk_core::errors::HandlerError;

pub mod auth;
pub mod calendar;
pub mod context;
pub mod event;
pub mod kanban;
pub mod ping;
mod support;

pub use context::HandlerContext;

/// A command body. The context is shared by every handler; the interaction is the one
/// being answered.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn run(
        &self,
        ctx: &HandlerContext,
        session: Session,
        interaction: Interaction,
    ) -> Result<(), HandlerError>;
}

struct Bound<H> {
    ctx: Arc<HandlerContext>,
    handler: H,
}

#[async_trait]
impl<H: CommandHandler> InteractionHandler for Bound<H> {
    async fn handle(&self, session: Session, interaction: Interaction) -> Result<(), HandlerError> {
        self.handler.run(&self.ctx, session, interaction).await
    }
}

pub fn bind<H: CommandHandler + 'static>(ctx: &Arc<HandlerContext>, handler: H) -> SharedHandler {
    Arc::new(Bound { ctx: ctx.clone(), handler })
}

pub fn all_schemas() -> Vec<CommandSchema> {
    vec![ping::schema(), event::schema(), kanban::schema(), auth::schema(), calendar::schema()]
}

/// Registers every persistent command under its top-level name.
pub fn register_all(registry: &CommandRegistry, ctx: Arc<HandlerContext>) -> usize {
    let commands: Vec<(&str, SharedHandler)> = vec![
        ("ping", bind(&ctx, ping::Ping)),
        ("event", Arc::new(event::dispatcher(&ctx))),
        ("kanban", Arc::new(kanban::dispatcher(&ctx))),
        ("auth", Arc::new(auth::dispatcher(&ctx))),
        ("calendar", Arc::new(calendar::dispatcher(&ctx))),
    ];
    let count = commands.len();
    for (name, handler) in commands {
        registry.add(InteractionKind::Command, name, handler);
    }
    info!(event_name = "handlers.registered", commands = count, "persistent handlers registered");
    count
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use super::{all_schemas, auth, calendar, event, kanban};
    use crate::context::HandlerContext;

    #[test]
    fn every_schema_is_accepted_by_the_platform_rules() {
        for schema in all_schemas() {
            schema.validate().expect("valid schema");
        }
    }

    #[test]
    fn command_names_are_unique() {
        let names: BTreeSet<_> = all_schemas().iter().map(|schema| schema.name).collect();
        assert_eq!(names.len(), all_schemas().len());
    }

    #[tokio::test]
    async fn dispatchers_cover_every_declared_subcommand() {
        let ctx = Arc::new(test_context().await);
        let pairs = [
            (event::schema(), event::dispatcher(&ctx).subcommand_names()),
            (kanban::schema(), kanban::dispatcher(&ctx).subcommand_names()),
            (auth::schema(), auth::dispatcher(&ctx).subcommand_names()),
            (calendar::schema(), calendar::dispatcher(&ctx).subcommand_names()),
        ];

        for (schema, handled) in pairs {
            let declared: BTreeSet<_> = schema.subcommands.iter().map(|subcommand| subcommand.name).collect();
            let handled: BTreeSet<_> = handled.into_iter().collect();
            assert_eq!(declared, handled, "`{}` schema and dispatcher disagree", schema.name);
        }
    }

    async fn test_context() -> HandlerContext {
        use teamdesk_agent::calendar_source::{CalendarSource, CalendarSourceError, FetchedCalendar};
        use teamdesk_chat::{CommandRegistry, FlowCoordinator};

        struct Offline;

        #[async_trait::async_trait]
        impl CalendarSource for Offline {
            async fn fetch(&self, _url: &str) -> Result<FetchedCalendar, CalendarSourceError> {
                Err(CalendarSourceError::Fetch("offline".to_owned()))
            }
        }

        let pool = teamdesk_db::connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        let flows = FlowCoordinator::new(Arc::new(CommandRegistry::new()), teamdesk_chat::flow::DEFAULT_DEADLINE);
        HandlerContext::new(pool, flows, Arc::new(Offline))
    }
}
