use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use teamdesk_chat::{
    CommandSchema, ConfirmLabels, FlowOutcome, Interaction, ModalSpec, OptionKind, OptionSchema, ReplyPayload,
    Session, SubcommandDispatcher,
};
use teamdesk_core::domain::calendar::ExternalCalendarId;
use teamdesk_core::domain::event::validate_url;
use teamdesk_core::errors::HandlerError;

use crate::context::HandlerContext;
use crate::support::{
    await_confirmation, ensure_channel_calendar, fenced, not_found, persistence, precondition, timed_out,
    unexpected, validation, Answer, Reply,
};
use crate::{bind, CommandHandler};

pub const NAME_FIELD: &str = "calendar-name";
const IMPORT_CANCELED: &str = "Calendar import canceled.";

pub fn schema() -> CommandSchema {
    CommandSchema::new("calendar", "Manage external calendars")
        .subcommand(
            "import",
            "Import an iCalendar feed into this channel",
            vec![
                OptionSchema::required("url", "Link to the .ics feed", OptionKind::String),
                OptionSchema::optional("name", "Name shown for the calendar", OptionKind::String),
            ],
        )
        .subcommand(
            "delete",
            "Remove an imported calendar and its events",
            vec![OptionSchema::required("calendar-id", "Calendar ID", OptionKind::String)],
        )
}

pub fn dispatcher(ctx: &Arc<HandlerContext>) -> SubcommandDispatcher {
    SubcommandDispatcher::new("calendar")
        .with("import", bind(ctx, ImportCalendar))
        .with("delete", bind(ctx, DeleteCalendar))
}

pub struct ImportCalendar;

#[async_trait]
impl CommandHandler for ImportCalendar {
    async fn run(
        &self,
        ctx: &HandlerContext,
        session: Session,
        interaction: Interaction,
    ) -> Result<(), HandlerError> {
        let reply = Reply::defer(session.clone(), &interaction, false).await?;
        let channel_id = interaction.channel_id.as_str();

        let url = interaction.string_option("url").unwrap_or_default();
        if validate_url(&url).is_err() {
            return reply.fail(validation("Invalid URL.")).await;
        }
        reply.check(ensure_channel_calendar(ctx, channel_id).await).await?;

        let existing = reply
            .check(
                ctx.calendars
                    .find_external_by_url(&url)
                    .await
                    .map_err(|error| persistence("Can't check if calendar exists", error)),
            )
            .await?;
        if existing.is_some() {
            return reply.fail(precondition("Calendar already exists in the database.")).await;
        }

        let mut fetched = reply
            .check(
                ctx.calendar_source
                    .fetch(&url)
                    .await
                    .map_err(|error| HandlerError::Upstream(fenced("Can't fetch the calendar", &error))),
            )
            .await?;
        if let Some(name) = interaction.string_option("name") {
            fetched.set_name(name);
        }

        // Without a name the user is asked for one in a modal. The modal submission then
        // owns the reply the import prompt is shown in.
        let reply = if fetched.name.is_some() {
            reply
        } else {
            let mut flow = ctx.flows.open(session.clone(), reply.token().clone(), channel_id);
            let prompt = ReplyPayload::text("Seems like the calendar is missing a name.");
            let labels = ConfirmLabels::new("Give it one", "Cancel import");
            let Some(click) =
                await_confirmation(&mut flow, &session, prompt, labels, ReplyPayload::text(IMPORT_CANCELED)).await?
            else {
                return Ok(());
            };

            let modal = ModalSpec::new("Enter a name for the calendar").short_input(NAME_FIELD, "Name");
            let submission = match flow.modal(&click, modal).await {
                FlowOutcome::Submitted(submission) => submission,
                FlowOutcome::TimedOut => return timed_out(&flow).await,
                FlowOutcome::Failed(error) => return Err(error.into()),
                other => return Err(unexpected(&other)),
            };
            let reply = Reply::defer(session.clone(), &submission, false).await?;
            fetched.set_name(submission.field(NAME_FIELD).unwrap_or_default());
            if fetched.name.is_none() {
                return reply.fail(validation("Calendar name cannot be empty.")).await;
            }
            reply
        };

        let name = fetched.name.clone().unwrap_or_default();
        let count = fetched.events.len();

        // A fresh flow so a late click on the naming prompt cannot answer this one.
        let mut flow = ctx.flows.open(session.clone(), reply.token().clone(), channel_id);
        let prompt = ReplyPayload::text(format!("Found `{count}` events in `{name}`. Continue?"));
        let labels = ConfirmLabels::new("Import", "Cancel");
        let Some(click) =
            await_confirmation(&mut flow, &session, prompt, labels, ReplyPayload::text(IMPORT_CANCELED)).await?
        else {
            return Ok(());
        };

        let (calendar, events) = fetched.into_records(&url, channel_id, Utc::now());
        let result = ctx
            .calendars
            .import_external(&calendar, &events)
            .await
            .map_err(|error| persistence("Can't import calendar to database", error));
        Answer::Click(click.reply_token)
            .settle(&session, result, ReplyPayload::text(format!("Calendar `{name}` imported with {count} events.")))
            .await?;
        info!(
            event_name = "handlers.calendar.imported",
            calendar_id = %calendar.id.0,
            channel_id = %channel_id,
            events = count,
            "external calendar imported"
        );
        Ok(())
    }
}

pub struct DeleteCalendar;

#[async_trait]
impl CommandHandler for DeleteCalendar {
    async fn run(
        &self,
        ctx: &HandlerContext,
        session: Session,
        interaction: Interaction,
    ) -> Result<(), HandlerError> {
        let reply = Reply::defer(session, &interaction, false).await?;
        let Some(id) = interaction.string_option("calendar-id") else {
            return reply.fail(validation("Calendar ID is empty.")).await;
        };
        let id = ExternalCalendarId(id);

        let calendar = reply
            .check(ctx.calendars.find_external(&id).await.map_err(|error| persistence("Can't get calendar", error)))
            .await?;
        let Some(calendar) = calendar.filter(|calendar| calendar.channel_id == interaction.channel_id) else {
            return reply.fail(not_found("Calendar not found.")).await;
        };

        let deleted = reply
            .check(
                ctx.calendars
                    .delete_external(&id)
                    .await
                    .map_err(|error| persistence("Can't delete calendar.", error)),
            )
            .await?;
        if !deleted {
            return reply.fail(not_found("Calendar not found.")).await;
        }

        info!(
            event_name = "handlers.calendar.deleted",
            calendar_id = %id.0,
            channel_id = %interaction.channel_id,
            "external calendar deleted"
        );
        reply.text(format!("Calendar `{}` deleted.", calendar.name)).await
    }
}
