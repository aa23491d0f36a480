//! `/event` command group: create, delete, list, modify and natural language requests.
//!
//! Every write is shown to the user first and only committed after the Yes click.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::info;

use teamdesk_agent::natural::{EventContext, NaturalAction, NaturalBody, NaturalInput};
use teamdesk_chat::{
    CommandSchema, ConfirmLabels, Interaction, OptionKind, OptionSchema, ReplyPayload, Session,
    SubcommandDispatcher,
};
use teamdesk_core::domain::event::{parse_invitees, validate_url, Event, EventChanges, EventDraft, EventId};
use teamdesk_core::errors::HandlerError;

use crate::context::HandlerContext;
use crate::support::{
    await_confirmation, ensure_channel_calendar, event_embed, fenced, not_found, persistence,
    precondition, validation, Answer, Reply, MAX_EMBEDS,
};
use crate::{bind, CommandHandler};

const CONFIRM_PROMPT: &str = "Is this correct?";
const START_PARSE_ERROR: &str = "Can't parse start date";
const END_PARSE_ERROR: &str = "Can't parse end date";
const INVALID_URL: &str = "Invalid URL";
const INVALID_RANGE: &str = "start date must be before end date";
const EVENT_ID_EMPTY: &str = "Event ID is empty.";
const EVENT_NOT_FOUND: &str = "Event not found.";

pub fn schema() -> CommandSchema {
    let event_fields = || {
        vec![
            OptionSchema::required("title", "Event title", OptionKind::String),
            OptionSchema::required("start", "Start date, e.g. 2025-01-10 10:00", OptionKind::String),
            OptionSchema::optional("end", "End date, one hour after start when omitted", OptionKind::String),
            OptionSchema::optional("description", "Event description", OptionKind::String),
            OptionSchema::optional("location", "Event location", OptionKind::String),
            OptionSchema::optional("url", "Link attached to the event", OptionKind::String),
            OptionSchema::optional("whole-day", "Lasts the whole day", OptionKind::Boolean),
            OptionSchema::optional("invitees", "Comma separated list of invitees", OptionKind::String),
        ]
    };

    CommandSchema::new("event", "Manage the channel calendar")
        .subcommand("create", "Create an event", event_fields())
        .subcommand("create-manual", "Create an event from explicit fields", event_fields())
        .subcommand(
            "delete",
            "Delete an event",
            vec![OptionSchema::required("event-id", "Event ID", OptionKind::String)],
        )
        .subcommand(
            "list",
            "List events in a date range",
            vec![
                OptionSchema::optional("start", "Range start, today when omitted", OptionKind::String),
                OptionSchema::optional("end", "Range end, one day after start when omitted", OptionKind::String),
            ],
        )
        .subcommand(
            "modify",
            "Modify an event",
            vec![
                OptionSchema::required("event-id", "Event ID", OptionKind::String),
                OptionSchema::optional("title", "New title", OptionKind::String),
                OptionSchema::optional("start", "New start date", OptionKind::String),
                OptionSchema::optional("end", "New end date", OptionKind::String),
                OptionSchema::optional("description", "New description", OptionKind::String),
                OptionSchema::optional("location", "New location", OptionKind::String),
                OptionSchema::optional("url", "New link", OptionKind::String),
                OptionSchema::optional("whole-day", "Lasts the whole day", OptionKind::Boolean),
                OptionSchema::optional("invitees", "Comma separated list of invitees", OptionKind::String),
            ],
        )
        .subcommand(
            "natural",
            "Describe what to do with an event in plain language",
            vec![
                OptionSchema::required("content", "What should happen", OptionKind::String),
                OptionSchema::optional("event-context-id", "Event the request refers to", OptionKind::String),
            ],
        )
}

pub fn dispatcher(ctx: &Arc<HandlerContext>) -> SubcommandDispatcher {
    SubcommandDispatcher::new("event")
        .with("create", bind(ctx, CreateEvent))
        .with("create-manual", bind(ctx, CreateEvent))
        .with("delete", bind(ctx, DeleteEvent))
        .with("list", bind(ctx, ListEvents))
        .with("modify", bind(ctx, ModifyEvent))
        .with("natural", bind(ctx, NaturalEvent))
}

pub struct CreateEvent;

#[async_trait]
impl CommandHandler for CreateEvent {
    async fn run(
        &self,
        ctx: &HandlerContext,
        session: Session,
        interaction: Interaction,
    ) -> Result<(), HandlerError> {
        let reply = Reply::defer(session, &interaction, false).await?;
        let channel_id = interaction.channel_id.as_str();

        let draft = reply.check(draft_from_options(ctx, &interaction)).await?;
        let event = reply
            .check(draft.into_event(EventId::generate(), channel_id, channel_id, ctx.dates.timezone(), Utc::now()).map_err(HandlerError::from))
            .await?;
        reply.check(ensure_channel_calendar(ctx, channel_id).await).await?;

        confirm_insert(ctx, &reply, channel_id, event).await
    }
}

pub struct DeleteEvent;

#[async_trait]
impl CommandHandler for DeleteEvent {
    async fn run(
        &self,
        ctx: &HandlerContext,
        session: Session,
        interaction: Interaction,
    ) -> Result<(), HandlerError> {
        let reply = Reply::defer(session, &interaction, false).await?;
        let event = reply
            .check(
                find_channel_event(
                    ctx,
                    &interaction.channel_id,
                    interaction.string_option("event-id"),
                    EVENT_ID_EMPTY,
                    EVENT_NOT_FOUND,
                )
                .await,
            )
            .await?;
        if event.is_external() {
            return reply.fail(precondition("You cannot delete events in external calendars.")).await;
        }

        confirm_delete(ctx, &reply, &interaction.channel_id, event).await
    }
}

pub struct ListEvents;

#[async_trait]
impl CommandHandler for ListEvents {
    async fn run(
        &self,
        ctx: &HandlerContext,
        session: Session,
        interaction: Interaction,
    ) -> Result<(), HandlerError> {
        let reply = Reply::defer(session, &interaction, false).await?;

        let start = match interaction.string_option("start") {
            Some(raw) => reply.check(parse_date(ctx, &raw, START_PARSE_ERROR)).await?,
            None => ctx.dates.timezone().start_of_day(Utc::now()),
        };
        let end = match interaction.string_option("end") {
            Some(raw) => reply.check(parse_date(ctx, &raw, END_PARSE_ERROR)).await?,
            None => start + Duration::days(1),
        };

        list_range(ctx, &reply, &interaction.channel_id, start, end, None).await
    }
}

pub struct ModifyEvent;

#[async_trait]
impl CommandHandler for ModifyEvent {
    async fn run(
        &self,
        ctx: &HandlerContext,
        session: Session,
        interaction: Interaction,
    ) -> Result<(), HandlerError> {
        let reply = Reply::defer(session, &interaction, false).await?;
        let event = reply
            .check(
                find_channel_event(
                    ctx,
                    &interaction.channel_id,
                    interaction.string_option("event-id"),
                    EVENT_ID_EMPTY,
                    EVENT_NOT_FOUND,
                )
                .await,
            )
            .await?;
        if event.is_external() {
            return reply.fail(precondition("You cannot modify events in external calendars.")).await;
        }

        let changes = reply.check(changes_from_options(ctx, &interaction)).await?;
        if changes.is_empty() {
            return reply.fail(validation("Nothing to modify.")).await;
        }
        let updated = reply.check(event.apply_changes(changes, ctx.dates.timezone(), Utc::now()).map_err(HandlerError::from)).await?;

        confirm_update(ctx, &reply, &interaction.channel_id, &event, updated).await
    }
}

pub struct NaturalEvent;

#[async_trait]
impl CommandHandler for NaturalEvent {
    async fn run(
        &self,
        ctx: &HandlerContext,
        session: Session,
        interaction: Interaction,
    ) -> Result<(), HandlerError> {
        let reply = Reply::defer(session, &interaction, false).await?;
        let channel_id = interaction.channel_id.as_str();

        let Some(client) = ctx.natural.clone() else {
            return reply.fail(precondition("Natural language commands are disabled.")).await;
        };
        let Some(content) = interaction.string_option("content") else {
            return reply.fail(validation("Event content is empty.")).await;
        };
        let context_event = match interaction.string_option("event-context-id") {
            Some(id) => Some(
                reply
                    .check(
                        find_channel_event(
                            ctx,
                            channel_id,
                            Some(id),
                            EVENT_ID_EMPTY,
                            "Event with the provided event ID not found.",
                        )
                        .await,
                    )
                    .await?,
            ),
            None => None,
        };

        let input = NaturalInput {
            current_time: ctx.dates.format_natural(Utc::now()),
            user_request: content,
            event_context: context_event.as_ref().map(|event| event_context(ctx, event)),
        };
        let output = reply
            .check(
                client
                    .extract(&input)
                    .await
                    .map_err(|error| HandlerError::Upstream(fenced("Can't perform natural request", &error))),
            )
            .await?;
        if !output.success {
            let description = if output.description.trim().is_empty() {
                "The request could not be understood.".to_owned()
            } else {
                output.description.clone()
            };
            return reply.fail(HandlerError::Upstream(description)).await;
        }

        info!(
            event_name = "handlers.event.natural_action",
            action = %output.action,
            channel_id = %channel_id,
            "natural language request resolved"
        );

        match output.action() {
            NaturalAction::Create => {
                let mut draft = reply.check(natural_draft(ctx, &output.body)).await?;
                draft.organizer = interaction.invoker.username.clone();
                let event = reply
                    .check(
                        draft
                            .into_event(EventId::generate(), channel_id, channel_id, ctx.dates.timezone(), Utc::now())
                            .map_err(HandlerError::from),
                    )
                    .await?;
                reply.check(ensure_channel_calendar(ctx, channel_id).await).await?;
                confirm_insert(ctx, &reply, channel_id, event).await
            }
            NaturalAction::Read => {
                let start = reply
                    .check(parse_natural_date(ctx, &output.body.start_date_to_query, START_PARSE_ERROR))
                    .await?;
                let end = reply
                    .check(parse_natural_date(ctx, &output.body.end_date_to_query, END_PARSE_ERROR))
                    .await?;
                list_range(ctx, &reply, channel_id, start, end, Some(&output.description)).await
            }
            NaturalAction::Update => {
                let Some(event) = context_event else {
                    return reply
                        .fail(precondition("You must provide event context ID to update an event."))
                        .await;
                };
                if event.is_external() {
                    return reply.fail(precondition("You cannot modify events in external calendars.")).await;
                }
                let changes = reply.check(natural_changes(ctx, &output.body)).await?;
                let updated =
                    reply.check(event.apply_changes(changes, ctx.dates.timezone(), Utc::now()).map_err(HandlerError::from)).await?;
                confirm_update(ctx, &reply, channel_id, &event, updated).await
            }
            NaturalAction::Delete => {
                let Some(event) = context_event else {
                    return reply
                        .fail(precondition("You must provide event context ID to delete an event."))
                        .await;
                };
                if event.is_external() {
                    return reply.fail(precondition("You cannot delete events in external calendars.")).await;
                }
                confirm_delete(ctx, &reply, channel_id, event).await
            }
            NaturalAction::Unknown(action) => {
                reply
                    .fail(HandlerError::Upstream(format!(
                        "Can't create event, invalid action {action} from the LLM."
                    )))
                    .await
            }
        }
    }
}

async fn confirm_insert(
    ctx: &HandlerContext,
    reply: &Reply,
    channel_id: &str,
    event: Event,
) -> Result<(), HandlerError> {
    let session = reply.session();
    let mut flow = ctx.flows.open(session.clone(), reply.token().clone(), channel_id);
    let prompt = ReplyPayload::text(CONFIRM_PROMPT).with_embed(event_embed(&event, &ctx.dates));
    let cancelled = ReplyPayload::text("Event creation canceled.");
    let Some(click) =
        await_confirmation(&mut flow, session, prompt, ConfirmLabels::default(), cancelled).await?
    else {
        return Ok(());
    };

    let result = ctx
        .events
        .insert(&event)
        .await
        .map_err(|error| persistence("Can't insert event to database", error));
    Answer::Click(click.reply_token)
        .settle(session, result, ReplyPayload::text("Event created."))
        .await?;
    info!(
        event_name = "handlers.event.created",
        event_id = %event.id,
        channel_id = %channel_id,
        "event created"
    );
    Ok(())
}

async fn confirm_delete(
    ctx: &HandlerContext,
    reply: &Reply,
    channel_id: &str,
    event: Event,
) -> Result<(), HandlerError> {
    let session = reply.session();
    let mut flow = ctx.flows.open(session.clone(), reply.token().clone(), channel_id);
    let prompt = ReplyPayload::text("Is this the event you want to delete?")
        .with_embed(event_embed(&event, &ctx.dates));
    let cancelled = ReplyPayload::text("Event deletion canceled.");
    let Some(click) =
        await_confirmation(&mut flow, session, prompt, ConfirmLabels::default(), cancelled).await?
    else {
        return Ok(());
    };

    let result = match ctx.events.delete(&event.id).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(not_found(EVENT_NOT_FOUND)),
        Err(error) => Err(persistence("Can't delete event from database", error)),
    };
    Answer::Click(click.reply_token)
        .settle(session, result, ReplyPayload::text("Event deleted."))
        .await?;
    info!(event_name = "handlers.event.deleted", event_id = %event.id, channel_id = %channel_id, "event deleted");
    Ok(())
}

async fn confirm_update(
    ctx: &HandlerContext,
    reply: &Reply,
    channel_id: &str,
    before: &Event,
    after: Event,
) -> Result<(), HandlerError> {
    let session = reply.session();
    let mut flow = ctx.flows.open(session.clone(), reply.token().clone(), channel_id);
    let prompt = ReplyPayload::text(CONFIRM_PROMPT)
        .with_embed(event_embed(before, &ctx.dates).footer("Before"))
        .with_embed(event_embed(&after, &ctx.dates).footer("After"));
    let cancelled = ReplyPayload::text("Event not modified.");
    let Some(click) =
        await_confirmation(&mut flow, session, prompt, ConfirmLabels::default(), cancelled).await?
    else {
        return Ok(());
    };

    let result = match ctx.events.update(&after).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(not_found(EVENT_NOT_FOUND)),
        Err(error) => Err(persistence("Can't update event in database", error)),
    };
    Answer::Click(click.reply_token)
        .settle(session, result, ReplyPayload::text("Event updated."))
        .await?;
    info!(event_name = "handlers.event.updated", event_id = %after.id, channel_id = %channel_id, "event updated");
    Ok(())
}

async fn list_range(
    ctx: &HandlerContext,
    reply: &Reply,
    channel_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    preface: Option<&str>,
) -> Result<(), HandlerError> {
    if start >= end {
        return reply.fail(validation(INVALID_RANGE)).await;
    }
    let events = reply
        .check(
            ctx.events
                .list_in_range(channel_id, start, end)
                .await
                .map_err(|error| persistence("Can't get events", error)),
        )
        .await?;
    reply.send(list_payload(ctx, &events, start, end, preface)).await
}

fn list_payload(
    ctx: &HandlerContext,
    events: &[Event],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    preface: Option<&str>,
) -> ReplyPayload {
    let range = format!("`{}` - `{}`", ctx.dates.format_display(start), ctx.dates.format_display(end));
    let mut text = if events.is_empty() {
        format!("No event for {range}")
    } else {
        format!("There are {} event(s) for {range}", events.len())
    };
    if events.len() > MAX_EMBEDS {
        text.push_str(&format!("\nShowing the first {MAX_EMBEDS}."));
    }
    if let Some(preface) = preface.filter(|preface| !preface.trim().is_empty()) {
        text = format!("{preface}\n{text}");
    }

    events
        .iter()
        .take(MAX_EMBEDS)
        .fold(ReplyPayload::text(text), |payload, event| payload.with_embed(event_embed(event, &ctx.dates)))
}

async fn find_channel_event(
    ctx: &HandlerContext,
    channel_id: &str,
    raw_id: Option<String>,
    empty: &str,
    missing: &str,
) -> Result<Event, HandlerError> {
    let id = raw_id.ok_or_else(|| validation(empty))?;
    let event = ctx
        .events
        .find_by_id(&EventId(id))
        .await
        .map_err(|error| persistence("Can't get event", error))?;
    event.filter(|event| event.channel_id == channel_id).ok_or_else(|| not_found(missing))
}

fn parse_date(ctx: &HandlerContext, raw: &str, message: &str) -> Result<DateTime<Utc>, HandlerError> {
    ctx.dates.parse(raw).map_err(|_| validation(message))
}

fn parse_natural_date(ctx: &HandlerContext, raw: &str, message: &str) -> Result<DateTime<Utc>, HandlerError> {
    ctx.dates.parse_natural(raw).map_err(|_| validation(message))
}

fn checked_url(raw: String) -> Result<String, HandlerError> {
    if !raw.is_empty() {
        validate_url(&raw).map_err(|_| validation(INVALID_URL))?;
    }
    Ok(raw)
}

fn draft_from_options(ctx: &HandlerContext, interaction: &Interaction) -> Result<EventDraft, HandlerError> {
    let start = interaction.string_option("start").ok_or_else(|| validation(START_PARSE_ERROR))?;
    let start = parse_date(ctx, &start, START_PARSE_ERROR)?;
    let end = interaction
        .string_option("end")
        .map(|raw| parse_date(ctx, &raw, END_PARSE_ERROR))
        .transpose()?;

    Ok(EventDraft {
        summary: interaction.string_option("title").unwrap_or_default(),
        description: interaction.string_option("description").unwrap_or_default(),
        location: interaction.string_option("location").unwrap_or_default(),
        url: checked_url(interaction.string_option("url").unwrap_or_default())?,
        organizer: interaction.invoker.username.clone(),
        start: Some(start),
        end,
        whole_day: interaction.boolean_option("whole-day").unwrap_or(false),
        attendees: interaction.string_option("invitees").map(|raw| parse_invitees(&raw)).unwrap_or_default(),
    })
}

fn changes_from_options(ctx: &HandlerContext, interaction: &Interaction) -> Result<EventChanges, HandlerError> {
    Ok(EventChanges {
        summary: interaction.string_option("title"),
        description: interaction.string_option("description"),
        location: interaction.string_option("location"),
        url: interaction.string_option("url").map(checked_url).transpose()?,
        start: interaction
            .string_option("start")
            .map(|raw| parse_date(ctx, &raw, START_PARSE_ERROR))
            .transpose()?,
        end: interaction
            .string_option("end")
            .map(|raw| parse_date(ctx, &raw, END_PARSE_ERROR))
            .transpose()?,
        whole_day: interaction.boolean_option("whole-day"),
        attendees: interaction.string_option("invitees").map(|raw| parse_invitees(&raw)),
    })
}

fn event_context(ctx: &HandlerContext, event: &Event) -> EventContext {
    EventContext {
        title: event.summary.clone(),
        description: event.description.clone(),
        start: ctx.dates.format_natural(event.start),
        end: ctx.dates.format_natural(event.end),
        location: event.location.clone(),
        url: event.url.clone(),
        attendees: event.attendees.clone(),
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

fn natural_draft(ctx: &HandlerContext, body: &NaturalBody) -> Result<EventDraft, HandlerError> {
    let fields = &body.event;
    let start = parse_natural_date(ctx, &fields.start, START_PARSE_ERROR)?;
    let end = non_empty(&fields.end)
        .map(|raw| parse_natural_date(ctx, &raw, END_PARSE_ERROR))
        .transpose()?;

    Ok(EventDraft {
        summary: fields.title.clone(),
        description: fields.description.clone(),
        location: fields.location.clone(),
        url: checked_url(fields.url.trim().to_owned())?,
        organizer: String::new(),
        start: Some(start),
        end,
        whole_day: false,
        attendees: fields.attendees.clone(),
    })
}

/// Blank fields in the extractor output leave the stored value alone.
fn natural_changes(ctx: &HandlerContext, body: &NaturalBody) -> Result<EventChanges, HandlerError> {
    let fields = &body.event;
    Ok(EventChanges {
        summary: non_empty(&fields.title),
        description: non_empty(&fields.description),
        location: non_empty(&fields.location),
        url: non_empty(&fields.url).map(checked_url).transpose()?,
        start: non_empty(&fields.start)
            .map(|raw| parse_natural_date(ctx, &raw, START_PARSE_ERROR))
            .transpose()?,
        end: non_empty(&fields.end)
            .map(|raw| parse_natural_date(ctx, &raw, END_PARSE_ERROR))
            .transpose()?,
        whole_day: None,
        attendees: (!fields.attendees.is_empty()).then(|| fields.attendees.clone()),
    })
}
