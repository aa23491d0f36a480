use std::fmt::Display;

use teamdesk_chat::{ConfirmLabels, Embed, Flow, FlowOutcome, Interaction, ReplyPayload, ReplyToken, Session};
use teamdesk_core::domain::calendar::Calendar;
use teamdesk_core::domain::event::Event;
use teamdesk_core::errors::HandlerError;
use teamdesk_core::time::DateParser;
use teamdesk_db::RepositoryError;

use crate::context::HandlerContext;

/// Discord rejects messages with more embeds than this.
pub(crate) const MAX_EMBEDS: usize = 10;

/// The deferred reply of a command. Refusals are written into it before the error is
/// handed back to the router for logging.
pub(crate) struct Reply {
    session: Session,
    token: ReplyToken,
}

impl Reply {
    pub(crate) async fn defer(
        session: Session,
        interaction: &Interaction,
        ephemeral: bool,
    ) -> Result<Self, HandlerError> {
        session.reply_deferred(&interaction.reply_token, ephemeral).await?;
        Ok(Self::acknowledged(session, interaction.reply_token.clone()))
    }

    /// For tokens that already carry a deferred response.
    pub(crate) fn acknowledged(session: Session, token: ReplyToken) -> Self {
        Self { session, token }
    }

    pub(crate) fn session(&self) -> &Session {
        &self.session
    }

    pub(crate) fn token(&self) -> &ReplyToken {
        &self.token
    }

    pub(crate) async fn send(&self, payload: ReplyPayload) -> Result<(), HandlerError> {
        self.session.edit(&self.token, payload).await?;
        Ok(())
    }

    pub(crate) async fn text(&self, content: impl Into<String>) -> Result<(), HandlerError> {
        self.send(ReplyPayload::text(content)).await
    }

    pub(crate) async fn fail<T>(&self, error: HandlerError) -> Result<T, HandlerError> {
        self.text(error.detail()).await?;
        Err(error)
    }

    pub(crate) async fn check<T>(&self, result: Result<T, HandlerError>) -> Result<T, HandlerError> {
        match result {
            Ok(value) => Ok(value),
            Err(error) => self.fail(error).await,
        }
    }
}

/// Where a handler's final message goes.
pub(crate) enum Answer {
    Deferred(ReplyToken),
    /// A button click whose token has not been used yet.
    Click(ReplyToken),
}

impl Answer {
    pub(crate) async fn send(&self, session: &Session, payload: ReplyPayload) -> Result<(), HandlerError> {
        match self {
            Self::Deferred(token) => session.edit(token, payload).await?,
            Self::Click(token) => session.reply_initial(token, payload).await?,
        }
        Ok(())
    }

    /// Reports the commit result: `success` when it went through, the error text otherwise.
    pub(crate) async fn settle(
        &self,
        session: &Session,
        result: Result<(), HandlerError>,
        success: ReplyPayload,
    ) -> Result<(), HandlerError> {
        match result {
            Ok(()) => self.send(session, success).await,
            Err(error) => {
                let mut payload = ReplyPayload::text(error.detail());
                payload.ephemeral = success.ephemeral;
                self.send(session, payload).await?;
                Err(error)
            }
        }
    }
}

/// Runs a confirm step. Returns the click to answer, or `None` once a cancel has been
/// answered with `cancelled`.
pub(crate) async fn await_confirmation(
    flow: &mut Flow,
    session: &Session,
    prompt: ReplyPayload,
    labels: ConfirmLabels,
    cancelled: ReplyPayload,
) -> Result<Option<Interaction>, HandlerError> {
    match flow.confirm(prompt, labels).await {
        FlowOutcome::Confirmed(click) => Ok(Some(click)),
        FlowOutcome::Cancelled(click) => {
            session.reply_initial(&click.reply_token, cancelled).await?;
            Ok(None)
        }
        FlowOutcome::TimedOut => timed_out(flow).await,
        FlowOutcome::Failed(error) => Err(error.into()),
        other => Err(unexpected(&other)),
    }
}

pub(crate) async fn timed_out<T>(flow: &Flow) -> Result<T, HandlerError> {
    flow.notify_timeout().await?;
    Err(HandlerError::Timeout(format!("flow {} got no answer before its deadline", flow.id())))
}

pub(crate) fn unexpected(outcome: &FlowOutcome) -> HandlerError {
    HandlerError::Programmer(format!("unexpected flow outcome `{}`", outcome.name()))
}

pub(crate) fn fenced(summary: &str, error: &dyn Display) -> String {
    format!("{summary}\n```\n{error}\n```")
}

pub(crate) fn persistence(summary: &str, error: RepositoryError) -> HandlerError {
    HandlerError::Persistence(fenced(summary, &error))
}

pub(crate) fn validation(message: &str) -> HandlerError {
    HandlerError::Validation(message.to_owned())
}

pub(crate) fn not_found(message: impl Into<String>) -> HandlerError {
    HandlerError::NotFound(message.into())
}

pub(crate) fn precondition(message: impl Into<String>) -> HandlerError {
    HandlerError::Precondition(message.into())
}

/// Event commands write into the channel calendar, so it has to exist first.
pub(crate) async fn ensure_channel_calendar(
    ctx: &HandlerContext,
    channel_id: &str,
) -> Result<(), HandlerError> {
    let calendar = Calendar { channel_id: channel_id.to_owned(), name: channel_id.to_owned() };
    ctx.calendars
        .ensure_channel_calendar(&calendar)
        .await
        .map_err(|error| persistence("Can't prepare the channel calendar", error))
}

pub(crate) fn event_embed(event: &Event, dates: &DateParser) -> Embed {
    let mut embed = Embed::new().title(event.summary.clone());
    if !event.description.is_empty() {
        embed = embed.description(event.description.clone());
    }
    if !event.url.is_empty() {
        embed = embed.url(event.url.clone());
    }
    embed = if event.is_whole_day {
        embed.field("Date", dates.format_display(event.start), true).field("Whole day", "Yes", true)
    } else {
        embed
            .field("Start", dates.format_display(event.start), true)
            .field("End", dates.format_display(event.end), true)
    };
    embed
        .field("Location", event.location.clone(), false)
        .field("Organizer", event.organizer.clone(), true)
        .field("Invitees", event.attendees.join(", "), false)
        .footer(format!("ID: {}", event.id))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use teamdesk_core::domain::event::{Event, EventId};
    use teamdesk_core::time::{DateParser, Timezone};

    use super::{event_embed, fenced};

    fn event(whole_day: bool) -> Event {
        let start = Utc.with_ymd_and_hms(2025, 1, 10, 10, 0, 0).single().expect("start");
        Event {
            id: EventId("ev-1".to_owned()),
            summary: "Team sync".to_owned(),
            description: String::new(),
            location: "Room 4".to_owned(),
            url: String::new(),
            organizer: "ada".to_owned(),
            start,
            end: start + chrono::Duration::hours(1),
            is_whole_day: whole_day,
            calendar_id: "c1".to_owned(),
            channel_id: "c1".to_owned(),
            attendees: vec!["bob@example.com".to_owned()],
            notification_sent: false,
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn embed_lists_timed_event_fields_and_skips_blank_ones() {
        let embed = event_embed(&event(false), &DateParser::new(Timezone::Utc));

        let names: Vec<_> = embed.fields.iter().map(|field| field.name.as_str()).collect();
        assert_eq!(names, vec!["Start", "End", "Location", "Organizer", "Invitees"]);
        assert_eq!(embed.title.as_deref(), Some("Team sync"));
        assert!(embed.description.is_none());
        assert_eq!(embed.footer.as_deref(), Some("ID: ev-1"));
    }

    #[test]
    fn whole_day_events_show_the_date_only() {
        let embed = event_embed(&event(true), &DateParser::new(Timezone::Utc));

        assert_eq!(embed.fields[0].name, "Date");
        assert_eq!(embed.fields[1].value, "Yes");
    }

    #[test]
    fn fenced_errors_keep_the_summary_on_the_first_line() {
        let message = fenced("Can't insert event to database", &"disk full");
        assert_eq!(message, "Can't insert event to database\n```\ndisk full\n```");
    }
}
