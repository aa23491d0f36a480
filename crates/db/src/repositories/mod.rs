use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use teamdesk_core::domain::calendar::{Calendar, ExternalCalendar, ExternalCalendarId};
use teamdesk_core::domain::event::{Event, EventId};
use teamdesk_core::domain::kanban::{KanbanBoard, KanbanGroup, KanbanItem};
use teamdesk_core::domain::user::{SessionToken, User};
use teamdesk_core::errors::HandlerError;

pub mod calendar;
pub mod event;
pub mod kanban;
pub mod user;

pub use calendar::SqlCalendarRepository;
pub use event::SqlEventRepository;
pub use kanban::SqlKanbanRepository;
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for HandlerError {
    fn from(value: RepositoryError) -> Self {
        Self::Persistence(value.to_string())
    }
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Inserts the event and its attendees in one transaction.
    async fn insert(&self, event: &Event) -> Result<(), RepositoryError>;
    /// Like `insert`, but also creates the channel calendar when it is missing.
    async fn insert_with_calendar(&self, calendar: &Calendar, event: &Event) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &EventId) -> Result<Option<Event>, RepositoryError>;
    /// Events in `channel_id` overlapping `[start, end)`, ordered by start.
    async fn list_in_range(
        &self,
        channel_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, RepositoryError>;
    /// Rewrites the row and replaces its attendees in one transaction.
    async fn update(&self, event: &Event) -> Result<bool, RepositoryError>;
    async fn delete(&self, id: &EventId) -> Result<bool, RepositoryError>;
    async fn list_for_calendar(&self, calendar_id: &str) -> Result<Vec<Event>, RepositoryError>;
}

#[async_trait]
pub trait CalendarRepository: Send + Sync {
    async fn ensure_channel_calendar(&self, calendar: &Calendar) -> Result<(), RepositoryError>;
    async fn find_channel_calendar(&self, channel_id: &str) -> Result<Option<Calendar>, RepositoryError>;
    async fn find_external(
        &self,
        id: &ExternalCalendarId,
    ) -> Result<Option<ExternalCalendar>, RepositoryError>;
    async fn find_external_by_url(
        &self,
        url: &str,
    ) -> Result<Option<ExternalCalendar>, RepositoryError>;
    async fn list_external(&self, channel_id: &str)
        -> Result<Vec<ExternalCalendar>, RepositoryError>;
    /// Stores the calendar row together with every event in one transaction.
    async fn import_external(
        &self,
        calendar: &ExternalCalendar,
        events: &[Event],
    ) -> Result<(), RepositoryError>;
    /// Removes the calendar and its events; `false` when no such calendar exists.
    async fn delete_external(&self, id: &ExternalCalendarId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait KanbanRepository: Send + Sync {
    async fn board(&self, channel_id: &str) -> Result<KanbanBoard, RepositoryError>;
    async fn find_group(
        &self,
        channel_id: &str,
        name: &str,
    ) -> Result<Option<KanbanGroup>, RepositoryError>;
    /// `false` when the group already exists.
    async fn create_group(&self, group: &KanbanGroup) -> Result<bool, RepositoryError>;
    /// Allocates the next per-channel id and inserts the item in one transaction.
    async fn create_item(
        &self,
        channel_id: &str,
        content: &str,
        group_name: &str,
    ) -> Result<KanbanItem, RepositoryError>;
    async fn find_item(&self, channel_id: &str, id: i64)
        -> Result<Option<KanbanItem>, RepositoryError>;
    async fn move_item(
        &self,
        channel_id: &str,
        id: i64,
        group_name: &str,
    ) -> Result<bool, RepositoryError>;
    async fn delete_item(&self, channel_id: &str, id: i64) -> Result<bool, RepositoryError>;
    /// Overwrites every group and item of `board.channel_id` in one transaction.
    async fn replace_board(&self, board: &KanbanBoard) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<User>, RepositoryError>;
    async fn ensure_user(&self, id: &str, username: &str) -> Result<(), RepositoryError>;
    async fn set_totp_secret(
        &self,
        id: &str,
        username: &str,
        secret: &str,
    ) -> Result<(), RepositoryError>;
    async fn create_session(&self, session: &SessionToken) -> Result<(), RepositoryError>;
    async fn find_session(&self, secret: &str) -> Result<Option<SessionToken>, RepositoryError>;
    async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionToken>, RepositoryError>;
    /// Deletes the session only when it belongs to `user_id`.
    async fn revoke_session(&self, user_id: &str, secret: &str) -> Result<bool, RepositoryError>;
}

/// Timestamps are stored as second-precision RFC 3339 in UTC so that text comparison
/// orders them chronologically.
pub(crate) fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn decode_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column} `{raw}`: {error}")))
}
