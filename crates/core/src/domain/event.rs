use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;
use crate::time::Timezone;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub summary: String,
    pub description: String,
    pub location: String,
    pub url: String,
    pub organizer: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub is_whole_day: bool,
    pub calendar_id: String,
    pub channel_id: String,
    pub attendees: Vec<String>,
    pub notification_sent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Events imported from an external calendar carry that calendar's id instead of the
    /// channel id and are read-only from chat.
    pub fn is_external(&self) -> bool {
        self.calendar_id != self.channel_id
    }

    pub fn apply_changes(
        &self,
        changes: EventChanges,
        timezone: Timezone,
        now: DateTime<Utc>,
    ) -> Result<Event, DomainError> {
        let mut updated = self.clone();

        if let Some(summary) = changes.summary {
            updated.summary = cleanup(&summary);
        }
        if let Some(description) = changes.description {
            updated.description = cleanup(&description);
        }
        if let Some(location) = changes.location {
            updated.location = cleanup(&location);
        }
        if let Some(url) = changes.url {
            updated.url = cleanup(&url);
        }
        if let Some(start) = changes.start {
            updated.start = start;
        }
        if let Some(end) = changes.end {
            updated.end = end;
        }
        if let Some(attendees) = changes.attendees {
            updated.attendees = attendees;
        }
        if let Some(whole_day) = changes.whole_day {
            updated.is_whole_day = whole_day;
        }
        if updated.is_whole_day {
            (updated.start, updated.end) = whole_day_bounds(timezone, updated.start, updated.end);
        }

        validate_fields(&updated.summary, &updated.url, updated.start, updated.end)?;
        updated.updated_at = now;
        Ok(updated)
    }
}

/// User-supplied fields for a new event, before validation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventDraft {
    pub summary: String,
    pub description: String,
    pub location: String,
    pub url: String,
    pub organizer: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub whole_day: bool,
    pub attendees: Vec<String>,
}

impl EventDraft {
    pub fn into_event(
        self,
        id: EventId,
        channel_id: &str,
        calendar_id: &str,
        timezone: Timezone,
        now: DateTime<Utc>,
    ) -> Result<Event, DomainError> {
        let summary = cleanup(&self.summary);
        let url = cleanup(&self.url);
        let start = self.start.ok_or(DomainError::EmptyField { field: "start date" })?;
        let end = self.end.unwrap_or(start + Duration::hours(1));
        let (start, end) = if self.whole_day { whole_day_bounds(timezone, start, end) } else { (start, end) };

        validate_fields(&summary, &url, start, end)?;

        Ok(Event {
            id,
            summary,
            description: cleanup(&self.description),
            location: cleanup(&self.location),
            url,
            organizer: self.organizer,
            start,
            end,
            is_whole_day: self.whole_day,
            calendar_id: calendar_id.to_string(),
            channel_id: channel_id.to_string(),
            attendees: self.attendees,
            notification_sent: false,
            created_at: now,
            updated_at: now,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventChanges {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub whole_day: Option<bool>,
    pub attendees: Option<Vec<String>>,
}

impl EventChanges {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub fn parse_invitees(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|value| !value.is_empty()).map(str::to_owned).collect()
}

pub fn validate_url(raw: &str) -> Result<(), DomainError> {
    let parsed = url::Url::parse(raw).map_err(|error| DomainError::InvalidUrl(error.to_string()))?;
    if parsed.host_str().is_none() {
        return Err(DomainError::InvalidUrl(format!("`{raw}` has no host")));
    }
    Ok(())
}

fn validate_fields(
    summary: &str,
    url: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(), DomainError> {
    if summary.is_empty() {
        return Err(DomainError::EmptyField { field: "title" });
    }
    if !url.is_empty() {
        validate_url(url)?;
    }
    if start >= end {
        return Err(DomainError::InvalidDateRange);
    }
    Ok(())
}

/// Midnight boundaries are taken on the wall clock of the configured timezone.
fn whole_day_bounds(
    timezone: Timezone,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = timezone.start_of_day(start);
    let end = timezone.start_of_day(end);
    if end <= start {
        (start, start + Duration::days(1))
    } else {
        (start, end)
    }
}

fn cleanup(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
