//! Fetches iCalendar feeds and reads the subset of VEVENT data the importer stores.
//!
//! Recurrence rules are not expanded; only the master occurrence of each series is kept,
//! and override instances (`RECURRENCE-ID`) are skipped.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::Client;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use teamdesk_core::{Event, EventId, ExternalCalendar, ExternalCalendarId, Timezone};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CalendarSourceError {
    #[error("failed to fetch calendar: {0}")]
    Fetch(String),
    #[error("calendar server returned {0}")]
    Status(u16),
    #[error("not an iCalendar document")]
    NotCalendar,
    #[error("event `{uid}` has an unreadable {property}: `{value}`")]
    InvalidDate { uid: String, property: &'static str, value: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceEvent {
    pub uid: String,
    pub summary: String,
    pub description: String,
    pub location: String,
    pub url: String,
    pub organizer: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub whole_day: bool,
    pub attendees: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedCalendar {
    pub prod_id: String,
    pub name: Option<String>,
    pub description: String,
    /// Hex SHA-256 of the raw document.
    pub hash: String,
    pub events: Vec<SourceEvent>,
}

impl FetchedCalendar {
    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        let trimmed = name.trim();
        self.name = (!trimmed.is_empty()).then(|| trimmed.to_owned());
    }

    /// Builds the rows to persist. Events are owned by the new calendar, not the channel.
    pub fn into_records(
        self,
        url: &str,
        channel_id: &str,
        now: DateTime<Utc>,
    ) -> (ExternalCalendar, Vec<Event>) {
        let calendar_id = ExternalCalendarId(uuid::Uuid::new_v4().to_string());
        let events = self
            .events
            .into_iter()
            .map(|source| Event {
                id: EventId::generate(),
                summary: source.summary,
                description: source.description,
                location: source.location,
                url: source.url,
                organizer: source.organizer,
                start: source.start,
                end: source.end,
                is_whole_day: source.whole_day,
                calendar_id: calendar_id.0.clone(),
                channel_id: channel_id.to_owned(),
                attendees: source.attendees,
                notification_sent: false,
                created_at: now,
                updated_at: now,
            })
            .collect();
        let calendar = ExternalCalendar {
            id: calendar_id,
            prod_id: self.prod_id,
            name: self.name.unwrap_or_default(),
            description: self.description,
            url: url.to_owned(),
            hash: self.hash,
            channel_id: channel_id.to_owned(),
        };
        (calendar, events)
    }
}

#[async_trait]
pub trait CalendarSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedCalendar, CalendarSourceError>;
}

pub struct HttpCalendarSource {
    client: Client,
    timezone: Timezone,
}

impl HttpCalendarSource {
    pub fn new(timeout: Duration, timezone: Timezone) -> Result<Self, CalendarSourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| CalendarSourceError::Fetch(error.to_string()))?;
        Ok(Self { client, timezone })
    }
}

#[async_trait]
impl CalendarSource for HttpCalendarSource {
    async fn fetch(&self, url: &str) -> Result<FetchedCalendar, CalendarSourceError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| CalendarSourceError::Fetch(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            warn!(event_name = "agent.calendar.fetch_failed", status = %status, "calendar fetch rejected");
            return Err(CalendarSourceError::Status(status.as_u16()));
        }
        let body = response.text().await.map_err(|error| CalendarSourceError::Fetch(error.to_string()))?;
        let calendar = parse_calendar(&body, self.timezone)?;
        debug!(
            event_name = "agent.calendar.fetched",
            events = calendar.events.len(),
            hash = %calendar.hash,
            "calendar fetched"
        );
        Ok(calendar)
    }
}

struct Property {
    name: String,
    params: Vec<(String, String)>,
    value: String,
}

impl Property {
    fn param(&self, name: &str) -> Option<&str> {
        self.params.iter().find(|(key, _)| key.eq_ignore_ascii_case(name)).map(|(_, value)| value.as_str())
    }
}

#[derive(Default)]
struct PendingEvent {
    uid: String,
    summary: String,
    description: String,
    location: String,
    url: String,
    organizer: String,
    start: Option<Property>,
    end: Option<Property>,
    attendees: Vec<String>,
    is_override: bool,
}

/// Floating times (no `Z`, no `TZID` we understand) are read in `timezone`.
pub fn parse_calendar(body: &str, timezone: Timezone) -> Result<FetchedCalendar, CalendarSourceError> {
    let lines = unfold(body);
    if !lines.iter().any(|line| line.eq_ignore_ascii_case("BEGIN:VCALENDAR")) {
        return Err(CalendarSourceError::NotCalendar);
    }

    let mut calendar = FetchedCalendar {
        prod_id: String::new(),
        name: None,
        description: String::new(),
        hash: content_hash(body),
        events: Vec::new(),
    };
    let mut depth: Vec<String> = Vec::new();
    let mut pending: Option<PendingEvent> = None;

    for line in &lines {
        let Some(property) = parse_line(line) else { continue };
        match property.name.as_str() {
            "BEGIN" => {
                let component = property.value.to_ascii_uppercase();
                if component == "VEVENT" && depth.last().map(String::as_str) == Some("VCALENDAR") {
                    pending = Some(PendingEvent::default());
                }
                depth.push(component);
                continue;
            }
            "END" => {
                let component = property.value.to_ascii_uppercase();
                depth.pop();
                if component == "VEVENT" {
                    if let Some(event) = pending.take() {
                        if let Some(event) = finish_event(event, timezone)? {
                            calendar.events.push(event);
                        }
                    }
                }
                continue;
            }
            _ => {}
        }

        match (depth.last().map(String::as_str), pending.as_mut()) {
            (Some("VEVENT"), Some(event)) => read_event_property(event, property),
            (Some("VCALENDAR"), _) => match property.name.clone().as_str() {
                "PRODID" => calendar.prod_id = property.value,
                "X-WR-CALNAME" => calendar.set_name(unescape(&property.value)),
                "X-WR-CALDESC" => calendar.description = unescape(&property.value),
                _ => {}
            },
            _ => {}
        }
    }

    Ok(calendar)
}

fn read_event_property(event: &mut PendingEvent, mut property: Property) {
    let name = std::mem::take(&mut property.name);
    match name.as_str() {
        "UID" => event.uid = property.value,
        "SUMMARY" => event.summary = unescape(&property.value),
        "DESCRIPTION" => event.description = unescape(&property.value),
        "LOCATION" => event.location = unescape(&property.value),
        "URL" => event.url = property.value,
        "ORGANIZER" => event.organizer = strip_mailto(&property.value),
        "ATTENDEE" => event.attendees.push(strip_mailto(&property.value)),
        "RECURRENCE-ID" => event.is_override = true,
        "DTSTART" => event.start = Some(property),
        "DTEND" => event.end = Some(property),
        _ => {}
    }
}

fn finish_event(event: PendingEvent, timezone: Timezone) -> Result<Option<SourceEvent>, CalendarSourceError> {
    if event.is_override {
        return Ok(None);
    }
    let Some(start_property) = event.start.as_ref() else {
        return Ok(None);
    };

    let (start, whole_day) = read_date(start_property, timezone)
        .ok_or_else(|| invalid_date(&event.uid, "DTSTART", start_property))?;
    let end = match event.end.as_ref() {
        Some(end_property) => {
            read_date(end_property, timezone).ok_or_else(|| invalid_date(&event.uid, "DTEND", end_property))?.0
        }
        None if whole_day => start + chrono::Duration::days(1),
        None => start + chrono::Duration::hours(1),
    };

    Ok(Some(SourceEvent {
        uid: event.uid,
        summary: event.summary,
        description: event.description,
        location: event.location,
        url: event.url,
        organizer: event.organizer,
        start,
        end,
        whole_day,
        attendees: event.attendees,
    }))
}

fn invalid_date(uid: &str, property: &'static str, raw: &Property) -> CalendarSourceError {
    CalendarSourceError::InvalidDate { uid: uid.to_owned(), property, value: raw.value.clone() }
}

fn read_date(property: &Property, timezone: Timezone) -> Option<(DateTime<Utc>, bool)> {
    let value = property.value.trim();
    if property.param("VALUE").is_some_and(|kind| kind.eq_ignore_ascii_case("DATE")) || value.len() == 8 {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d").ok()?;
        let midnight = date.and_hms_opt(0, 0, 0)?;
        return Some((timezone.from_local(midnight)?, true));
    }
    if let Some(utc) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").ok()?;
        return Some((naive.and_utc(), false));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?;
    Some((timezone.from_local(naive)?, false))
}

/// Joins folded continuation lines (RFC 5545 §3.1).
fn unfold(body: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in body.split('\n') {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        match (raw.strip_prefix(' ').or_else(|| raw.strip_prefix('\t')), lines.last_mut()) {
            (Some(continuation), Some(last)) => last.push_str(continuation),
            _ if raw.is_empty() => {}
            _ => lines.push(raw.to_owned()),
        }
    }
    lines
}

fn parse_line(line: &str) -> Option<Property> {
    let (head, value) = line.split_once(':')?;
    let mut parts = head.split(';');
    let name = parts.next()?.trim().to_ascii_uppercase();
    let params = parts
        .filter_map(|param| param.split_once('='))
        .map(|(key, value)| (key.trim().to_owned(), value.trim_matches('"').to_owned()))
        .collect();
    Some(Property { name, params, value: value.to_owned() })
}

fn unescape(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            output.push(ch);
            continue;
        }
        match chars.next() {
            Some('n' | 'N') => output.push('\n'),
            Some(other) => output.push(other),
            None => output.push('\\'),
        }
    }
    output
}

fn strip_mailto(value: &str) -> String {
    let trimmed = value.trim();
    trimmed
        .get(..7)
        .filter(|prefix| prefix.eq_ignore_ascii_case("mailto:"))
        .map_or(trimmed, |_| &trimmed[7..])
        .to_owned()
}

pub fn content_hash(body: &str) -> String {
    Sha256::digest(body.as_bytes()).iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use teamdesk_core::Timezone;

    use super::{content_hash, parse_calendar, unfold, CalendarSourceError};

    const FEED: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:-//Example Corp//Calendar//EN\r\n\
X-WR-CALNAME:Team Holidays\r\n\
BEGIN:VEVENT\r\n\
UID:evt-1\r\n\
SUMMARY:Planning\\, Q1\r\n\
DESCRIPTION:Agenda:\\n- goals\r\n\
\x20 and metrics\r\n\
DTSTART:20250110T100000Z\r\n\
DTEND:20250110T110000Z\r\n\
ORGANIZER:mailto:lead@example.com\r\n\
ATTENDEE;CN=Ann:mailto:ann@example.com\r\n\
BEGIN:VALARM\r\n\
TRIGGER:-PT15M\r\n\
END:VALARM\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:evt-2\r\n\
SUMMARY:Offsite\r\n\
DTSTART;VALUE=DATE:20250120\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:evt-1\r\n\
RECURRENCE-ID:20250117T100000Z\r\n\
SUMMARY:Moved planning\r\n\
DTSTART:20250117T120000Z\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    #[test]
    fn reads_calendar_metadata_and_master_events() {
        let calendar = parse_calendar(FEED, Timezone::Utc).expect("parse");

        assert_eq!(calendar.prod_id, "-//Example Corp//Calendar//EN");
        assert_eq!(calendar.name.as_deref(), Some("Team Holidays"));
        assert_eq!(calendar.events.len(), 2);

        let planning = &calendar.events[0];
        assert_eq!(planning.summary, "Planning, Q1");
        assert_eq!(planning.description, "Agenda:\n- goals and metrics");
        assert_eq!(planning.start, Utc.with_ymd_and_hms(2025, 1, 10, 10, 0, 0).unwrap());
        assert_eq!(planning.organizer, "lead@example.com");
        assert_eq!(planning.attendees, vec!["ann@example.com"]);
    }

    #[test]
    fn whole_day_events_default_to_one_day() {
        let calendar = parse_calendar(FEED, Timezone::Utc).expect("parse");
        let offsite = &calendar.events[1];

        assert!(offsite.whole_day);
        assert_eq!(offsite.end - offsite.start, chrono::Duration::days(1));
    }

    #[test]
    fn calendars_without_a_name_report_none() {
        let feed = "BEGIN:VCALENDAR\nPRODID:x\nEND:VCALENDAR\n";
        let mut calendar = parse_calendar(feed, Timezone::Utc).expect("parse");
        assert!(calendar.name.is_none());

        calendar.set_name("  Imported  ");
        assert_eq!(calendar.name.as_deref(), Some("Imported"));
    }

    #[test]
    fn rejects_non_calendar_documents() {
        assert_eq!(parse_calendar("<html></html>", Timezone::Utc), Err(CalendarSourceError::NotCalendar));
    }

    #[test]
    fn unreadable_dates_name_the_event() {
        let feed = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nUID:bad\nDTSTART:tomorrow\nEND:VEVENT\nEND:VCALENDAR\n";
        assert!(matches!(
            parse_calendar(feed, Timezone::Utc),
            Err(CalendarSourceError::InvalidDate { property: "DTSTART", .. })
        ));
    }

    #[test]
    fn records_belong_to_the_new_calendar() {
        let calendar = parse_calendar(FEED, Timezone::Utc).expect("parse");
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        let (external, events) = calendar.into_records("https://example.com/h.ics", "C1", now);

        assert_eq!(external.name, "Team Holidays");
        assert!(events.iter().all(|event| event.calendar_id == external.id.0 && event.is_external()));
    }

    #[test]
    fn unfold_joins_continuations() {
        assert_eq!(unfold("A:1\r\n 2\r\nB:3"), vec!["A:12", "B:3"]);
        assert_eq!(content_hash("x").len(), 64);
    }
}
