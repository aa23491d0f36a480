//! iCalendar feed for a channel calendar, so it can be subscribed to from calendar apps.

use chrono::{DateTime, Utc};
use teamdesk_core::domain::calendar::Calendar;
use teamdesk_core::domain::event::Event;
use teamdesk_core::time::Timezone;

const PROD_ID: &str = "-//Teamdesk//Channel Calendar//EN";
const MAX_LINE_OCTETS: usize = 75;

pub fn render_calendar(calendar: &Calendar, events: &[Event], timezone: Timezone, now: DateTime<Utc>) -> String {
    let mut lines = vec![
        "BEGIN:VCALENDAR".to_owned(),
        "VERSION:2.0".to_owned(),
        format!("PRODID:{PROD_ID}"),
        format!("X-WR-CALNAME:{}", escape(&calendar.name)),
    ];

    for event in events {
        lines.push("BEGIN:VEVENT".to_owned());
        lines.push(format!("UID:{}", escape(&event.id.0)));
        lines.push(format!("DTSTAMP:{}", utc_stamp(now)));
        if event.is_whole_day {
            lines.push(format!("DTSTART;VALUE=DATE:{}", timezone.to_local(event.start).format("%Y%m%d")));
            lines.push(format!("DTEND;VALUE=DATE:{}", timezone.to_local(event.end).format("%Y%m%d")));
        } else {
            lines.push(format!("DTSTART:{}", utc_stamp(event.start)));
            lines.push(format!("DTEND:{}", utc_stamp(event.end)));
        }
        lines.push(format!("SUMMARY:{}", escape(&event.summary)));
        for (name, value) in [
            ("DESCRIPTION", &event.description),
            ("LOCATION", &event.location),
            ("URL", &event.url),
            ("ORGANIZER", &event.organizer),
        ] {
            if !value.is_empty() {
                lines.push(format!("{name}:{}", escape(value)));
            }
        }
        lines.push(format!("LAST-MODIFIED:{}", utc_stamp(event.updated_at)));
        lines.push("END:VEVENT".to_owned());
    }
    lines.push("END:VCALENDAR".to_owned());

    lines.iter().map(|line| fold(line)).collect::<Vec<_>>().join("\r\n") + "\r\n"
}

fn utc_stamp(instant: DateTime<Utc>) -> String {
    instant.format("%Y%m%dT%H%M%SZ").to_string()
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for character in value.chars() {
        match character {
            '\\' => escaped.push_str("\\\\"),
            ';' => escaped.push_str("\\;"),
            ',' => escaped.push_str("\\,"),
            '\n' => escaped.push_str("\\n"),
            '\r' => {}
            other => escaped.push(other),
        }
    }
    escaped
}

/// Splits long content lines; continuation lines start with a single space.
fn fold(line: &str) -> String {
    let mut folded = String::with_capacity(line.len() + line.len() / MAX_LINE_OCTETS * 3);
    let mut width = 0;
    for character in line.chars() {
        let octets = character.len_utf8();
        if width + octets > MAX_LINE_OCTETS {
            folded.push_str("\r\n ");
            width = 1;
        }
        folded.push(character);
        width += octets;
    }
    folded
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use teamdesk_core::domain::calendar::Calendar;
    use teamdesk_core::domain::event::{Event, EventId};
    use teamdesk_core::time::Timezone;

    use super::{fold, render_calendar};

    fn event(id: &str, whole_day: bool) -> Event {
        let start = Utc.with_ymd_and_hms(2025, 1, 9, 17, 0, 0).single().expect("start");
        Event {
            id: EventId(id.to_owned()),
            summary: "Retro, part 2; final".to_owned(),
            description: "Bring notes\nand coffee".to_owned(),
            location: String::new(),
            url: String::new(),
            organizer: "ann".to_owned(),
            start,
            end: start + if whole_day { Duration::days(1) } else { Duration::hours(1) },
            is_whole_day: whole_day,
            calendar_id: "C1".to_owned(),
            channel_id: "C1".to_owned(),
            attendees: Vec::new(),
            notification_sent: false,
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn events_render_with_escaped_text_and_crlf_lines() {
        let calendar = Calendar { channel_id: "C1".to_owned(), name: "general".to_owned() };
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().expect("now");

        let feed = render_calendar(&calendar, &[event("e1", false)], Timezone::Utc, now);

        assert!(feed.starts_with("BEGIN:VCALENDAR\r\nVERSION:2.0\r\n"));
        assert!(feed.ends_with("END:VEVENT\r\nEND:VCALENDAR\r\n"));
        assert!(feed.contains("X-WR-CALNAME:general\r\n"));
        assert!(feed.contains("DTSTART:20250109T170000Z\r\nDTEND:20250109T180000Z\r\n"));
        assert!(feed.contains("SUMMARY:Retro\\, part 2\\; final\r\n"));
        assert!(feed.contains("DESCRIPTION:Bring notes\\nand coffee\r\n"));
        assert!(!feed.contains("LOCATION:"));
    }

    #[test]
    fn whole_day_events_use_local_dates() {
        let calendar = Calendar { channel_id: "C1".to_owned(), name: "general".to_owned() };
        let plus_seven: Timezone = "+07:00".parse().expect("offset");

        let feed = render_calendar(&calendar, &[event("e1", true)], plus_seven, Utc::now());

        assert!(feed.contains("DTSTART;VALUE=DATE:20250110\r\nDTEND;VALUE=DATE:20250111\r\n"));
    }

    #[test]
    fn long_lines_are_folded_at_seventy_five_octets() {
        let line = format!("DESCRIPTION:{}", "x".repeat(100));
        let folded = fold(&line);
        let parts: Vec<&str> = folded.split("\r\n").collect();

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].len(), 75);
        assert!(parts[1].starts_with(' '));
        assert_eq!(parts.concat().replace(' ', ""), line.replace(' ', ""));
    }
}
