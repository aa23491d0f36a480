use std::str::FromStr;

use chrono_tz::Tz;
use chrono::{
    DateTime, Duration, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone,
    Utc,
};
use thiserror::Error;

/// Format exchanged with the natural-language extractor.
pub const NATURAL_FORMAT: &str = "%d/%m/%Y %H:%M";

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    NATURAL_FORMAT,
    "%d/%m/%Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Timezone {
    #[default]
    Local,
    Utc,
    Fixed(FixedOffset),
    /// IANA zone such as `Europe/Berlin`; offsets follow its DST rules.
    Named(Tz),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DateParseError {
    #[error("unrecognised date `{input}` (expected YYYY-MM-DD HH:MM or DD/MM/YYYY HH:MM)")]
    Unrecognised { input: String },
    #[error("date `{input}` does not exist in the configured timezone")]
    Nonexistent { input: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid timezone `{0}`")]
pub struct InvalidTimezone(pub String);

impl FromStr for Timezone {
    type Err = InvalidTimezone;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "local" => return Ok(Self::Local),
            "utc" | "z" | "gmt" => return Ok(Self::Utc),
            _ => {}
        }

        let (sign, rest) = match trimmed.as_bytes().first() {
            Some(b'+') => (1, &trimmed[1..]),
            Some(b'-') => (-1, &trimmed[1..]),
            _ => {
                return trimmed
                    .parse::<Tz>()
                    .map(Self::Named)
                    .map_err(|_| InvalidTimezone(trimmed.to_string()));
            }
        };
        let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
        let hours = hours.parse::<i32>().map_err(|_| InvalidTimezone(trimmed.to_string()))?;
        let minutes = minutes.parse::<i32>().map_err(|_| InvalidTimezone(trimmed.to_string()))?;
        if hours > 14 || minutes > 59 {
            return Err(InvalidTimezone(trimmed.to_string()));
        }

        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .map(Self::Fixed)
            .ok_or_else(|| InvalidTimezone(trimmed.to_string()))
    }
}

impl Timezone {
    pub fn offset_at(&self, instant: DateTime<Utc>) -> FixedOffset {
        match self {
            Self::Local => Local.offset_from_utc_datetime(&instant.naive_utc()).fix(),
            Self::Utc => Utc.fix(),
            Self::Fixed(offset) => *offset,
            Self::Named(tz) => tz.offset_from_utc_datetime(&instant.naive_utc()).fix(),
        }
    }

    pub fn to_local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.offset_at(instant)).naive_local()
    }

    pub fn from_local(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        match self {
            Self::Local => {
                Local.from_local_datetime(&naive).earliest().map(|dt| dt.with_timezone(&Utc))
            }
            Self::Utc => Some(Utc.from_utc_datetime(&naive)),
            Self::Fixed(offset) => {
                offset.from_local_datetime(&naive).single().map(|dt| dt.with_timezone(&Utc))
            }
            // Skipped wall-clock times (spring forward) have no instant.
            Self::Named(tz) => {
                tz.from_local_datetime(&naive).earliest().map(|dt| dt.with_timezone(&Utc))
            }
        }
    }

    pub fn start_of_day(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let local = self.to_local(instant).date().and_time(NaiveTime::MIN);
        self.from_local(local).unwrap_or(instant)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DateParser {
    timezone: Timezone,
}

impl DateParser {
    pub fn new(timezone: Timezone) -> Self {
        Self { timezone }
    }

    pub fn timezone(&self) -> Timezone {
        self.timezone
    }

    pub fn parse(&self, input: &str) -> Result<DateTime<Utc>, DateParseError> {
        self.parse_at(input, Utc::now())
    }

    /// Accepts RFC 3339, `YYYY-MM-DD HH:MM`, `DD/MM/YYYY HH:MM`, a bare date, or
    /// one of `now`, `today`, `tomorrow`, `yesterday`.
    pub fn parse_at(&self, input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, DateParseError> {
        let trimmed = input.trim();
        let unrecognised = || DateParseError::Unrecognised { input: trimmed.to_string() };

        match trimmed.to_ascii_lowercase().as_str() {
            "" => return Err(unrecognised()),
            "now" => return Ok(now),
            "today" => return Ok(self.timezone.start_of_day(now)),
            "tomorrow" => return Ok(self.timezone.start_of_day(now) + Duration::days(1)),
            "yesterday" => return Ok(self.timezone.start_of_day(now) - Duration::days(1)),
            _ => {}
        }

        if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(parsed.with_timezone(&Utc));
        }

        let naive = DATETIME_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
            .or_else(|| {
                DATE_FORMATS.iter().find_map(|format| {
                    NaiveDate::parse_from_str(trimmed, format)
                        .ok()
                        .map(|date| date.and_time(NaiveTime::MIN))
                })
            })
            .ok_or_else(unrecognised)?;

        self.timezone
            .from_local(naive)
            .ok_or_else(|| DateParseError::Nonexistent { input: trimmed.to_string() })
    }

    /// Strict `DD/MM/YYYY HH:MM`, as produced by the natural-language extractor.
    pub fn parse_natural(&self, input: &str) -> Result<DateTime<Utc>, DateParseError> {
        let trimmed = input.trim();
        let naive = NaiveDateTime::parse_from_str(trimmed, NATURAL_FORMAT)
            .map_err(|_| DateParseError::Unrecognised { input: trimmed.to_string() })?;
        self.timezone
            .from_local(naive)
            .ok_or_else(|| DateParseError::Nonexistent { input: trimmed.to_string() })
    }

    pub fn format_natural(&self, instant: DateTime<Utc>) -> String {
        self.timezone.to_local(instant).format(NATURAL_FORMAT).to_string()
    }

    pub fn format_display(&self, instant: DateTime<Utc>) -> String {
        self.timezone.to_local(instant).format("%a %d %b %Y %H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{DateParseError, DateParser, Timezone};

    fn utc_parser() -> DateParser {
        DateParser::new(Timezone::Utc)
    }

    #[test]
    fn parses_iso_like_and_day_first_formats() {
        let parser = utc_parser();
        let expected = Utc.with_ymd_and_hms(2025, 1, 10, 10, 0, 0).single().expect("valid date");

        assert_eq!(parser.parse("2025-01-10 10:00").expect("iso"), expected);
        assert_eq!(parser.parse("2025-01-10T10:00").expect("iso with T"), expected);
        assert_eq!(parser.parse("10/01/2025 10:00").expect("day first"), expected);
        assert_eq!(parser.parse("2025-01-10T10:00:00Z").expect("rfc3339"), expected);
    }

    #[test]
    fn fixed_offset_shifts_to_utc() {
        let parser = DateParser::new("+07:00".parse().expect("offset"));
        let parsed = parser.parse("2025-01-10 10:00").expect("parse");
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 1, 10, 3, 0, 0).single().expect("valid"));
        assert_eq!(parser.format_natural(parsed), "10/01/2025 10:00");
    }

    #[test]
    fn relative_keywords_anchor_on_start_of_day() {
        let parser = utc_parser();
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 15, 30, 0).single().expect("valid");

        assert_eq!(
            parser.parse_at("today", now).expect("today"),
            Utc.with_ymd_and_hms(2025, 3, 4, 0, 0, 0).single().expect("valid")
        );
        assert_eq!(
            parser.parse_at("Tomorrow", now).expect("tomorrow"),
            Utc.with_ymd_and_hms(2025, 3, 5, 0, 0, 0).single().expect("valid")
        );
        assert_eq!(parser.parse_at("now", now).expect("now"), now);
    }

    #[test]
    fn rejects_garbage_with_the_original_input() {
        let error = utc_parser().parse("next blue moon").expect_err("should fail");
        assert_eq!(error, DateParseError::Unrecognised { input: "next blue moon".to_string() });
    }

    #[test]
    fn natural_format_is_strict() {
        let parser = utc_parser();
        assert!(parser.parse_natural("2025-01-10 10:00").is_err());
        assert!(parser.parse_natural("10/01/2025 10:00").is_ok());
    }

    #[test]
    fn timezone_parsing_accepts_names_and_offsets() {
        assert_eq!("local".parse::<Timezone>().expect("local"), Timezone::Local);
        assert_eq!("UTC".parse::<Timezone>().expect("utc"), Timezone::Utc);
        assert!(matches!(
            "-05:30".parse::<Timezone>().expect("offset"),
            Timezone::Fixed(offset) if offset.local_minus_utc() == -(5 * 3600 + 30 * 60)
        ));
        assert!("Mars/Olympus".parse::<Timezone>().is_err());
        assert_eq!(
            "Asia/Ho_Chi_Minh".parse::<Timezone>().expect("iana name"),
            Timezone::Named(chrono_tz::Asia::Ho_Chi_Minh)
        );
    }

    #[test]
    fn named_zone_follows_daylight_saving() {
        let parser = DateParser::new("Europe/Berlin".parse().expect("berlin"));

        assert_eq!(
            parser.parse("2025-01-10 10:00").expect("winter"),
            Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).single().expect("valid")
        );
        let summer = parser.parse("2025-07-01 10:00").expect("summer");
        assert_eq!(summer, Utc.with_ymd_and_hms(2025, 7, 1, 8, 0, 0).single().expect("valid"));
        assert_eq!(parser.format_natural(summer), "01/07/2025 10:00");
    }

    #[test]
    fn named_zone_rejects_times_inside_the_dst_gap() {
        let parser = DateParser::new("Europe/Berlin".parse().expect("berlin"));

        let error = parser.parse("2025-03-30 02:30").expect_err("skipped hour");
        assert_eq!(error, DateParseError::Nonexistent { input: "2025-03-30 02:30".to_string() });
        assert_eq!(
            parser.parse("2025-03-30 03:30").expect("after the gap"),
            Utc.with_ymd_and_hms(2025, 3, 30, 1, 30, 0).single().expect("valid")
        );
    }
}
