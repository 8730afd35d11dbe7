//! Named time formats shared by the JSON transformer and downlink time filters.
//!
//! A format is either one of the epoch names (`unix`, `unix_ms`, `unix_us`,
//! `unix_ns`), one of the layout aliases below, or a raw strftime layout.

use std::fmt::Write;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::Value;

use crate::error::{Error, Result};

const RFC1123_LAYOUT: &str = "%a, %d %b %Y %H:%M:%S %Z";
const RFC822_LAYOUT: &str = "%d %b %y %H:%M %Z";
const ISO8601_LAYOUT: &str = "%Y-%m-%dT%H:%M:%S%z";
const DATETIME_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_LAYOUT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeFormat {
    Unix,
    UnixMs,
    UnixUs,
    UnixNs,
    Rfc3339,
    Rfc3339Nano,
    Layout(String),
}

impl TimeFormat {
    /// Resolve a format name. Unrecognised names are taken as strftime layouts,
    /// and an empty name is RFC 3339.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "unix" => Self::Unix,
            "unix_ms" | "unixmilli" => Self::UnixMs,
            "unix_us" | "unixmicro" => Self::UnixUs,
            "unix_ns" | "unixnano" => Self::UnixNs,
            "" | "rfc3339" => Self::Rfc3339,
            "rfc3339nano" | "rfc3339_nano" => Self::Rfc3339Nano,
            "rfc1123" => Self::Layout(RFC1123_LAYOUT.to_string()),
            "rfc822" => Self::Layout(RFC822_LAYOUT.to_string()),
            "iso8601" => Self::Layout(ISO8601_LAYOUT.to_string()),
            "datetime" => Self::Layout(DATETIME_LAYOUT.to_string()),
            "dateonly" | "date" => Self::Layout(DATE_LAYOUT.to_string()),
            _ => Self::Layout(name.to_string()),
        }
    }

    pub fn is_epoch(&self) -> bool {
        matches!(self, Self::Unix | Self::UnixMs | Self::UnixUs | Self::UnixNs)
    }

    /// Whether a raw layout only uses known strftime specifiers.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Layout(layout) => {
                !layout.is_empty()
                    && StrftimeItems::new(layout).all(|item| !matches!(item, Item::Error))
            }
            _ => true,
        }
    }

    /// Render an instant in the given zone.
    pub fn format(&self, instant: DateTime<Utc>, tz: Tz) -> String {
        match self {
            Self::Unix => instant.timestamp().to_string(),
            Self::UnixMs => instant.timestamp_millis().to_string(),
            Self::UnixUs => instant.timestamp_micros().to_string(),
            Self::UnixNs => instant
                .timestamp_nanos_opt()
                .unwrap_or_else(|| instant.timestamp_micros().saturating_mul(1_000))
                .to_string(),
            Self::Rfc3339 => instant
                .with_timezone(&tz)
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            Self::Rfc3339Nano => instant
                .with_timezone(&tz)
                .to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
            Self::Layout(layout) => {
                let local = instant.with_timezone(&tz);
                let mut out = String::new();
                // Invalid specifiers fail the write instead of panicking.
                if write!(out, "{}", local.format(layout)).is_err() {
                    return local.to_rfc3339();
                }
                out
            }
        }
    }

    /// Parse a JSON time value into unix nanoseconds.
    ///
    /// Epoch formats accept numbers or numeric strings. Layouts without an
    /// offset are read in `tz`.
    pub fn parse_value(&self, value: &Value, tz: Tz) -> Result<i64> {
        if self.is_epoch() {
            let raw = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .ok_or_else(|| Error::Validation(format!("invalid epoch time {}", value)))?;

            let scale = match self {
                Self::Unix => 1e9,
                Self::UnixMs => 1e6,
                Self::UnixUs => 1e3,
                _ => 1.0,
            };
            return Ok((raw * scale) as i64);
        }

        let Value::String(text) = value else {
            return Err(Error::Validation(format!("time value {} is not a string", value)));
        };

        let parsed = match self {
            Self::Rfc3339 | Self::Rfc3339Nano => DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.with_timezone(&Utc))
                .ok(),
            Self::Layout(layout) => parse_layout(text, layout, tz),
            _ => None,
        };

        let instant =
            parsed.ok_or_else(|| Error::Validation(format!("cannot parse time {:?}", text)))?;
        Ok(instant
            .timestamp_nanos_opt()
            .unwrap_or_else(|| instant.timestamp_micros().saturating_mul(1_000)))
    }
}

fn parse_layout(text: &str, layout: &str, tz: Tz) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_str(text, layout) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(text, layout)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, layout)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an IANA zone name; empty means UTC.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    if name.is_empty() {
        return Ok(Tz::UTC);
    }
    name.parse::<Tz>()
        .map_err(|_| Error::Validation(format!("unknown time zone {:?}", name)))
}
