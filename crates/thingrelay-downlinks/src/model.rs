//! Downlink records.
//!
//! A downlink polls an HTTP endpoint on a schedule and republishes the
//! response as a message from its thing. Schedules are evaluated in the
//! scheduler's own time zone.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::{Deserialize, Serialize};

use thingrelay_core::timefmt::{parse_timezone, TimeFormat};

use crate::error::{DownlinkError, Result};

/// Accepted layouts for one-time `date_time` values.
const DATE_TIME_LAYOUTS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"];
const DAY_TIME_LAYOUT: &str = "%H:%M";
const METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Once,
    Minutely,
    Hourly,
    Daily,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scheduler {
    /// IANA zone; empty is UTC.
    pub time_zone: String,
    pub frequency: Frequency,
    /// One-time fire moment, e.g. `2024-05-01 08:30`.
    pub date_time: String,
    /// Daily fire time, `HH:MM`.
    pub day_time: String,
    /// Repeat every N hours.
    pub hour: u32,
    /// Repeat every N minutes.
    pub minute: u32,
}

/// When a [`Scheduler`] fires.
#[derive(Debug, Clone)]
pub enum Trigger {
    Once(DateTime<Utc>),
    Repeating(Box<Schedule>),
}

impl Scheduler {
    pub fn timezone(&self) -> Result<Tz> {
        parse_timezone(&self.time_zone).map_err(|e| DownlinkError::Schedule(e.to_string()))
    }

    /// Six-field cron expression for repeating frequencies.
    pub fn cron_expression(&self) -> Result<String> {
        match self.frequency {
            Frequency::Once => Err(DownlinkError::Schedule(
                "one-time schedules have no cron expression".to_string(),
            )),
            Frequency::Minutely => {
                if !(1..=59).contains(&self.minute) {
                    return Err(DownlinkError::Schedule(format!("minute interval {}", self.minute)));
                }
                Ok(format!("0 */{} * * * *", self.minute))
            }
            Frequency::Hourly => {
                if !(1..=23).contains(&self.hour) {
                    return Err(DownlinkError::Schedule(format!("hour interval {}", self.hour)));
                }
                Ok(format!("0 0 */{} * * *", self.hour))
            }
            Frequency::Daily => {
                let time = NaiveTime::parse_from_str(&self.day_time, DAY_TIME_LAYOUT)
                    .map_err(|_| DownlinkError::Schedule(format!("day time {:?}", self.day_time)))?;
                Ok(format!("0 {} {} * * *", time.format("%M"), time.format("%H")))
            }
        }
    }

    /// One-time fire instant, read in the scheduler's zone.
    pub fn fire_at(&self) -> Result<DateTime<Utc>> {
        let tz = self.timezone()?;
        let naive = DATE_TIME_LAYOUTS
            .iter()
            .find_map(|layout| NaiveDateTime::parse_from_str(self.date_time.trim(), layout).ok())
            .ok_or_else(|| DownlinkError::Schedule(format!("date time {:?}", self.date_time)))?;
        tz.from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| DownlinkError::Schedule(format!("date time {:?} does not exist", self.date_time)))
    }

    pub fn trigger(&self) -> Result<Trigger> {
        match self.frequency {
            Frequency::Once => Ok(Trigger::Once(self.fire_at()?)),
            _ => {
                let expression = self.cron_expression()?;
                let schedule = Schedule::from_str(&expression)
                    .map_err(|e| DownlinkError::Schedule(format!("{}: {}", expression, e)))?;
                Ok(Trigger::Repeating(Box::new(schedule)))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    #[default]
    Minute,
    Hour,
    Day,
}

/// Query parameters rewritten with a time window before each request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeFilter {
    pub start_param: String,
    pub end_param: String,
    /// Time format name, see [`TimeFormat::parse`].
    pub format: String,
    /// Window runs forward from now instead of back.
    pub forecast: bool,
    pub interval: Interval,
    pub value: u64,
}

impl TimeFilter {
    pub fn is_enabled(&self) -> bool {
        !self.start_param.is_empty() || !self.end_param.is_empty()
    }

    pub fn window(&self) -> Duration {
        let unit = match self.interval {
            Interval::Minute => 60,
            Interval::Hour => 3_600,
            Interval::Day => 86_400,
        };
        Duration::from_secs(self.value.saturating_mul(unit))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Downlink {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub thing_id: String,
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub scheduler: Scheduler,
    #[serde(default)]
    pub time_filter: TimeFilter,
}

fn default_method() -> String {
    "GET".to_string()
}

impl Downlink {
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.url)
            .map_err(|e| DownlinkError::Invalid(format!("url {:?}: {}", self.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DownlinkError::Invalid(format!("unsupported scheme {}", url.scheme())));
        }
        if !METHODS.contains(&self.method.to_ascii_uppercase().as_str()) {
            return Err(DownlinkError::Invalid(format!("method {}", self.method)));
        }

        self.scheduler.trigger()?;

        if self.time_filter.is_enabled() {
            if self.time_filter.value == 0 {
                return Err(DownlinkError::Invalid("time filter value must be positive".into()));
            }
            if !TimeFormat::parse(&self.time_filter.format).is_valid() {
                return Err(DownlinkError::Invalid(format!(
                    "time filter format {:?}",
                    self.time_filter.format
                )));
            }
        }
        Ok(())
    }
}
