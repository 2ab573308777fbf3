//! Event-local wall-clock time.
//!
//! Gating decisions compare absolute UTC instants; this module only turns
//! those instants into something a guest can read: the zoned date/time,
//! a relative day label and a countdown to the next boundary.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Errors raised while resolving an event timezone
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClockError {
    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),
}

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to (simulations and tests)
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock() = instant;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Relative day label for an upcoming instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayLabel {
    Today,
    Tomorrow,
    On(NaiveDate),
}

impl fmt::Display for DayLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DayLabel::Today => write!(f, "today"),
            DayLabel::Tomorrow => write!(f, "tomorrow"),
            DayLabel::On(date) => write!(f, "on {}", date.format("%B %-d, %Y")),
        }
    }
}

/// Time remaining until a target instant, clamped at zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Countdown {
    pub hours: u64,
    pub minutes: u8,
    pub seconds: u8,
}

impl Countdown {
    /// Build from a signed remaining duration. Partial seconds round up so
    /// the display only reads zero once the target has been reached.
    pub fn from_remaining(remaining: chrono::Duration) -> Self {
        let millis = remaining.num_milliseconds();
        if millis <= 0 {
            return Self::default();
        }

        let total_secs = (millis as u64 + 999) / 1000;
        Self {
            hours: total_secs / 3600,
            minutes: ((total_secs % 3600) / 60) as u8,
            seconds: (total_secs % 60) as u8,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.hours == 0 && self.minutes == 0 && self.seconds == 0
    }

    pub fn total_seconds(&self) -> u64 {
        self.hours * 3600 + self.minutes as u64 * 60 + self.seconds as u64
    }
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }
}

/// Converts instants into an event's local calendar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventClock {
    tz: Tz,
}

impl EventClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Resolve an IANA timezone id such as `Europe/Berlin`
    pub fn from_tz_id(tz_id: &str) -> Result<Self, ClockError> {
        tz_id
            .trim()
            .parse::<Tz>()
            .map(Self::new)
            .map_err(|_| ClockError::UnknownTimezone(tz_id.to_string()))
    }

    /// Zoned wall-clock time of an instant
    pub fn local(&self, instant: DateTime<Utc>) -> DateTime<Tz> {
        instant.with_timezone(&self.tz)
    }

    /// Human readable local date and time, e.g. `January 17, 2025 at 13:00 CET`
    pub fn format_local(&self, instant: DateTime<Utc>) -> String {
        self.local(instant)
            .format("%B %-d, %Y at %H:%M %Z")
            .to_string()
    }

    /// Label `target` relative to `now` by comparing local calendar dates.
    ///
    /// Subtracting instants would mislabel days around DST shifts, so both
    /// instants are projected into the event timezone first.
    pub fn day_label(&self, target: DateTime<Utc>, now: DateTime<Utc>) -> DayLabel {
        let target_date = self.local(target).date_naive();
        let today = self.local(now).date_naive();

        if target_date == today {
            DayLabel::Today
        } else if today.succ_opt() == Some(target_date) {
            DayLabel::Tomorrow
        } else {
            DayLabel::On(target_date)
        }
    }

    /// Countdown from `now` to `target`
    pub fn countdown(&self, target: DateTime<Utc>, now: DateTime<Utc>) -> Countdown {
        Countdown::from_remaining(target.signed_duration_since(now))
    }
}
