//! Fixed-width calendar time (`YYYYMMDDhhmmss`) and the arithmetic the
//! clip scheduler runs on.
//!
//! No platform date/time type is involved: values are plain calendar
//! fields and every operation is integer carry/borrow over them.
//!
//! Known limitation: the month table is not leap-aware.  February always
//! has 28 days, so `20240229000000` is rejected and adding one second to
//! `20240228235959` yields `20240301000000`.  Existing schedules depend on
//! this arithmetic; do not "fix" it without migrating them.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Days per month, January first.  Not leap-aware (see module docs).
pub const DAYS_IN_MONTH: [u8; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

const DAYS_IN_YEAR: i64 = 365;
const MAX_YEAR: i64 = 9999;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimestampError {
    #[error("timestamp must be 14 digits (YYYYMMDDhhmmss), got {0:?}")]
    Malformed(String),
    #[error("date must be YYYY-MM-DD, got {0:?}")]
    MalformedDate(String),
    #[error("time of day must be HH:MM, got {0:?}")]
    MalformedTime(String),
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: u32 },
    #[error("delta is not a finite number")]
    NonFiniteDelta,
    #[error("result falls outside years 0000-9999")]
    YearOverflow,
}

/// Length of `month` (1..=12) in the non-leap table.
fn days_in_month(month: u8) -> u8 {
    DAYS_IN_MONTH[usize::from(month - 1)]
}

fn check(field: &'static str, value: u32, min: u32, max: u32) -> Result<(), TimestampError> {
    if value < min || value > max {
        return Err(TimestampError::OutOfRange { field, value });
    }
    Ok(())
}

/// Parse an all-digit field.  Callers have already checked the width.
fn digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

// ── CalendarDate ─────────────────────────────────────────────────────────

/// A calendar day, rendered as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CalendarDate {
    year: u16,
    month: u8,
    day: u8,
}

impl CalendarDate {
    pub fn new(year: u16, month: u8, day: u8) -> Result<Self, TimestampError> {
        check("year", u32::from(year), 0, MAX_YEAR as u32)?;
        check("month", u32::from(month), 1, 12)?;
        check("day", u32::from(day), 1, u32::from(days_in_month(month)))?;
        Ok(Self { year, month, day })
    }

    pub fn year(self) -> u16 {
        self.year
    }

    pub fn month(self) -> u8 {
        self.month
    }

    pub fn day(self) -> u8 {
        self.day
    }

    /// The following day, rolling over month and year ends.
    pub fn next_day(self) -> Result<Self, TimestampError> {
        self.add_days(1)
    }

    /// Shift by a signed number of days.
    ///
    /// Every year of the non-leap table is exactly 365 days long, so whole
    /// years are carried first and only the remainder walks months.
    pub fn add_days(self, days: i64) -> Result<Self, TimestampError> {
        let mut year = i64::from(self.year) + days.div_euclid(DAYS_IN_YEAR);
        let mut month = self.month;
        let mut day = i64::from(self.day) + days.rem_euclid(DAYS_IN_YEAR);

        while day > i64::from(days_in_month(month)) {
            day -= i64::from(days_in_month(month));
            month += 1;
            if month > 12 {
                month = 1;
                year += 1;
            }
        }

        if !(0..=MAX_YEAR).contains(&year) {
            return Err(TimestampError::YearOverflow);
        }
        Ok(Self {
            year: year as u16,
            month,
            day: day as u8,
        })
    }

    /// Combine with a time of day (seconds = 0).
    pub fn at(self, time: TimeOfDay) -> Timestamp {
        Timestamp {
            year: self.year,
            month: self.month,
            day: self.day,
            hour: time.hour,
            minute: time.minute,
            second: 0,
        }
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl FromStr for CalendarDate {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || TimestampError::MalformedDate(s.to_string());
        let mut parts = s.split('-');
        let (Some(y), Some(m), Some(d), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };
        if y.len() != 4 || m.len() != 2 || d.len() != 2 {
            return Err(malformed());
        }
        let year = digits(y).ok_or_else(malformed)?;
        let month = digits(m).ok_or_else(malformed)?;
        let day = digits(d).ok_or_else(malformed)?;
        Self::new(year as u16, month as u8, day as u8)
    }
}

// ── TimeOfDay ────────────────────────────────────────────────────────────

/// A wall-clock time with minute precision, rendered as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Result<Self, TimestampError> {
        check("hour", u32::from(hour), 0, 23)?;
        check("minute", u32::from(minute), 0, 59)?;
        Ok(Self { hour, minute })
    }

    pub fn minutes_since_midnight(self) -> u32 {
        u32::from(self.hour) * 60 + u32::from(self.minute)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || TimestampError::MalformedTime(s.to_string());
        let (h, m) = s.split_once(':').ok_or_else(malformed)?;
        if h.len() != 2 || m.len() != 2 {
            return Err(malformed());
        }
        let hour = digits(h).ok_or_else(malformed)?;
        let minute = digits(m).ok_or_else(malformed)?;
        Self::new(hour as u8, minute as u8)
    }
}

// ── Timestamp ────────────────────────────────────────────────────────────

/// An instant in the device's `YYYYMMDDhhmmss` encoding.
///
/// Field order matches the encoding, so the derived `Ord` agrees with
/// lexicographic comparison of the zero-padded strings.  Fields are only
/// set through validated constructors and arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
}

impl Timestamp {
    pub fn new(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
    ) -> Result<Self, TimestampError> {
        let date = CalendarDate::new(year, month, day)?;
        let time = TimeOfDay::new(hour, minute)?;
        check("second", u32::from(second), 0, 59)?;
        Ok(Self {
            second,
            ..date.at(time)
        })
    }

    pub fn date(&self) -> CalendarDate {
        CalendarDate {
            year: self.year,
            month: self.month,
            day: self.day,
        }
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn second(&self) -> u8 {
        self.second
    }

    /// Seconds elapsed since midnight of this timestamp's own day.
    pub fn seconds_of_day(&self) -> u32 {
        u32::from(self.hour) * 3600 + u32::from(self.minute) * 60 + u32::from(self.second)
    }

    /// Add a signed number of seconds, carrying (or borrowing) through
    /// minutes, hours, days, months and years.
    pub fn add_seconds(self, delta: i64) -> Result<Self, TimestampError> {
        let seconds = i64::from(self.second)
            .checked_add(delta)
            .ok_or(TimestampError::YearOverflow)?;
        let minutes = i64::from(self.minute) + seconds.div_euclid(60);
        let hours = i64::from(self.hour) + minutes.div_euclid(60);
        let date = self.date().add_days(hours.div_euclid(24))?;

        Ok(Self {
            year: date.year,
            month: date.month,
            day: date.day,
            hour: hours.rem_euclid(24) as u8,
            minute: minutes.rem_euclid(60) as u8,
            second: seconds.rem_euclid(60) as u8,
        })
    }

    /// Add (possibly fractional) minutes, rounded to the nearest second.
    pub fn add_minutes(self, minutes: f64) -> Result<Self, TimestampError> {
        let seconds = (minutes * 60.0).round();
        if !seconds.is_finite() || seconds.abs() > i64::MAX as f64 {
            return Err(TimestampError::NonFiniteDelta);
        }
        self.add_seconds(seconds as i64)
    }

    /// Add (possibly fractional) hours, rounded to the nearest second.
    pub fn add_hours(self, hours: f64) -> Result<Self, TimestampError> {
        self.add_minutes(hours * 60.0)
    }

    /// Three-way comparison; identical to comparing the encoded strings.
    pub fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}{:02}{:02}{:02}{:02}{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

impl FromStr for Timestamp {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 14 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TimestampError::Malformed(s.to_string()));
        }
        // All ASCII digits, so byte slicing is safe and parsing cannot fail.
        let field = |range: std::ops::Range<usize>| digits(&s[range]).unwrap_or_default();
        Self::new(
            field(0..4) as u16,
            field(4..6) as u8,
            field(6..8) as u8,
            field(8..10) as u8,
            field(10..12) as u8,
            field(12..14) as u8,
        )
    }
}

/// Compare two encoded timestamps after validating both.
pub fn compare_encoded(a: &str, b: &str) -> Result<Ordering, TimestampError> {
    let a: Timestamp = a.parse()?;
    let b: Timestamp = b.parse()?;
    Ok(a.compare(&b))
}

// ── serde: all three types travel as their string encodings ─────────────

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(Timestamp);
string_serde!(CalendarDate);
string_serde!(TimeOfDay);
