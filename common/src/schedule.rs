//! Clip scheduler – expands a date range, a daily window and a sampling
//! pattern into concrete playback clips.
//!
//! Everything is computed with [`crate::timestamp`] arithmetic, so the
//! output is deterministic and independent of the host clock and zone.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::timestamp::{CalendarDate, TimeOfDay, Timestamp, TimestampError};

/// Upper bound for `timesPerDay`: one clip per second of a full day.
pub const MAX_TIMES_PER_DAY: u32 = 86_400;

/// Upper bound on the clips one request may produce.
pub const MAX_CLIPS: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FrequencyMode {
    /// A clip at the top of every N-th hour, starting at the window's hour.
    EveryNHours,
    /// N clips spread evenly across the window.
    TimesPerDay,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationUnit {
    Seconds,
    #[default]
    Minutes,
}

fn default_id() -> u32 {
    1
}

/// Scheduler inputs, as posted by the recording-automation form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub start_date: CalendarDate,
    /// Inclusive.
    pub end_date: CalendarDate,
    pub start_time_of_day: TimeOfDay,
    pub end_time_of_day: TimeOfDay,
    pub frequency_mode: FrequencyMode,
    /// N hours, or clips per day, depending on the mode.
    pub frequency_value: u32,
    pub clip_duration: f64,
    #[serde(default)]
    pub clip_duration_unit: DurationUnit,
    #[serde(rename = "cameraID", default = "default_id")]
    pub camera_id: u32,
    #[serde(rename = "streamID", default = "default_id")]
    pub stream_id: u32,
}

impl ScheduleRequest {
    /// Clip length in whole seconds (fractional minutes are rounded).
    pub fn clip_duration_secs(&self) -> Result<i64, ScheduleError> {
        let secs = match self.clip_duration_unit {
            DurationUnit::Seconds => self.clip_duration.round(),
            DurationUnit::Minutes => (self.clip_duration * 60.0).round(),
        };
        if !secs.is_finite() || secs < 1.0 || secs > f64::from(MAX_TIMES_PER_DAY) {
            return Err(ScheduleError::InvalidDuration(self.clip_duration));
        }
        Ok(secs as i64)
    }
}

/// One time-bounded recording interval on one day.
///
/// Invariant: `start_time < end_time`, and both lie inside the daily
/// window of `date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    pub date: CalendarDate,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    #[serde(rename = "cameraID")]
    pub camera_id: u32,
    #[serde(rename = "streamID")]
    pub stream_id: u32,
}

impl Clip {
    pub fn duration_secs(&self) -> i64 {
        // Clips never span midnight, so seconds-of-day differences suffice.
        i64::from(self.end_time.seconds_of_day()) - i64::from(self.start_time.seconds_of_day())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScheduleError {
    #[error("frequency value must be at least 1")]
    ZeroFrequency,
    #[error("times per day may not exceed {MAX_TIMES_PER_DAY}, got {0}")]
    TooFrequent(u32),
    #[error("clip duration must be between 1 second and 24 hours, got {0}")]
    InvalidDuration(f64),
    #[error("end of day {end} is before start of day {start}")]
    InvertedWindow { start: TimeOfDay, end: TimeOfDay },
    #[error("schedule produces more than {MAX_CLIPS} clips")]
    TooManyClips,
    #[error(transparent)]
    Timestamp(#[from] TimestampError),
}

/// Every calendar day in `[start, end]`, in order.  Empty if `end < start`.
pub fn days_in_range(
    start: CalendarDate,
    end: CalendarDate,
) -> Result<Vec<CalendarDate>, TimestampError> {
    let mut days = Vec::new();
    let mut current = start;
    while current <= end {
        days.push(current);
        if current == end {
            break;
        }
        current = current.next_day()?;
    }
    Ok(days)
}

/// The open and close instants of the recording window on one day.
struct DayWindow {
    open: Timestamp,
    close: Timestamp,
}

/// Build the ordered clip list for a schedule request.
pub fn plan(req: &ScheduleRequest) -> Result<Vec<Clip>, ScheduleError> {
    if req.frequency_value == 0 {
        return Err(ScheduleError::ZeroFrequency);
    }
    if req.frequency_mode == FrequencyMode::TimesPerDay && req.frequency_value > MAX_TIMES_PER_DAY
    {
        return Err(ScheduleError::TooFrequent(req.frequency_value));
    }
    if req.end_time_of_day < req.start_time_of_day {
        return Err(ScheduleError::InvertedWindow {
            start: req.start_time_of_day,
            end: req.end_time_of_day,
        });
    }
    let duration = req.clip_duration_secs()?;

    let mut clips = Vec::new();
    for date in days_in_range(req.start_date, req.end_date)? {
        let window = DayWindow {
            open: date.at(req.start_time_of_day),
            close: date.at(req.end_time_of_day),
        };
        let day_clips = match req.frequency_mode {
            FrequencyMode::EveryNHours => every_n_hours(&window, req.frequency_value, duration)?,
            FrequencyMode::TimesPerDay => times_per_day(&window, req.frequency_value, duration)?,
        };
        debug!("{date}: {} clip(s)", day_clips.len());
        if clips.len() + day_clips.len() > MAX_CLIPS {
            return Err(ScheduleError::TooManyClips);
        }

        clips.extend(day_clips.into_iter().map(|(start_time, end_time)| Clip {
            date,
            start_time,
            end_time,
            camera_id: req.camera_id,
            stream_id: req.stream_id,
        }));
    }
    Ok(clips)
}

/// Clips at minute 0 of every `n`-th hour from the window's start hour.
///
/// Hours that begin before the window opens are skipped; the first clip
/// that would end after the window closes terminates the day.
fn every_n_hours(
    window: &DayWindow,
    n: u32,
    duration: i64,
) -> Result<Vec<(Timestamp, Timestamp)>, ScheduleError> {
    let mut out = Vec::new();
    let first_hour = u32::from(window.open.hour());

    for hour in (first_hour..24).step_by(n as usize) {
        let start = window.open.date().at(TimeOfDay::new(hour as u8, 0)?);
        if start < window.open {
            continue;
        }
        let end = start.add_seconds(duration)?;
        if end > window.close {
            break;
        }
        out.push((start, end));
    }
    Ok(out)
}

/// `count` clips at `open + i * (span / count)`; each candidate that would
/// end after the window closes is dropped on its own.
fn times_per_day(
    window: &DayWindow,
    count: u32,
    duration: i64,
) -> Result<Vec<(Timestamp, Timestamp)>, ScheduleError> {
    let span_secs = window.close.seconds_of_day() - window.open.seconds_of_day();
    let interval = f64::from(span_secs) / 60.0 / f64::from(count);

    let mut out = Vec::new();
    for i in 0..count {
        let start = window.open.add_minutes(f64::from(i) * interval)?;
        let end = start.add_seconds(duration)?;
        if end <= window.close {
            out.push((start, end));
        }
    }
    Ok(out)
}
