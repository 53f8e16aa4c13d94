use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CalendarError {
    #[error("{time} is outside operational hours {hours}")]
    OutOfHours { time: NaiveTime, hours: OperationalHours },
    #[error("invalid date range: {end} is before {start}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error("empty time window: {start} must be before {end}")]
    EmptyWindow { start: NaiveTime, end: NaiveTime },
    #[error("date range spans {days} days, limit is {max}")]
    RangeTooLong { days: i64, max: u32 },
}

/// Half-open overlap test shared by every window type. Empty intervals never overlap.
fn half_open_overlap<T: Ord + Copy>(a: (T, T), b: (T, T)) -> bool {
    a.0 < a.1 && b.0 < b.1 && a.0 < b.1 && b.0 < a.1
}

// ── Time windows ─────────────────────────────────────────────────

/// Half-open wall-clock window `[start, end)` within a single calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, CalendarError> {
        if start >= end {
            return Err(CalendarError::EmptyWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        half_open_overlap((self.start, self.end), (other.start, other.end))
    }

    /// True if `self` fully covers `other`.
    pub fn contains(&self, other: &TimeWindow) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Anchor the window to a date.
    pub fn on(&self, date: NaiveDate) -> DateTimeSpan {
        DateTimeSpan {
            start: date.and_time(self.start),
            end: date.and_time(self.end),
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

/// `overlaps(A, B)` iff `A.start < B.end && B.start < A.end`, with zero-length windows excluded.
pub fn overlaps(a: &TimeWindow, b: &TimeWindow) -> bool {
    a.overlaps(b)
}

/// Half-open `[start, end)` span of local date-times, used for maintenance windows
/// that may cross midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateTimeSpan {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateTimeSpan {
    pub fn overlaps(&self, other: &DateTimeSpan) -> bool {
        half_open_overlap((self.start, self.end), (other.start, other.end))
    }

    /// True if any part of the span falls on `date`.
    pub fn touches_date(&self, date: NaiveDate) -> bool {
        self.start.date() <= date && date <= self.end.date() && self.start < self.end
    }
}

// ── Operational hours ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationalHours {
    pub opens: NaiveTime,
    pub closes: NaiveTime,
}

impl Default for OperationalHours {
    fn default() -> Self {
        Self {
            opens: hm(7, 0),
            closes: hm(21, 0),
        }
    }
}

impl OperationalHours {
    pub fn new(opens: NaiveTime, closes: NaiveTime) -> Result<Self, CalendarError> {
        if opens >= closes {
            return Err(CalendarError::EmptyWindow {
                start: opens,
                end: closes,
            });
        }
        Ok(Self { opens, closes })
    }

    /// Accept `time` if it lies in `[opens, closes]`.
    pub fn clamp(&self, time: NaiveTime) -> Result<NaiveTime, CalendarError> {
        if time < self.opens || time > self.closes {
            return Err(CalendarError::OutOfHours { time, hours: *self });
        }
        Ok(time)
    }

    /// Accept a window whose start is in `[opens, closes)` and whose end is in `(opens, closes]`.
    /// A window starting exactly at closing time is rejected; one ending there is fine.
    pub fn admit(&self, window: TimeWindow) -> Result<TimeWindow, CalendarError> {
        self.clamp(window.start)?;
        self.clamp(window.end)?;
        if window.start == self.closes {
            return Err(CalendarError::OutOfHours {
                time: window.start,
                hours: *self,
            });
        }
        if window.end == self.opens {
            return Err(CalendarError::OutOfHours {
                time: window.end,
                hours: *self,
            });
        }
        TimeWindow::new(window.start, window.end)
    }
}

impl fmt::Display for OperationalHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.opens.format("%H:%M"), self.closes.format("%H:%M"))
    }
}

pub fn clamp_to_operational_hours(
    time: NaiveTime,
    hours: &OperationalHours,
) -> Result<NaiveTime, CalendarError> {
    hours.clamp(time)
}

// ── Date ranges ──────────────────────────────────────────────────

/// Inclusive `[start, end]` range of calendar dates. A single-day booking has `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, CalendarError> {
        if end < start {
            return Err(CalendarError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn is_range(&self) -> bool {
        self.end > self.start
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.start
            .iter_days()
            .take_while(|d| *d <= self.end)
            .collect()
    }

    /// Reject ranges longer than `max_days`.
    pub fn within_limit(self, max_days: u32) -> Result<Self, CalendarError> {
        let days = self.days();
        if days > i64::from(max_days) {
            return Err(CalendarError::RangeTooLong { days, max: max_days });
        }
        Ok(self)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_range() {
            write!(f, "{}..{}", self.start, self.end)
        } else {
            write!(f, "{}", self.start)
        }
    }
}

/// Every calendar date in `[start, end]`, inclusive.
pub fn expand_date_range(start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>, CalendarError> {
    Ok(DateRange::new(start, end)?.dates())
}

// ── Parsing ──────────────────────────────────────────────────────

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

pub fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

/// Accepts English day names (`mon`, `Monday`) or ISO numbers (1 = Monday … 7 = Sunday).
pub fn parse_weekday(s: &str) -> Option<Weekday> {
    let s = s.trim();
    if let Ok(n) = s.parse::<u8>() {
        return match n {
            1 => Some(Weekday::Mon),
            2 => Some(Weekday::Tue),
            3 => Some(Weekday::Wed),
            4 => Some(Weekday::Thu),
            5 => Some(Weekday::Fri),
            6 => Some(Weekday::Sat),
            7 => Some(Weekday::Sun),
            _ => None,
        };
    }
    s.parse::<Weekday>().ok()
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or_default()
}
