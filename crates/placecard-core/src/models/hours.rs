//! Weekly opening-hours schedule

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::validate::{self, ReasonCode};

const MINUTES_PER_DAY: u16 = 24 * 60;

/// One open/close pair, in minutes after midnight. `close` may be `24:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval {
    open: u16,
    close: u16,
}

impl Interval {
    pub fn new(open: u16, close: u16) -> Result<Self, ReasonCode> {
        if open >= MINUTES_PER_DAY || close > MINUTES_PER_DAY {
            return Err(ReasonCode::MalformedHours);
        }
        if close <= open {
            return Err(ReasonCode::CloseBeforeOpen);
        }
        Ok(Self { open, close })
    }

    #[must_use]
    pub const fn open(self) -> u16 {
        self.open
    }

    #[must_use]
    pub const fn close(self) -> u16 {
        self.close
    }

    const fn overlaps(self, other: Self) -> bool {
        self.open < other.close && other.open < self.close
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02}",
            self.open / 60,
            self.open % 60,
            self.close / 60,
            self.close % 60
        )
    }
}

/// Schedule of a single day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum DaySchedule {
    #[default]
    Closed,
    /// Ordered, non-overlapping intervals.
    Open(Vec<Interval>),
}

impl DaySchedule {
    /// Build an open day, sorting the intervals and rejecting overlaps.
    pub fn open(mut intervals: Vec<Interval>) -> Result<Self, ReasonCode> {
        if intervals.is_empty() {
            return Ok(Self::Closed);
        }
        intervals.sort_unstable();
        if intervals.windows(2).any(|pair| pair[0].overlaps(pair[1])) {
            return Err(ReasonCode::OverlappingHours);
        }
        Ok(Self::Open(intervals))
    }

    fn check(&self) -> Result<(), ReasonCode> {
        let Self::Open(intervals) = self else {
            return Ok(());
        };
        if intervals.is_empty() {
            return Err(ReasonCode::MalformedHours);
        }
        for interval in intervals {
            Interval::new(interval.open, interval.close)?;
        }
        for pair in intervals.windows(2) {
            if pair[0].overlaps(pair[1]) {
                return Err(ReasonCode::OverlappingHours);
            }
            if pair[0] > pair[1] {
                return Err(ReasonCode::MalformedHours);
            }
        }
        Ok(())
    }
}

impl fmt::Display for DaySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Open(intervals) => {
                let rendered: Vec<String> = intervals.iter().map(ToString::to_string).collect();
                f.write_str(&rendered.join(", "))
            }
        }
    }
}

/// Opening hours for Monday through Sunday.
///
/// Serialized as its canonical expression, e.g.
/// `Mon-Fri 09:00-18:00; Sat 10:00-14:00, 15:00-20:00; Sun closed`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WeeklySchedule {
    days: [DaySchedule; 7],
}

impl WeeklySchedule {
    /// Build a schedule from per-day values, Monday first.
    pub fn from_days(days: [DaySchedule; 7]) -> Result<Self, ReasonCode> {
        let schedule = Self { days };
        schedule.check()?;
        Ok(schedule)
    }

    #[must_use]
    pub fn day(&self, weekday: Weekday) -> &DaySchedule {
        &self.days[weekday.num_days_from_monday() as usize]
    }

    /// Check the per-day ordering and overlap invariant.
    pub fn check(&self) -> Result<(), ReasonCode> {
        self.days.iter().try_for_each(DaySchedule::check)
    }
}

impl fmt::Display for WeeklySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut groups: Vec<(usize, usize)> = Vec::new();
        for index in 0..self.days.len() {
            match groups.last_mut() {
                Some((_, end)) if self.days[*end] == self.days[index] => *end = index,
                _ => groups.push((index, index)),
            }
        }

        let rendered: Vec<String> = groups
            .into_iter()
            .map(|(start, end)| {
                let days = if start == end {
                    day_name(start).to_string()
                } else {
                    format!("{}-{}", day_name(start), day_name(end))
                };
                format!("{days} {}", self.days[start])
            })
            .collect();
        f.write_str(&rendered.join("; "))
    }
}

impl TryFrom<String> for WeeklySchedule {
    type Error = ReasonCode;

    fn try_from(value: String) -> Result<Self, ReasonCode> {
        validate::hours::parse(&value).map_err(|error| error.reason)
    }
}

impl From<WeeklySchedule> for String {
    fn from(value: WeeklySchedule) -> Self {
        value.to_string()
    }
}

fn day_name(index: usize) -> &'static str {
    ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"][index]
}
