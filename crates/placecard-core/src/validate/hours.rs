//! Opening-hours expression parser
//!
//! Grammar, clauses separated by `;`:
//!
//! ```text
//! Mon-Fri 09:00-18:00; Sat 10:00-14:00, 15:00-20:00; Sun closed
//! ```
//!
//! Day lists may use ranges (which wrap around the week), commas, or
//! `daily`. Days that no clause mentions are closed.

use regex::Regex;
use std::sync::OnceLock;

use crate::models::{DaySchedule, Interval, WeeklySchedule};

use super::{ReasonCode, ValidationError};

const DAY_NAMES: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

fn clause_regex() -> &'static Regex {
    static CLAUSE: OnceLock<Regex> = OnceLock::new();
    CLAUSE.get_or_init(|| {
        Regex::new(r"(?i)^([a-z]+(?:\s*[-,]\s*[a-z]+)*)\s+(.+)$").expect("Invalid regex")
    })
}

fn interval_regex() -> &'static Regex {
    static INTERVAL: OnceLock<Regex> = OnceLock::new();
    INTERVAL.get_or_init(|| {
        Regex::new(r"^(\d{1,2}):(\d{2})\s*[-–]\s*(\d{1,2}):(\d{2})$").expect("Invalid regex")
    })
}

/// Parse an opening-hours expression into a weekly schedule.
pub fn parse(raw: &str) -> Result<WeeklySchedule, ValidationError> {
    let expression = raw.trim();
    if expression.is_empty() {
        return Err(ValidationError::new(ReasonCode::MalformedHours, "empty"));
    }

    let mut closed = [false; 7];
    let mut open: [Vec<Interval>; 7] = Default::default();

    for clause in expression.split(';').map(str::trim).filter(|c| !c.is_empty()) {
        let malformed = || ValidationError::new(ReasonCode::MalformedHours, clause);
        let captures = clause_regex().captures(clause).ok_or_else(malformed)?;
        let days = parse_days(&captures[1]).ok_or_else(malformed)?;
        let body = captures[2].trim();

        if body.eq_ignore_ascii_case("closed") {
            for day in days {
                if !open[day].is_empty() {
                    return Err(malformed());
                }
                closed[day] = true;
            }
            continue;
        }

        let intervals = body
            .split(',')
            .map(|part| parse_interval(part.trim()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|reason| ValidationError::new(reason, clause))?;
        for day in days {
            if closed[day] {
                return Err(malformed());
            }
            open[day].extend(intervals.iter().copied());
        }
    }

    let mut days: [DaySchedule; 7] = Default::default();
    for (index, intervals) in open.into_iter().enumerate() {
        days[index] = DaySchedule::open(intervals)
            .map_err(|reason| ValidationError::new(reason, DAY_NAMES[index]))?;
    }
    WeeklySchedule::from_days(days).map_err(ValidationError::from)
}

fn parse_days(spec: &str) -> Option<Vec<usize>> {
    if spec.trim().eq_ignore_ascii_case("daily") {
        return Some((0..7).collect());
    }

    let mut days = Vec::new();
    for part in spec.split(',').map(str::trim) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start = day_index(start.trim())?;
                let end = day_index(end.trim())?;
                let mut day = start;
                loop {
                    days.push(day);
                    if day == end {
                        break;
                    }
                    day = (day + 1) % 7;
                }
            }
            None => days.push(day_index(part)?),
        }
    }
    Some(days)
}

fn day_index(token: &str) -> Option<usize> {
    let token = token.to_ascii_lowercase();
    if token.len() < 3 {
        return None;
    }
    DAY_NAMES.iter().position(|name| name.starts_with(&token))
}

fn parse_interval(raw: &str) -> Result<Interval, ReasonCode> {
    let captures = interval_regex()
        .captures(raw)
        .ok_or(ReasonCode::MalformedHours)?;
    let time = |hours: usize, minutes: usize| -> Result<u16, ReasonCode> {
        let hours: u16 = captures[hours].parse().map_err(|_| ReasonCode::MalformedHours)?;
        let minutes: u16 = captures[minutes]
            .parse()
            .map_err(|_| ReasonCode::MalformedHours)?;
        if hours > 24 || minutes > 59 {
            return Err(ReasonCode::MalformedHours);
        }
        Ok(hours * 60 + minutes)
    };
    Interval::new(time(1, 2)?, time(3, 4)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use pretty_assertions::assert_eq;

    fn reason(raw: &str) -> ReasonCode {
        parse(raw).unwrap_err().reason
    }

    #[test]
    fn test_parse_full_expression() {
        let schedule =
            parse("Mon-Fri 09:00-18:00; Sat 10:00-14:00, 15:00-20:00; Sun closed").unwrap();
        assert_eq!(
            schedule.to_string(),
            "Mon-Fri 09:00-18:00; Sat 10:00-14:00, 15:00-20:00; Sun closed"
        );
        assert_eq!(schedule.day(Weekday::Sun), &DaySchedule::Closed);
    }

    #[test]
    fn test_unmentioned_days_are_closed() {
        let schedule = parse("Sat 10:00-14:00").unwrap();
        assert_eq!(schedule.day(Weekday::Mon), &DaySchedule::Closed);
        assert_eq!(schedule.to_string(), "Mon-Fri closed; Sat 10:00-14:00; Sun closed");
    }

    #[test]
    fn test_day_lists_ranges_and_daily() {
        assert_eq!(
            parse("mon, wed, fri 08:00-12:00").unwrap().to_string(),
            "Mon 08:00-12:00; Tue closed; Wed 08:00-12:00; Thu closed; Fri 08:00-12:00; Sat-Sun closed"
        );
        assert_eq!(
            parse("Fri-Mon 10:00-22:00").unwrap().to_string(),
            "Mon 10:00-22:00; Tue-Thu closed; Fri-Sun 10:00-22:00"
        );
        assert_eq!(
            parse("daily 00:00-24:00").unwrap().to_string(),
            "Mon-Sun 00:00-24:00"
        );
        assert!(parse("Monday - Tuesday 9:00-17:00").is_ok());
    }

    #[test]
    fn test_canonical_output_parses_back() {
        let schedule = parse("Tue 09:00-12:00, 13:00-17:00; Sat-Sun 10:00-16:00").unwrap();
        assert_eq!(parse(&schedule.to_string()).unwrap(), schedule);
    }

    #[test]
    fn test_overlapping_intervals_rejected() {
        assert_eq!(reason("Mon 09:00-13:00, 12:00-18:00"), ReasonCode::OverlappingHours);
        assert_eq!(
            reason("Mon-Fri 09:00-13:00; Mon 12:00-14:00"),
            ReasonCode::OverlappingHours
        );
    }

    #[test]
    fn test_touching_intervals_accepted() {
        assert!(parse("Mon 09:00-12:00, 12:00-15:00").is_ok());
    }

    #[test]
    fn test_overnight_interval_rejected() {
        assert_eq!(reason("Fri 22:00-02:00"), ReasonCode::CloseBeforeOpen);
        assert_eq!(reason("Fri 10:00-10:00"), ReasonCode::CloseBeforeOpen);
    }

    #[test]
    fn test_malformed_expressions() {
        for raw in [
            "",
            "whenever",
            "Mon 9-17",
            "Xyz 09:00-10:00",
            "Mo 09:00-10:00",
            "Mon 25:00-26:00",
            "Mon 09:60-10:00",
            "Mon 24:00-24:30",
            "Mon closed; Mon 09:00-10:00",
        ] {
            assert_eq!(reason(raw), ReasonCode::MalformedHours, "{raw:?}");
        }
    }
}
