//! 12-hour wall-clock times as typed by diners: `"7:00 PM"`, `"12:30 AM"`.
//!
//! Times are mapped onto a flat minutes-since-midnight line. `12` in the hour
//! position is midnight/noon, so `12:xx AM` lands in `[0, 60)` and `12:xx PM`
//! in `[720, 780)`.

use std::fmt;
use std::str::FromStr;

use crate::model::Minute;

pub const MINUTES_PER_DAY: Minute = 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime {
    minutes: Minute,
}

impl ClockTime {
    pub fn from_minutes(minutes: Minute) -> Option<Self> {
        (0..MINUTES_PER_DAY)
            .contains(&minutes)
            .then_some(Self { minutes })
    }

    pub fn minutes(&self) -> Minute {
        self.minutes
    }

    pub fn is_pm(&self) -> bool {
        self.minutes >= 12 * 60
    }

    /// Hour on the 12-hour dial, `1..=12`.
    pub fn hour12(&self) -> Minute {
        match (self.minutes / 60) % 12 {
            0 => 12,
            h => h,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockError {
    input: String,
    reason: &'static str,
}

impl ClockError {
    fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid time {:?}: {} (expected \"H:MM AM\" or \"H:MM PM\")",
            self.input, self.reason
        )
    }
}

impl std::error::Error for ClockError {}

fn parse_digits(s: &str, min_len: usize, max_len: usize) -> Option<Minute> {
    if s.len() < min_len || s.len() > max_len || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl FromStr for ClockTime {
    type Err = ClockError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let (clock, meridiem) = trimmed
            .split_once(' ')
            .ok_or_else(|| ClockError::new(input, "missing AM/PM suffix"))?;
        let (hours, minutes) = clock
            .split_once(':')
            .ok_or_else(|| ClockError::new(input, "missing ':' separator"))?;

        let hours = parse_digits(hours, 1, 2)
            .filter(|h| (1..=12).contains(h))
            .ok_or_else(|| ClockError::new(input, "hour must be 1-12"))?;
        let minutes = parse_digits(minutes, 2, 2)
            .filter(|m| (0..60).contains(m))
            .ok_or_else(|| ClockError::new(input, "minutes must be 00-59"))?;

        let offset = if meridiem.eq_ignore_ascii_case("AM") {
            0
        } else if meridiem.eq_ignore_ascii_case("PM") {
            12
        } else {
            return Err(ClockError::new(input, "suffix must be AM or PM"));
        };

        Ok(Self {
            minutes: ((hours % 12) + offset) * 60 + minutes,
        })
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let meridiem = if self.is_pm() { "PM" } else { "AM" };
        write!(f, "{}:{:02} {meridiem}", self.hour12(), self.minutes % 60)
    }
}
