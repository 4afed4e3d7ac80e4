//! Simulation time
//!
//! A scenario's day is independent of the host's calendar: `VirtualTime` only
//! counts milliseconds since local midnight.

use std::fmt;
use std::ops::Add;
use std::str::FromStr;
use std::time::Duration;

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

const MILLIS_PER_SECOND: u64 = 1_000;
const MILLIS_PER_MINUTE: u64 = 60 * MILLIS_PER_SECOND;
const MILLIS_PER_HOUR: u64 = 60 * MILLIS_PER_MINUTE;

/// Failure to read a `hh:mm` time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("\"{0}\" is not a valid time, expected hh:mm")]
pub struct TimeParseError(pub String);

/// Milliseconds since midnight of the simulated day
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualTime(u64);

impl VirtualTime {
    pub const MIDNIGHT: VirtualTime = VirtualTime(0);

    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub const fn from_hm(hour: u64, minute: u64) -> Self {
        Self(hour * MILLIS_PER_HOUR + minute * MILLIS_PER_MINUTE)
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// `(hour, minute)`; hours keep counting past 24 for runs crossing midnight
    pub const fn hour_minute(self) -> (u64, u64) {
        let minutes = self.0 / MILLIS_PER_MINUTE;
        (minutes / 60, minutes % 60)
    }

    pub fn is_before(self, other: VirtualTime) -> bool {
        self < other
    }

    /// Elapsed time since `earlier`, zero if `earlier` is later
    pub fn duration_since(self, earlier: VirtualTime) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for VirtualTime {
    type Output = VirtualTime;

    fn add(self, rhs: Duration) -> VirtualTime {
        let millis = u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX);
        VirtualTime(self.0.saturating_add(millis))
    }
}

impl fmt::Display for VirtualTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (hour, minute) = self.hour_minute();
        let seconds = (self.0 % MILLIS_PER_MINUTE) / MILLIS_PER_SECOND;
        if seconds == 0 {
            write!(f, "{:02}:{:02}", hour, minute)
        } else {
            write!(f, "{:02}:{:02}:{:02}", hour, minute, seconds)
        }
    }
}

impl FromStr for VirtualTime {
    type Err = TimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = NaiveTime::parse_from_str(trimmed, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
            .map_err(|_| TimeParseError(s.to_string()))?;
        Ok(VirtualTime(
            parsed.num_seconds_from_midnight() as u64 * MILLIS_PER_SECOND,
        ))
    }
}

impl Serialize for VirtualTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VirtualTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
