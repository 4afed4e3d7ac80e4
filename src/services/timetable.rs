//! Timetable expansion
//!
//! A stop's schedule row is a seed time followed by absolute times and
//! `every N min` directives, e.g. `06:00, every 10 min, 07:00, 07:30`.

use std::time::Duration;

use thiserror::Error;

use crate::types::{Line, StopId, VirtualTime, WayPoint};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("schedule row is empty, expected a first departure in hh:mm")]
    MissingSeed,

    #[error("first departure must be in time format hh:mm, but was \"{0}\"")]
    InvalidSeed(String),

    #[error("column {column} is an interval directive but no absolute time follows it")]
    DanglingInterval { column: usize },

    #[error("column {column} is an interval directive, but \"{value}\" after it is not a valid time")]
    IntervalNotFollowedByTime { column: usize, value: String },

    #[error("column {column} has an interval of zero minutes")]
    ZeroInterval { column: usize },

    #[error("column {column} with content \"{value}\" is neither a valid time nor an interval directive")]
    InvalidColumn { column: usize, value: String },

    #[error("stop {stop} has {found} departures but the line's first stop has {expected}")]
    UnequalTourCount {
        stop: StopId,
        expected: usize,
        found: usize,
    },
}

/// Parse `every N min` / `every N minutes`; `None` if `column` is no directive.
fn parse_interval(column: &str) -> Option<u64> {
    let rest = column.trim().strip_prefix("every")?;
    let mut parts = rest.split_whitespace();
    let minutes = parts.next()?.parse::<u64>().ok()?;
    match (parts.next(), parts.next()) {
        (Some("min") | Some("mins") | Some("minutes"), None) => Some(minutes),
        _ => None,
    }
}

/// Expand one stop's schedule row into its ordered departures.
///
/// Column numbers in errors are 1-based within the row.
pub fn expand_departures<S: AsRef<str>>(row: &[S]) -> Result<Vec<VirtualTime>, ScheduleError> {
    let len = row
        .iter()
        .rposition(|c| !c.as_ref().trim().is_empty())
        .map_or(0, |last| last + 1);
    let row = &row[..len];

    let seed = row.first().ok_or(ScheduleError::MissingSeed)?.as_ref();
    let seed: VirtualTime = seed
        .parse()
        .map_err(|_| ScheduleError::InvalidSeed(seed.trim().to_string()))?;

    let mut departures = Vec::with_capacity(row.len());
    departures.push(seed);

    for (index, column) in row.iter().enumerate().skip(1) {
        let column = column.as_ref();
        let number = index + 1;

        if let Some(minutes) = parse_interval(column) {
            if minutes == 0 {
                return Err(ScheduleError::ZeroInterval { column: number });
            }
            let next = row
                .get(index + 1)
                .ok_or(ScheduleError::DanglingInterval { column: number })?
                .as_ref();
            let until: VirtualTime = next.parse().map_err(|_| {
                ScheduleError::IntervalNotFollowedByTime {
                    column: number,
                    value: next.trim().to_string(),
                }
            })?;

            let interval = Duration::from_secs(minutes * 60);
            let mut at = departures[departures.len() - 1] + interval;
            while at < until {
                departures.push(at);
                at = at + interval;
            }
            // The absolute column itself is appended on the next iteration
            continue;
        }

        let at: VirtualTime = column.parse().map_err(|_| ScheduleError::InvalidColumn {
            column: number,
            value: column.trim().to_string(),
        })?;
        departures.push(at);
    }

    Ok(departures)
}

impl Line {
    /// Way points that are stops, in line order
    pub fn stops(&self) -> impl Iterator<Item = &WayPoint> {
        self.way_points.iter().filter(|wp| wp.is_stop())
    }

    fn first_stop_departures(&self) -> Option<&[VirtualTime]> {
        let first = self.stops().next()?.stop_id.as_ref()?;
        self.departures.get(first).map(Vec::as_slice)
    }

    /// Start times of every tour, in schedule order
    pub fn start_times(&self) -> &[VirtualTime] {
        self.first_stop_departures().unwrap_or(&[])
    }

    pub fn tour_count(&self) -> usize {
        self.start_times().len()
    }

    /// Departures of the tour starting at `start`, one per stop in line order.
    ///
    /// `None` when no tour starts at `start`.
    pub fn tour_times(&self, start: VirtualTime) -> Option<Vec<VirtualTime>> {
        let index = self.start_times().iter().position(|&t| t == start)?;
        self.stops()
            .map(|wp| {
                let stop = wp.stop_id.as_ref()?;
                self.departures.get(stop)?.get(index).copied()
            })
            .collect()
    }

    /// Every stop must list one departure per tour.
    pub fn check_tour_counts(&self) -> Result<usize, ScheduleError> {
        let expected = self.tour_count();
        for stop in self.stops().filter_map(|wp| wp.stop_id.as_ref()) {
            let found = self.departures.get(stop).map_or(0, Vec::len);
            if found != expected {
                return Err(ScheduleError::UnequalTourCount {
                    stop: stop.clone(),
                    expected,
                    found,
                });
            }
        }
        Ok(expected)
    }
}
