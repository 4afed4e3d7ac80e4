//! Static scenario records: stops, lines, buses and their assignments
//!
//! Everything here is built once at load time and never mutated afterwards,
//! so the simulation shares it through `Arc` without locking.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{Coordinates, VirtualTime};

/// Name given to every point of an ad-hoc assignment
pub const CUSTOM_WAYPOINT_NAME: &str = "custom waypoint";

/// Name of an assignment that is not bound to a line
pub const CUSTOM_ASSIGNMENT_NAME: &str = "custom waypoint assignment";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Stop identifier from the stop catalogue
    StopId
);
string_id!(
    /// Line identifier from the scenario descriptor
    LineId
);
string_id!(
    /// Vehicle identifier from the scenario descriptor
    BusId
);

/// A boarding stop from the stop catalogue
#[derive(Debug, Clone, PartialEq)]
pub struct Stop {
    pub id: StopId,
    pub name: String,
    pub coordinates: Coordinates,
}

/// A point along a path
///
/// Without a `stop_id` the point only shapes the geometry. `departure` is set
/// only once the point is materialized into a line assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WayPoint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_id: Option<StopId>,
    pub name: String,
    pub coordinates: Coordinates,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub departure: Option<VirtualTime>,
}

impl WayPoint {
    pub fn stop(stop: &Stop) -> Self {
        Self {
            stop_id: Some(stop.id.clone()),
            name: stop.name.clone(),
            coordinates: stop.coordinates,
            departure: None,
        }
    }

    pub fn custom(coordinates: Coordinates) -> Self {
        Self {
            stop_id: None,
            name: CUSTOM_WAYPOINT_NAME.to_string(),
            coordinates,
            departure: None,
        }
    }

    pub fn is_stop(&self) -> bool {
        self.stop_id.is_some()
    }

    /// Scheduled departure a vehicle has to wait for, if any
    pub fn dwell_until(&self) -> Option<VirtualTime> {
        match self.stop_id {
            Some(_) => self.departure,
            None => None,
        }
    }
}

/// A scheduled line: its static path and the departures of every tour
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub id: LineId,
    pub name: String,
    pub color: String,
    pub way_points: Vec<WayPoint>,
    /// Departures per stop; index *i* is the same tour at every stop
    pub departures: HashMap<StopId, Vec<VirtualTime>>,
}

/// Assignment bound to one tour of a line
#[derive(Debug, Clone, PartialEq)]
pub struct LineAssignment {
    pub line: Arc<Line>,
    pub departure: VirtualTime,
    /// The line's way points with this tour's departures attached to its stops
    pub way_points: Vec<WayPoint>,
}

/// Assignment along ad-hoc coordinates, no stops to service
#[derive(Debug, Clone, PartialEq)]
pub struct CustomAssignment {
    pub departure: VirtualTime,
    pub way_points: Vec<WayPoint>,
}

/// One task a bus executes
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Line(LineAssignment),
    Custom(CustomAssignment),
}

impl Assignment {
    /// Materialize the tour of `line` starting at `departure`.
    ///
    /// Returns `None` when the line has no tour starting at that time.
    pub fn for_line(line: Arc<Line>, departure: VirtualTime) -> Option<Assignment> {
        let tour = line.tour_times(departure)?;
        let mut departures = tour.into_iter();
        let way_points = line
            .way_points
            .iter()
            .map(|wp| {
                let mut wp = wp.clone();
                if wp.is_stop() {
                    wp.departure = departures.next();
                }
                wp
            })
            .collect();
        Some(Assignment::Line(LineAssignment {
            line,
            departure,
            way_points,
        }))
    }

    pub fn custom(departure: VirtualTime, coordinates: &[Coordinates]) -> Assignment {
        Assignment::Custom(CustomAssignment {
            departure,
            way_points: coordinates.iter().copied().map(WayPoint::custom).collect(),
        })
    }

    pub fn departure(&self) -> VirtualTime {
        match self {
            Assignment::Line(a) => a.departure,
            Assignment::Custom(a) => a.departure,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Assignment::Line(a) => &a.line.name,
            Assignment::Custom(_) => CUSTOM_ASSIGNMENT_NAME,
        }
    }

    pub fn way_points(&self) -> &[WayPoint] {
        match self {
            Assignment::Line(a) => &a.way_points,
            Assignment::Custom(a) => &a.way_points,
        }
    }

    pub fn line(&self) -> Option<&Line> {
        match self {
            Assignment::Line(a) => Some(&a.line),
            Assignment::Custom(_) => None,
        }
    }
}

/// A vehicle and the assignments it works through in order
#[derive(Debug, Clone, PartialEq)]
pub struct Bus {
    pub id: BusId,
    pub name: String,
    /// Overrides the dispatcher's fleet-wide speed
    pub speed_kmh: Option<f64>,
    pub assignments: Vec<Assignment>,
}

impl Bus {
    /// Where the bus stands before its first assignment
    pub fn initial_position(&self) -> Option<Coordinates> {
        self.assignments
            .first()
            .and_then(|a| a.way_points().first())
            .map(|wp| wp.coordinates)
    }
}

/// Published position of a bus, the only record leaving the simulation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusPosition {
    pub id: BusId,
    #[serde(rename = "loc", serialize_with = "serialize_lat_lng")]
    pub location: Coordinates,
    /// Stop currently being serviced, present only while dwelling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<WayPoint>,
}

fn serialize_lat_lng<S: serde::Serializer>(c: &Coordinates, s: S) -> Result<S::Ok, S::Error> {
    c.to_lat_lng().serialize(s)
}
