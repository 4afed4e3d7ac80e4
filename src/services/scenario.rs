//! Scenario loading
//!
//! A scenario directory holds `scenario.json`, a GeoJSON stop catalogue and
//! one CSV timetable per line. Everything is validated up front: a scenario
//! either loads completely or not at all.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use geojson::{feature::Id, GeoJson, Value};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::services::timetable::{expand_departures, ScheduleError};
use crate::types::{Assignment, Bus, BusId, Coordinates, Line, LineId, Stop, StopId, VirtualTime, WayPoint};

pub const SCENARIO_FILE: &str = "scenario.json";

const DEFAULT_LINE_COLOR: &str = "#808080";

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse scenario file {path}: {source}")]
    Descriptor {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid stop definition {path}: {message}")]
    StopDefinition { path: PathBuf, message: String },

    #[error("stop \"{0}\" is defined twice")]
    DuplicateStop(StopId),

    #[error("line \"{0}\" is defined twice")]
    DuplicateLine(LineId),

    #[error("could not read timetable of line \"{line}\": {message}")]
    LineFile { line: LineId, message: String },

    #[error("line \"{line}\" references unknown stop \"{stop}\"")]
    UnknownStop { line: LineId, stop: StopId },

    #[error("line \"{line}\" lists stop \"{stop}\" more than once")]
    RepeatedStop { line: LineId, stop: StopId },

    #[error("line \"{0}\" has no stops")]
    EmptyLine(LineId),

    #[error("could not parse departures of stop \"{stop}\" on line \"{line}\": {source}")]
    Schedule {
        line: LineId,
        stop: StopId,
        #[source]
        source: ScheduleError,
    },

    #[error("line \"{line}\" has an inconsistent timetable: {source}")]
    Tours {
        line: LineId,
        #[source]
        source: ScheduleError,
    },

    #[error("bus \"{0}\" is defined twice")]
    DuplicateBus(BusId),

    #[error("bus \"{bus}\" has invalid speed {speed} km/h")]
    InvalidSpeed { bus: BusId, speed: f64 },

    #[error("bus \"{0}\" has no assignments")]
    NoAssignments(BusId),

    #[error("line \"{line}\" of bus \"{bus}\" not found")]
    UnknownLine { bus: BusId, line: LineId },

    #[error("line assignment \"{line}\" of bus \"{bus}\" with start time {start} has no equivalent in the timetable")]
    NoMatchingTour {
        bus: BusId,
        line: LineId,
        start: VirtualTime,
    },

    #[error("assignment of bus \"{bus}\" starting {start} needs either a line or coordinates")]
    MissingCoordinates { bus: BusId, start: VirtualTime },

    #[error("assignment of bus \"{bus}\" starting {start} has both a line and coordinates")]
    AmbiguousAssignment { bus: BusId, start: VirtualTime },
}

// Descriptor file types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScenarioFile {
    start: VirtualTime,
    stop_definition: String,
    #[serde(default)]
    lines: Vec<LineEntry>,
    #[serde(default)]
    buses: Vec<BusEntry>,
}

#[derive(Debug, Deserialize)]
struct LineEntry {
    id: LineId,
    name: String,
    #[serde(default)]
    color: Option<String>,
    file: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BusEntry {
    id: BusId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    speed_kmh: Option<f64>,
    #[serde(default)]
    assignments: Vec<AssignmentEntry>,
}

#[derive(Debug, Deserialize)]
struct AssignmentEntry {
    start: VirtualTime,
    #[serde(default)]
    line: Option<LineId>,
    /// `[latitude, longitude]` pairs
    #[serde(default)]
    coordinates: Option<Vec<[f64; 2]>>,
}

/// A fully loaded, immutable scenario
#[derive(Debug, Clone)]
pub struct Scenario {
    pub start: VirtualTime,
    pub stops: HashMap<StopId, Stop>,
    pub lines: Vec<Arc<Line>>,
    pub buses: Vec<Bus>,
}

impl Scenario {
    pub fn line(&self, id: &LineId) -> Option<&Arc<Line>> {
        self.lines.iter().find(|l| &l.id == id)
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let assignments: usize = self.buses.iter().map(|b| b.assignments.len()).sum();
        write!(
            f,
            "starts {}, {} stops, {} lines, {} buses with {} assignments",
            self.start,
            self.stops.len(),
            self.lines.len(),
            self.buses.len(),
            assignments
        )
    }
}

fn read(path: &Path) -> Result<String, ScenarioError> {
    fs::read_to_string(path).map_err(|source| ScenarioError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the scenario stored in `directory`.
pub fn load_scenario(directory: impl AsRef<Path>) -> Result<Scenario, ScenarioError> {
    let directory = directory.as_ref();
    let path = directory.join(SCENARIO_FILE);
    let descriptor: ScenarioFile =
        serde_json::from_str(&read(&path)?).map_err(|source| ScenarioError::Descriptor {
            path: path.clone(),
            source,
        })?;

    let stops = load_stops(&directory.join(&descriptor.stop_definition))?;

    let mut lines: Vec<Arc<Line>> = Vec::with_capacity(descriptor.lines.len());
    for entry in &descriptor.lines {
        if lines.iter().any(|l| l.id == entry.id) {
            return Err(ScenarioError::DuplicateLine(entry.id.clone()));
        }
        let line = load_line(entry, directory, &stops)?;
        debug!(
            "Line {} \"{}\": {} way points, {} tours",
            line.id,
            line.name,
            line.way_points.len(),
            line.tour_count()
        );
        lines.push(Arc::new(line));
    }

    let buses = load_buses(&descriptor.buses, &lines)?;

    let scenario = Scenario {
        start: descriptor.start,
        stops,
        lines,
        buses,
    };
    info!("Loaded scenario {}: {}", directory.display(), scenario);
    Ok(scenario)
}

/// Read the GeoJSON catalogue: Point features with an `id` and a `name` property.
pub fn load_stops(path: &Path) -> Result<HashMap<StopId, Stop>, ScenarioError> {
    let invalid = |message: String| ScenarioError::StopDefinition {
        path: path.to_path_buf(),
        message,
    };

    let geojson = read(path)?
        .parse::<GeoJson>()
        .map_err(|e| invalid(e.to_string()))?;
    let collection = match geojson {
        GeoJson::FeatureCollection(collection) => collection,
        _ => return Err(invalid("expected a FeatureCollection".to_string())),
    };

    let mut stops = HashMap::with_capacity(collection.features.len());
    for (index, feature) in collection.features.iter().enumerate() {
        let id = match &feature.id {
            Some(Id::String(id)) => StopId::new(id.as_str()),
            Some(Id::Number(id)) => StopId::new(id.to_string()),
            None => return Err(invalid(format!("feature {} has no id", index))),
        };
        let coordinates = match feature.geometry.as_ref().map(|g| &g.value) {
            Some(Value::Point(point)) if point.len() >= 2 => Coordinates::new(point[1], point[0]),
            _ => return Err(invalid(format!("stop \"{}\" is not a point", id))),
        };
        let name = match feature.property("name") {
            Some(serde_json::Value::String(name)) => name.clone(),
            Some(other) => other.to_string(),
            None => id.to_string(),
        };

        if stops.contains_key(&id) {
            return Err(ScenarioError::DuplicateStop(id));
        }
        stops.insert(id.clone(), Stop { id, name, coordinates });
    }

    Ok(stops)
}

/// `lat;lon` of a geometry-only row
fn parse_lat_lng(field: &str) -> Option<Coordinates> {
    let (lat, lng) = field.trim().split_once(';')?;
    let lat = lat.trim().parse::<f64>().ok()?;
    let lng = lng.trim().parse::<f64>().ok()?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return None;
    }
    Some(Coordinates::new(lat, lng))
}

/// A row with only `lat;lon` in its second column shapes the path without a stop.
fn geometry_only(record: &csv::StringRecord) -> Option<Coordinates> {
    let label_empty = record.get(0).map_or(true, str::is_empty);
    let rest_empty = record.iter().skip(2).all(str::is_empty);
    if !(label_empty && rest_empty) {
        return None;
    }
    parse_lat_lng(record.get(1)?)
}

fn load_line(
    entry: &LineEntry,
    directory: &Path,
    stops: &HashMap<StopId, Stop>,
) -> Result<Line, ScenarioError> {
    let line_error = |message: String| ScenarioError::LineFile {
        line: entry.id.clone(),
        message,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(directory.join(&entry.file))
        .map_err(|e| line_error(e.to_string()))?;

    let mut way_points = Vec::new();
    let mut departures = HashMap::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| line_error(e.to_string()))?;

        if let Some(coordinates) = geometry_only(&record) {
            way_points.push(WayPoint::custom(coordinates));
            continue;
        }

        let stop_id = match record.get(1) {
            Some(id) if !id.is_empty() => StopId::new(id),
            _ => return Err(line_error(format!("row {} has no stop id", row + 1))),
        };
        let stop = stops.get(&stop_id).ok_or_else(|| ScenarioError::UnknownStop {
            line: entry.id.clone(),
            stop: stop_id.clone(),
        })?;

        let schedule: Vec<&str> = record.iter().skip(2).collect();
        let times = expand_departures(&schedule).map_err(|source| ScenarioError::Schedule {
            line: entry.id.clone(),
            stop: stop_id.clone(),
            source,
        })?;
        if departures.insert(stop_id.clone(), times).is_some() {
            return Err(ScenarioError::RepeatedStop {
                line: entry.id.clone(),
                stop: stop_id,
            });
        }
        way_points.push(WayPoint::stop(stop));
    }

    if departures.is_empty() {
        return Err(ScenarioError::EmptyLine(entry.id.clone()));
    }

    let line = Line {
        id: entry.id.clone(),
        name: entry.name.clone(),
        color: entry.color.clone().unwrap_or_else(|| DEFAULT_LINE_COLOR.to_string()),
        way_points,
        departures,
    };
    line.check_tour_counts().map_err(|source| ScenarioError::Tours {
        line: entry.id.clone(),
        source,
    })?;
    Ok(line)
}

fn load_buses(entries: &[BusEntry], lines: &[Arc<Line>]) -> Result<Vec<Bus>, ScenarioError> {
    let mut seen = HashSet::new();
    let mut buses = Vec::with_capacity(entries.len());

    for entry in entries {
        if !seen.insert(entry.id.clone()) {
            return Err(ScenarioError::DuplicateBus(entry.id.clone()));
        }
        if let Some(speed) = entry.speed_kmh {
            if !speed.is_finite() || speed <= 0.0 {
                return Err(ScenarioError::InvalidSpeed {
                    bus: entry.id.clone(),
                    speed,
                });
            }
        }
        if entry.assignments.is_empty() {
            return Err(ScenarioError::NoAssignments(entry.id.clone()));
        }

        let assignments = entry
            .assignments
            .iter()
            .map(|a| build_assignment(&entry.id, a, lines))
            .collect::<Result<Vec<_>, _>>()?;

        buses.push(Bus {
            id: entry.id.clone(),
            name: entry.name.clone().unwrap_or_else(|| entry.id.to_string()),
            speed_kmh: entry.speed_kmh,
            assignments,
        });
    }

    Ok(buses)
}

fn build_assignment(
    bus: &BusId,
    entry: &AssignmentEntry,
    lines: &[Arc<Line>],
) -> Result<Assignment, ScenarioError> {
    match (&entry.line, &entry.coordinates) {
        (Some(_), Some(_)) => Err(ScenarioError::AmbiguousAssignment {
            bus: bus.clone(),
            start: entry.start,
        }),
        (Some(line_id), None) => {
            let line = lines
                .iter()
                .find(|l| &l.id == line_id)
                .ok_or_else(|| ScenarioError::UnknownLine {
                    bus: bus.clone(),
                    line: line_id.clone(),
                })?;
            Assignment::for_line(Arc::clone(line), entry.start).ok_or_else(|| ScenarioError::NoMatchingTour {
                bus: bus.clone(),
                line: line_id.clone(),
                start: entry.start,
            })
        }
        (None, Some(points)) if !points.is_empty() => {
            let coordinates: Vec<Coordinates> = points.iter().map(|&[lat, lng]| Coordinates::new(lat, lng)).collect();
            Ok(Assignment::custom(entry.start, &coordinates))
        }
        (None, _) => Err(ScenarioError::MissingCoordinates {
            bus: bus.clone(),
            start: entry.start,
        }),
    }
}
