//! Precomputed paths for constant-speed movement
//!
//! A `WaypointChain` is an ordered array of nodes, each knowing the distance
//! to its successor. Vehicles move along it with a `ChainCursor`, which never
//! moves backwards.

use thiserror::Error;

use crate::services::geo::haversine_distance;
use crate::types::Coordinates;

/// Distances this close to a node count as reaching it
const ARRIVAL_TOLERANCE_M: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("cannot build a waypoint chain from an empty path")]
    EmptyPath,
}

/// One node of a chain
#[derive(Debug, Clone, PartialEq)]
pub struct ChainNode {
    pub coordinates: Coordinates,
    /// Meters to the next node, 0 on the terminal node
    pub distance_to_next: f64,
    /// Index of the way point this node represents, if it ends a leg
    pub way_point: Option<usize>,
}

/// A routed leg ending at way point `way_point`
#[derive(Debug, Clone)]
pub struct Leg {
    pub geometry: Vec<Coordinates>,
    pub way_point: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaypointChain {
    nodes: Vec<ChainNode>,
}

impl WaypointChain {
    /// Build a chain through `points` in order.
    pub fn from_coordinates(points: &[Coordinates]) -> Result<Self, ChainError> {
        if points.is_empty() {
            return Err(ChainError::EmptyPath);
        }
        let nodes = points
            .iter()
            .map(|&coordinates| ChainNode {
                coordinates,
                distance_to_next: 0.0,
                way_point: None,
            })
            .collect();
        Ok(Self::linked(nodes))
    }

    /// Build a chain starting at `start` and following `legs` in order.
    ///
    /// Points repeating the previous node are collapsed. The last node of
    /// every leg carries that leg's way point marker.
    pub fn from_legs(
        start: Coordinates,
        start_way_point: Option<usize>,
        legs: Vec<Leg>,
    ) -> Self {
        let mut nodes = vec![ChainNode {
            coordinates: start,
            distance_to_next: 0.0,
            way_point: start_way_point,
        }];

        for leg in legs {
            let before = nodes.len();
            for point in leg.geometry {
                let last = &nodes[nodes.len() - 1];
                if last.coordinates.polyline_eq(&point) {
                    continue;
                }
                nodes.push(ChainNode {
                    coordinates: point,
                    distance_to_next: 0.0,
                    way_point: None,
                });
            }

            let last_index = nodes.len() - 1;
            if nodes.len() == before && nodes[last_index].way_point.is_some() {
                // Two way points on the same spot keep separate nodes
                let coordinates = nodes[last_index].coordinates;
                nodes.push(ChainNode {
                    coordinates,
                    distance_to_next: 0.0,
                    way_point: Some(leg.way_point),
                });
            } else {
                nodes[last_index].way_point = Some(leg.way_point);
            }
        }

        Self::linked(nodes)
    }

    fn linked(mut nodes: Vec<ChainNode>) -> Self {
        for i in 1..nodes.len() {
            let distance = haversine_distance(&nodes[i - 1].coordinates, &nodes[i].coordinates);
            nodes[i - 1].distance_to_next = distance;
        }
        Self { nodes }
    }

    pub fn nodes(&self) -> &[ChainNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn total_length(&self) -> f64 {
        self.nodes.iter().map(|n| n.distance_to_next).sum()
    }

    pub fn start(&self) -> Coordinates {
        self.nodes[0].coordinates
    }

    pub fn terminal(&self) -> Coordinates {
        self.nodes[self.nodes.len() - 1].coordinates
    }

    fn is_terminal(&self, index: usize) -> bool {
        index + 1 >= self.nodes.len()
    }
}

/// Result of one drive step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriveOutcome {
    /// Somewhere between two nodes (or exactly on an unmarked one)
    EnRoute(Coordinates),
    /// Stopped on a marked node the caller asked to halt at
    Halted { way_point: usize, position: Coordinates },
    /// On the terminal node
    Arrived(Coordinates),
}

impl DriveOutcome {
    pub fn position(&self) -> Coordinates {
        match *self {
            DriveOutcome::EnRoute(position)
            | DriveOutcome::Halted { position, .. }
            | DriveOutcome::Arrived(position) => position,
        }
    }
}

/// Progress along a chain: the last node passed plus meters driven beyond it
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChainCursor {
    node: usize,
    offset: f64,
}

impl ChainCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self) -> usize {
        self.node
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn is_at_end(&self, chain: &WaypointChain) -> bool {
        chain.is_terminal(self.node)
    }

    pub fn position(&self, chain: &WaypointChain) -> Coordinates {
        let current = &chain.nodes[self.node];
        if chain.is_terminal(self.node) || current.distance_to_next <= 0.0 {
            return current.coordinates;
        }
        let next = &chain.nodes[self.node + 1];
        let lambda = self.offset / current.distance_to_next;
        current.coordinates.lerp(next.coordinates, lambda)
    }

    /// Move `distance` meters forward, never past the terminal node.
    pub fn drive(&mut self, chain: &WaypointChain, distance: f64) -> DriveOutcome {
        self.drive_until(chain, distance, |_| false)
    }

    /// Move `distance` meters forward, halting early on the first node whose
    /// way point satisfies `halt_at`. Distance left over after a halt is lost.
    pub fn drive_until<F>(&mut self, chain: &WaypointChain, distance: f64, mut halt_at: F) -> DriveOutcome
    where
        F: FnMut(usize) -> bool,
    {
        let mut remaining = distance.max(0.0);
        loop {
            if chain.is_terminal(self.node) {
                self.offset = 0.0;
                return DriveOutcome::Arrived(chain.nodes[self.node].coordinates);
            }

            let to_next = chain.nodes[self.node].distance_to_next - self.offset;
            if remaining < to_next - ARRIVAL_TOLERANCE_M {
                self.offset += remaining;
                return DriveOutcome::EnRoute(self.position(chain));
            }

            remaining = (remaining - to_next).max(0.0);
            self.node += 1;
            self.offset = 0.0;

            let reached = &chain.nodes[self.node];
            if let Some(way_point) = reached.way_point {
                if halt_at(way_point) {
                    return DriveOutcome::Halted {
                        way_point,
                        position: reached.coordinates,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::geo::EARTH_RADIUS_M;

    /// Latitude offset in degrees covering `meters` along a meridian
    fn lat_for(meters: f64) -> f64 {
        meters / (EARTH_RADIUS_M * std::f64::consts::PI / 180.0)
    }

    /// Five nodes along the 9°E meridian, 500/300/700/100 m apart
    fn sample_chain() -> WaypointChain {
        let mut lat = 49.0;
        let mut points = vec![Coordinates::new(lat, 9.0)];
        for meters in [500.0, 300.0, 700.0, 100.0] {
            lat += lat_for(meters);
            points.push(Coordinates::new(lat, 9.0));
        }
        WaypointChain::from_coordinates(&points).unwrap()
    }

    fn assert_close(a: Coordinates, b: Coordinates) {
        assert!((a.lat - b.lat).abs() < 1e-9, "{} != {}", a, b);
        assert!((a.lng - b.lng).abs() < 1e-9, "{} != {}", a, b);
    }

    #[test]
    fn test_empty_path_rejected() {
        assert_eq!(WaypointChain::from_coordinates(&[]), Err(ChainError::EmptyPath));
    }

    #[test]
    fn test_precomputed_distances() {
        let chain = sample_chain();
        let distances: Vec<f64> = chain.nodes().iter().map(|n| n.distance_to_next).collect();

        for (actual, expected) in distances.iter().zip([500.0, 300.0, 700.0, 100.0, 0.0]) {
            assert!((actual - expected).abs() < 1e-6, "{} != {}", actual, expected);
        }
        assert!((chain.total_length() - 1600.0).abs() < 1e-6);
    }

    #[test]
    fn test_single_point_chain_is_arrived() {
        let chain = WaypointChain::from_coordinates(&[Coordinates::new(1.0, 2.0)]).unwrap();
        let mut cursor = ChainCursor::new();

        assert_eq!(cursor.drive(&chain, 10.0), DriveOutcome::Arrived(Coordinates::new(1.0, 2.0)));
    }

    #[test]
    fn test_drive_one_step_equals_many_steps() {
        let chain = sample_chain();

        let mut single = ChainCursor::new();
        let single_outcome = single.drive(&chain, 1175.0);

        let mut stepped = ChainCursor::new();
        let mut stepped_outcome = DriveOutcome::EnRoute(chain.start());
        for step in [200.0, 450.0, 525.0] {
            stepped_outcome = stepped.drive(&chain, step);
        }

        assert_eq!(single.node(), 2);
        assert_eq!(stepped.node(), 2);
        assert!((single.offset() - 375.0).abs() < 1e-6);
        assert!((stepped.offset() - 375.0).abs() < 1e-6);
        assert_close(single_outcome.position(), stepped_outcome.position());

        let expected = Coordinates::new(49.0 + lat_for(1175.0), 9.0);
        assert_close(single_outcome.position(), expected);
    }

    #[test]
    fn test_drive_many_tiny_steps() {
        let chain = sample_chain();
        let mut cursor = ChainCursor::new();
        let mut outcome = DriveOutcome::EnRoute(chain.start());
        for _ in 0..47 {
            outcome = cursor.drive(&chain, 25.0);
        }

        assert_eq!(cursor.node(), 2);
        assert_close(outcome.position(), Coordinates::new(49.0 + lat_for(1175.0), 9.0));
    }

    #[test]
    fn test_destination_idempotence() {
        let chain = sample_chain();
        let mut cursor = ChainCursor::new();

        assert_eq!(cursor.drive(&chain, 5000.0), DriveOutcome::Arrived(chain.terminal()));
        assert!(cursor.is_at_end(&chain));

        for distance in [0.0, 1.0, 10_000.0] {
            assert_eq!(cursor.drive(&chain, distance), DriveOutcome::Arrived(chain.terminal()));
        }
        assert_eq!(cursor.position(&chain), chain.terminal());
    }

    #[test]
    fn test_exact_total_length_arrives() {
        let chain = sample_chain();
        let mut cursor = ChainCursor::new();

        let outcome = cursor.drive(&chain, chain.total_length());
        assert_eq!(outcome, DriveOutcome::Arrived(chain.terminal()));
    }

    #[test]
    fn test_equal_steps_summing_to_length_arrive_on_last_step() {
        let chain = sample_chain();
        let mut cursor = ChainCursor::new();
        let step = chain.total_length() / 72.0;

        for _ in 0..71 {
            assert!(matches!(cursor.drive(&chain, step), DriveOutcome::EnRoute(_)));
        }
        assert_eq!(cursor.drive(&chain, step), DriveOutcome::Arrived(chain.terminal()));
    }

    #[test]
    fn test_rounding_residue_reaches_node() {
        let chain = sample_chain();
        let mut cursor = ChainCursor::new();

        cursor.drive(&chain, 500.0 - 1e-9);

        assert_eq!(cursor.node(), 1);
        assert_eq!(cursor.offset(), 0.0);
    }

    #[test]
    fn test_negative_distance_does_not_move() {
        let chain = sample_chain();
        let mut cursor = ChainCursor::new();
        cursor.drive(&chain, 100.0);

        let before = cursor;
        cursor.drive(&chain, -50.0);
        assert_eq!(cursor, before);
    }

    #[test]
    fn test_from_legs_marks_leg_ends_and_collapses_joins() {
        let a = Coordinates::new(49.0, 9.0);
        let mid = Coordinates::new(49.001, 9.0);
        let b = Coordinates::new(49.002, 9.0);
        let c = Coordinates::new(49.003, 9.0);

        let chain = WaypointChain::from_legs(
            a,
            Some(0),
            vec![
                Leg { geometry: vec![a, mid, b], way_point: 1 },
                Leg { geometry: vec![b, c], way_point: 2 },
            ],
        );

        let markers: Vec<Option<usize>> = chain.nodes().iter().map(|n| n.way_point).collect();
        assert_eq!(markers, vec![Some(0), None, Some(1), Some(2)]);
        assert_eq!(chain.terminal(), c);
    }

    #[test]
    fn test_from_legs_keeps_coinciding_way_points_apart() {
        let a = Coordinates::new(49.0, 9.0);

        let chain = WaypointChain::from_legs(a, Some(0), vec![Leg { geometry: vec![a], way_point: 1 }]);

        assert_eq!(chain.len(), 2);
        assert_eq!(chain.nodes()[0].way_point, Some(0));
        assert_eq!(chain.nodes()[1].way_point, Some(1));
        assert_eq!(chain.nodes()[0].distance_to_next, 0.0);
    }

    #[test]
    fn test_drive_until_halts_at_marked_node() {
        let a = Coordinates::new(49.0, 9.0);
        let b = Coordinates::new(49.0 + lat_for(300.0), 9.0);
        let c = Coordinates::new(49.0 + lat_for(600.0), 9.0);
        let chain = WaypointChain::from_legs(
            a,
            Some(0),
            vec![
                Leg { geometry: vec![a, b], way_point: 1 },
                Leg { geometry: vec![b, c], way_point: 2 },
            ],
        );

        let mut cursor = ChainCursor::new();
        let outcome = cursor.drive_until(&chain, 450.0, |wp| wp == 1);
        assert_eq!(outcome, DriveOutcome::Halted { way_point: 1, position: b });
        assert_eq!(cursor.node(), 1);
        assert_eq!(cursor.offset(), 0.0);

        // Not halting again on a way point that is no longer requested
        let outcome = cursor.drive_until(&chain, 100.0, |_| false);
        assert!(matches!(outcome, DriveOutcome::EnRoute(_)));
    }

    #[test]
    fn test_drive_until_passes_unrequested_markers() {
        let a = Coordinates::new(49.0, 9.0);
        let b = Coordinates::new(49.0 + lat_for(300.0), 9.0);
        let c = Coordinates::new(49.0 + lat_for(600.0), 9.0);
        let chain = WaypointChain::from_legs(
            a,
            None,
            vec![
                Leg { geometry: vec![a, b], way_point: 0 },
                Leg { geometry: vec![b, c], way_point: 1 },
            ],
        );

        let mut cursor = ChainCursor::new();
        let outcome = cursor.drive_until(&chain, 450.0, |_| false);
        assert!(matches!(outcome, DriveOutcome::EnRoute(_)));
        assert_eq!(cursor.node(), 1);
        assert!((cursor.offset() - 150.0).abs() < 1e-6);
    }
}
