//! Vehicle movement
//!
//! One `VehicleTask` per bus consumes clock ticks, moves the bus along its
//! assignments at constant speed, waits at stops until their departure and
//! publishes every position change.

use std::sync::Arc;

use futures::future::try_join_all;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::services::chain::{ChainCursor, DriveOutcome, Leg, WaypointChain};
use crate::services::routing::{RouteError, RouteService};
use crate::types::{Assignment, Bus, BusPosition, Coordinates, VirtualTime, WayPoint};

#[derive(Debug, Error)]
pub enum VehicleError {
    #[error("assignment has no way points")]
    NoWayPoints,

    #[error(transparent)]
    Route(#[from] RouteError),
}

/// Receiver of published positions
pub trait PositionSink: Send + Sync {
    fn publish(&self, position: BusPosition);
}

impl<F> PositionSink for F
where
    F: Fn(BusPosition) + Send + Sync,
{
    fn publish(&self, position: BusPosition) {
        self(position)
    }
}

/// Where a vehicle task sends its positions
#[derive(Clone)]
pub enum PositionOutput {
    Callback(Arc<dyn PositionSink>),
    Channel(mpsc::Sender<BusPosition>),
}

impl PositionOutput {
    async fn publish(&self, position: BusPosition) {
        match self {
            PositionOutput::Callback(sink) => sink.publish(position),
            PositionOutput::Channel(tx) => {
                if tx.send(position).await.is_err() {
                    trace!("Position receiver dropped");
                }
            }
        }
    }
}

impl From<mpsc::Sender<BusPosition>> for PositionOutput {
    fn from(tx: mpsc::Sender<BusPosition>) -> Self {
        PositionOutput::Channel(tx)
    }
}

/// State of a vehicle readable from outside its task
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleSnapshot {
    pub assignment_index: usize,
    pub position: Option<Coordinates>,
    /// Stop being serviced, only while dwelling
    pub current_stop: Option<WayPoint>,
    pub finished: bool,
}

/// A bus and its shared snapshot
pub struct VehicleHandle {
    bus: Arc<Bus>,
    state: Mutex<VehicleSnapshot>,
}

impl VehicleHandle {
    pub fn new(bus: Arc<Bus>) -> Self {
        let position = bus.initial_position();
        Self {
            bus,
            state: Mutex::new(VehicleSnapshot {
                assignment_index: 0,
                position,
                current_stop: None,
                finished: false,
            }),
        }
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    pub fn snapshot(&self) -> VehicleSnapshot {
        self.state.lock().clone()
    }

    /// The active assignment, or the last one once the bus is done
    pub fn current_assignment(&self) -> Option<Assignment> {
        let index = self.state.lock().assignment_index;
        self.bus.assignments.get(index).cloned()
    }

    fn begin_assignment(&self, index: usize) {
        self.state.lock().assignment_index = index;
    }

    fn record(&self, position: &BusPosition) {
        let mut state = self.state.lock();
        state.position = Some(position.location);
        state.current_stop = position.stop.clone();
    }

    fn finish(&self) {
        let mut state = self.state.lock();
        state.current_stop = None;
        state.finished = true;
    }
}

/// Result of processing one tick
#[derive(Debug, Clone, PartialEq)]
struct Step {
    publish: Option<(Coordinates, Option<WayPoint>)>,
    complete: bool,
}

impl Step {
    fn idle() -> Self {
        Self { publish: None, complete: false }
    }

    fn moved(location: Coordinates, stop: Option<WayPoint>) -> Self {
        Self { publish: Some((location, stop)), complete: false }
    }

    fn arrived(location: Coordinates) -> Self {
        Self { publish: Some((location, None)), complete: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Driving,
    Dwelling { way_point: usize, until: VirtualTime },
}

/// Progress through one assignment
struct Movement<'a> {
    chain: WaypointChain,
    cursor: ChainCursor,
    way_points: &'a [WayPoint],
    departure: VirtualTime,
    speed_m_s: f64,
    phase: Phase,
}

impl<'a> Movement<'a> {
    fn new(chain: WaypointChain, assignment: &'a Assignment, speed_m_s: f64) -> Self {
        Self {
            chain,
            cursor: ChainCursor::new(),
            way_points: assignment.way_points(),
            departure: assignment.departure(),
            speed_m_s,
            phase: Phase::Driving,
        }
    }

    fn position(&self) -> Coordinates {
        self.cursor.position(&self.chain)
    }

    /// Handle the tick at `now`; `last` is the previous tick.
    fn advance(&mut self, last: VirtualTime, now: VirtualTime) -> Step {
        let gate = match self.phase {
            Phase::Dwelling { way_point, until } => {
                if now < until {
                    return Step::moved(self.position(), Some(self.way_points[way_point].clone()));
                }
                self.phase = Phase::Driving;
                if self.cursor.is_at_end(&self.chain) {
                    return Step::arrived(self.position());
                }
                until
            }
            Phase::Driving => {
                if now <= self.departure {
                    return Step::idle();
                }
                self.departure
            }
        };

        let elapsed = now.duration_since(last.max(gate)).as_secs_f64();
        let way_points = self.way_points;
        let outcome = self.cursor.drive_until(&self.chain, self.speed_m_s * elapsed, |index| {
            way_points
                .get(index)
                .and_then(WayPoint::dwell_until)
                .is_some_and(|until| now < until)
        });

        match outcome {
            DriveOutcome::EnRoute(location) => Step::moved(location, None),
            DriveOutcome::Arrived(location) => Step::arrived(location),
            DriveOutcome::Halted { way_point, position } => {
                let stop = &way_points[way_point];
                if let Some(until) = stop.dwell_until() {
                    self.phase = Phase::Dwelling { way_point, until };
                }
                Step::moved(position, Some(stop.clone()))
            }
        }
    }
}

/// Drives one bus through its assignments
pub struct VehicleTask {
    handle: Arc<VehicleHandle>,
    routes: Arc<dyn RouteService>,
    speed_m_s: f64,
    output: PositionOutput,
}

impl VehicleTask {
    /// `default_speed_kmh` applies unless the bus has its own speed.
    pub fn new(
        handle: Arc<VehicleHandle>,
        routes: Arc<dyn RouteService>,
        default_speed_kmh: f64,
        output: PositionOutput,
    ) -> Self {
        let speed_kmh = handle.bus.speed_kmh.unwrap_or(default_speed_kmh);
        Self {
            handle,
            routes,
            speed_m_s: speed_kmh / 3.6,
            output,
        }
    }

    pub fn speed_m_s(&self) -> f64 {
        self.speed_m_s
    }

    /// Run until the assignments are exhausted or `ticks` closes.
    ///
    /// `start` is the clock's start time, the reference for the first tick.
    pub async fn run(self, mut ticks: mpsc::Receiver<VirtualTime>, start: VirtualTime) {
        let bus = Arc::clone(&self.handle.bus);
        let Some(mut position) = bus.initial_position() else {
            info!("Bus {} has no assignments", bus.id);
            self.handle.finish();
            return;
        };
        let mut last = start;

        for (index, assignment) in bus.assignments.iter().enumerate() {
            self.handle.begin_assignment(index);
            info!(
                "Bus {} starts assignment {} \"{}\" departing {}",
                bus.id,
                index,
                assignment.name(),
                assignment.departure()
            );

            let chain = match self.resolve_chain(position, assignment).await {
                Ok(chain) => chain,
                Err(e) => {
                    warn!(
                        "Bus {} skips assignment \"{}\": {}",
                        bus.id,
                        assignment.name(),
                        e
                    );
                    continue;
                }
            };
            debug!(
                "Bus {} route has {} nodes over {:.0} m",
                bus.id,
                chain.len(),
                chain.total_length()
            );

            let mut movement = Movement::new(chain, assignment, self.speed_m_s);
            loop {
                let Some(now) = ticks.recv().await else {
                    debug!("Clock closed, bus {} stops", bus.id);
                    self.handle.finish();
                    return;
                };

                let step = movement.advance(last, now);
                last = now;

                if let Some((location, stop)) = step.publish {
                    let update = BusPosition {
                        id: bus.id.clone(),
                        location,
                        stop,
                    };
                    self.handle.record(&update);
                    self.output.publish(update).await;
                }
                if step.complete {
                    debug!("Bus {} completed \"{}\" at {}", bus.id, assignment.name(), now);
                    break;
                }
            }
            position = movement.position();
        }

        self.handle.finish();
        info!("Bus {} finished all assignments", bus.id);
    }

    /// Route every leg of `assignment`, starting from where the bus stands.
    async fn resolve_chain(
        &self,
        position: Coordinates,
        assignment: &Assignment,
    ) -> Result<WaypointChain, VehicleError> {
        let way_points = assignment.way_points();
        let first = way_points.first().ok_or(VehicleError::NoWayPoints)?;

        let mut pairs = Vec::with_capacity(way_points.len());
        let start_marker = if position.polyline_eq(&first.coordinates) {
            Some(0)
        } else {
            pairs.push((position, first.coordinates, 0));
            None
        };
        for (index, pair) in way_points.windows(2).enumerate() {
            pairs.push((pair[0].coordinates, pair[1].coordinates, index + 1));
        }

        let routes = &self.routes;
        let geometries = try_join_all(pairs.iter().map(|&(from, to, _)| async move {
            routes.route(&[from, to]).await
        }))
        .await?;

        let legs = geometries
            .into_iter()
            .zip(&pairs)
            .map(|(geometry, &(_, _, way_point))| Leg {
                geometry: geometry.coordinates,
                way_point,
            })
            .collect();

        Ok(WaypointChain::from_legs(position, start_marker, legs))
    }
}
