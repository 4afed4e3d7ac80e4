//! Fleet dispatcher
//!
//! Starts one vehicle task per bus, each fed by its own clock or by a
//! subscription to a clock shared by the whole fleet, and answers queries
//! about what a bus is currently doing.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info};

use crate::defaults::{DEFAULT_FREQUENCY, DEFAULT_SPEED_KMH, DEFAULT_WARP, POSITION_BUFFER};
use crate::services::aggregator::merge;
use crate::services::clock::{ClockError, VirtualClock};
use crate::services::routing::RouteService;
use crate::services::vehicle::{PositionOutput, PositionSink, VehicleHandle, VehicleSnapshot, VehicleTask};
use crate::types::{Assignment, Bus, BusId, BusPosition, VirtualTime};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown bus {0}")]
    UnknownBus(BusId),

    #[error("bus {0} has no assignments")]
    NoAssignments(BusId),

    #[error("invalid clock settings: {0}")]
    Clock(#[from] ClockError),

    #[error("vehicle task failed: {0}")]
    Task(#[from] JoinError),
}

/// Knobs shared by every vehicle of a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchSettings {
    /// Clock ticks per real second
    pub frequency: f64,
    pub warp: f64,
    /// Speed of buses without their own
    pub speed_kmh: f64,
    /// One clock for the fleet instead of one per bus
    pub shared_clock: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            frequency: DEFAULT_FREQUENCY,
            warp: DEFAULT_WARP,
            speed_kmh: DEFAULT_SPEED_KMH,
            shared_clock: false,
        }
    }
}

/// Running simulation: stop it early or wait for it to end
pub struct SimulationHandle {
    clocks: Vec<VirtualClock>,
    clock_tasks: Vec<JoinHandle<()>>,
    vehicles: Vec<JoinHandle<()>>,
}

impl SimulationHandle {
    /// Stop every clock; vehicle tasks end on their next tick.
    pub fn stop(&self) {
        for clock in &self.clocks {
            clock.stop();
        }
    }

    /// Wait until every vehicle task has terminated.
    pub async fn join(self) -> Result<(), DispatchError> {
        let results = join_all(self.vehicles).await;

        for clock in &self.clocks {
            clock.stop();
        }
        join_all(self.clock_tasks).await;

        for result in results {
            if let Err(e) = result {
                error!("Vehicle task failed: {}", e);
                return Err(e.into());
            }
        }
        Ok(())
    }
}

pub struct Dispatcher {
    vehicles: HashMap<BusId, Arc<VehicleHandle>>,
    roster: Vec<BusId>,
    routes: Arc<dyn RouteService>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        buses: impl IntoIterator<Item = Bus>,
        routes: Arc<dyn RouteService>,
        settings: DispatchSettings,
    ) -> Self {
        let mut vehicles = HashMap::new();
        let mut roster = Vec::new();
        for bus in buses {
            roster.push(bus.id.clone());
            vehicles.insert(bus.id.clone(), Arc::new(VehicleHandle::new(Arc::new(bus))));
        }

        Self {
            vehicles,
            roster,
            routes,
            settings,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Bus ids in roster order
    pub fn bus_ids(&self) -> &[BusId] {
        &self.roster
    }

    /// Run every bus from `start`, publishing through `sink`, until all are done.
    pub async fn run(&self, start: VirtualTime, sink: Arc<dyn PositionSink>) -> Result<(), DispatchError> {
        let handle = self.launch(start, |_| PositionOutput::Callback(Arc::clone(&sink)))?;
        handle.join().await
    }

    /// Run every bus from `start` with positions merged into one channel.
    ///
    /// The channel closes once every vehicle task has ended.
    pub fn run_streaming(
        &self,
        start: VirtualTime,
    ) -> Result<(mpsc::Receiver<BusPosition>, SimulationHandle), DispatchError> {
        let mut receivers = Vec::with_capacity(self.roster.len());
        let handle = self.launch(start, |_| {
            let (tx, rx) = mpsc::channel(POSITION_BUFFER);
            receivers.push(rx);
            PositionOutput::Channel(tx)
        })?;
        Ok((merge(receivers), handle))
    }

    fn launch<F>(&self, start: VirtualTime, mut output_for: F) -> Result<SimulationHandle, DispatchError>
    where
        F: FnMut(&BusId) -> PositionOutput,
    {
        let settings = self.settings;
        let shared = if settings.shared_clock {
            Some(VirtualClock::new(start, settings.frequency, settings.warp)?)
        } else {
            None
        };

        let mut clocks = Vec::new();
        let mut vehicles = Vec::with_capacity(self.roster.len());
        for id in &self.roster {
            let handle = Arc::clone(&self.vehicles[id]);
            let clock = match &shared {
                Some(clock) => clock.clone(),
                None => {
                    let clock = VirtualClock::new(start, settings.frequency, settings.warp)?;
                    clocks.push(clock.clone());
                    clock
                }
            };

            let task = VehicleTask::new(handle, Arc::clone(&self.routes), settings.speed_kmh, output_for(id));
            let ticks = clock.subscribe();
            vehicles.push(tokio::spawn(task.run(ticks, start)));
        }
        if let Some(clock) = shared {
            clocks.push(clock);
        }

        let mut clock_tasks = Vec::with_capacity(clocks.len());
        for clock in &clocks {
            clock_tasks.push(clock.start()?);
        }

        info!(
            "Dispatched {} buses from {} ({} clock{}, {} Hz, warp {})",
            self.roster.len(),
            start,
            clocks.len(),
            if clocks.len() == 1 { "" } else { "s" },
            settings.frequency,
            settings.warp
        );

        Ok(SimulationHandle {
            clocks,
            clock_tasks,
            vehicles,
        })
    }

    fn vehicle(&self, id: &BusId) -> Result<&Arc<VehicleHandle>, DispatchError> {
        self.vehicles
            .get(id)
            .ok_or_else(|| DispatchError::UnknownBus(id.clone()))
    }

    /// The assignment the bus is working on (its last one once it finished)
    pub fn query_current_assignment(&self, id: &BusId) -> Result<Assignment, DispatchError> {
        self.vehicle(id)?
            .current_assignment()
            .ok_or_else(|| DispatchError::NoAssignments(id.clone()))
    }

    /// Last published position, current stop and progress of the bus
    pub fn query_position(&self, id: &BusId) -> Result<VehicleSnapshot, DispatchError> {
        Ok(self.vehicle(id)?.snapshot())
    }
}
