//! Simulation services

pub mod aggregator;
pub mod chain;
pub mod clock;
pub mod dispatcher;
pub mod geo;
pub mod registry;
pub mod routing;
pub mod scenario;
pub mod timetable;
pub mod vehicle;
