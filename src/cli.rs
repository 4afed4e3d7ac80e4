//! CLI argument parsing for the fleet-sim binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::Config;
use crate::types::VirtualTime;

#[derive(Parser)]
#[command(name = "fleet-sim", about = "Scheduled bus fleet simulator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the simulation and stream positions to stdout (default if no subcommand given)
    Run(RunArgs),
    /// Load the scenario, print its lines and rosters, and exit
    Inspect {
        /// Scenario directory
        #[arg(long)]
        scenario: Option<PathBuf>,
        /// Print the tours of this line only
        #[arg(long)]
        line: Option<String>,
    },
}

/// Overrides of the environment configuration
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Scenario directory
    #[arg(long)]
    pub scenario: Option<PathBuf>,
    /// Clock ticks per real second
    #[arg(long)]
    pub frequency: Option<f64>,
    /// Time warp factor
    #[arg(long)]
    pub warp: Option<f64>,
    /// Default bus speed in km/h
    #[arg(long = "bus-speed")]
    pub bus_speed: Option<f64>,
    /// OSRM base URL
    #[arg(long)]
    pub osrm_url: Option<String>,
    /// Drive all buses from a single clock
    #[arg(long)]
    pub shared_clock: bool,
    /// Start the clocks here instead of at the scenario's start time (hh:mm)
    #[arg(long)]
    pub start: Option<VirtualTime>,
}

impl RunArgs {
    /// Apply the flags on top of `config`; unset flags keep its values.
    pub fn apply(&self, config: &mut Config) {
        if let Some(scenario) = &self.scenario {
            config.scenario_dir = scenario.clone();
        }
        if let Some(frequency) = self.frequency {
            config.frequency = frequency;
        }
        if let Some(warp) = self.warp {
            config.warp = warp;
        }
        if let Some(speed) = self.bus_speed {
            config.speed_kmh = speed;
        }
        if let Some(url) = &self.osrm_url {
            config.osrm_url = Some(url.clone());
        }
        if self.shared_clock {
            config.shared_clock = true;
        }
    }
}
