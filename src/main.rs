//! Fleet Sim - scheduled bus fleet simulator
//!
//! Loads a scenario, drives every bus through its assignments in virtual time
//! and streams the positions to stdout as JSON lines.

mod cli;
mod config;
mod defaults;
mod services;
mod types;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command, RunArgs};
use crate::config::Config;
use crate::services::dispatcher::Dispatcher;
use crate::services::registry::ClientRegistry;
use crate::services::routing::create_routing_service_with_fallback;
use crate::services::scenario::{load_scenario, Scenario};
use crate::types::LineId;

fn init_logging(config: &Config) -> WorkerGuard {
    std::fs::create_dir_all(&config.logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &config.logs_dir, "fleet-sim.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // stdout carries the position stream, so console logs go to stderr
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,fleet_sim=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::fmt::layer().json().with_writer(non_blocking))
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    let command = cli.command.unwrap_or(Command::Run(RunArgs::default()));
    match &command {
        Command::Run(args) => args.apply(&mut config),
        Command::Inspect { scenario: Some(dir), .. } => config.scenario_dir = dir.clone(),
        Command::Inspect { .. } => {}
    }
    config.validate()?;

    let _guard = init_logging(&config);
    info!("Starting Fleet Sim...");

    let scenario = load_scenario(&config.scenario_dir)
        .with_context(|| format!("failed to load scenario from {}", config.scenario_dir.display()))?;
    info!("Scenario loaded: {}", scenario);

    match command {
        Command::Run(args) => run(config, scenario, args).await,
        Command::Inspect { line, .. } => inspect(&scenario, line.map(LineId::new)),
    }
}

async fn run(config: Config, scenario: Scenario, args: RunArgs) -> Result<()> {
    let start = args.start.unwrap_or(scenario.start);
    let routes = create_routing_service_with_fallback(config.osrm_url.clone()).await;
    info!("Using {} routing", routes.name());

    let dispatcher = Dispatcher::new(scenario.buses, routes, config.dispatch_settings());
    let registry = ClientRegistry::new();

    // stdout is the one built-in observer
    let (stdout_guard, mut lines) = registry.register();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(mut line) = lines.recv().await {
            line.push('\n');
            if let Err(e) = stdout.write_all(line.as_bytes()).await {
                error!("Failed to write position: {}", e);
                break;
            }
        }
        stdout.flush().await.ok();
    });

    let (mut positions, simulation) = dispatcher.run_streaming(start)?;
    let mut interrupted = false;
    loop {
        tokio::select! {
            position = positions.recv() => match position {
                Some(position) => {
                    if let Err(e) = registry.broadcast(&position) {
                        warn!("Failed to serialize position of {}: {}", position.id, e);
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                info!("Interrupted, stopping clocks");
                simulation.stop();
                interrupted = true;
            }
        }
    }
    simulation.join().await?;

    drop(stdout_guard);
    writer.await.ok();

    for id in dispatcher.bus_ids() {
        let snapshot = dispatcher.query_position(id)?;
        match dispatcher.query_current_assignment(id) {
            Ok(assignment) => info!(
                "{}: {} assignment {} ({} {}){}",
                id,
                if snapshot.finished { "finished after" } else { "stopped in" },
                snapshot.assignment_index + 1,
                assignment.name(),
                assignment.departure(),
                snapshot
                    .position
                    .map(|p| format!(" at {}", p))
                    .unwrap_or_default()
            ),
            Err(e) => warn!("{}", e),
        }
    }

    info!("Simulation finished");
    Ok(())
}

fn inspect(scenario: &Scenario, line: Option<LineId>) -> Result<()> {
    println!("Scenario {}", scenario);

    let lines: Vec<_> = match &line {
        Some(id) => vec![scenario
            .line(id)
            .with_context(|| format!("unknown line {}", id))?],
        None => scenario.lines.iter().collect(),
    };

    for line in lines {
        let stops: Vec<_> = line.stops().map(|wp| wp.name.as_str()).collect();
        println!();
        println!("Line {} \"{}\" ({} tours)", line.id, line.name, line.tour_count());
        println!("  stops: {}", stops.join(" -> "));
        for &start in line.start_times() {
            if let Some(times) = line.tour_times(start) {
                let times: Vec<_> = times.iter().map(|t| t.to_string()).collect();
                println!("  tour {}: {}", start, times.join(" "));
            }
        }
    }

    if line.is_none() {
        println!();
        for bus in &scenario.buses {
            println!("Bus {} \"{}\"", bus.id, bus.name);
            for assignment in &bus.assignments {
                println!(
                    "  {} {} ({} way points)",
                    assignment.departure(),
                    assignment.name(),
                    assignment.way_points().len()
                );
            }
        }
    }
    Ok(())
}
