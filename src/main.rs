use anyhow::Result;
use log::{debug, error, info};
use std::time::Instant;

// Define modules used by main
mod output;
mod particle_store;
mod scenario;
mod simulation;
mod spawn;

use circuit_common::CircuitConfig;
use scenario::ScenarioRunner;

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();

    info!("Starting Circuit Simulation Engine...");

    // --- Load Configuration ---
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = CircuitConfig::load(&config_path)?;
    debug!("Circuit configuration: {:#?}", config);

    // --- Initialize Simulation ---
    let mut runner = ScenarioRunner::new(&config)?;

    // --- Simulation Loop ---
    let start_time = Instant::now();
    let summary = runner.run();
    info!(
        "Simulated {:.2} s in {} frames; wall time {:.3} s.",
        runner.clock_s(),
        summary.frames,
        start_time.elapsed().as_secs_f64()
    );
    if runner.state().alarm() {
        info!("Bubble alarm is latched at the end of the run.");
    }

    // --- Save Recorded Data ---
    let output = &config.output;
    if output.save_snapshots {
        if let Err(e) = output::save_snapshots(output, runner.snapshots()) {
            error!("Error saving snapshots: {:#}", e);
        }
    } else {
        info!("Skipping saving snapshots as per config (save_snapshots is false).");
    }

    if output.save_positions {
        if let Err(e) = output::save_positions(output, runner.state().particles()) {
            error!("Error saving final positions: {:#}", e);
        }
    } else {
        info!("Skipping saving final positions as per config.");
    }

    if output.save_event_log {
        if let Err(e) = output::save_event_log(output, runner.event_log()) {
            error!("Error saving event log: {:#}", e);
        }
    }

    info!("Simulation Complete.");
    Ok(())
}
