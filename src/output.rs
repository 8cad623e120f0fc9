use crate::particle_store::ParticleStore;
use crate::scenario::EventRecord;
use anyhow::{Context, Result};
use circuit_common::{OutputConfig, Snapshot};
use log::{error, info};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Writes recorded snapshots in the configured format and returns the file written.
///
/// `bincode` output is a stream: a `u32` snapshot count followed by each snapshot, which is
/// what the visualizer reads. Unknown formats fall back to JSON.
pub fn save_snapshots(output: &OutputConfig, snapshots: &[Snapshot]) -> Result<PathBuf> {
    let format = output.format.as_deref().unwrap_or("json");
    match format {
        "json" => write_json(output, snapshots),
        "bincode" => {
            let filename = PathBuf::from(format!("{}_snapshots.bin", output.base_filename));
            let file = File::create(&filename)
                .with_context(|| format!("Failed to create snapshot file '{}'", filename.display()))?;
            let mut writer = BufWriter::new(file);
            bincode::serialize_into(&mut writer, &(snapshots.len() as u32))
                .context("Failed to write snapshot count")?;
            for snapshot in snapshots {
                bincode::serialize_into(&mut writer, snapshot).context("Failed to serialize snapshot")?;
            }
            writer.flush()?;
            info!("{} snapshots saved to {} (binary stream)", snapshots.len(), filename.display());
            Ok(filename)
        }
        "messagepack" => {
            let filename = PathBuf::from(format!("{}_snapshots.msgpack", output.base_filename));
            let file = File::create(&filename)
                .with_context(|| format!("Failed to create snapshot file '{}'", filename.display()))?;
            let mut writer = BufWriter::new(file);
            rmp_serde::encode::write(&mut writer, snapshots).context("Failed to serialize snapshots to MessagePack")?;
            writer.flush()?;
            info!("{} snapshots saved to {} (MessagePack format)", snapshots.len(), filename.display());
            Ok(filename)
        }
        other => {
            error!("Unknown output format: {}. Using JSON instead.", other);
            write_json(output, snapshots)
        }
    }
}

fn write_json(output: &OutputConfig, snapshots: &[Snapshot]) -> Result<PathBuf> {
    let filename = PathBuf::from(format!("{}_snapshots.json", output.base_filename));
    let file = File::create(&filename)
        .with_context(|| format!("Failed to create snapshot file '{}'", filename.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, snapshots).context("Failed to serialize snapshots to JSON")?;
    writer.flush()?;
    info!("{} snapshots saved to {}", snapshots.len(), filename.display());
    Ok(filename)
}

/// Writes the final live particles, one row each.
pub fn save_positions(output: &OutputConfig, particles: &ParticleStore) -> Result<PathBuf> {
    let filename = PathBuf::from(format!("{}_final_positions.csv", output.base_filename));
    let mut writer = csv::Writer::from_path(&filename)
        .with_context(|| format!("Failed to create CSV file '{}'", filename.display()))?;
    writer.write_record(["id", "lane", "t", "x", "y", "color", "is_bubble"])?;
    for p in particles.iter() {
        let (x, y) = p.position.map_or((String::new(), String::new()), |pos| {
            (format!("{:.4}", pos.x), format!("{:.4}", pos.y))
        });
        writer.write_record([
            p.id.to_string(),
            p.lane.to_string(),
            format!("{:.6}", p.t),
            x,
            y,
            p.color.to_string(),
            p.is_bubble().to_string(),
        ])?;
    }
    writer.flush()?;
    info!("Final positions of {} particles saved to {}", particles.len(), filename.display());
    Ok(filename)
}

/// Writes the scenario's event log (operator actions, alarms, geometry gaps).
pub fn save_event_log(output: &OutputConfig, events: &[EventRecord]) -> Result<PathBuf> {
    let filename = PathBuf::from(format!("{}_events.csv", output.base_filename));
    let mut writer = csv::Writer::from_path(&filename)
        .with_context(|| format!("Failed to create CSV file '{}'", filename.display()))?;
    for record in events {
        writer.serialize(record)?;
    }
    writer.flush()?;
    info!("{} events saved to {}", events.len(), filename.display());
    Ok(filename)
}
