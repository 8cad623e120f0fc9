use crate::simulation::{SimulationEngine, SimulationState, TickReport};
use anyhow::{Context, Result};
use circuit_common::{CircuitConfig, ControlSettings, ScenarioEvent, Snapshot};
use log::{debug, info, trace, warn};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use serde::Serialize;

/// Jittered frames never get shorter than this, so the driver clock always advances.
const MIN_FRAME_DT_S: f64 = 1e-4;

/// One line of the run's event log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub time_s: f64,
    pub event: String,
    pub detail: String,
}

/// Totals for a finished run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub frames: u64,
    pub spawned: u64,
    pub removed: u64,
    pub dropped: u64,
    pub alarms_raised: u32,
    pub final_particle_count: usize,
}

/// Fixed-step host driver: plays the part of the animation-frame loop and the operator.
pub struct ScenarioRunner {
    engine: SimulationEngine,
    state: SimulationState,
    controls: ControlSettings,
    events: Vec<ScenarioEvent>,
    next_event: usize,
    rng: StdRng,
    jitter: Option<Normal<f64>>,
    frame_dt_s: f64,
    total_time_s: f64,
    record_interval_s: f64,
    next_record_s: f64,
    /// Wall-clock time of the scenario; keeps running while the simulation is stopped.
    clock_s: f64,
    snapshots: Vec<Snapshot>,
    event_log: Vec<EventRecord>,
    summary: RunSummary,
}

impl ScenarioRunner {
    pub fn new(config: &CircuitConfig) -> Result<Self> {
        let layout = config.build_layout().context("Invalid circuit geometry")?;
        let engine = SimulationEngine::new(layout).context("Circuit cannot start")?;

        let controls = config.controls.clamped();
        if controls != config.controls {
            warn!("Initial controls {:?} clamped to {:?}.", config.controls, controls);
        }

        let jitter = if config.timing.frame_jitter_s > 0.0 {
            Some(Normal::new(0.0, config.timing.frame_jitter_s)?)
        } else {
            None
        };

        let mut events = config.events.clone();
        events.sort_by(|a, b| a.at_s().total_cmp(&b.at_s()));

        let mut state = SimulationState::new();
        if config.timing.autostart {
            state.start();
        }

        Ok(Self {
            engine,
            state,
            controls,
            events,
            next_event: 0,
            rng: StdRng::seed_from_u64(config.timing.seed),
            jitter,
            frame_dt_s: config.timing.frame_dt_s,
            total_time_s: config.timing.total_time_s,
            record_interval_s: config.timing.record_interval_s,
            next_record_s: 0.0,
            clock_s: 0.0,
            snapshots: Vec::new(),
            event_log: Vec::new(),
            summary: RunSummary::default(),
        })
    }

    /// Runs frames until the configured total time has elapsed.
    pub fn run(&mut self) -> RunSummary {
        info!(
            "Running scenario for {:.2} s at ~{:.1} fps ({} scheduled events).",
            self.total_time_s,
            1.0 / self.frame_dt_s,
            self.events.len()
        );
        self.record_snapshot();

        while self.clock_s < self.total_time_s - 1e-9 {
            self.step_frame();
        }

        // Always end with the final frame on record.
        if self.snapshots.last().map(|s| s.time) != Some(self.clock_s) {
            self.record_snapshot();
        }

        self.summary.final_particle_count = self.state.particles().len();
        info!(
            "Scenario finished: {} frames, {} spawned, {} finished, {} dropped, {} alarms, {} live.",
            self.summary.frames,
            self.summary.spawned,
            self.summary.removed,
            self.summary.dropped,
            self.summary.alarms_raised,
            self.summary.final_particle_count
        );
        self.summary.clone()
    }

    /// Applies due events, then advances one frame.
    pub fn step_frame(&mut self) -> TickReport {
        self.apply_due_events();

        let dt = self.next_dt();
        let report = self.engine.tick(&mut self.state, dt, &self.controls);
        self.clock_s += dt;

        self.summary.frames += 1;
        self.summary.spawned += report.spawned as u64;
        self.summary.removed += report.removed as u64;
        self.summary.dropped += report.dropped as u64;
        if report.alarm_raised {
            self.summary.alarms_raised += 1;
            self.log_event("alarm_raised", "air bubble passed the sensor".to_string());
        }
        for lane in &report.geometry_gaps {
            self.log_event("geometry_gap", format!("no geometry for lane {}", lane));
        }
        trace!(
            "Frame {} ({:.4} s, sim {:.4} s, dt {:.4}): {} live, alarm={}.",
            self.summary.frames,
            self.clock_s,
            report.time_s,
            dt,
            report.particles.len(),
            report.alarm
        );

        if self.clock_s + 1e-9 >= self.next_record_s {
            self.record_snapshot();
        }
        report
    }

    fn next_dt(&mut self) -> f64 {
        let noise = match &self.jitter {
            Some(normal) => self.rng.sample(normal),
            None => 0.0,
        };
        (self.frame_dt_s + noise).max(MIN_FRAME_DT_S)
    }

    fn apply_due_events(&mut self) {
        while let Some(event) = self.events.get(self.next_event) {
            if event.at_s() > self.clock_s + 1e-9 {
                break;
            }
            let event = event.clone();
            self.next_event += 1;
            self.apply_event(&event);
        }
    }

    fn apply_event(&mut self, event: &ScenarioEvent) {
        debug!("Applying {:?} at {:.3} s.", event, self.clock_s);
        let detail = match event {
            ScenarioEvent::InjectBubble { .. } => match self.state.inject_bubble() {
                Some(id) => format!("bubble {}", id),
                None => "ignored: simulation not running".to_string(),
            },
            ScenarioEvent::ResetAlarm { .. } => {
                let was = self.state.alarm();
                self.state.reset_alarm();
                format!("alarm was {}", if was { "set" } else { "clear" })
            }
            ScenarioEvent::SetControls { flow_rate, speed, oxygenation, restart, .. } => {
                let requested = ControlSettings {
                    flow_rate: flow_rate.unwrap_or(self.controls.flow_rate),
                    speed: speed.unwrap_or(self.controls.speed),
                    oxygenation: oxygenation.unwrap_or(self.controls.oxygenation),
                };
                self.controls = requested.clamped();
                if self.controls != requested {
                    warn!("Requested controls {:?} clamped to {:?}.", requested, self.controls);
                }
                if *restart && self.state.is_running() {
                    self.state.restart(false);
                }
                format!(
                    "flow_rate={} speed={} oxygenation={}{}",
                    self.controls.flow_rate,
                    self.controls.speed,
                    self.controls.oxygenation,
                    if *restart { " (restart)" } else { "" }
                )
            }
            ScenarioEvent::Stop { .. } => {
                self.state.stop();
                String::new()
            }
            ScenarioEvent::Start { .. } => {
                self.state.start();
                String::new()
            }
            ScenarioEvent::Restart { clear_alarm, .. } => {
                self.state.restart(*clear_alarm);
                format!("clear_alarm={}", clear_alarm)
            }
        };
        self.log_event(event.name(), detail);
    }

    fn log_event(&mut self, event: &str, detail: String) {
        self.event_log.push(EventRecord { time_s: self.clock_s, event: event.to_string(), detail });
    }

    fn record_snapshot(&mut self) {
        let mut snapshot = self.state.snapshot();
        snapshot.time = self.clock_s;
        self.snapshots.push(snapshot);
        // A zero interval records every frame.
        while self.next_record_s <= self.clock_s + 1e-9 {
            if self.record_interval_s > 0.0 {
                self.next_record_s += self.record_interval_s;
            } else {
                self.next_record_s = self.clock_s + MIN_FRAME_DT_S / 2.0;
                break;
            }
        }
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn event_log(&self) -> &[EventRecord] {
        &self.event_log
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn controls(&self) -> &ControlSettings {
        &self.controls
    }

    pub fn clock_s(&self) -> f64 {
        self.clock_s
    }
}
