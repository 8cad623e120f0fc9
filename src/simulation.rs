use crate::particle_store::{Particle, ParticleStore};
use crate::spawn::{SpawnGroup, SpawnScheduler};
use circuit_common::{
    map_oxygenation, CircuitError, CircuitLayout, ControlSettings, Lane, RenderParticle, Rgb, Snapshot,
};
use log::{debug, info, trace, warn};
use std::collections::BTreeSet;

const MAIN_LANES: [Lane; 1] = [Lane::VenousMain];

/// Result of one `tick`: the render output plus bookkeeping the host may want to show or log.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Simulated time after this tick, in seconds.
    pub time_s: f64,
    /// Latched bubble alarm after this tick.
    pub alarm: bool,
    /// True only on the tick where the alarm went from clear to latched.
    pub alarm_raised: bool,
    pub spawned: usize,
    /// Particles that reached the end of their terminal lane.
    pub removed: usize,
    /// Particles dropped because their lane had no geometry.
    pub dropped: usize,
    /// Lanes found without geometry for the first time on this tick.
    pub geometry_gaps: Vec<Lane>,
    pub particles: Vec<RenderParticle>,
}

/// All mutable simulation state. Owned by the host and handed to the engine on every tick.
#[derive(Debug, Clone, Default)]
pub struct SimulationState {
    store: ParticleStore,
    scheduler: SpawnScheduler,
    alarm: bool,
    running: bool,
    time_s: f64,
    next_id: u64,
    reported_gaps: BTreeSet<Lane>,
}

impl SimulationState {
    /// A stopped, empty circuit with the alarm clear.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an empty circuit. The alarm is left as it is.
    pub fn start(&mut self) {
        if self.running {
            debug!("Start requested while already running; ignoring.");
            return;
        }
        self.store.clear();
        self.scheduler.reset();
        self.running = true;
        info!("Simulation started at {:.3} s.", self.time_s);
    }

    /// Stops ticking and releases every particle.
    pub fn stop(&mut self) {
        let released = self.store.len();
        self.store.clear();
        self.running = false;
        info!("Simulation stopped at {:.3} s; released {} particles.", self.time_s, released);
    }

    /// Clears the particles and spawn accumulators. The alarm survives unless `clear_alarm` is set.
    pub fn restart(&mut self, clear_alarm: bool) {
        self.store.clear();
        self.scheduler.reset();
        if clear_alarm {
            self.alarm = false;
        }
        info!("Simulation restarted (alarm {}).", if clear_alarm { "cleared" } else { "kept" });
    }

    /// Puts one air bubble at the start of the venous main lane and clears the alarm so the new
    /// bubble can raise it. Refused while the simulation is stopped.
    pub fn inject_bubble(&mut self) -> Option<u64> {
        if !self.running {
            warn!("Bubble injection ignored: simulation is not running.");
            return None;
        }
        let id = self.allocate_id();
        self.store.insert(Particle::bubble(id));
        self.alarm = false;
        info!("Air bubble {} injected at {:.3} s.", id, self.time_s);
        Some(id)
    }

    /// Clears the alarm without touching the particles.
    pub fn reset_alarm(&mut self) {
        if self.alarm {
            info!("Bubble alarm reset at {:.3} s.", self.time_s);
        }
        self.alarm = false;
    }

    pub fn alarm(&self) -> bool {
        self.alarm
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn time_s(&self) -> f64 {
        self.time_s
    }

    pub fn particles(&self) -> &ParticleStore {
        &self.store
    }

    pub fn scheduler(&self) -> &SpawnScheduler {
        &self.scheduler
    }

    /// Render output for every placed particle.
    pub fn render_particles(&self) -> Vec<RenderParticle> {
        self.store
            .iter()
            .filter_map(|p| {
                p.position.map(|pos| RenderParticle {
                    id: p.id,
                    lane: p.lane,
                    x: pos.x,
                    y: pos.y,
                    color: p.color,
                    is_bubble: p.is_bubble(),
                })
            })
            .collect()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            time: self.time_s,
            alarm: self.alarm,
            running: self.running,
            particles: self.render_particles(),
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// Immutable circuit setup plus the per-tick update rules.
#[derive(Debug, Clone)]
pub struct SimulationEngine {
    layout: CircuitLayout,
    decorative_lanes: Vec<Lane>,
}

impl SimulationEngine {
    /// Fails when the venous main or arterial lane has no geometry: the circuit cannot run.
    pub fn new(layout: CircuitLayout) -> Result<Self, CircuitError> {
        for required in [Lane::VenousMain, Lane::ArterialLine] {
            if layout.geometry(required).is_none() {
                return Err(CircuitError::MissingGeometry(required));
            }
        }
        let decorative_lanes = layout.decorative_lanes();
        info!(
            "Circuit ready: {} lanes ({} decorative), sensor at ({:.2}, {:.2}) r={:.2}.",
            layout.lanes.len(),
            decorative_lanes.len(),
            layout.sensor.center.x,
            layout.sensor.center.y,
            layout.sensor.radius
        );
        Ok(Self { layout, decorative_lanes })
    }

    /// Advances the circuit by `dt` seconds using the current controls.
    ///
    /// Spawns first, then moves every particle (new ones included), runs lane transitions,
    /// places each particle on the lane it holds after any transition, and checks bubbles on
    /// the arterial line against the sensor. A stopped state is left untouched.
    pub fn tick(&self, state: &mut SimulationState, dt: f64, controls: &ControlSettings) -> TickReport {
        if !state.running {
            return TickReport {
                time_s: state.time_s,
                alarm: state.alarm,
                ..TickReport::default()
            };
        }

        let dt = if dt.is_finite() && dt >= 0.0 {
            dt
        } else {
            warn!("Ignoring invalid frame dt {}; treating it as 0.", dt);
            0.0
        };
        state.time_s += dt;

        // --- 1. Spawn ---
        let mut spawned = 0usize;
        for group in SpawnGroup::ALL {
            let count = state.scheduler.advance(group, controls.flow_rate, dt);
            let lanes: &[Lane] = match group {
                SpawnGroup::Main => &MAIN_LANES,
                SpawnGroup::Decorative => &self.decorative_lanes,
            };
            for _ in 0..count {
                for &lane in lanes {
                    let id = state.allocate_id();
                    state.store.insert(Particle::blood(id, lane));
                    spawned += 1;
                }
            }
        }

        // --- 2-6. Advance, transition, place, detect ---
        let step = controls.speed * dt;
        let step = if step.is_finite() && step > 0.0 { step } else { 0.0 };
        let arterial_color = map_oxygenation(controls.oxygenation);
        let sensor = self.layout.sensor;

        let SimulationState { store, alarm, reported_gaps, time_s, .. } = state;
        let now = *time_s;
        let mut alarm_raised = false;
        let mut removed = 0usize;
        let mut dropped = 0usize;
        let mut geometry_gaps = Vec::new();

        store.for_each_removable(|p| {
            p.t += step;
            if p.t >= 1.0 {
                match p.lane.successor() {
                    Some(next) => {
                        p.lane = next;
                        p.t = 0.0;
                        p.color = if p.is_bubble() { Rgb::BUBBLE } else { arterial_color };
                        if p.is_bubble() {
                            debug!("Bubble {} entered {} at {:.3} s.", p.id, next, now);
                        }
                    }
                    None => {
                        removed += 1;
                        return false;
                    }
                }
            }

            let Some(geometry) = self.layout.geometry(p.lane) else {
                dropped += 1;
                if reported_gaps.insert(p.lane) {
                    warn!("No geometry for lane {}; dropping its particles.", self.layout.lane_name(p.lane));
                    geometry_gaps.push(p.lane);
                }
                return false;
            };

            let pos = geometry.point_at(p.t);
            p.position = Some(pos);

            if p.is_bubble() && p.lane == Lane::ArterialLine && sensor.detects(pos) && !*alarm {
                *alarm = true;
                alarm_raised = true;
                info!(
                    "AIR BUBBLE DETECTED: bubble {} at ({:.2}, {:.2}), t={:.3} s.",
                    p.id, pos.x, pos.y, now
                );
            }
            true
        });

        trace!(
            "Tick {:.4} s: +{} spawned, -{} finished, -{} dropped, {} live.",
            now,
            spawned,
            removed,
            dropped,
            state.store.len()
        );

        // --- 7. Emit ---
        TickReport {
            time_s: state.time_s,
            alarm: state.alarm,
            alarm_raised,
            spawned,
            removed,
            dropped,
            geometry_gaps,
            particles: state.render_particles(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use circuit_common::{PathGeometry, Sensor, Vec2};
    use std::collections::HashMap;

    fn line(x0: f64, y0: f64, x1: f64, y1: f64) -> PathGeometry {
        PathGeometry::from_points(vec![Vec2::new(x0, y0), Vec2::new(x1, y1)]).unwrap()
    }

    /// Main lane along y=0, arterial line straight down from (100, 0) with the sensor halfway.
    fn layout(decorative: u8) -> CircuitLayout {
        let mut layout = CircuitLayout::new(Sensor::new(Vec2::new(100.0, 50.0), 3.0).unwrap());
        layout.insert_lane(Lane::VenousMain, "venousLine1", line(0.0, 0.0, 100.0, 0.0)).unwrap();
        layout.insert_lane(Lane::ArterialLine, "arterialLine", line(100.0, 0.0, 100.0, 100.0)).unwrap();
        for i in 0..decorative {
            let y = 10.0 * (i as f64 + 1.0);
            layout
                .insert_lane(Lane::VenousDecorative(i), &format!("venousLine{}", i + 2), line(0.0, y, 80.0, y))
                .unwrap();
        }
        layout
    }

    fn controls(flow_rate: f64, speed: f64, oxygenation: f64) -> ControlSettings {
        ControlSettings { flow_rate, speed, oxygenation }
    }

    fn running_state() -> SimulationState {
        let mut state = SimulationState::new();
        state.start();
        state
    }

    fn find(state: &SimulationState, id: u64) -> Option<&Particle> {
        state.particles().iter().find(|p| p.id == id)
    }

    #[test]
    fn test_single_two_second_tick_spawns_ten() {
        let engine = SimulationEngine::new(layout(0)).unwrap();
        let mut state = running_state();
        let report = engine.tick(&mut state, 2.0, &controls(5.0, 0.3, 100.0));
        assert_eq!(report.spawned, 10);
        assert_eq!(state.particles().count_in(Lane::VenousMain), 10);
        assert_eq!(state.scheduler().accumulator(SpawnGroup::Main), 0.0);
        // Spawned this tick, then advanced by speed * dt.
        assert!(state.particles().iter().all(|p| (p.t - 0.6).abs() < 1e-12));
        assert_eq!(report.particles.len(), 10);
    }

    #[test]
    fn test_decorative_lanes_spawn_in_lockstep() {
        let engine = SimulationEngine::new(layout(2)).unwrap();
        let mut state = running_state();
        let c = controls(5.0, 0.3, 100.0);
        for _ in 0..7 {
            engine.tick(&mut state, 0.1, &c);
            let d0 = state.particles().count_in(Lane::VenousDecorative(0));
            let d1 = state.particles().count_in(Lane::VenousDecorative(1));
            assert_eq!(d0, d1);
        }
        assert_eq!(state.particles().count_in(Lane::VenousDecorative(0)), 3);
    }

    #[test]
    fn test_boundary_crossing_places_particle_on_arterial_line() {
        let engine = SimulationEngine::new(layout(0)).unwrap();
        let mut state = running_state();
        let mut particle = Particle::blood(999, Lane::VenousMain);
        particle.t = 0.999;
        state.store.insert(particle);

        // speed * dt = 0.002; flow_rate * dt = 0.01, so nothing spawns.
        let report = engine.tick(&mut state, 0.01, &controls(1.0, 0.2, 94.0));
        assert_eq!(report.spawned, 0);

        let p = find(&state, 999).unwrap();
        assert_eq!(p.lane, Lane::ArterialLine);
        assert_eq!(p.t, 0.0);
        assert_eq!(p.position, Some(Vec2::new(100.0, 0.0)));
        assert_eq!(p.color, Rgb::new(188, 0, 0));
        let rendered = report.particles.iter().find(|r| r.id == 999).unwrap();
        assert_eq!((rendered.x, rendered.y), (100.0, 0.0));
        assert_eq!(rendered.lane, Lane::ArterialLine);
    }

    #[test]
    fn test_bubble_keeps_marker_color_on_arterial_line() {
        let engine = SimulationEngine::new(layout(0)).unwrap();
        let mut state = running_state();
        let id = state.inject_bubble().unwrap();
        let c = controls(1.0, 0.5, 90.0);
        let mut ticks = 0;
        while find(&state, id).map(|p| p.lane) == Some(Lane::VenousMain) {
            engine.tick(&mut state, 0.05, &c);
            ticks += 1;
            assert!(ticks < 100, "bubble never left the venous line");
        }
        let bubble = find(&state, id).unwrap();
        assert_eq!(bubble.lane, Lane::ArterialLine);
        assert_eq!(bubble.color, Rgb::BUBBLE);
        assert!(bubble.is_bubble());

        // Ordinary particles that crossed over got the oxygenation color instead.
        let arterial_blood: Vec<&Particle> = state
            .particles()
            .iter()
            .filter(|p| p.lane == Lane::ArterialLine && !p.is_bubble())
            .collect();
        assert!(arterial_blood.iter().all(|p| p.color == map_oxygenation(90.0)));
    }

    #[test]
    fn test_bubble_alarm_latches_until_reset() {
        let engine = SimulationEngine::new(layout(0)).unwrap();
        let mut state = running_state();
        let id = state.inject_bubble().unwrap();
        let c = controls(2.0, 1.0, 100.0);

        let mut raised_ticks = 0;
        let mut ticks = 0;
        while find(&state, id).is_some() {
            let report = engine.tick(&mut state, 0.01, &c);
            if report.alarm_raised {
                raised_ticks += 1;
                let bubble = report.particles.iter().find(|r| r.id == id).unwrap();
                assert!(Vec2::new(bubble.x, bubble.y).distance(Vec2::new(100.0, 50.0)) <= 3.0);
            }
            ticks += 1;
            assert!(ticks < 1000);
        }
        assert_eq!(raised_ticks, 1);
        assert!(state.alarm());

        // Bubble is gone; the alarm stays latched.
        for _ in 0..50 {
            let report = engine.tick(&mut state, 0.01, &c);
            assert!(report.alarm);
            assert!(!report.alarm_raised);
        }

        state.reset_alarm();
        assert!(!state.alarm());
        assert!(!engine.tick(&mut state, 0.01, &c).alarm);
    }

    #[test]
    fn test_blood_passing_sensor_never_raises_alarm() {
        let engine = SimulationEngine::new(layout(1)).unwrap();
        let mut state = running_state();
        let c = controls(20.0, 1.0, 100.0);
        let mut saw_arterial_near_sensor = false;
        for _ in 0..400 {
            let report = engine.tick(&mut state, 0.01, &c);
            assert!(!report.alarm);
            saw_arterial_near_sensor |= report
                .particles
                .iter()
                .any(|r| r.lane == Lane::ArterialLine && Vec2::new(r.x, r.y).distance(Vec2::new(100.0, 50.0)) <= 3.0);
        }
        assert!(saw_arterial_near_sensor);
    }

    #[test]
    fn test_decorative_lanes_do_not_affect_arterial_flow() {
        let plain = SimulationEngine::new(layout(0)).unwrap();
        let decorated = SimulationEngine::new(layout(3)).unwrap();
        let mut a = running_state();
        let mut b = running_state();
        let c = controls(8.0, 0.7, 96.0);
        let mut decorative_removed = 0;
        for i in 0..300 {
            if i == 20 {
                a.inject_bubble();
                b.inject_bubble();
            }
            let ra = plain.tick(&mut a, 0.016, &c);
            let rb = decorated.tick(&mut b, 0.016, &c);
            decorative_removed += rb.removed - ra.removed;
            assert_eq!(a.particles().count_in(Lane::ArterialLine), b.particles().count_in(Lane::ArterialLine));
            assert_eq!(ra.alarm, rb.alarm);
        }
        assert!(decorative_removed > 0);
        assert!(a.alarm());
    }

    #[test]
    fn test_progress_is_monotonic_within_a_lane() {
        let engine = SimulationEngine::new(layout(2)).unwrap();
        let mut state = running_state();
        let c = controls(10.0, 0.9, 100.0);
        let mut last: HashMap<u64, (Lane, f64)> = HashMap::new();
        for i in 0..500 {
            // Irregular frame times.
            let dt = 0.004 + 0.003 * (i % 7) as f64;
            engine.tick(&mut state, dt, &c);
            for p in state.particles().iter() {
                assert!((0.0..=1.0).contains(&p.t), "t out of range: {}", p.t);
                if let Some(&(lane, t)) = last.get(&p.id) {
                    if lane == p.lane {
                        assert!(p.t >= t);
                    } else {
                        assert_eq!((lane, p.lane), (Lane::VenousMain, Lane::ArterialLine));
                    }
                }
                last.insert(p.id, (p.lane, p.t));
            }
        }
    }

    #[test]
    fn test_injection_requires_running_and_clears_alarm() {
        let mut state = SimulationState::new();
        state.alarm = true;
        assert_eq!(state.inject_bubble(), None);
        assert!(state.particles().is_empty());
        assert!(state.alarm());

        state.start();
        assert!(state.alarm());
        let id = state.inject_bubble().unwrap();
        assert!(!state.alarm());
        let bubble = find(&state, id).unwrap();
        assert_eq!((bubble.lane, bubble.t), (Lane::VenousMain, 0.0));
    }

    #[test]
    fn test_stop_releases_particles_and_freezes_ticks() {
        let engine = SimulationEngine::new(layout(1)).unwrap();
        let mut state = running_state();
        let c = controls(5.0, 0.3, 100.0);
        engine.tick(&mut state, 1.0, &c);
        assert!(!state.particles().is_empty());

        state.stop();
        assert!(state.particles().is_empty());
        let time = state.time_s();
        let report = engine.tick(&mut state, 1.0, &c);
        assert_eq!(report.spawned, 0);
        assert!(report.particles.is_empty());
        assert_eq!(state.time_s(), time);
        assert!(state.particles().is_empty());
    }

    #[test]
    fn test_restart_resets_accumulators_and_respects_alarm_flag() {
        let engine = SimulationEngine::new(layout(1)).unwrap();
        let mut state = running_state();
        let c = controls(5.0, 0.3, 100.0);
        engine.tick(&mut state, 0.3, &c);
        assert!(state.scheduler().accumulator(SpawnGroup::Main) > 0.0);
        state.alarm = true;

        state.restart(false);
        assert!(state.particles().is_empty());
        assert_eq!(state.scheduler().accumulator(SpawnGroup::Main), 0.0);
        assert_eq!(state.scheduler().accumulator(SpawnGroup::Decorative), 0.0);
        assert!(state.alarm());
        assert!(state.is_running());

        state.restart(true);
        assert!(!state.alarm());
    }

    #[test]
    fn test_missing_lane_geometry_drops_particles_and_reports_once() {
        let with_decor = SimulationEngine::new(layout(2)).unwrap();
        let without_decor = SimulationEngine::new(layout(0)).unwrap();
        let mut state = running_state();
        let c = controls(5.0, 0.3, 100.0);
        with_decor.tick(&mut state, 1.0, &c);
        assert_eq!(state.particles().count_in(Lane::VenousDecorative(0)), 5);

        let report = without_decor.tick(&mut state, 0.01, &c);
        assert_eq!(report.dropped, 10);
        assert_eq!(report.geometry_gaps, vec![Lane::VenousDecorative(0), Lane::VenousDecorative(1)]);
        assert_eq!(state.particles().count_in(Lane::VenousMain), 5);
        assert_eq!(report.particles.len(), 5);

        with_decor.tick(&mut state, 1.0, &c);
        let report = without_decor.tick(&mut state, 0.01, &c);
        assert!(report.dropped > 0);
        assert!(report.geometry_gaps.is_empty());
    }

    #[test]
    fn test_engine_requires_main_and_arterial_geometry() {
        let mut layout = CircuitLayout::new(Sensor::new(Vec2::new(0.0, 0.0), 1.0).unwrap());
        layout.insert_lane(Lane::VenousMain, "v", line(0.0, 0.0, 1.0, 0.0)).unwrap();
        assert_eq!(
            SimulationEngine::new(layout).unwrap_err(),
            CircuitError::MissingGeometry(Lane::ArterialLine)
        );
    }

    #[test]
    fn test_invalid_dt_is_treated_as_zero() {
        let engine = SimulationEngine::new(layout(0)).unwrap();
        let mut state = running_state();
        let c = controls(5.0, 0.3, 100.0);
        engine.tick(&mut state, 1.0, &c);
        let before: Vec<f64> = state.particles().iter().map(|p| p.t).collect();
        for dt in [f64::NAN, -0.5, f64::INFINITY] {
            let report = engine.tick(&mut state, dt, &c);
            assert_eq!(report.spawned, 0);
        }
        let after: Vec<f64> = state.particles().iter().map(|p| p.t).collect();
        assert_eq!(before, after);
        assert_eq!(state.time_s(), 1.0);
    }
}
