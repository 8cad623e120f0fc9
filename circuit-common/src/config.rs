use crate::color::{MAX_OXYGENATION, MIN_OXYGENATION};
use crate::error::CircuitError;
use crate::geometry::{CircuitLayout, PathGeometry, Sensor};
use crate::lane::{Lane, LaneKind};
use crate::vecmath::{clamp, Vec2};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MIN_FLOW_RATE: f64 = 1.0;
pub const MAX_FLOW_RATE: f64 = 20.0;
pub const MIN_SPEED: f64 = 0.1;
pub const MAX_SPEED: f64 = 1.0;

// Extents of the circuit drawing (its viewBox), in drawing units.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ViewConfig {
    pub width: f64,
    pub height: f64,
}

// Host driver timing
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimingConfig {
    pub frame_dt_s: f64,
    pub total_time_s: f64,
    #[serde(default)]
    pub record_interval_s: f64,
    /// Standard deviation of the Gaussian jitter added to each frame's dt.
    #[serde(default)]
    pub frame_jitter_s: f64,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_autostart")]
    pub autostart: bool,
}

fn default_autostart() -> bool {
    true
}

/// The operator controls: read fresh every tick.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct ControlSettings {
    /// Particles per second spawned on each venous lane.
    pub flow_rate: f64,
    /// Fraction of a lane travelled per second; shared by all lanes.
    pub speed: f64,
    /// Arterial oxygen saturation, percent.
    pub oxygenation: f64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        ControlSettings { flow_rate: 5.0, speed: 0.3, oxygenation: 100.0 }
    }
}

impl ControlSettings {
    /// Clamps every control into its slider range. Non-finite values fall to the range minimum.
    pub fn clamped(&self) -> Self {
        ControlSettings {
            flow_rate: clamp_finite(self.flow_rate, MIN_FLOW_RATE, MAX_FLOW_RATE),
            speed: clamp_finite(self.speed, MIN_SPEED, MAX_SPEED),
            oxygenation: clamp_finite(self.oxygenation, MIN_OXYGENATION, MAX_OXYGENATION),
        }
    }
}

fn clamp_finite(value: f64, min: f64, max: f64) -> f64 {
    if value.is_finite() {
        clamp(value, min, max)
    } else {
        min
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy)]
pub struct RectConfig {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

// Bubble sensor: an explicit point, or the rectangle drawn for it (its centre is used).
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SensorConfig {
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub rect: Option<RectConfig>,
    #[serde(default = "default_sensor_radius")]
    pub radius: f64,
}

fn default_sensor_radius() -> f64 {
    3.0
}

impl SensorConfig {
    pub fn to_sensor(&self) -> Result<Sensor, CircuitError> {
        let center = match (self.x, self.y, &self.rect) {
            (Some(x), Some(y), None) => Vec2::new(x, y),
            (None, None, Some(rect)) => {
                if !(rect.width >= 0.0 && rect.height >= 0.0) {
                    return Err(CircuitError::InvalidSensor(
                        "sensor rect must have non-negative size".to_string(),
                    ));
                }
                Vec2::new(rect.x + rect.width / 2.0, rect.y + rect.height / 2.0)
            }
            _ => {
                return Err(CircuitError::InvalidSensor(
                    "give either both `x` and `y`, or `rect`".to_string(),
                ))
            }
        };
        Sensor::new(center, self.radius)
    }
}

// One lane of the drawing. Exactly one of `path` (SVG path data) or `points` is required.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LaneConfig {
    pub name: String,
    pub kind: LaneKind,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub points: Option<Vec<[f64; 2]>>,
}

impl LaneConfig {
    fn geometry(&self) -> Result<PathGeometry, CircuitError> {
        match (&self.path, &self.points) {
            (Some(data), None) => PathGeometry::from_svg_path(data),
            (None, Some(points)) => {
                PathGeometry::from_points(points.iter().map(|p| Vec2::new(p[0], p[1])).collect())
            }
            _ => Err(CircuitError::DegeneratePath(
                "lane needs exactly one of `path` or `points`".to_string(),
            )),
        }
    }
}

/// A scripted operator action, applied by the driver when simulated time reaches `at_s`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScenarioEvent {
    InjectBubble {
        at_s: f64,
    },
    ResetAlarm {
        at_s: f64,
    },
    SetControls {
        at_s: f64,
        #[serde(default)]
        flow_rate: Option<f64>,
        #[serde(default)]
        speed: Option<f64>,
        #[serde(default)]
        oxygenation: Option<f64>,
        /// Clear particles and spawn accumulators, as a full restart does. The alarm is kept.
        #[serde(default)]
        restart: bool,
    },
    Stop {
        at_s: f64,
    },
    Start {
        at_s: f64,
    },
    Restart {
        at_s: f64,
        #[serde(default)]
        clear_alarm: bool,
    },
}

impl ScenarioEvent {
    pub fn at_s(&self) -> f64 {
        match self {
            ScenarioEvent::InjectBubble { at_s }
            | ScenarioEvent::ResetAlarm { at_s }
            | ScenarioEvent::SetControls { at_s, .. }
            | ScenarioEvent::Stop { at_s }
            | ScenarioEvent::Start { at_s }
            | ScenarioEvent::Restart { at_s, .. } => *at_s,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioEvent::InjectBubble { .. } => "inject_bubble",
            ScenarioEvent::ResetAlarm { .. } => "reset_alarm",
            ScenarioEvent::SetControls { .. } => "set_controls",
            ScenarioEvent::Stop { .. } => "stop",
            ScenarioEvent::Start { .. } => "start",
            ScenarioEvent::Restart { .. } => "restart",
        }
    }
}

// Configuration for output settings
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    pub save_snapshots: bool,
    pub save_positions: bool,
    #[serde(default)]
    pub save_event_log: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
}

// Main configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CircuitConfig {
    pub view: ViewConfig,
    pub timing: TimingConfig,
    #[serde(default)]
    pub controls: ControlSettings,
    pub sensor: SensorConfig,
    pub lanes: Vec<LaneConfig>,
    #[serde(default)]
    pub events: Vec<ScenarioEvent>,
    pub output: OutputConfig,
}

impl CircuitConfig {
    /// Loads the circuit configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))
    }

    /// Parses and validates configuration text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: CircuitConfig = toml::from_str(text)?;

        if !(config.view.width > 0.0 && config.view.height > 0.0) {
            anyhow::bail!("view width and height must be positive.");
        }
        if !(config.timing.frame_dt_s > 0.0) {
            anyhow::bail!("frame_dt_s must be positive.");
        }
        if !(config.timing.total_time_s > 0.0) {
            anyhow::bail!("total_time_s must be positive.");
        }
        if !(config.timing.record_interval_s >= 0.0) {
            anyhow::bail!("record_interval_s must not be negative.");
        }
        if !(config.timing.frame_jitter_s >= 0.0) {
            anyhow::bail!("frame_jitter_s must not be negative.");
        }
        if config.lanes.is_empty() {
            anyhow::bail!("at least one [[lanes]] entry is required.");
        }
        if let Some(event) = config.events.iter().find(|e| !(e.at_s() >= 0.0)) {
            anyhow::bail!("event '{}' has an invalid time {}.", event.name(), event.at_s());
        }

        Ok(config)
    }

    /// Turns the lane and sensor descriptions into engine geometry.
    /// A venous main lane and an arterial lane are both required.
    pub fn build_layout(&self) -> Result<CircuitLayout, CircuitError> {
        let mut layout = CircuitLayout::new(self.sensor.to_sensor()?);
        let mut decorative_count: usize = 0;

        for lane_cfg in &self.lanes {
            let lane = match lane_cfg.kind {
                LaneKind::VenousMain => Lane::VenousMain,
                LaneKind::Arterial => Lane::ArterialLine,
                LaneKind::VenousDecorative => {
                    let index = u8::try_from(decorative_count).map_err(|_| CircuitError::DegenerateGeometry {
                        lane: Lane::VenousDecorative(u8::MAX),
                        reason: format!("too many decorative lanes ({})", decorative_count + 1),
                    })?;
                    decorative_count += 1;
                    Lane::VenousDecorative(index)
                }
            };
            let geometry = lane_cfg.geometry().map_err(|e| match e {
                CircuitError::DegeneratePath(reason) => CircuitError::DegenerateGeometry { lane, reason },
                other => other,
            })?;
            log::debug!(
                "Lane '{}' ({}) has {} vertices, length {:.2}.",
                lane_cfg.name,
                lane,
                geometry.vertices().len(),
                geometry.total_length()
            );
            layout.insert_lane(lane, &lane_cfg.name, geometry)?;
        }

        for required in [Lane::VenousMain, Lane::ArterialLine] {
            if layout.geometry(required).is_none() {
                return Err(CircuitError::MissingGeometry(required));
            }
        }

        Ok(layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[view]
width = 100.0
height = 50.0

[timing]
frame_dt_s = 0.02
total_time_s = 5.0
record_interval_s = 0.1

[controls]
flow_rate = 5.0
speed = 0.3
oxygenation = 94.0

[sensor]
rect = { x = 10.0, y = 4.0, width = 6.0, height = 2.0 }

[[lanes]]
name = "venousLine1"
kind = "venous_main"
path = "m 0,0 50,0"

[[lanes]]
name = "venousLine2"
kind = "venous_decorative"
points = [[0.0, 10.0], [40.0, 10.0]]

[[lanes]]
name = "arterialLine"
kind = "arterial"
path = "M 50 0 H 0"

[[events]]
action = "inject_bubble"
at_s = 1.5

[[events]]
action = "set_controls"
at_s = 2.0
oxygenation = 88.0
restart = true

[output]
base_filename = "run"
save_snapshots = true
save_positions = false
format = "bincode"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = CircuitConfig::from_toml_str(BASE).unwrap();
        assert_eq!(config.controls.oxygenation, 94.0);
        assert!(config.timing.autostart);
        assert!(!config.output.save_event_log);
        assert_eq!(config.events.len(), 2);
        assert_eq!(config.events[0], ScenarioEvent::InjectBubble { at_s: 1.5 });
        assert_eq!(
            config.events[1],
            ScenarioEvent::SetControls {
                at_s: 2.0,
                flow_rate: None,
                speed: None,
                oxygenation: Some(88.0),
                restart: true,
            }
        );
    }

    #[test]
    fn test_build_layout_uses_rect_center() {
        let layout = CircuitConfig::from_toml_str(BASE).unwrap().build_layout().unwrap();
        assert_eq!(layout.sensor.center, Vec2::new(13.0, 5.0));
        assert_eq!(layout.sensor.radius, 3.0);
        assert_eq!(layout.lanes.len(), 3);
        assert_eq!(layout.decorative_lanes(), vec![Lane::VenousDecorative(0)]);
        assert_eq!(layout.lane_name(Lane::ArterialLine), "arterialLine");
        assert_eq!(layout.geometry(Lane::ArterialLine).unwrap().total_length(), 50.0);
    }

    #[test]
    fn test_missing_arterial_lane_is_fatal() {
        let text = BASE.replace("kind = \"arterial\"", "kind = \"venous_decorative\"");
        let err = CircuitConfig::from_toml_str(&text).unwrap().build_layout().unwrap_err();
        assert_eq!(err, CircuitError::MissingGeometry(Lane::ArterialLine));
    }

    #[test]
    fn test_duplicate_main_lane_is_fatal() {
        let text = BASE.replace("kind = \"venous_decorative\"", "kind = \"venous_main\"");
        let err = CircuitConfig::from_toml_str(&text).unwrap().build_layout().unwrap_err();
        assert_eq!(err, CircuitError::DuplicateLane(Lane::VenousMain));
    }

    #[test]
    fn test_zero_length_lane_names_the_lane() {
        let text = BASE.replace("path = \"m 0,0 50,0\"", "path = \"m 0,0 0,0\"");
        let err = CircuitConfig::from_toml_str(&text).unwrap().build_layout().unwrap_err();
        assert!(matches!(err, CircuitError::DegenerateGeometry { lane: Lane::VenousMain, .. }));
    }

    #[test]
    fn test_sensor_needs_exactly_one_form() {
        let text = BASE.replace(
            "rect = { x = 10.0, y = 4.0, width = 6.0, height = 2.0 }",
            "x = 1.0\nrect = { x = 10.0, y = 4.0, width = 6.0, height = 2.0 }",
        );
        let err = CircuitConfig::from_toml_str(&text).unwrap().build_layout().unwrap_err();
        assert!(matches!(err, CircuitError::InvalidSensor(_)));
    }

    #[test]
    fn test_timing_validation() {
        let text = BASE.replace("frame_dt_s = 0.02", "frame_dt_s = 0.0");
        assert!(CircuitConfig::from_toml_str(&text).is_err());
        let text = BASE.replace("at_s = 1.5", "at_s = -1.0");
        assert!(CircuitConfig::from_toml_str(&text).is_err());
    }

    #[test]
    fn test_controls_clamped_to_slider_ranges() {
        let wild = ControlSettings { flow_rate: 50.0, speed: 0.0, oxygenation: 70.0 };
        assert_eq!(wild.clamped(), ControlSettings { flow_rate: 20.0, speed: 0.1, oxygenation: 88.0 });
        let nan = ControlSettings { flow_rate: f64::NAN, speed: f64::INFINITY, oxygenation: 95.0 };
        assert_eq!(nan.clamped(), ControlSettings { flow_rate: 1.0, speed: 0.1, oxygenation: 95.0 });
        let fine = ControlSettings::default();
        assert_eq!(fine.clamped(), fine);
    }
}
