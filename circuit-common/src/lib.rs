pub mod color;
pub mod config;
pub mod error;
pub mod geometry;
pub mod lane;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use color::{map_oxygenation, Rgb};
pub use config::{CircuitConfig, ControlSettings, LaneConfig, OutputConfig, ScenarioEvent, SensorConfig, TimingConfig, ViewConfig};
pub use error::CircuitError;
pub use geometry::{CircuitLayout, PathGeometry, Sensor};
pub use lane::{Lane, LaneKind};
pub use snapshot::{RenderParticle, Snapshot};
pub use vecmath::{clamp, Vec2};
