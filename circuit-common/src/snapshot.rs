use crate::color::Rgb;
use crate::lane::Lane;
use serde::{Deserialize, Serialize};

/// Render output for one live particle: everything a renderer needs and nothing more.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderParticle {
    pub id: u64,
    pub lane: Lane,
    pub x: f64,
    pub y: f64,
    pub color: Rgb,
    pub is_bubble: bool,
}

/// A recorded frame of the circuit at a specific simulated time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Simulated time in seconds since the run began.
    pub time: f64,
    /// Whether the bubble alarm was latched at this frame.
    pub alarm: bool,
    /// Whether the simulation was running (a stopped circuit renders empty).
    pub running: bool,
    /// Live particles, in store order.
    pub particles: Vec<RenderParticle>,
}

impl Snapshot {
    pub fn count_in(&self, lane: Lane) -> usize {
        self.particles.iter().filter(|p| p.lane == lane).count()
    }
}
