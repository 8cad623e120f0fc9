use serde::{Deserialize, Serialize};
use std::fmt;

/// Oxygen saturation mapped to the darkest arterial red.
pub const MIN_OXYGENATION: f64 = 88.0;
/// Oxygen saturation mapped to the brightest arterial red.
pub const MAX_OXYGENATION: f64 = 100.0;

const DARK_RED: f64 = 120.0;
const BRIGHT_RED: f64 = 255.0;

/// An opaque 8-bit display color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Venous (deoxygenated) particles.
    pub const VENOUS: Rgb = Rgb::new(0, 0, 255);
    /// Air bubbles keep this marker color for their whole life.
    pub const BUBBLE: Rgb = Rgb::new(255, 255, 255);

    pub fn to_rgba(self) -> [u8; 4] {
        [self.r, self.g, self.b, 255]
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rgb({}, {}, {})", self.r, self.g, self.b)
    }
}

/// Maps arterial oxygen saturation (percent) to a red shade.
///
/// The input is clamped to [88, 100] so every value maps to a color; NaN maps like 88.
/// The red channel runs linearly from 120 at 88% to 255 at 100%, rounded half away from zero.
pub fn map_oxygenation(o2: f64) -> Rgb {
    let o2 = if o2.is_nan() { MIN_OXYGENATION } else { o2 };
    let t = ((o2 - MIN_OXYGENATION) / (MAX_OXYGENATION - MIN_OXYGENATION)).clamp(0.0, 1.0);
    let red = (DARK_RED + (BRIGHT_RED - DARK_RED) * t).round();
    Rgb::new(red as u8, 0, 0)
}
