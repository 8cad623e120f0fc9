use serde::{Deserialize, Serialize};
use std::fmt;

/// A named path a particle travels along. The set of lanes is fixed once the circuit is set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Lane {
    /// Venous return line that feeds the circuit onward into the arterial line.
    VenousMain,
    /// Purely visual venous line; particles vanish at its end. Numbered in configuration order.
    VenousDecorative(u8),
    /// Terminal transport segment, reachable only from `VenousMain`.
    ArterialLine,
}

impl Lane {
    pub fn is_decorative(&self) -> bool {
        matches!(self, Lane::VenousDecorative(_))
    }

    /// Lane a particle moves to when it reaches the end of this one. `None` means removal.
    pub fn successor(&self) -> Option<Lane> {
        match self {
            Lane::VenousMain => Some(Lane::ArterialLine),
            Lane::VenousDecorative(_) | Lane::ArterialLine => None,
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lane::VenousMain => write!(f, "venous_main"),
            Lane::VenousDecorative(index) => write!(f, "venous_decorative_{}", index),
            Lane::ArterialLine => write!(f, "arterial"),
        }
    }
}

/// Lane role as written in the configuration file.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LaneKind {
    VenousMain,
    VenousDecorative,
    Arterial,
}
