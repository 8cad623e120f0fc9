use crate::lane::Lane;
use thiserror::Error;

/// Setup-time configuration failures. Any of these prevents the simulation from starting.
#[derive(Debug, Error, PartialEq)]
pub enum CircuitError {
    #[error("no geometry configured for lane {0}")]
    MissingGeometry(Lane),

    #[error("degenerate geometry for lane {lane}: {reason}")]
    DegenerateGeometry { lane: Lane, reason: String },

    /// Raised by `PathGeometry` constructors, which do not know the lane. Configuration
    /// loading reports it as `DegenerateGeometry`.
    #[error("degenerate path: {0}")]
    DegeneratePath(String),

    #[error("lane {0} is configured more than once")]
    DuplicateLane(Lane),

    #[error("invalid path data at byte {position}: {message}")]
    PathSyntax { position: usize, message: String },

    #[error("invalid sensor definition: {0}")]
    InvalidSensor(String),
}
