//! Error types for the autopilot core.

use thiserror::Error;

use crate::train::TrainId;

/// Errors raised while assembling a [`Track`](crate::track::Track).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackError {
    /// Two sectors were given the same name.
    #[error("duplicate sector name: {0}")]
    DuplicateSector(String),

    /// A sector has no successor for one of the travel directions.
    #[error("sector {sector} has no successor in direction {direction}")]
    MissingSuccessor {
        /// Name of the incomplete sector
        sector: String,
        /// Direction without a successor
        direction: &'static str,
    },

    /// A sector id or name does not exist in the layout.
    #[error("unknown sector: {0}")]
    UnknownSector(String),

    /// A crossing id does not exist in the layout.
    #[error("unknown crossing: {0}")]
    UnknownCrossing(usize),

    /// The layout has no station sector.
    #[error("layout has no station")]
    NoStation,
}

/// Errors raised when a ramp request breaks the power-index contract.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RampError {
    /// Current and target are both non-zero but point in opposite directions.
    #[error("power index sign conflict: current {current}, target {target}")]
    SignConflict {
        /// Power index when the ramp was requested
        current: i8,
        /// Requested target power index
        target: i8,
    },

    /// Target is outside the discrete power range.
    #[error("power index {0} outside [-10, 10]")]
    OutOfRange(i8),
}

/// Errors surfaced by train control operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// A ramp was rejected.
    #[error(transparent)]
    Ramp(#[from] RampError),

    /// Layout problem.
    #[error(transparent)]
    Track(#[from] TrackError),

    /// A hardware write failed after all retries; motor state is unknown.
    #[error("hardware write failed for train {train}: {message}")]
    Hardware {
        /// Train whose adapter failed
        train: TrainId,
        /// Adapter error, rendered with `Debug`
        message: String,
    },

    /// No train with this id is registered.
    #[error("unknown train: {0}")]
    UnknownTrain(TrainId),

    /// A train with this id is already registered.
    #[error("train already registered: {0}")]
    TrainExists(TrainId),

    /// Restart requested for a train without a color sensor.
    #[error("train {0} has no sensor and cannot drive automatically")]
    RestartUnsupported(TrainId),

    /// The train's actor task is gone.
    #[error("train {0} is not running")]
    TrainGone(TrainId),

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}
