//! Train identity, capabilities and observable state.

use core::fmt;

use crate::track::{SectorId, SubSector, TravelDirection};

/// Identity of a train.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct TrainId(pub(crate) u8);

impl TrainId {
    /// Wrap a raw id.
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    /// Raw id.
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for TrainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capability flags of a train.
///
/// One state machine serves every variant; the flags only switch features
/// on or off.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TrainKind {
    /// The hub drives a headlight on its second port.
    pub has_headlight: bool,
    /// A color sensor is fitted, so the train can run automatically.
    pub has_sensor: bool,
    /// A second engine is coupled and mirrors every power write.
    pub is_compound: bool,
}

impl TrainKind {
    /// Hub with a motor only.
    pub const fn simple() -> Self {
        Self {
            has_headlight: false,
            has_sensor: false,
            is_compound: false,
        }
    }

    /// Hub with a color sensor.
    pub const fn smart() -> Self {
        Self {
            has_headlight: false,
            has_sensor: true,
            is_compound: false,
        }
    }

    /// Enable the headlight
    pub const fn with_headlight(mut self) -> Self {
        self.has_headlight = true;
        self
    }

    /// Mark as a two-engine consist
    pub const fn compound(mut self) -> Self {
        self.is_compound = true;
        self
    }
}

/// Conceptual motion state of a train.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MotionState {
    /// Under operator control; signals are ignored.
    Manual,
    /// Stopped at a station (dwelling or waiting to depart).
    AtStation,
    /// Inside a sector, within its post-entry blind window.
    JustEnteredSector,
    /// Inside a plain sector, or the FAST part of a structured one.
    InSectorFast,
    /// Inside the SLOW part of a structured sector.
    InSectorSlow,
    /// Between sectors.
    InterSector,
    /// Stopped until the next sector frees up.
    WaitingForSector,
    /// Stopped until the crossing frees up.
    WaitingForCrossing,
}

impl MotionState {
    /// Snake-case name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MotionState::Manual => "manual",
            MotionState::AtStation => "at_station",
            MotionState::JustEnteredSector => "just_entered_sector",
            MotionState::InSectorFast => "in_sector_fast",
            MotionState::InSectorSlow => "in_sector_slow",
            MotionState::InterSector => "inter_sector",
            MotionState::WaitingForSector => "waiting_for_sector",
            MotionState::WaitingForCrossing => "waiting_for_crossing",
        }
    }
}

/// Point-in-time view of a train.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainSnapshot {
    /// Train id.
    pub id: TrainId,
    /// Travel cycle.
    pub direction: TravelDirection,
    /// Derived motion state.
    pub state: MotionState,
    /// Sector the train is in, `None` in the gap.
    pub current_sector: Option<SectorId>,
    /// Last sector the train was in.
    pub previous_sector: SectorId,
    /// Part of a structured sector.
    pub sub_sector: SubSector,
    /// Signed power index.
    pub power_index: i8,
    /// Automatic mode.
    pub auto_mode: bool,
    /// Post-entry blind window active.
    pub just_entered_sector: bool,
    /// Post-restart blind window active.
    pub signal_blind: bool,
    /// Remaining dwell at a station, in milliseconds.
    pub dwell_remaining_ms: Option<u64>,
    /// Last hardware failure, if not yet cleared by a restart.
    pub fault: Option<String>,
}
