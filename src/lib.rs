//! # trainz-autopilot
//!
//! Autonomous traffic control for a model-railway loop shared by one or two
//! trains. Each train carries a color sensor; colored tiles on the track
//! mark sector boundaries, stations and a level crossing. From the fixed
//! layout and the stream of detected colors the autopilot decides when each
//! train accelerates, slows down, stops at a station and yields to the other
//! train.
//!
//! ## Features
//!
//! - **Fixed topology**: sectors, stations and crossings in two travel cycles
//! - **Atomic reservations**: a sector or crossing is never held by two trains
//! - **Debounced signals**: repeated detections of one tile are dropped
//! - **Cancellable ramps**: sign-consistent power steps on a background task
//! - **Manual override**: operator commands always win over automation
//! - **Emergency stop**: one call stops and resets every train
//!
//! ## Architecture
//!
//! The crate is structured to allow testing on desktop without hardware:
//!
//! - `track` - Layout graph and the reference loop
//! - `reservation` - Sector and crossing ownership
//! - `filter` - Per-train, per-color debounce
//! - `power` / `drive` / `ramp` - From power index to motor writes
//! - `processor` - Per-train state machine actor
//! - `dispatcher` - Spawns trains, routes detections and commands
//! - `traits` - Hardware and status seams
//! - `hal` - Mock implementations for tests and simulation
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use trainz_autopilot::{
//!     Config, Dispatcher, OperatorCommand, TrainConfig, TrainSetup,
//!     hal::{MockHardware, MockStatusSink},
//!     track::standard_loop,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), trainz_autopilot::ControlError> {
//! let dispatcher = Dispatcher::new(Arc::new(standard_loop()), Config::default())?;
//! let hub = MockHardware::new();
//! let train = dispatcher.spawn_train(
//!     TrainSetup::new(TrainConfig::new(1, "cargo"), hub.clone()),
//!     Arc::new(MockStatusSink::new()),
//! )?;
//!
//! // Manual driving: one step up
//! dispatcher.command(train, OperatorCommand::IncreaseSpeed).await?;
//! assert_eq!(dispatcher.snapshot(train).await?.power_index, 1);
//!
//! dispatcher.emergency_stop().await;
//! assert_eq!(hub.last_power(), Some(0.0));
//! # dispatcher.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Operator commands.
pub mod commands;
/// Configuration with builder methods and JSON loading.
pub mod config;
/// Train actors, sensor filter and emergency stop.
pub mod dispatcher;
/// Serialized hardware access per engine.
pub mod drive;
/// Error types.
pub mod error;
/// Sensor detection debounce.
pub mod filter;
/// Hardware abstraction layer with mock implementations for testing.
pub mod hal;
/// Power index to motor power mapping.
pub mod power;
/// Per-train state machine.
pub mod processor;
/// Cancellable speed ramps.
pub mod ramp;
/// Sector and crossing reservations.
pub mod reservation;
/// Status reports.
pub mod status;
/// Cancellable timers and task slots.
pub mod timer;
/// Track topology.
pub mod track;
/// Train identity and state.
pub mod train;
/// Hardware and status traits.
pub mod traits;

// Re-exports for convenience
pub use commands::OperatorCommand;
pub use config::{
    Config, FilterConfig, PolicyConfig, PowerConfig, SpuriousSignalPolicy, TimingConfig,
    TrainConfig,
};
pub use dispatcher::Dispatcher;
pub use error::{ControlError, RampError, TrackError};
pub use filter::SensorEventFilter;
pub use power::{CurveShape, PowerCurve};
pub use processor::TrainSetup;
pub use ramp::{power_sequence, RampController};
pub use status::{ChannelStatusSink, StatusReport};
pub use track::{Color, SectorKind, SectorSpec, SubSector, Track, TrackBuilder, TravelDirection};
pub use train::{MotionState, TrainId, TrainKind, TrainSnapshot};
pub use traits::{LedColor, StatusSink, TrainHardware};
