//! Trait definitions for the hardware and status seams.
//!
//! # Submodules
//!
//! - `hardware`: motor power, hub LED, headlight and telemetry of one hub
//! - `status`: best-effort status report sink
//!
//! Mock implementations of both live in [`crate::hal::mock`].

pub mod hardware;
pub mod status;

pub use hardware::*;
pub use status::*;
