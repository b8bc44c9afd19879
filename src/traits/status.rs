//! Status reporting seam.
//!
//! This module defines the [`StatusSink`] trait that receives one
//! [`StatusReport`] per processed train event. Sinks are one-way and
//! best-effort: a sink that cannot keep up drops reports instead of stalling
//! the control loop.

use crate::status::StatusReport;

/// Receiver of train status reports.
///
/// # Example
///
/// ```ignore
/// use trainz_autopilot::traits::StatusSink;
/// use trainz_autopilot::status::StatusReport;
///
/// struct Console;
///
/// impl StatusSink for Console {
///     fn report(&self, report: StatusReport) {
///         println!("{} {:?} power {}", report.name, report.state, report.power_index);
///     }
/// }
/// ```
pub trait StatusSink: Send + Sync {
    /// Deliver a report. Must not block.
    fn report(&self, report: StatusReport);
}
