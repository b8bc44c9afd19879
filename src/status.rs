//! Status reports and the channel-backed sink.
//!
//! After every processed event a train publishes one [`StatusReport`]. The
//! report is the only thing an external display or logger sees of the train.
//!
//! [`ChannelStatusSink`] forwards reports into a bounded tokio channel with
//! `try_send`. When the consumer falls behind, new reports are dropped and
//! counted; the control loop never waits on it.
//!
//! # Example
//!
//! ```rust
//! use trainz_autopilot::status::ChannelStatusSink;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (sink, mut reports) = ChannelStatusSink::channel(16);
//! assert_eq!(sink.dropped(), 0);
//! drop(sink);
//! assert!(reports.recv().await.is_none());
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::trace;

use crate::config::ShortString;
use crate::track::{Color, SubSector};
use crate::train::{MotionState, TrainId};
use crate::traits::StatusSink;

/// One-way snapshot of a train for displays.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatusReport {
    /// Train id.
    pub id: TrainId,
    /// Display name.
    pub name: ShortString,
    /// Battery voltage, if the hub reports it.
    pub voltage: Option<f32>,
    /// Motor current in milliamps, if the hub reports it.
    pub current_ma: Option<u32>,
    /// Signed power index.
    pub power_index: i8,
    /// Normalized power written to the motor.
    pub power: f32,
    /// Motion state.
    pub state: MotionState,
    /// Automatic mode.
    pub auto_mode: bool,
    /// Color of the sector the train is in.
    pub sector_color: Option<Color>,
    /// Sub-sector, for structured sectors only.
    pub sub_sector: Option<SubSector>,
    /// Last signal color seen by the train.
    pub signal: Option<Color>,
    /// Remaining station dwell in milliseconds.
    pub dwell_remaining_ms: Option<u64>,
    /// Last hardware fault.
    pub fault: Option<String>,
}

impl StatusReport {
    /// Sector text for a display line, e.g. `"BLUE (slow)"`.
    pub fn sector_text(&self) -> String {
        match (self.sector_color, self.sub_sector) {
            (None, _) => "-".to_string(),
            (Some(color), None) => color.to_string(),
            (Some(color), Some(SubSector::Fast)) => format!("{color} (fast)"),
            (Some(color), Some(SubSector::Slow)) => format!("{color} (slow)"),
        }
    }

    /// Serialize to a JSON string.
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Status sink backed by a bounded tokio channel.
#[derive(Debug)]
pub struct ChannelStatusSink {
    tx: mpsc::Sender<StatusReport>,
    dropped: AtomicU64,
}

impl ChannelStatusSink {
    /// Create a sink and the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StatusReport>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Number of reports dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl StatusSink for ChannelStatusSink {
    fn report(&self, report: StatusReport) {
        if let Err(e) = self.tx.try_send(report) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(reason = %e, "status report dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::short_string;

    fn report(power_index: i8) -> StatusReport {
        StatusReport {
            id: TrainId::new(1),
            name: short_string("cargo"),
            voltage: Some(8.1),
            current_ma: None,
            power_index,
            power: 0.0,
            state: MotionState::InterSector,
            auto_mode: true,
            sector_color: Some(Color::Blue),
            sub_sector: Some(SubSector::Slow),
            signal: Some(Color::Blue),
            dwell_remaining_ms: None,
            fault: None,
        }
    }

    #[test]
    fn full_channel_drops_without_blocking() {
        let (sink, mut rx) = ChannelStatusSink::channel(2);
        for i in 0..5 {
            sink.report(report(i));
        }
        assert_eq!(sink.dropped(), 3);
        assert_eq!(rx.try_recv().unwrap().power_index, 0);
        assert_eq!(rx.try_recv().unwrap().power_index, 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn sector_text_includes_sub_sector() {
        let mut r = report(0);
        assert_eq!(r.sector_text(), "BLUE (slow)");
        r.sub_sector = None;
        assert_eq!(r.sector_text(), "BLUE");
        r.sector_color = None;
        assert_eq!(r.sector_text(), "-");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn report_serializes_to_json() {
        let json = report(3).to_json().unwrap();
        assert!(json.contains("\"power_index\":3"));
        assert!(json.contains("\"sector_color\":\"blue\""));
        assert!(json.contains("\"state\":\"inter_sector\""));
    }
}
