//! Mock implementations for testing without hardware.
//!
//! These test doubles let the whole autopilot run on a desktop: the train
//! actors drive [`MockHardware`] hubs and publish into a [`MockStatusSink`].
//!
//! # Available Mocks
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockHardware`] | [`TrainHardware`] | Records power/LED/headlight writes, injects failures |
//! | [`MockStatusSink`] | [`StatusSink`] | Collects status reports |
//!
//! Both mocks are cheap handles over shared state: keep a clone in the test
//! and hand the other to the code under test.
//!
//! # Example
//!
//! ```rust
//! use trainz_autopilot::hal::MockHardware;
//! use trainz_autopilot::traits::TrainHardware;
//!
//! let recorder = MockHardware::new();
//! let mut hub = recorder.clone();
//! hub.set_power(0.4).unwrap();
//! hub.stop().unwrap();
//!
//! assert_eq!(recorder.powers(), vec![0.4, 0.0]);
//! ```
//!
//! [`TrainHardware`]: crate::traits::TrainHardware
//! [`StatusSink`]: crate::traits::StatusSink

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::status::StatusReport;
use crate::traits::{LedColor, StatusSink, TrainHardware};

// ============================================================================
// Hardware Mock
// ============================================================================

/// Error returned by a failing [`MockHardware`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MockHardwareError;

#[derive(Debug, Default)]
struct Recorder {
    powers: Vec<f32>,
    leds: Vec<LedColor>,
    headlights: Vec<u8>,
    voltage: Option<f32>,
    current_ma: Option<u32>,
    failing: bool,
    fail_next: usize,
}

impl Recorder {
    fn should_fail(&mut self) -> bool {
        if self.failing {
            return true;
        }
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return true;
        }
        false
    }
}

/// Mock train hub.
///
/// Every successful write is appended to a log that all clones share.
///
/// # Example
///
/// ```rust
/// use trainz_autopilot::hal::MockHardware;
/// use trainz_autopilot::traits::{LedColor, TrainHardware};
///
/// let mut hub = MockHardware::new();
/// hub.set_failing(true);
/// assert!(hub.set_power(0.5).is_err());
/// hub.set_failing(false);
/// hub.set_led(LedColor::Red).unwrap();
/// assert_eq!(hub.leds(), vec![LedColor::Red]);
/// ```
#[derive(Clone, Debug, Default)]
pub struct MockHardware {
    recorder: Arc<Mutex<Recorder>>,
}

impl MockHardware {
    /// Creates a new mock hub with an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report this voltage and current.
    pub fn with_telemetry(self, voltage: f32, current_ma: u32) -> Self {
        {
            let mut r = self.recorder();
            r.voltage = Some(voltage);
            r.current_ma = Some(current_ma);
        }
        self
    }

    fn recorder(&self) -> MutexGuard<'_, Recorder> {
        self.recorder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every write fail until switched off.
    pub fn set_failing(&self, failing: bool) {
        self.recorder().failing = failing;
    }

    /// Make the next `n` writes fail.
    pub fn fail_next_writes(&self, n: usize) {
        self.recorder().fail_next = n;
    }

    /// All motor powers written, in order.
    pub fn powers(&self) -> Vec<f32> {
        self.recorder().powers.clone()
    }

    /// Last motor power written.
    pub fn last_power(&self) -> Option<f32> {
        self.recorder().powers.last().copied()
    }

    /// All LED colors written, in order.
    pub fn leds(&self) -> Vec<LedColor> {
        self.recorder().leds.clone()
    }

    /// Last LED color written.
    pub fn last_led(&self) -> Option<LedColor> {
        self.recorder().leds.last().copied()
    }

    /// All headlight brightness values written, in order.
    pub fn headlights(&self) -> Vec<u8> {
        self.recorder().headlights.clone()
    }

    /// Forget the recorded writes.
    pub fn clear_log(&self) {
        let mut r = self.recorder();
        r.powers.clear();
        r.leds.clear();
        r.headlights.clear();
    }
}

impl TrainHardware for MockHardware {
    type Error = MockHardwareError;

    fn set_power(&mut self, power: f32) -> Result<(), MockHardwareError> {
        let mut r = self.recorder();
        if r.should_fail() {
            return Err(MockHardwareError);
        }
        r.powers.push(power);
        Ok(())
    }

    fn set_led(&mut self, color: LedColor) -> Result<(), MockHardwareError> {
        let mut r = self.recorder();
        if r.should_fail() {
            return Err(MockHardwareError);
        }
        r.leds.push(color);
        Ok(())
    }

    fn set_headlight(&mut self, brightness: u8) -> Result<(), MockHardwareError> {
        let mut r = self.recorder();
        if r.should_fail() {
            return Err(MockHardwareError);
        }
        r.headlights.push(brightness);
        Ok(())
    }

    fn read_voltage(&self) -> Result<Option<f32>, MockHardwareError> {
        Ok(self.recorder().voltage)
    }

    fn read_current_ma(&self) -> Result<Option<u32>, MockHardwareError> {
        Ok(self.recorder().current_ma)
    }
}

// ============================================================================
// Status Mock
// ============================================================================

/// Mock status sink that keeps every report.
#[derive(Clone, Debug, Default)]
pub struct MockStatusSink {
    reports: Arc<Mutex<Vec<StatusReport>>>,
}

impl MockStatusSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All reports received so far.
    pub fn reports(&self) -> Vec<StatusReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most recent report.
    pub fn last(&self) -> Option<StatusReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl StatusSink for MockStatusSink {
    fn report(&self, report: StatusReport) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_next_writes_counts_down() {
        let mut hub = MockHardware::new();
        hub.fail_next_writes(2);
        assert!(hub.set_power(0.3).is_err());
        assert!(hub.set_led(LedColor::Blue).is_err());
        assert!(hub.set_power(0.3).is_ok());
        assert_eq!(hub.powers(), vec![0.3]);
        assert!(hub.leds().is_empty());
    }

    #[test]
    fn clones_share_the_log() {
        let recorder = MockHardware::new();
        let mut hub = recorder.clone();
        hub.set_headlight(100).unwrap();
        assert_eq!(recorder.headlights(), vec![100]);
        recorder.clear_log();
        assert!(hub.headlights().is_empty());
    }
}
