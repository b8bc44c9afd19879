//! Cancellable, sign-consistent speed ramps.
//!
//! A ramp walks the power index one step at a time from its current value
//! to a target, spacing the steps evenly over the requested duration. The
//! steps run on a background task owned by the [`RampController`]; starting
//! a new ramp, stopping or setting a value first aborts that task and waits
//! for it, so two ramps never race on the same motor.
//!
//! # Sign law
//!
//! The power index sign is the motor's rotation direction. A ramp may start
//! or end at zero, but it never flips the sign: when both endpoints are
//! non-zero they must agree, otherwise [`RampError::SignConflict`] is
//! returned and nothing is written.
//!
//! ```rust
//! use trainz_autopilot::ramp::power_sequence;
//!
//! assert_eq!(power_sequence(6, 1).unwrap(), vec![6, 5, 4, 3, 2, 1]);
//! assert_eq!(power_sequence(-6, 0).unwrap(), vec![-6, -5, -4, -3, -2, -1, 0]);
//! assert_eq!(power_sequence(0, -3).unwrap(), vec![0, -1, -2, -3]);
//! assert_eq!(power_sequence(3, 3).unwrap(), vec![3]);
//! assert!(power_sequence(2, -2).is_err());
//! ```
//!
//! # Secondary engine
//!
//! A compound train couples a second engine that faces the other way. Every
//! step written to the primary engine is mirrored to the secondary at the
//! negated index.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::drive::Drive;
use crate::error::{ControlError, RampError};
use crate::power::MAX_POWER_INDEX;
use crate::timer::TaskSlot;
use crate::traits::TrainHardware;

/// Power-index steps from `current` to `target`, both ends included.
pub fn power_sequence(current: i8, target: i8) -> Result<Vec<i8>, RampError> {
    if !(-MAX_POWER_INDEX..=MAX_POWER_INDEX).contains(&target) {
        return Err(RampError::OutOfRange(target));
    }
    if current != 0 && target != 0 && current.signum() != target.signum() {
        return Err(RampError::SignConflict { current, target });
    }
    let sign = if current != 0 {
        current.signum()
    } else {
        target.signum()
    };
    let from = current.unsigned_abs();
    let to = target.unsigned_abs();
    let magnitudes: Vec<u8> = if from <= to {
        (from..=to).collect()
    } else {
        (to..=from).rev().collect()
    };
    // Magnitudes never exceed 10 here once `target` is in range; a larger
    // `current` is clamped by the power curve on write.
    Ok(magnitudes
        .into_iter()
        .map(|m| sign * m.min(i8::MAX as u8) as i8)
        .collect())
}

/// Owner of a train's ramp task.
pub struct RampController<H> {
    primary: Drive<H>,
    secondary: Option<Drive<H>>,
    task: TaskSlot,
    target: Option<i8>,
    faults: mpsc::UnboundedSender<ControlError>,
}

impl<H> RampController<H>
where
    H: TrainHardware + Send + 'static,
{
    /// Create a controller. Hardware failures inside a background ramp are
    /// reported on `faults`.
    pub fn new(
        primary: Drive<H>,
        secondary: Option<Drive<H>>,
        faults: mpsc::UnboundedSender<ControlError>,
    ) -> Self {
        Self {
            primary,
            secondary,
            task: TaskSlot::new(),
            target: None,
            faults,
        }
    }

    /// Primary engine.
    pub fn primary(&self) -> &Drive<H> {
        &self.primary
    }

    /// Current power index of the primary engine.
    pub fn power_index(&self) -> i8 {
        self.primary.power_index()
    }

    /// Target of the running ramp.
    pub fn target(&self) -> Option<i8> {
        if self.task.is_active() {
            self.target
        } else {
            None
        }
    }

    /// True while a ramp task is running.
    pub fn is_active(&self) -> bool {
        self.task.is_active()
    }

    /// Ramp from the current index to `target` over `duration`.
    ///
    /// Cancels any running ramp first. A single-step ramp (target equal to
    /// current) is written immediately with no delay.
    pub async fn ramp(&mut self, target: i8, duration: Duration) -> Result<(), ControlError> {
        self.cancel().await;
        let steps = power_sequence(self.power_index(), target)?;
        if steps.len() == 1 {
            return self.write(target).await;
        }

        let step_delay = duration / steps.len() as u32;
        debug!(train = %self.primary.train(), from = steps[0], to = target, ?step_delay, "ramp");
        let primary = self.primary.clone();
        let secondary = self.secondary.clone();
        let faults = self.faults.clone();
        self.target = Some(target);
        self.task
            .replace(async move {
                for (i, &index) in steps.iter().enumerate() {
                    if i > 0 {
                        tokio::time::sleep(step_delay).await;
                    }
                    if let Err(e) = apply_mirrored(&primary, secondary.as_ref(), index).await {
                        error!(train = %primary.train(), error = %e, "ramp aborted");
                        let _ = faults.send(e);
                        return;
                    }
                }
            })
            .await;
        Ok(())
    }

    /// Abort the running ramp, leaving the motor at its last step.
    pub async fn cancel(&mut self) {
        self.task.cancel().await;
        self.target = None;
    }

    /// Cancel any ramp and stop immediately.
    pub async fn stop(&mut self) -> Result<(), ControlError> {
        self.cancel().await;
        self.write(0).await
    }

    /// Cancel any ramp and write `index` immediately.
    ///
    /// Used for single manual steps, which may cross zero one index at a
    /// time.
    pub async fn set(&mut self, index: i8) -> Result<(), ControlError> {
        if !(-MAX_POWER_INDEX..=MAX_POWER_INDEX).contains(&index) {
            return Err(RampError::OutOfRange(index).into());
        }
        self.cancel().await;
        self.write(index).await
    }

    /// Best-effort stop of both engines, ignoring hardware errors.
    pub async fn force_stop(&mut self) {
        self.cancel().await;
        self.primary.force_stop().await;
        if let Some(secondary) = &self.secondary {
            secondary.force_stop().await;
        }
    }

    async fn write(&self, index: i8) -> Result<(), ControlError> {
        apply_mirrored(&self.primary, self.secondary.as_ref(), index).await
    }
}

async fn apply_mirrored<H>(
    primary: &Drive<H>,
    secondary: Option<&Drive<H>>,
    index: i8,
) -> Result<(), ControlError>
where
    H: TrainHardware + Send + 'static,
{
    let result = primary.apply(index).await;
    if let Some(secondary) = secondary {
        match &result {
            Ok(()) => {
                if let Err(e) = secondary.apply(-index).await {
                    primary.force_stop().await;
                    return Err(e);
                }
            }
            Err(_) => secondary.force_stop().await,
        }
    } else if result.is_err() {
        primary.force_stop().await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::DriveSettings;
    use crate::hal::MockHardware;
    use crate::power::PowerCurve;
    use crate::train::TrainId;

    fn controller(
        hw: &MockHardware,
        secondary: Option<&MockHardware>,
    ) -> (
        RampController<MockHardware>,
        mpsc::UnboundedReceiver<ControlError>,
    ) {
        let settings = DriveSettings {
            curve: PowerCurve::linear(),
            ..DriveSettings::default()
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let primary = Drive::new(TrainId::new(1), hw.clone(), settings);
        let secondary = secondary.map(|s| Drive::new(TrainId::new(1), s.clone(), settings));
        (RampController::new(primary, secondary, tx), rx)
    }

    fn tenths(powers: &[f32]) -> Vec<i32> {
        powers.iter().map(|p| (p * 10.0).round() as i32).collect()
    }

    #[test]
    fn sequence_examples() {
        assert_eq!(power_sequence(6, 1).unwrap(), vec![6, 5, 4, 3, 2, 1]);
        assert_eq!(power_sequence(-6, 0).unwrap(), vec![-6, -5, -4, -3, -2, -1, 0]);
        assert_eq!(power_sequence(0, -6).unwrap(), vec![0, -1, -2, -3, -4, -5, -6]);
        assert_eq!(power_sequence(3, 3).unwrap(), vec![3]);
        assert_eq!(power_sequence(0, 0).unwrap(), vec![0]);
    }

    #[test]
    fn sign_conflict_is_rejected() {
        assert_eq!(
            power_sequence(4, -1),
            Err(RampError::SignConflict {
                current: 4,
                target: -1
            })
        );
    }

    #[test]
    fn out_of_range_target_is_rejected() {
        assert_eq!(power_sequence(0, 11), Err(RampError::OutOfRange(11)));
        assert_eq!(power_sequence(0, -11), Err(RampError::OutOfRange(-11)));
    }

    #[tokio::test(start_paused = true)]
    async fn ramp_spaces_steps_over_duration() {
        let hw = MockHardware::new();
        let (mut ramp, _faults) = controller(&hw, None);

        ramp.ramp(4, Duration::from_millis(1000)).await.unwrap();
        assert!(ramp.is_active());
        assert_eq!(ramp.target(), Some(4));

        // 5 steps, 200 ms apart: 0 at t=0, 1 at 200, 2 at 400.
        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(tenths(&hw.powers()), vec![0, 1, 2]);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(tenths(&hw.powers()), vec![0, 1, 2, 3, 4]);
        assert_eq!(ramp.power_index(), 4);
        assert!(!ramp.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn degenerate_ramp_applies_once_without_task() {
        let hw = MockHardware::new();
        let (mut ramp, _faults) = controller(&hw, None);
        ramp.ramp(0, Duration::from_secs(5)).await.unwrap();
        assert!(!ramp.is_active());
        assert_eq!(hw.powers(), vec![0.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn new_ramp_cancels_old_one() {
        let hw = MockHardware::new();
        let (mut ramp, _faults) = controller(&hw, None);
        ramp.ramp(8, Duration::from_millis(900)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(ramp.power_index(), 2);

        ramp.ramp(0, Duration::from_millis(300)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(tenths(&hw.powers()), vec![0, 1, 2, 2, 1, 0]);
        assert_eq!(ramp.power_index(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sign_conflict_leaves_motor_untouched() {
        let hw = MockHardware::new();
        let (mut ramp, _faults) = controller(&hw, None);
        ramp.set(3).await.unwrap();
        let err = ramp.ramp(-3, Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, ControlError::Ramp(RampError::SignConflict { .. })));
        assert_eq!(ramp.power_index(), 3);
        assert_eq!(hw.powers().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn secondary_mirrors_negated() {
        let hw = MockHardware::new();
        let second = MockHardware::new();
        let (mut ramp, _faults) = controller(&hw, Some(&second));
        ramp.ramp(2, Duration::from_millis(300)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        ramp.stop().await.unwrap();
        assert_eq!(tenths(&hw.powers()), vec![0, 1, 2, 0]);
        assert_eq!(tenths(&second.powers()), vec![0, -1, -2, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn hardware_failure_aborts_ramp_and_reports() {
        let hw = MockHardware::new();
        let (mut ramp, mut faults) = controller(&hw, None);
        ramp.ramp(5, Duration::from_millis(500)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        hw.set_failing(true);

        let fault = faults.recv().await.unwrap();
        assert!(matches!(fault, ControlError::Hardware { .. }));
        assert_eq!(ramp.power_index(), 0);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!ramp.is_active());
    }
}
