//! Serialized access to one engine's hardware.
//!
//! A [`Drive`] is the single write path to a physical hub. It owns the
//! [`TrainHardware`] behind an async mutex, so the ramp task, the train actor
//! and status telemetry never write to the same transport concurrently.
//! Each engine has its own lock; two trains never wait on each other here.
//!
//! Besides motor power the drive keeps the hub LED and headlight in step
//! with motion: the LED shows the moving color while the power index is
//! non-zero and the stopped color at zero, and the headlight switches
//! between full and dimmed. Both are written only on a change. After a stop
//! the LED and headlight keep their moving state for
//! [`DriveSettings::led_delay`] and [`DriveSettings::dim_delay`], so a short
//! halt at a crossing does not flood the hub with writes.

use std::fmt::Debug;
use std::sync::atomic::{AtomicI8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ControlError;
use crate::power::PowerCurve;
use crate::train::TrainId;
use crate::traits::{LedColor, TrainHardware};

/// Headlight brightness while moving.
pub const HEADLIGHT_ON: u8 = 100;
/// Headlight brightness while stopped.
pub const HEADLIGHT_DIMMED: u8 = 10;

/// Per-engine drive settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DriveSettings {
    /// Index-to-power mapping.
    pub curve: PowerCurve,
    /// Extra attempts after a failed write.
    pub retries: u8,
    /// LED color while moving.
    pub moving_led: LedColor,
    /// LED color while stopped.
    pub stopped_led: LedColor,
    /// Drive the headlight.
    pub headlight: bool,
    /// Delay before the LED shows the stopped color.
    pub led_delay: Duration,
    /// Delay before the headlight dims.
    pub dim_delay: Duration,
}

impl Default for DriveSettings {
    fn default() -> Self {
        Self {
            curve: PowerCurve::default(),
            retries: 1,
            moving_led: LedColor::Green,
            stopped_led: LedColor::Red,
            headlight: false,
            led_delay: Duration::ZERO,
            dim_delay: Duration::ZERO,
        }
    }
}

/// Telemetry read from the hub.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Telemetry {
    /// Battery voltage.
    pub voltage: Option<f32>,
    /// Motor current in milliamps.
    pub current_ma: Option<u32>,
}

struct Engine<H> {
    hardware: H,
    moving: Option<bool>,
    headlight: Option<u8>,
    pending_led: Option<JoinHandle<()>>,
    pending_dim: Option<JoinHandle<()>>,
}

impl<H> Engine<H> {
    fn cancel_pending(&mut self) {
        for task in [self.pending_led.take(), self.pending_dim.take()].into_iter().flatten() {
            task.abort();
        }
    }
}

struct Inner<H> {
    train: TrainId,
    engine: Mutex<Engine<H>>,
    power_index: AtomicI8,
    settings: DriveSettings,
}

impl<H: TrainHardware> Inner<H> {
    fn write_led(&self, engine: &mut Engine<H>, moving: bool) {
        let color = if moving {
            self.settings.moving_led
        } else {
            self.settings.stopped_led
        };
        match with_retries(self.settings.retries, || engine.hardware.set_led(color)) {
            Ok(()) => engine.moving = Some(moving),
            Err(e) => warn!(train = %self.train, error = ?e, "set_led failed"),
        }
    }

    fn write_headlight(&self, engine: &mut Engine<H>, brightness: u8) {
        match with_retries(self.settings.retries, || engine.hardware.set_headlight(brightness)) {
            Ok(()) => engine.headlight = Some(brightness),
            Err(e) => warn!(train = %self.train, error = ?e, "set_headlight failed"),
        }
    }
}

/// Shared handle to one engine.
pub struct Drive<H> {
    inner: Arc<Inner<H>>,
}

impl<H> Clone for Drive<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<H> Debug for Drive<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drive")
            .field("train", &self.inner.train)
            .field("power_index", &self.inner.power_index.load(Ordering::SeqCst))
            .finish()
    }
}

fn with_retries<T, E: Debug>(retries: u8, mut op: impl FnMut() -> Result<T, E>) -> Result<T, E> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < retries => {
                attempt += 1;
                debug!(attempt, error = ?e, "hardware write failed, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

impl<H> Drive<H>
where
    H: TrainHardware + Send + 'static,
{
    /// Wrap the hardware of train `train`.
    pub fn new(train: TrainId, hardware: H, settings: DriveSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                train,
                engine: Mutex::new(Engine {
                    hardware,
                    moving: None,
                    headlight: None,
                    pending_led: None,
                    pending_dim: None,
                }),
                power_index: AtomicI8::new(0),
                settings,
            }),
        }
    }

    /// Train this engine belongs to.
    pub fn train(&self) -> TrainId {
        self.inner.train
    }

    /// Last power index successfully written.
    pub fn power_index(&self) -> i8 {
        self.inner.power_index.load(Ordering::SeqCst)
    }

    /// Normalized power for the current index.
    pub fn power(&self) -> f32 {
        self.inner.settings.curve.power(self.power_index())
    }

    /// Write a power index to the motor, then update LED and headlight.
    ///
    /// A write that still fails after the configured retries leaves the
    /// motor in an unknown state: a best-effort stop is issued and
    /// [`ControlError::Hardware`] returned.
    pub async fn apply(&self, index: i8) -> Result<(), ControlError> {
        let settings = self.inner.settings;
        let mut engine = self.inner.engine.lock().await;

        let power = settings.curve.power(index);
        if let Err(e) = with_retries(settings.retries, || engine.hardware.set_power(power)) {
            let message = format!("{e:?}");
            warn!(train = %self.inner.train, index, error = %message, "set_power failed");
            let _ = engine.hardware.stop();
            engine.cancel_pending();
            engine.moving = None;
            self.inner.power_index.store(0, Ordering::SeqCst);
            return Err(ControlError::Hardware {
                train: self.inner.train,
                message,
            });
        }
        self.inner.power_index.store(index, Ordering::SeqCst);

        if index != 0 {
            engine.cancel_pending();
            if engine.moving != Some(true) {
                self.inner.write_led(&mut engine, true);
            }
            if settings.headlight && engine.headlight != Some(HEADLIGHT_ON) {
                self.inner.write_headlight(&mut engine, HEADLIGHT_ON);
            }
            return Ok(());
        }

        if engine.moving != Some(false) && engine.pending_led.is_none() {
            if settings.led_delay.is_zero() {
                self.inner.write_led(&mut engine, false);
            } else {
                engine.pending_led = Some(self.later(settings.led_delay, |inner, engine| {
                    engine.pending_led = None;
                    inner.write_led(engine, false);
                }));
            }
        }
        if settings.headlight
            && engine.headlight != Some(HEADLIGHT_DIMMED)
            && engine.pending_dim.is_none()
        {
            if settings.dim_delay.is_zero() {
                self.inner.write_headlight(&mut engine, HEADLIGHT_DIMMED);
            } else {
                engine.pending_dim = Some(self.later(settings.dim_delay, |inner, engine| {
                    engine.pending_dim = None;
                    inner.write_headlight(engine, HEADLIGHT_DIMMED);
                }));
            }
        }
        Ok(())
    }

    /// Run `update` on the engine after `delay`, unless aborted first.
    fn later(
        &self,
        delay: Duration,
        update: impl FnOnce(&Inner<H>, &mut Engine<H>) + Send + 'static,
    ) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut engine = inner.engine.lock().await;
            update(&inner, &mut engine);
        })
    }

    /// Stop the motor, ignoring errors.
    pub async fn force_stop(&self) {
        let mut engine = self.inner.engine.lock().await;
        if let Err(e) = engine.hardware.stop() {
            warn!(train = %self.inner.train, error = ?e, "best-effort stop failed");
        }
        self.inner.power_index.store(0, Ordering::SeqCst);
    }

    /// Read voltage and current. Read errors are reported as missing values.
    pub async fn telemetry(&self) -> Telemetry {
        let engine = self.inner.engine.lock().await;
        Telemetry {
            voltage: engine.hardware.read_voltage().ok().flatten(),
            current_ma: engine.hardware.read_current_ma().ok().flatten(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockHardware;

    fn drive(hw: MockHardware, headlight: bool) -> Drive<MockHardware> {
        Drive::new(
            TrainId::new(1),
            hw,
            DriveSettings {
                headlight,
                ..DriveSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn apply_maps_index_through_curve() {
        let hw = MockHardware::new();
        let d = drive(hw.clone(), false);
        d.apply(5).await.unwrap();
        assert_eq!(d.power_index(), 5);
        assert_eq!(hw.last_power(), Some(0.5));
        d.apply(-1).await.unwrap();
        assert_eq!(hw.last_power(), Some(-0.30));
    }

    #[tokio::test]
    async fn led_written_only_on_transitions() {
        let hw = MockHardware::new();
        let d = drive(hw.clone(), false);
        for index in [1, 2, 3, 2, 0, 0, 1] {
            d.apply(index).await.unwrap();
        }
        assert_eq!(
            hw.leds(),
            vec![LedColor::Green, LedColor::Red, LedColor::Green]
        );
    }

    #[tokio::test]
    async fn headlight_follows_motion() {
        let hw = MockHardware::new();
        let d = drive(hw.clone(), true);
        d.apply(0).await.unwrap();
        d.apply(3).await.unwrap();
        d.apply(4).await.unwrap();
        d.apply(0).await.unwrap();
        assert_eq!(hw.headlights(), vec![HEADLIGHT_DIMMED, HEADLIGHT_ON, HEADLIGHT_DIMMED]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_indicators_follow_after_delay() {
        let hw = MockHardware::new();
        let d = Drive::new(
            TrainId::new(1),
            hw.clone(),
            DriveSettings {
                headlight: true,
                led_delay: Duration::from_secs(2),
                dim_delay: Duration::from_secs(5),
                ..DriveSettings::default()
            },
        );
        d.apply(3).await.unwrap();
        d.apply(0).await.unwrap();
        d.apply(0).await.unwrap();
        assert_eq!(hw.leds(), vec![LedColor::Green]);
        assert_eq!(hw.headlights(), vec![HEADLIGHT_ON]);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(hw.leds(), vec![LedColor::Green, LedColor::Red]);
        assert_eq!(hw.headlights(), vec![HEADLIGHT_ON]);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(hw.headlights(), vec![HEADLIGHT_ON, HEADLIGHT_DIMMED]);
    }

    #[tokio::test(start_paused = true)]
    async fn moving_again_cancels_pending_indicators() {
        let hw = MockHardware::new();
        let d = Drive::new(
            TrainId::new(1),
            hw.clone(),
            DriveSettings {
                headlight: true,
                led_delay: Duration::from_secs(2),
                dim_delay: Duration::from_secs(5),
                ..DriveSettings::default()
            },
        );
        d.apply(3).await.unwrap();
        d.apply(0).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        d.apply(2).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(hw.leds(), vec![LedColor::Green]);
        assert_eq!(hw.headlights(), vec![HEADLIGHT_ON]);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let hw = MockHardware::new();
        hw.fail_next_writes(1);
        let d = drive(hw.clone(), false);
        d.apply(4).await.unwrap();
        assert_eq!(d.power_index(), 4);
    }

    #[tokio::test]
    async fn persistent_failure_stops_motor() {
        let hw = MockHardware::new();
        let d = drive(hw.clone(), false);
        d.apply(4).await.unwrap();
        hw.set_failing(true);
        let err = d.apply(5).await.unwrap_err();
        assert!(matches!(err, ControlError::Hardware { .. }));
        assert_eq!(d.power_index(), 0);
    }

    #[tokio::test]
    async fn telemetry_reads_hub() {
        let hw = MockHardware::new().with_telemetry(7.9, 120);
        let d = drive(hw, false);
        let t = d.telemetry().await;
        assert_eq!(t.voltage, Some(7.9));
        assert_eq!(t.current_ma, Some(120));
    }
}
