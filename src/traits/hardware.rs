//! Hardware abstraction for a train hub.
//!
//! The autopilot never talks to a radio link directly. Each physical train
//! is represented by a [`TrainHardware`] implementation that turns
//! normalized power and LED requests into whatever the hub transport needs.
//!
//! # Key Items
//!
//! | Item | Purpose |
//! |------|---------|
//! | [`TrainHardware`] | Motor power, hub LED, headlight, telemetry |
//! | [`LedColor`] | Colors the hub LED can show |
//!
//! Writes to one hub are serialized by the autopilot (see
//! [`Drive`](crate::drive::Drive)); implementations do not need their own
//! locking.
//!
//! # Example
//!
//! ```rust
//! use trainz_autopilot::traits::{LedColor, TrainHardware};
//! use trainz_autopilot::hal::MockHardware;
//!
//! let mut hub = MockHardware::new();
//! hub.set_power(0.5).unwrap();
//! hub.set_led(LedColor::Blue).unwrap();
//!
//! assert_eq!(hub.last_power(), Some(0.5));
//! assert_eq!(hub.last_led(), Some(LedColor::Blue));
//! ```

use core::fmt;

/// Colors the hub LED can display.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum LedColor {
    /// LED off.
    Off,
    /// Pink.
    Pink,
    /// Purple.
    Purple,
    /// Blue.
    #[default]
    Blue,
    /// Light blue.
    LightBlue,
    /// Cyan.
    Cyan,
    /// Green.
    Green,
    /// Yellow.
    Yellow,
    /// Orange.
    Orange,
    /// Red.
    Red,
    /// White.
    White,
}

/// A train hub: one motor port, a status LED and optional extras.
///
/// # Implementation Notes
///
/// - `set_power` receives a value in `[-1.0, 1.0]`; the sign selects the
///   rotation direction.
/// - Telemetry and headlight support are optional; the defaults report
///   nothing and ignore brightness requests.
///
/// # Example Implementation
///
/// ```rust,ignore
/// use trainz_autopilot::traits::{LedColor, TrainHardware};
///
/// struct BleHub { /* connection handle */ }
///
/// impl TrainHardware for BleHub {
///     type Error = std::io::Error;
///
///     fn set_power(&mut self, power: f32) -> Result<(), Self::Error> {
///         // write motor port A...
///         Ok(())
///     }
///
///     fn set_led(&mut self, color: LedColor) -> Result<(), Self::Error> {
///         // write hub LED...
///         Ok(())
///     }
/// }
/// ```
pub trait TrainHardware {
    /// Error type of the transport.
    type Error: fmt::Debug;

    /// Set motor power in `[-1.0, 1.0]`.
    fn set_power(&mut self, power: f32) -> Result<(), Self::Error>;

    /// Set the hub LED color.
    fn set_led(&mut self, color: LedColor) -> Result<(), Self::Error>;

    /// Set headlight brightness in percent.
    fn set_headlight(&mut self, brightness: u8) -> Result<(), Self::Error> {
        let _ = brightness;
        Ok(())
    }

    /// Battery voltage, if the hub reports it.
    fn read_voltage(&self) -> Result<Option<f32>, Self::Error> {
        Ok(None)
    }

    /// Motor current in milliamps, if the hub reports it.
    fn read_current_ma(&self) -> Result<Option<u32>, Self::Error> {
        Ok(None)
    }

    /// Convenience method to stop the motor.
    fn stop(&mut self) -> Result<(), Self::Error> {
        self.set_power(0.0)
    }
}
