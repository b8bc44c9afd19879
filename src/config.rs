//! Configuration for the autopilot.
//!
//! Every tunable is here: debounce window, timing constants, power curve,
//! error policies and the trains on the layout. Each section has sensible
//! defaults and `with_*` builder methods; with the `serde` feature the whole
//! tree can be loaded from JSON, where every field is optional.
//!
//! # Example
//!
//! ```rust
//! use trainz_autopilot::config::{Config, FilterConfig, TimingConfig, TrainConfig};
//! use trainz_autopilot::track::TravelDirection;
//!
//! // Use defaults
//! let config = Config::default();
//! assert_eq!(config.filter.debounce_ms, 1000);
//!
//! // Or customize
//! let config = Config::default()
//!     .with_filter(FilterConfig::default().with_debounce_ms(400))
//!     .with_timing(TimingConfig::default().with_dwell_ms(2000, 4000))
//!     .with_train(TrainConfig::new(1, "cargo").with_direction(TravelDirection::B));
//! assert_eq!(config.trains.len(), 1);
//! ```

use std::time::Duration;

use heapless::String as HString;

use crate::error::ControlError;
use crate::power::{CurveShape, PowerCurve, MAX_POWER_INDEX};
use crate::track::TravelDirection;
use crate::train::{TrainId, TrainKind};
use crate::traits::LedColor;

/// Maximum length for short config strings (train and sector names)
pub const MAX_SHORT_STRING: usize = 32;

/// Type alias for short config strings
pub type ShortString = HString<MAX_SHORT_STRING>;

// ============================================================================
// Helper for creating heapless strings
// ============================================================================

/// Create a ShortString from a &str, truncating at a char boundary if too long
pub fn short_string(s: &str) -> ShortString {
    let mut hs = ShortString::new();
    for c in s.chars() {
        if hs.push(c).is_err() {
            break;
        }
    }
    hs
}

// ============================================================================
// Main Config
// ============================================================================

/// Complete autopilot configuration
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Sensor debounce
    pub filter: FilterConfig,
    /// Timing constants
    pub timing: TimingConfig,
    /// Power curve
    pub power: PowerConfig,
    /// Error policies
    pub policy: PolicyConfig,
    /// Trains on the layout
    pub trains: Vec<TrainConfig>,
}

impl Config {
    /// Set filter configuration
    pub fn with_filter(mut self, filter: FilterConfig) -> Self {
        self.filter = filter;
        self
    }

    /// Set timing configuration
    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Set power configuration
    pub fn with_power(mut self, power: PowerConfig) -> Self {
        self.power = power;
        self
    }

    /// Set policy configuration
    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    /// Add a train
    pub fn with_train(mut self, train: TrainConfig) -> Self {
        self.trains.push(train);
        self
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ControlError> {
        self.timing.validate()?;
        for (i, train) in self.trains.iter().enumerate() {
            if self.trains[..i].iter().any(|t| t.id == train.id) {
                return Err(ControlError::Config(format!(
                    "train id {} configured twice",
                    train.id
                )));
            }
        }
        Ok(())
    }

    /// Parse and validate a JSON document.
    ///
    /// ```rust
    /// use trainz_autopilot::config::Config;
    ///
    /// let config = Config::from_json(r#"{
    ///     "filter": { "debounce_ms": 500 },
    ///     "trains": [ { "id": 2, "name": "express", "direction": "B" } ]
    /// }"#).unwrap();
    ///
    /// assert_eq!(config.filter.debounce_ms, 500);
    /// assert_eq!(config.trains[0].name.as_str(), "express");
    /// assert_eq!(config.timing.dwell_min_ms, 2000);
    /// ```
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self, ControlError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ControlError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Filter Config
// ============================================================================

/// Sensor event filter configuration
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FilterConfig {
    /// Repeats of the same color for the same train within this window are dropped
    pub debounce_ms: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self { debounce_ms: 1000 }
    }
}

impl FilterConfig {
    /// Set the debounce window
    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }
}

// ============================================================================
// Timing Config
// ============================================================================

/// Timing constants of the train state machine
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TimingConfig {
    /// Signals are ignored for this long after a restart from standstill
    pub blind_after_restart_ms: u64,
    /// Shortest station dwell
    pub dwell_min_ms: u64,
    /// Longest station dwell
    pub dwell_max_ms: u64,
    /// Re-check interval while waiting for a sector or the crossing
    pub poll_interval_ms: u64,
    /// Braking time when stopping for a booked crossing
    pub crossing_brake_ms: u64,
    /// Duration of ordinary speed changes
    pub ramp_ms: u64,
    /// Power index reached when restarting from standstill
    pub restart_power: u8,
    /// Duration of the restart ramp
    pub restart_ramp_ms: u64,
    /// Give up waiting for a resource after this long (`None` waits forever)
    pub resource_wait_timeout_ms: Option<u64>,
    /// Extra attempts after a failed hardware write
    pub hardware_retries: u8,
    /// The hub LED changes to the stopped color this long after the motor stops
    pub stopped_led_delay_ms: u64,
    /// The headlight dims this long after the motor stops
    pub headlight_dim_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            blind_after_restart_ms: 700,
            dwell_min_ms: 2000,
            dwell_max_ms: 4000,
            poll_interval_ms: 500,
            crossing_brake_ms: 500,
            ramp_ms: 1000,
            restart_power: 3,
            restart_ramp_ms: 1200,
            resource_wait_timeout_ms: Some(60_000),
            hardware_retries: 1,
            stopped_led_delay_ms: 2000,
            headlight_dim_delay_ms: 5000,
        }
    }
}

impl TimingConfig {
    /// Set the post-restart blind window
    pub fn with_blind_after_restart_ms(mut self, ms: u64) -> Self {
        self.blind_after_restart_ms = ms;
        self
    }

    /// Set the dwell range
    pub fn with_dwell_ms(mut self, min: u64, max: u64) -> Self {
        self.dwell_min_ms = min;
        self.dwell_max_ms = max;
        self
    }

    /// Set the resource poll interval
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the crossing braking time
    pub fn with_crossing_brake_ms(mut self, ms: u64) -> Self {
        self.crossing_brake_ms = ms;
        self
    }

    /// Set the ordinary ramp duration
    pub fn with_ramp_ms(mut self, ms: u64) -> Self {
        self.ramp_ms = ms;
        self
    }

    /// Set the restart power and ramp duration
    pub fn with_restart(mut self, power: u8, ramp_ms: u64) -> Self {
        self.restart_power = power;
        self.restart_ramp_ms = ramp_ms;
        self
    }

    /// Set the resource wait bound
    pub fn with_resource_wait_timeout_ms(mut self, ms: Option<u64>) -> Self {
        self.resource_wait_timeout_ms = ms;
        self
    }

    /// Set the hardware retry count
    pub fn with_hardware_retries(mut self, retries: u8) -> Self {
        self.hardware_retries = retries;
        self
    }

    /// Set how long the LED and headlight keep their moving state after a stop
    pub fn with_stop_indicator_delays_ms(mut self, led_ms: u64, headlight_ms: u64) -> Self {
        self.stopped_led_delay_ms = led_ms;
        self.headlight_dim_delay_ms = headlight_ms;
        self
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ControlError> {
        if self.dwell_min_ms > self.dwell_max_ms {
            return Err(ControlError::Config(format!(
                "dwell_min_ms {} exceeds dwell_max_ms {}",
                self.dwell_min_ms, self.dwell_max_ms
            )));
        }
        if self.restart_power == 0 || self.restart_power > MAX_POWER_INDEX as u8 {
            return Err(ControlError::Config(format!(
                "restart_power {} outside 1..=10",
                self.restart_power
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(ControlError::Config("poll_interval_ms must be positive".into()));
        }
        Ok(())
    }

    pub(crate) fn blind_after_restart(&self) -> Duration {
        Duration::from_millis(self.blind_after_restart_ms)
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub(crate) fn crossing_brake(&self) -> Duration {
        Duration::from_millis(self.crossing_brake_ms)
    }

    pub(crate) fn ramp(&self) -> Duration {
        Duration::from_millis(self.ramp_ms)
    }

    pub(crate) fn restart_ramp(&self) -> Duration {
        Duration::from_millis(self.restart_ramp_ms)
    }

    pub(crate) fn stopped_led_delay(&self) -> Duration {
        Duration::from_millis(self.stopped_led_delay_ms)
    }

    pub(crate) fn headlight_dim_delay(&self) -> Duration {
        Duration::from_millis(self.headlight_dim_delay_ms)
    }

    pub(crate) fn resource_wait_timeout(&self) -> Option<Duration> {
        self.resource_wait_timeout_ms.map(Duration::from_millis)
    }
}

// ============================================================================
// Power Config
// ============================================================================

/// Index-to-power mapping configuration
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PowerConfig {
    /// Curve shape
    pub shape: CurveShape,
    /// Output multiplier for a sagging battery
    pub compensation: f32,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            shape: CurveShape::Nonlinear,
            compensation: 1.0,
        }
    }
}

impl PowerConfig {
    /// Use the linear curve
    pub fn linear(mut self) -> Self {
        self.shape = CurveShape::Linear;
        self
    }

    /// Set the compensation factor
    pub fn with_compensation(mut self, factor: f32) -> Self {
        self.compensation = factor;
        self
    }

    /// Build the curve
    pub fn curve(&self) -> PowerCurve {
        PowerCurve::new(self.shape).with_compensation(self.compensation)
    }
}

// ============================================================================
// Policy Config
// ============================================================================

/// What to do with a signal that fits no expected transition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SpuriousSignalPolicy {
    /// Log it and leave the train alone.
    #[default]
    Report,
    /// Stop the offending train and drop it to manual mode.
    StopTrain,
    /// Stop every train.
    EmergencyStop,
}

/// Error policies
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PolicyConfig {
    /// Reaction to spurious signals
    pub spurious_signal: SpuriousSignalPolicy,
}

impl PolicyConfig {
    /// Set the spurious signal policy
    pub fn with_spurious_signal(mut self, policy: SpuriousSignalPolicy) -> Self {
        self.spurious_signal = policy;
        self
    }
}

// ============================================================================
// Train Config
// ============================================================================

/// One train on the layout
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TrainConfig {
    /// Unique id
    pub id: TrainId,
    /// Display name
    pub name: ShortString,
    /// Travel cycle
    pub direction: TravelDirection,
    /// Station the train restarts from
    pub home_station: ShortString,
    /// Capabilities
    pub kind: TrainKind,
    /// Motor runs forward at negative power
    pub reversed: bool,
    /// LED color while moving
    pub moving_led: LedColor,
    /// LED color while stopped
    pub stopped_led: LedColor,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            id: TrainId::new(1),
            name: short_string("train"),
            direction: TravelDirection::A,
            home_station: short_string("RED_1"),
            kind: TrainKind::smart(),
            reversed: false,
            moving_led: LedColor::Green,
            stopped_led: LedColor::Red,
        }
    }
}

impl TrainConfig {
    /// A sensor-equipped train with default settings
    pub fn new(id: u8, name: &str) -> Self {
        Self {
            id: TrainId::new(id),
            name: short_string(name),
            ..Self::default()
        }
    }

    /// Set the travel cycle
    pub fn with_direction(mut self, direction: TravelDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Set the home station
    pub fn with_home_station(mut self, name: &str) -> Self {
        self.home_station = short_string(name);
        self
    }

    /// Set the capabilities
    pub fn with_kind(mut self, kind: TrainKind) -> Self {
        self.kind = kind;
        self
    }

    /// Invert the motor polarity
    pub fn reversed(mut self) -> Self {
        self.reversed = true;
        self
    }

    /// Set the LED colors
    pub fn with_leds(mut self, moving: LedColor, stopped: LedColor) -> Self {
        self.moving_led = moving;
        self.stopped_led = stopped;
        self
    }

    /// Sign applied to every automatic speed
    pub(crate) fn polarity(&self) -> i8 {
        if self.reversed {
            -1
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_string_truncates() {
        let long = "x".repeat(100);
        assert_eq!(short_string(&long).len(), MAX_SHORT_STRING);
        assert_eq!(short_string("héllo").as_str(), "héllo");
    }

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn inverted_dwell_range_is_rejected() {
        let timing = TimingConfig::default().with_dwell_ms(5000, 1000);
        assert!(matches!(timing.validate(), Err(ControlError::Config(_))));
    }

    #[test]
    fn restart_power_must_be_in_range() {
        assert!(TimingConfig::default().with_restart(0, 100).validate().is_err());
        assert!(TimingConfig::default().with_restart(11, 100).validate().is_err());
        assert!(TimingConfig::default().with_restart(10, 100).validate().is_ok());
    }

    #[test]
    fn duplicate_train_ids_are_rejected() {
        let config = Config::default()
            .with_train(TrainConfig::new(1, "a"))
            .with_train(TrainConfig::new(1, "b"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn polarity_follows_reversed_flag() {
        assert_eq!(TrainConfig::new(1, "a").polarity(), 1);
        assert_eq!(TrainConfig::new(1, "a").reversed().polarity(), -1);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_policies_and_kinds() {
        let config = Config::from_json(
            r#"{
                "policy": { "spurious_signal": "emergency_stop" },
                "power": { "shape": "linear", "compensation": 1.1 },
                "timing": { "resource_wait_timeout_ms": null },
                "trains": [
                    { "id": 1, "kind": { "has_sensor": true, "is_compound": true } },
                    { "id": 2, "reversed": true, "moving_led": "blue" }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.policy.spurious_signal, SpuriousSignalPolicy::EmergencyStop);
        assert_eq!(config.power.curve().shape(), CurveShape::Linear);
        assert_eq!(config.timing.resource_wait_timeout_ms, None);
        assert!(config.trains[0].kind.is_compound);
        assert_eq!(config.trains[1].moving_led, LedColor::Blue);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_errors_are_config_errors() {
        assert!(matches!(
            Config::from_json("{ not json"),
            Err(ControlError::Config(_))
        ));
        assert!(Config::from_json(r#"{"timing": {"dwell_min_ms": 9000}}"#).is_err());
    }
}
