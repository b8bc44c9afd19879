//! Debouncing of classified sensor detections.
//!
//! A tile under a slow or stationary sensor re-triggers many times per
//! second. [`SensorEventFilter`] forwards the first detection of a color for
//! a train and drops every repeat of that `(train, color)` pair until the
//! debounce window has elapsed since the last forwarded one.
//!
//! ```rust
//! use trainz_autopilot::filter::SensorEventFilter;
//! use trainz_autopilot::track::Color;
//! use trainz_autopilot::train::TrainId;
//!
//! let mut filter = SensorEventFilter::new(1000);
//! let train = TrainId::new(1);
//!
//! assert_eq!(filter.filter(train, Color::Green, 0), Some(Color::Green));
//! assert_eq!(filter.filter(train, Color::Green, 400), None);
//! assert_eq!(filter.filter(train, Color::Blue, 450), Some(Color::Blue));
//! assert_eq!(filter.filter(train, Color::Green, 1100), Some(Color::Green));
//! ```

use std::collections::HashMap;

use tracing::trace;

use crate::track::Color;
use crate::train::TrainId;

/// Per-train, per-color debouncer.
#[derive(Debug, Clone)]
pub struct SensorEventFilter {
    debounce_ms: u64,
    last_forwarded: HashMap<(TrainId, Color), u64>,
}

impl SensorEventFilter {
    /// Create a filter with the given debounce window.
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            debounce_ms,
            last_forwarded: HashMap::new(),
        }
    }

    /// Debounce window in milliseconds.
    pub fn debounce_ms(&self) -> u64 {
        self.debounce_ms
    }

    /// Forward or drop a detection made at `now_ms`.
    pub fn filter(&mut self, train: TrainId, color: Color, now_ms: u64) -> Option<Color> {
        match self.last_forwarded.get(&(train, color)) {
            Some(&last) if now_ms.saturating_sub(last) <= self.debounce_ms => {
                let since_ms = now_ms.saturating_sub(last);
                trace!(%train, %color, since_ms, "duplicate detection dropped");
                None
            }
            _ => {
                self.last_forwarded.insert((train, color), now_ms);
                Some(color)
            }
        }
    }

    /// Forget every timestamp.
    pub fn reset(&mut self) {
        self.last_forwarded.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T1: TrainId = TrainId(1);
    const T2: TrainId = TrainId(2);

    #[test]
    fn burst_within_window_forwards_once() {
        let mut f = SensorEventFilter::new(1000);
        let forwarded = (0..50)
            .filter_map(|i| f.filter(T1, Color::Red, i * 20))
            .count();
        assert_eq!(forwarded, 1);
    }

    #[test]
    fn spaced_events_all_forwarded() {
        let mut f = SensorEventFilter::new(400);
        let forwarded = (0..5)
            .filter_map(|i| f.filter(T1, Color::Red, i * 401))
            .count();
        assert_eq!(forwarded, 5);
    }

    #[test]
    fn window_is_measured_from_last_forwarded() {
        let mut f = SensorEventFilter::new(1000);
        assert!(f.filter(T1, Color::Blue, 0).is_some());
        // drops do not extend the window
        assert!(f.filter(T1, Color::Blue, 900).is_none());
        assert!(f.filter(T1, Color::Blue, 1001).is_some());
    }

    #[test]
    fn exactly_at_threshold_is_dropped() {
        let mut f = SensorEventFilter::new(1000);
        assert!(f.filter(T1, Color::Blue, 0).is_some());
        assert!(f.filter(T1, Color::Blue, 1000).is_none());
    }

    #[test]
    fn trains_are_independent() {
        let mut f = SensorEventFilter::new(1000);
        assert!(f.filter(T1, Color::Green, 0).is_some());
        assert!(f.filter(T2, Color::Green, 10).is_some());
        assert!(f.filter(T1, Color::Green, 20).is_none());
    }

    #[test]
    fn reset_forgets_everything() {
        let mut f = SensorEventFilter::new(1000);
        f.filter(T1, Color::Green, 0);
        f.reset();
        assert!(f.filter(T1, Color::Green, 1).is_some());
    }
}
