//! Mapping from discrete power index to normalized motor power.
//!
//! The motor's response to duty cycle is not linear: below roughly 30% the
//! train does not move at all. The default [`PowerCurve`] therefore jumps
//! straight to 0.30 at index 1 and spreads the remaining steps above it. A
//! linear curve is available for light test rigs, and a compensation factor
//! can scale the output for a sagging battery.

/// Highest power index magnitude.
pub const MAX_POWER_INDEX: i8 = 10;

const DUTY: [f32; 11] = [
    0.0, 0.30, 0.35, 0.40, 0.45, 0.50, 0.60, 0.70, 0.80, 0.90, 1.0,
];

/// Shape of the index-to-power curve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum CurveShape {
    /// Lookup table tuned for the train motors.
    #[default]
    Nonlinear,
    /// `index / 10`.
    Linear,
}

/// Index-to-power mapping.
///
/// ```rust
/// use trainz_autopilot::power::PowerCurve;
///
/// let curve = PowerCurve::default();
/// assert_eq!(curve.power(0), 0.0);
/// assert_eq!(curve.power(1), 0.30);
/// assert_eq!(curve.power(-10), -1.0);
///
/// let linear = PowerCurve::linear();
/// assert!((linear.power(5) - 0.5).abs() < 1e-6);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PowerCurve {
    shape: CurveShape,
    compensation: f32,
}

impl Default for PowerCurve {
    fn default() -> Self {
        Self {
            shape: CurveShape::Nonlinear,
            compensation: 1.0,
        }
    }
}

impl PowerCurve {
    /// Curve with the given shape and no compensation.
    pub fn new(shape: CurveShape) -> Self {
        Self {
            shape,
            compensation: 1.0,
        }
    }

    /// Linear curve.
    pub fn linear() -> Self {
        Self::new(CurveShape::Linear)
    }

    /// Scale every output by `factor` (clamped afterwards).
    pub fn with_compensation(mut self, factor: f32) -> Self {
        self.compensation = if factor.is_finite() && factor > 0.0 {
            factor
        } else {
            1.0
        };
        self
    }

    /// Curve shape.
    pub fn shape(&self) -> CurveShape {
        self.shape
    }

    /// Compensation factor.
    pub fn compensation(&self) -> f32 {
        self.compensation
    }

    /// Normalized power in `[-1.0, 1.0]` for a power index.
    ///
    /// Indices outside `[-10, 10]` are clamped.
    pub fn power(&self, index: i8) -> f32 {
        let index = index.clamp(-MAX_POWER_INDEX, MAX_POWER_INDEX);
        let magnitude = match self.shape {
            CurveShape::Nonlinear => DUTY[index.unsigned_abs() as usize],
            CurveShape::Linear => {
                f32::from(index.unsigned_abs()) / f32::from(MAX_POWER_INDEX as u8)
            }
        };
        let power = (magnitude * self.compensation).min(1.0);
        if index < 0 {
            -power
        } else {
            power
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonlinear_is_odd_symmetric() {
        let curve = PowerCurve::default();
        for i in 0..=10 {
            assert_eq!(curve.power(i), -curve.power(-i));
        }
    }

    #[test]
    fn nonlinear_is_monotone() {
        let curve = PowerCurve::default();
        for i in 0..10 {
            assert!(curve.power(i) < curve.power(i + 1));
        }
    }

    #[test]
    fn compensation_scales_and_clamps() {
        let curve = PowerCurve::default().with_compensation(1.2);
        assert!((curve.power(5) - 0.6).abs() < 1e-6);
        assert_eq!(curve.power(10), 1.0);
        assert_eq!(curve.power(-10), -1.0);
    }

    #[test]
    fn invalid_compensation_is_ignored() {
        let curve = PowerCurve::default().with_compensation(-3.0);
        assert_eq!(curve.compensation(), 1.0);
        let curve = PowerCurve::default().with_compensation(f32::NAN);
        assert_eq!(curve.compensation(), 1.0);
    }

    #[test]
    fn out_of_range_index_is_clamped() {
        let curve = PowerCurve::linear();
        assert_eq!(curve.power(i8::MAX), 1.0);
        assert_eq!(curve.power(i8::MIN), -1.0);
    }
}
