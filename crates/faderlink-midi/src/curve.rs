//! Fader position to sink gain
//!
//! A closed fader is silence. Any other position maps linearly into a gain
//! range whose floor sits above zero, so the first notch of travel is already
//! audible. Boost swaps in a wider range for quiet sources.

use serde::{Deserialize, Serialize};

/// Linear gain range used for non-zero fader positions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainRange {
    pub min: f32,
    pub max: f32,
}

/// Normal and boosted gain ranges
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeCurve {
    pub normal: GainRange,
    pub boosted: GainRange,
}

impl Default for VolumeCurve {
    fn default() -> Self {
        Self {
            normal: GainRange { min: 0.15, max: 1.10 },
            boosted: GainRange { min: 0.30, max: 5.00 },
        }
    }
}

impl VolumeCurve {
    /// Gain for a fader value in [0, 1]
    pub fn gain(&self, value: f32, boosted: bool) -> f32 {
        if value <= 0.0 {
            return 0.0;
        }

        let range = if boosted { &self.boosted } else { &self.normal };
        let value = value.min(1.0);
        // Interpolated form so a full fader lands on `max` exactly
        range.min * (1.0 - value) + range.max * value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_silence() {
        let curve = VolumeCurve::default();
        assert_eq!(curve.gain(0.0, false), 0.0);
        assert_eq!(curve.gain(0.0, true), 0.0);
    }

    #[test]
    fn test_endpoints() {
        let curve = VolumeCurve::default();
        assert_eq!(curve.gain(1.0, false), 1.10);
        assert_eq!(curve.gain(1.0, true), 5.00);
        // Smallest fader step already sits on the curve floor
        assert!((curve.gain(1.0 / 127.0, false) - 0.1575).abs() < 1e-3);
    }

    #[test]
    fn test_monotonic_and_boost_dominates() {
        let curve = VolumeCurve::default();
        let mut previous = (0.0, 0.0);
        for step in 1..=127 {
            let value = step as f32 / 127.0;
            let normal = curve.gain(value, false);
            let boosted = curve.gain(value, true);
            assert!(normal >= previous.0);
            assert!(boosted >= previous.1);
            assert!(boosted > normal, "boost must dominate at {}", value);
            previous = (normal, boosted);
        }
    }

    #[test]
    fn test_master_scaled_value() {
        let curve = VolumeCurve::default();
        let display = (64.0 / 127.0) * (100.0 / 127.0);
        assert!((curve.gain(display, false) - 0.527).abs() < 1e-3);
    }
}
