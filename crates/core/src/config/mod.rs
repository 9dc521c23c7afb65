use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{MotionError, Result};

/// Engine-wide tuning, fixed for the lifetime of a [`crate::MotionEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Nominal rate of the external clock driving `tick`.
    pub tick_rate_hz: f64,
    /// Angular error (radians) below which a manual rotation goes inert.
    pub angular_epsilon: f64,
    /// Planar radius (metres) under which a rotation angle is undefined.
    pub degenerate_radius: f64,
    /// Per-second pull applied by concentration, scaled by `dt`.
    pub concentration_rate: f64,
    /// Speed multiplier used by the `spin` movement mode.
    pub spin_factor: f64,
    /// Base seed for every component-local random generator.
    pub seed: u64,
    /// Upper bound on live sources; also caps a single formation's count.
    pub max_sources: usize,
    pub random: RandomModeConfig,
    pub vibration: VibrationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60.0,
            angular_epsilon: 1e-6,
            degenerate_radius: 1e-9,
            concentration_rate: 3.0,
            spin_factor: 8.0,
            seed: 0x5EED,
            max_sources: 4096,
            random: RandomModeConfig::default(),
            vibration: VibrationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parses a JSON document; missing fields fall back to defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Nominal duration of one tick in seconds.
    pub fn tick_seconds(&self) -> f64 {
        1.0 / self.tick_rate_hz
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("tick_rate_hz", self.tick_rate_hz),
            ("angular_epsilon", self.angular_epsilon),
            ("degenerate_radius", self.degenerate_radius),
            ("concentration_rate", self.concentration_rate),
            ("spin_factor", self.spin_factor),
            ("random.interval_seconds", self.random.interval_seconds),
            ("vibration.frequency", self.vibration.frequency),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(MotionError::validation(format!(
                    "`{name}` must be a positive finite number, got {value}"
                )));
            }
        }

        if self.max_sources == 0 {
            return Err(MotionError::validation("`max_sources` must be at least 1"));
        }

        if !(self.random.speed_min <= self.random.speed_max) {
            return Err(MotionError::validation(
                "`random.speed_min` must not exceed `random.speed_max`",
            ));
        }

        if !(self.vibration.amplitude.is_finite() && self.vibration.amplitude >= 0.0) {
            return Err(MotionError::validation(
                "`vibration.amplitude` must be non-negative",
            ));
        }

        Ok(())
    }
}

/// Bounds for the `random` movement mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomModeConfig {
    /// Seconds between re-rolls of speed and direction.
    pub interval_seconds: f64,
    /// Speed multipliers are drawn from `[speed_min, speed_max]`.
    pub speed_min: f64,
    pub speed_max: f64,
}

impl Default for RandomModeConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 1.5,
            speed_min: 0.25,
            speed_max: 2.0,
        }
    }
}

/// Shape of the `vibration` movement mode, in phase units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VibrationConfig {
    pub frequency: f64,
    pub amplitude: f64,
    /// Fraction of the trajectory speed at which the oscillation centre drifts.
    pub drift: f64,
}

impl Default for VibrationConfig {
    fn default() -> Self {
        Self {
            frequency: 4.0,
            amplitude: 0.02,
            drift: 0.1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "tick_rate_hz": 120.0 }"#).unwrap();
        assert_eq!(config.tick_rate_hz, 120.0);
        assert_eq!(config.random, RandomModeConfig::default());
        assert!((config.tick_seconds() - 1.0 / 120.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_non_positive_rates() {
        let err = EngineConfig::from_json_str(r#"{ "tick_rate_hz": 0.0 }"#).unwrap_err();
        assert!(matches!(err, MotionError::Validation(_)));
    }

    #[test]
    fn rejects_zero_source_limit() {
        let err = EngineConfig::from_json_str(r#"{ "max_sources": 0 }"#).unwrap_err();
        assert!(matches!(err, MotionError::Validation(_)));
        assert_eq!(EngineConfig::default().max_sources, 4096);
    }

    #[test]
    fn rejects_inverted_random_bounds() {
        let mut config = EngineConfig::default();
        config.random.speed_min = 3.0;
        config.random.speed_max = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = EngineConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, MotionError::Config(_)));
    }
}
