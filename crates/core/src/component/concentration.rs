use std::str::FromStr;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::{MotionError, Result};

/// Where a concentration pulls its sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcentrationMode {
    /// A fixed point in space.
    Fixed,
    /// The centroid of the group's members at the start of each tick.
    Centroid,
}

impl FromStr for ConcentrationMode {
    type Err = MotionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" | "point" => Ok(Self::Fixed),
            "centroid" | "center" | "centre" => Ok(Self::Centroid),
            other => Err(MotionError::validation(format!(
                "unknown concentration mode `{other}`"
            ))),
        }
    }
}

/// Clamps a concentration factor into `[0, 1]`. Non-finite input is rejected.
pub fn clamp_factor(factor: f64) -> Result<f64> {
    if factor.is_finite() {
        Ok(factor.clamp(0.0, 1.0))
    } else {
        Err(MotionError::validation(format!(
            "concentration factor must be finite, got {factor}"
        )))
    }
}

/// Pull for one tick as `(direction, weight)`: the full vector to the
/// target, scaled by `1 - factor` and by `rate * dt` (capped at one).
///
/// Returns `None` when the factor leaves sources where they are.
pub fn pull(position: DVec3, target: DVec3, factor: f64, rate: f64, dt: f64) -> Option<(DVec3, f64)> {
    if !(dt > 0.0) {
        return None;
    }
    let strength = 1.0 - factor.clamp(0.0, 1.0);
    if strength <= 0.0 {
        return None;
    }
    let step = (rate * dt).min(1.0);
    Some((target - position, strength * step))
}

/// Individual concentration toward a fixed point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Concentration {
    pub target: DVec3,
    factor: f64,
}

impl Concentration {
    /// `factor` is clamped into `[0, 1]`.
    pub fn new(target: DVec3, factor: f64) -> Self {
        Self {
            target,
            factor: factor.clamp(0.0, 1.0),
        }
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn set_factor(&mut self, factor: f64) {
        self.factor = factor.clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factor_is_clamped_not_rejected() {
        assert_eq!(clamp_factor(1.7).unwrap(), 1.0);
        assert_eq!(clamp_factor(-0.2).unwrap(), 0.0);
        assert!(clamp_factor(f64::NAN).is_err());
        assert_eq!(Concentration::new(DVec3::ZERO, 4.0).factor(), 1.0);
    }

    #[test]
    fn full_factor_has_no_effect() {
        assert_eq!(pull(DVec3::X, DVec3::ZERO, 1.0, 3.0, 0.1), None);
        assert_eq!(pull(DVec3::X, DVec3::ZERO, 0.0, 3.0, 0.0), None);
    }

    #[test]
    fn pull_is_rate_limited() {
        let (direction, weight) = pull(DVec3::new(4.0, 0.0, 0.0), DVec3::ZERO, 0.5, 3.0, 0.1).unwrap();
        assert_eq!(direction, DVec3::new(-4.0, 0.0, 0.0));
        assert!((weight - 0.15).abs() < 1e-12);

        // a huge dt never overshoots the target
        let (_, weight) = pull(DVec3::X, DVec3::ZERO, 0.0, 3.0, 10.0).unwrap();
        assert_eq!(weight, 1.0);
    }

    #[test]
    fn parses_modes() {
        assert_eq!("centroid".parse::<ConcentrationMode>().unwrap(), ConcentrationMode::Centroid);
        assert_eq!("Point".parse::<ConcentrationMode>().unwrap(), ConcentrationMode::Fixed);
        assert!("orbit".parse::<ConcentrationMode>().is_err());
    }
}
