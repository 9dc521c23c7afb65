//! Continuous and target-seeking rotations about a fixed centre.
//!
//! Axis convention: Z is up. Yaw turns about Z (the horizontal XY plane),
//! pitch about Y and roll about X.

use std::f64::consts::{PI, TAU};

use glam::{DMat3, DVec3};
use serde::{Deserialize, Serialize};

use crate::ComponentFault;

/// Wraps an angle into `[-π, π)`.
pub fn wrap_angle(angle: f64) -> f64 {
    (angle + PI).rem_euclid(TAU) - PI
}

/// Yaw/pitch/roll triple in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Orientation {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

impl Orientation {
    pub const ZERO: Self = Self {
        yaw: 0.0,
        pitch: 0.0,
        roll: 0.0,
    };

    pub fn new(yaw: f64, pitch: f64, roll: f64) -> Self {
        Self { yaw, pitch, roll }
    }

    pub fn is_finite(&self) -> bool {
        self.yaw.is_finite() && self.pitch.is_finite() && self.roll.is_finite()
    }

    fn axes(&self) -> [f64; 3] {
        [self.yaw, self.pitch, self.roll]
    }

    fn from_axes([yaw, pitch, roll]: [f64; 3]) -> Self {
        Self { yaw, pitch, roll }
    }
}

/// Constant angular velocity about `center`.
#[derive(Debug, Clone, PartialEq)]
pub struct Rotation {
    pub center: DVec3,
    /// Radians per second about X, Y and Z.
    pub angular_velocity: DVec3,
    angles: DVec3,
    travelled: f64,
}

impl Rotation {
    pub fn new(center: DVec3, angular_velocity: DVec3) -> Self {
        Self {
            center,
            angular_velocity,
            angles: DVec3::ZERO,
            travelled: 0.0,
        }
    }

    /// Accumulated angles, each wrapped into `[-π, π)`.
    pub fn angles(&self) -> DVec3 {
        self.angles
    }

    /// Total angle swept so far.
    pub fn travelled(&self) -> f64 {
        self.travelled
    }

    /// Advances the accumulated angles and returns this tick's increment.
    pub fn step(&mut self, dt: f64) -> Option<DVec3> {
        if !(dt > 0.0) {
            return None;
        }
        let step = self.angular_velocity * dt;
        if !step.is_finite() {
            return None;
        }
        let angles = self.angles + step;
        self.angles = DVec3::new(wrap_angle(angles.x), wrap_angle(angles.y), wrap_angle(angles.z));
        self.travelled += step.length();
        Some(step)
    }
}

/// Incremental rotation, Z applied first, then Y, then X.
pub fn rotation_matrix(step: DVec3) -> DMat3 {
    DMat3::from_rotation_x(step.x) * DMat3::from_rotation_y(step.y) * DMat3::from_rotation_z(step.z)
}

/// Offset that carries `position` through `step` about `center`.
pub fn rotate_about(
    position: DVec3,
    center: DVec3,
    step: DVec3,
    degenerate_radius: f64,
) -> Result<DVec3, ComponentFault> {
    let relative = position - center;
    if relative.length() < degenerate_radius {
        return Err(ComponentFault::NumericDegeneracy {
            what: "rotation about the source's own position",
        });
    }
    let offset = rotation_matrix(step) * relative - relative;
    if offset.is_finite() {
        Ok(offset)
    } else {
        Err(ComponentFault::NonFinite { what: "rotation" })
    }
}

/// Re-orientation that converges on a target and then goes inert.
#[derive(Debug, Clone, PartialEq)]
pub struct ManualRotation {
    pub center: DVec3,
    current: Orientation,
    target: Orientation,
    interpolation_speed: f64,
    inert: bool,
    travelled: f64,
}

impl ManualRotation {
    pub fn new(center: DVec3, target: Orientation, interpolation_speed: f64) -> Self {
        let mut rotation = Self {
            center,
            current: Orientation::ZERO,
            target: Orientation::ZERO,
            interpolation_speed,
            inert: true,
            travelled: 0.0,
        };
        rotation.retarget(target, interpolation_speed);
        rotation
    }

    pub fn current(&self) -> Orientation {
        self.current
    }

    pub fn target(&self) -> Orientation {
        self.target
    }

    pub fn interpolation_speed(&self) -> f64 {
        self.interpolation_speed
    }

    pub fn is_inert(&self) -> bool {
        self.inert
    }

    pub fn travelled(&self) -> f64 {
        self.travelled
    }

    /// Sets a new target and re-arms the rotation. The current angle is kept.
    pub fn retarget(&mut self, target: Orientation, interpolation_speed: f64) {
        self.target = Orientation::from_axes(target.axes().map(wrap_angle));
        self.interpolation_speed = interpolation_speed;
        self.inert = false;
    }

    /// Moves the current angles toward the target along the shortest path
    /// and returns the angles stepped this tick.
    pub fn step(&mut self, dt: f64, epsilon: f64) -> Option<Orientation> {
        if self.inert || !(dt > 0.0) {
            return None;
        }

        let current = self.current.axes();
        let target = self.target.axes();
        let errors: [f64; 3] = std::array::from_fn(|axis| wrap_angle(target[axis] - current[axis]));
        if errors.iter().all(|error| error.abs() < epsilon) {
            self.inert = true;
            return None;
        }

        let max_step = self.interpolation_speed * dt;
        let steps = errors.map(|error| error.signum() * error.abs().min(max_step));
        if !steps.iter().all(|step| step.is_finite()) {
            return None;
        }

        self.current = Orientation::from_axes(std::array::from_fn(|axis| {
            wrap_angle(current[axis] + steps[axis])
        }));
        self.travelled += steps.iter().map(|step| step.abs()).sum::<f64>();
        Some(Orientation::from_axes(steps))
    }
}

/// Rotates one coordinate pair by `step` using its polar form, so the radius
/// in that plane is preserved exactly.
fn turn_in_plane(a: f64, b: f64, step: f64) -> (f64, f64) {
    let radius = a.hypot(b);
    let angle = b.atan2(a) + step;
    (radius * angle.cos(), radius * angle.sin())
}

/// Offset that carries `position` through the orientation `step` about
/// `center`. Planes where the position sits on the axis are skipped.
pub fn orient_about(
    position: DVec3,
    center: DVec3,
    step: Orientation,
    degenerate_radius: f64,
) -> Result<DVec3, ComponentFault> {
    let mut relative = position - center;
    let mut skipped = false;
    let mut turned = false;

    if step.yaw != 0.0 {
        if relative.x.hypot(relative.y) < degenerate_radius {
            skipped = true;
        } else {
            (relative.x, relative.y) = turn_in_plane(relative.x, relative.y, step.yaw);
            turned = true;
        }
    }
    if step.pitch != 0.0 {
        if relative.z.hypot(relative.x) < degenerate_radius {
            skipped = true;
        } else {
            (relative.z, relative.x) = turn_in_plane(relative.z, relative.x, step.pitch);
            turned = true;
        }
    }
    if step.roll != 0.0 {
        if relative.y.hypot(relative.z) < degenerate_radius {
            skipped = true;
        } else {
            (relative.y, relative.z) = turn_in_plane(relative.y, relative.z, step.roll);
            turned = true;
        }
    }

    if skipped && !turned {
        return Err(ComponentFault::NumericDegeneracy {
            what: "manual rotation at zero planar radius",
        });
    }

    let offset = relative - (position - center);
    if offset.is_finite() {
        Ok(offset)
    } else {
        Err(ComponentFault::NonFinite {
            what: "manual rotation",
        })
    }
}
