//! Creation-time placement of a new group of sources.
//!
//! Every layout is a pure function of its inputs. The per-frame loop never
//! calls into this module.

pub mod expr;

use std::{f64::consts::TAU, str::FromStr};

use glam::DVec3;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};

use crate::{MotionError, Result, SourceId};

use self::expr::{Bindings, Expr};

const DEFAULT_RADIUS: f64 = 1.0;
const DEFAULT_SPACING: f64 = 1.0;
const DEFAULT_SEED: u64 = 0xF0A7;
const SPIRAL_TURNS: f64 = 2.0;

/// Largest layout a single call will compute.
pub const MAX_COUNT: usize = 1 << 16;

/// Named layout family accepted by `create_group`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormationKind {
    Circle,
    Line,
    Grid,
    Spiral,
    Sphere,
    Random,
    Custom,
}

impl FromStr for FormationKind {
    type Err = MotionError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "circle" => Self::Circle,
            "line" => Self::Line,
            "grid" => Self::Grid,
            "spiral" => Self::Spiral,
            "sphere" => Self::Sphere,
            "random" => Self::Random,
            "custom" => Self::Custom,
            other => {
                return Err(MotionError::formation(format!(
                    "unknown formation kind `{other}`"
                )))
            }
        })
    }
}

/// Per-axis expressions for a `custom` formation. See [`expr`] for syntax.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFormation {
    pub x: String,
    #[serde(default = "zero_expr")]
    pub y: String,
    #[serde(default = "zero_expr")]
    pub z: String,
}

fn zero_expr() -> String {
    "0".to_string()
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FormationParams {
    pub radius: Option<f64>,
    pub spacing: Option<f64>,
    pub center: DVec3,
    /// Seed for the `random` layout.
    pub seed: Option<u64>,
    pub custom: Option<CustomFormation>,
    /// First id of the contiguous id range the group occupies. When absent
    /// the engine allocates ids after the highest existing one.
    pub first_source: Option<SourceId>,
}

impl FormationParams {
    pub fn with_radius(radius: f64, center: DVec3) -> Self {
        Self {
            radius: Some(radius),
            center,
            ..Default::default()
        }
    }

    pub fn with_spacing(spacing: f64, center: DVec3) -> Self {
        Self {
            spacing: Some(spacing),
            center,
            ..Default::default()
        }
    }

    fn radius(&self) -> Result<f64> {
        let radius = self.radius.or(self.spacing).unwrap_or(DEFAULT_RADIUS);
        non_negative("radius", radius)
    }

    fn spacing(&self) -> Result<f64> {
        let spacing = self.spacing.or(self.radius).unwrap_or(DEFAULT_SPACING);
        non_negative("spacing", spacing)
    }
}

fn non_negative(name: &str, value: f64) -> Result<f64> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(MotionError::formation(format!(
            "{name} must be a non-negative finite number, got {value}"
        )))
    }
}

/// Stateless layout calculator.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormationManager;

impl FormationManager {
    /// Validates the request and returns `count` positions.
    pub fn layout(kind: FormationKind, count: i64, params: &FormationParams) -> Result<Vec<DVec3>> {
        let count = usize::try_from(count)
            .ok()
            .filter(|count| (1..=MAX_COUNT).contains(count))
            .ok_or_else(|| {
                MotionError::formation(format!("count must be between 1 and {MAX_COUNT}, got {count}"))
            })?;

        if !params.center.is_finite() {
            return Err(MotionError::formation("center must be finite"));
        }

        let positions = match kind {
            FormationKind::Circle => Self::circle(count, params.radius()?, params.center),
            FormationKind::Line => Self::line(count, params.spacing()?, params.center),
            FormationKind::Grid => Self::grid(count, params.spacing()?, params.center),
            FormationKind::Spiral => Self::spiral(count, params.radius()?, params.center),
            FormationKind::Sphere => Self::sphere(count, params.radius()?, params.center),
            FormationKind::Random => Self::random(
                count,
                params.radius()?,
                params.center,
                params.seed.unwrap_or(DEFAULT_SEED),
            ),
            FormationKind::Custom => {
                let custom = params.custom.as_ref().ok_or_else(|| {
                    MotionError::formation("custom formation requires x/y/z expressions")
                })?;
                Self::custom(count, params.radius()?, params.center, custom)?
            }
        };

        Ok(positions)
    }

    /// Parses `kind` and delegates to [`FormationManager::layout`].
    pub fn layout_named(kind: &str, count: i64, params: &FormationParams) -> Result<Vec<DVec3>> {
        Self::layout(kind.parse()?, count, params)
    }

    /// Evenly spaced on a horizontal circle (XY plane, Z up).
    pub fn circle(count: usize, radius: f64, center: DVec3) -> Vec<DVec3> {
        (0..count)
            .map(|i| {
                let angle = TAU * i as f64 / count as f64;
                center + DVec3::new(radius * angle.cos(), radius * angle.sin(), 0.0)
            })
            .collect()
    }

    /// Along the X axis, centred on `center`.
    pub fn line(count: usize, spacing: f64, center: DVec3) -> Vec<DVec3> {
        let half = (count as f64 - 1.0) * 0.5;
        (0..count)
            .map(|i| center + DVec3::new((i as f64 - half) * spacing, 0.0, 0.0))
            .collect()
    }

    /// Row-major grid in the XY plane, as square as possible.
    pub fn grid(count: usize, spacing: f64, center: DVec3) -> Vec<DVec3> {
        let cols = (count as f64).sqrt().ceil().max(1.0) as usize;
        let rows = count.div_ceil(cols);
        let half_cols = (cols as f64 - 1.0) * 0.5;
        let half_rows = (rows as f64 - 1.0) * 0.5;

        (0..count)
            .map(|i| {
                let col = (i % cols) as f64;
                let row = (i / cols) as f64;
                center
                    + DVec3::new(
                        (col - half_cols) * spacing,
                        (row - half_rows) * spacing,
                        0.0,
                    )
            })
            .collect()
    }

    /// Archimedean spiral growing from the centre out to `radius`.
    pub fn spiral(count: usize, radius: f64, center: DVec3) -> Vec<DVec3> {
        (0..count)
            .map(|i| {
                let t = normalized(i, count);
                let angle = TAU * SPIRAL_TURNS * t;
                let r = radius * t;
                center + DVec3::new(r * angle.cos(), r * angle.sin(), 0.0)
            })
            .collect()
    }

    /// Fibonacci lattice on a sphere. All three coordinates vary; `y` runs
    /// from the top pole to the bottom one.
    pub fn sphere(count: usize, radius: f64, center: DVec3) -> Vec<DVec3> {
        let golden_angle = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());

        (0..count)
            .map(|i| {
                let y = if count > 1 {
                    1.0 - 2.0 * i as f64 / (count as f64 - 1.0)
                } else {
                    0.0
                };
                let ring = (1.0 - y * y).max(0.0).sqrt();
                let theta = golden_angle * i as f64;
                center + DVec3::new(theta.cos() * ring, y, theta.sin() * ring) * radius
            })
            .collect()
    }

    /// Uniform inside a ball of `radius`, reproducible from `seed`.
    pub fn random(count: usize, radius: f64, center: DVec3, seed: u64) -> Vec<DVec3> {
        let mut rng = Pcg32::seed_from_u64(seed);
        (0..count)
            .map(|_| loop {
                let candidate = DVec3::new(
                    rng.gen_range(-1.0..=1.0),
                    rng.gen_range(-1.0..=1.0),
                    rng.gen_range(-1.0..=1.0),
                );
                if candidate.length_squared() <= 1.0 {
                    break center + candidate * radius;
                }
            })
            .collect()
    }

    /// Evaluates user expressions once per index.
    pub fn custom(
        count: usize,
        radius: f64,
        center: DVec3,
        custom: &CustomFormation,
    ) -> Result<Vec<DVec3>> {
        let parse = |axis: &str, text: &str| {
            Expr::parse(text).map_err(|err| {
                MotionError::formation(format!("malformed {axis} expression `{text}`: {err}"))
            })
        };
        let x = parse("x", &custom.x)?;
        let y = parse("y", &custom.y)?;
        let z = parse("z", &custom.z)?;

        (0..count)
            .map(|i| {
                let bindings = Bindings {
                    index: i as f64,
                    count: count as f64,
                    normalized: normalized(i, count),
                    radius,
                };
                let offset = DVec3::new(x.eval(&bindings), y.eval(&bindings), z.eval(&bindings));
                if offset.is_finite() {
                    Ok(center + offset)
                } else {
                    Err(MotionError::formation(format!(
                        "custom expression produced a non-finite position at index {i}"
                    )))
                }
            })
            .collect()
    }
}

/// Maps `i` in `0..count` onto `[0, 1]`.
fn normalized(i: usize, count: usize) -> f64 {
    if count > 1 {
        i as f64 / (count as f64 - 1.0)
    } else {
        0.0
    }
}
