use std::{
    f64::consts::{FRAC_PI_2, TAU},
    str::FromStr,
};

use glam::DVec3;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};

use crate::{config::EngineConfig, ComponentFault, MotionError, Result};

/// Closed set of parametric curves. Each maps a phase in `[0, 1)` to an
/// offset from the curve's centre and closes on itself at phase 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrajectoryShape {
    Circle,
    Ellipse,
    Spiral,
    Figure8,
    Lissajous,
    Square,
    Triangle,
    Line,
    Helix,
}

impl FromStr for TrajectoryShape {
    type Err = MotionError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "circle" => Self::Circle,
            "ellipse" => Self::Ellipse,
            "spiral" => Self::Spiral,
            "figure8" | "figure_8" | "figure-eight" => Self::Figure8,
            "lissajous" => Self::Lissajous,
            "square" => Self::Square,
            "triangle" => Self::Triangle,
            "line" => Self::Line,
            "helix" => Self::Helix,
            other => {
                return Err(MotionError::validation(format!(
                    "unknown trajectory shape `{other}`"
                )))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapeParams {
    pub radius: f64,
    /// Minor radius of the ellipse.
    pub radius_b: f64,
    /// Peak vertical travel of the helix.
    pub height: f64,
    /// Lissajous frequency ratio, X and Y.
    pub freq_a: f64,
    pub freq_b: f64,
    /// Revolutions of the spiral per cycle.
    pub turns: f64,
}

impl Default for ShapeParams {
    fn default() -> Self {
        Self {
            radius: 1.0,
            radius_b: 0.5,
            height: 1.0,
            freq_a: 3.0,
            freq_b: 2.0,
            turns: 3.0,
        }
    }
}

impl ShapeParams {
    pub fn with_radius(radius: f64) -> Self {
        Self {
            radius,
            ..Default::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let fields = [
            self.radius,
            self.radius_b,
            self.height,
            self.freq_a,
            self.freq_b,
            self.turns,
        ];
        if fields.iter().all(|value| value.is_finite()) {
            Ok(())
        } else {
            Err(MotionError::validation("shape parameters must be finite"))
        }
    }
}

/// Rises 0 → 1 over the first half cycle and falls back over the second.
fn ping_pong(phase: f64) -> f64 {
    1.0 - (2.0 * phase - 1.0).abs()
}

fn polyline(corners: &[DVec3], phase: f64) -> DVec3 {
    let scaled = phase * corners.len() as f64;
    let index = (scaled.floor() as usize).min(corners.len() - 1);
    let frac = scaled - index as f64;
    let next = corners[(index + 1) % corners.len()];
    corners[index].lerp(next, frac)
}

impl TrajectoryShape {
    /// Offset from the curve centre at `phase`.
    pub fn point(self, phase: f64, params: &ShapeParams) -> DVec3 {
        let r = params.radius;
        let angle = TAU * phase;
        match self {
            Self::Circle => DVec3::new(r * angle.cos(), r * angle.sin(), 0.0),
            Self::Ellipse => DVec3::new(r * angle.cos(), params.radius_b * angle.sin(), 0.0),
            Self::Spiral => {
                let spin = angle * params.turns;
                let reach = r * ping_pong(phase);
                DVec3::new(reach * spin.cos(), reach * spin.sin(), 0.0)
            }
            Self::Figure8 => DVec3::new(r * angle.sin(), r * angle.sin() * angle.cos(), 0.0),
            Self::Lissajous => DVec3::new(
                r * (params.freq_a * angle + FRAC_PI_2).sin(),
                r * (params.freq_b * angle).sin(),
                0.0,
            ),
            Self::Square => polyline(
                &[
                    DVec3::new(r, r, 0.0),
                    DVec3::new(-r, r, 0.0),
                    DVec3::new(-r, -r, 0.0),
                    DVec3::new(r, -r, 0.0),
                ],
                phase,
            ),
            Self::Triangle => {
                let vertex = |k: f64| {
                    let a = FRAC_PI_2 + TAU * k / 3.0;
                    DVec3::new(r * a.cos(), r * a.sin(), 0.0)
                };
                polyline(&[vertex(0.0), vertex(1.0), vertex(2.0)], phase)
            }
            Self::Line => DVec3::new(r * (2.0 * ping_pong(phase) - 1.0), 0.0, 0.0),
            Self::Helix => DVec3::new(
                r * angle.cos(),
                r * angle.sin(),
                params.height * ping_pong(phase),
            ),
        }
    }
}

/// How an individual trajectory advances its phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementMode {
    Fix,
    Random,
    Vibration,
    Spin,
    Freeze,
    Stop,
}

impl FromStr for MovementMode {
    type Err = MotionError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "fix" | "fixed" | "constant" => Self::Fix,
            "random" => Self::Random,
            "vibration" | "vibrate" => Self::Vibration,
            "spin" => Self::Spin,
            "freeze" => Self::Freeze,
            "stop" => Self::Stop,
            other => {
                return Err(MotionError::validation(format!(
                    "unknown movement mode `{other}`"
                )))
            }
        })
    }
}

/// Wraps a phase into `[0, 1)`.
pub fn wrap_phase(phase: f64) -> f64 {
    let wrapped = phase.rem_euclid(1.0);
    // rem_euclid rounds tiny negatives up to exactly 1.0
    if wrapped >= 1.0 {
        0.0
    } else {
        wrapped
    }
}

#[derive(Debug, Clone)]
struct RandomWalk {
    rng: Pcg32,
    rolled: bool,
    timer: f64,
    multiplier: f64,
    direction: f64,
}

impl RandomWalk {
    fn new(seed: u64) -> Self {
        Self {
            rng: Pcg32::seed_from_u64(seed),
            rolled: false,
            timer: 0.0,
            multiplier: 1.0,
            direction: 1.0,
        }
    }

    fn reroll(&mut self, config: &EngineConfig) {
        let (lo, hi) = (config.random.speed_min, config.random.speed_max);
        self.multiplier = if hi > lo {
            self.rng.gen_range(lo..=hi)
        } else {
            lo
        };
        self.direction = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
    }

    fn velocity(&mut self, speed: f64, dt: f64, config: &EngineConfig) -> f64 {
        if !self.rolled {
            self.rolled = true;
            self.reroll(config);
        }
        self.timer += dt;
        if self.timer >= config.random.interval_seconds {
            self.timer -= config.random.interval_seconds;
            self.reroll(config);
        }
        speed * self.multiplier * self.direction
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Vibration {
    elapsed: f64,
    center: f64,
}

/// Per-source parametric motion around an implicit centre.
///
/// The first time the component contributes, the source's current position
/// is taken to lie on the curve at the current phase, so attaching a
/// trajectory never teleports a source.
#[derive(Debug, Clone)]
pub struct IndividualTrajectory {
    shape: TrajectoryShape,
    params: ShapeParams,
    mode: MovementMode,
    /// Cycles per second.
    speed: f64,
    phase: f64,
    last_offset: Option<DVec3>,
    random: RandomWalk,
    vibration: Vibration,
    frozen: Option<f64>,
}

impl IndividualTrajectory {
    pub fn new(
        shape: TrajectoryShape,
        params: ShapeParams,
        mode: MovementMode,
        speed: f64,
        seed: u64,
    ) -> Self {
        Self {
            shape,
            params,
            mode,
            speed,
            phase: 0.0,
            last_offset: None,
            random: RandomWalk::new(seed),
            vibration: Vibration::default(),
            frozen: None,
        }
    }

    /// Starts the curve at `phase`. Vibration oscillates around it.
    pub fn with_phase(mut self, phase: f64) -> Self {
        self.phase = wrap_phase(phase);
        self.vibration.center = self.phase;
        self
    }

    pub fn shape(&self) -> TrajectoryShape {
        self.shape
    }

    pub fn mode(&self) -> MovementMode {
        self.mode
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// Changes the movement mode, keeping the current phase.
    pub fn set_mode(&mut self, mode: MovementMode) {
        if mode == self.mode {
            return;
        }
        self.mode = mode;
        self.frozen = None;
        self.random.rolled = false;
        self.random.timer = 0.0;
        self.vibration = Vibration {
            elapsed: 0.0,
            center: self.phase,
        };
    }

    /// Replaces the curve and speed. The phase is kept and the curve is
    /// re-anchored at the source's current position.
    pub fn reconfigure(
        &mut self,
        shape: TrajectoryShape,
        params: ShapeParams,
        mode: MovementMode,
        speed: f64,
    ) {
        if shape != self.shape || params != self.params {
            self.last_offset = None;
        }
        self.shape = shape;
        self.params = params;
        self.speed = speed;
        self.set_mode(mode);
    }

    fn next_phase(&mut self, dt: f64, config: &EngineConfig) -> f64 {
        match self.mode {
            MovementMode::Fix => self.phase + self.speed * dt,
            MovementMode::Spin => self.phase + self.speed * config.spin_factor * dt,
            MovementMode::Random => self.phase + self.random.velocity(self.speed, dt, config) * dt,
            MovementMode::Vibration => {
                let vibration = &mut self.vibration;
                vibration.elapsed += dt;
                vibration.center =
                    wrap_phase(vibration.center + self.speed * config.vibration.drift * dt);
                vibration.center
                    + config.vibration.amplitude
                        * (TAU * config.vibration.frequency * vibration.elapsed).sin()
            }
            MovementMode::Freeze => *self.frozen.get_or_insert(self.phase),
            MovementMode::Stop => self.phase,
        }
    }

    pub(crate) fn compute(
        &mut self,
        dt: f64,
        config: &EngineConfig,
    ) -> std::result::Result<Option<DVec3>, ComponentFault> {
        if !(dt > 0.0) || self.mode == MovementMode::Stop {
            return Ok(None);
        }

        let anchor = match self.last_offset {
            Some(offset) => offset,
            None => self.shape.point(self.phase, &self.params),
        };

        let phase = wrap_phase(self.next_phase(dt, config));
        let point = self.shape.point(phase, &self.params);
        if !point.is_finite() || !anchor.is_finite() {
            return Err(ComponentFault::NonFinite {
                what: "individual trajectory",
            });
        }

        self.phase = phase;
        self.last_offset = Some(point);
        Ok(Some(point - anchor))
    }
}

/// Whole-group path. The group advances it once per tick and every member
/// receives the same step, so the group's internal layout is preserved.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroTrajectory {
    pub shape: TrajectoryShape,
    pub params: ShapeParams,
    pub speed: f64,
    phase: f64,
    last_point: DVec3,
}

impl MacroTrajectory {
    pub fn new(shape: TrajectoryShape, params: ShapeParams, speed: f64) -> Self {
        Self {
            shape,
            params,
            speed,
            phase: 0.0,
            last_point: shape.point(0.0, &params),
        }
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// Advances the path and returns this tick's displacement.
    pub fn advance(&mut self, dt: f64) -> Option<DVec3> {
        if !(dt > 0.0) {
            return None;
        }
        let phase = wrap_phase(self.phase + self.speed * dt);
        let point = self.shape.point(phase, &self.params);
        if !point.is_finite() {
            return None;
        }
        let step = point - self.last_point;
        self.phase = phase;
        self.last_point = point;
        Some(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    const ALL_SHAPES: [TrajectoryShape; 9] = [
        TrajectoryShape::Circle,
        TrajectoryShape::Ellipse,
        TrajectoryShape::Spiral,
        TrajectoryShape::Figure8,
        TrajectoryShape::Lissajous,
        TrajectoryShape::Square,
        TrajectoryShape::Triangle,
        TrajectoryShape::Line,
        TrajectoryShape::Helix,
    ];

    fn trajectory(mode: MovementMode, speed: f64) -> IndividualTrajectory {
        IndividualTrajectory::new(
            TrajectoryShape::Circle,
            ShapeParams::with_radius(2.0),
            mode,
            speed,
            42,
        )
    }

    #[test]
    fn every_shape_closes_on_itself() {
        let params = ShapeParams::default();
        for shape in ALL_SHAPES {
            let start = shape.point(0.0, &params);
            let end = shape.point(1.0 - 1e-12, &params);
            assert!((start - end).length() < 1e-6, "{shape:?} is not closed");
        }
    }

    #[test]
    fn phase_wraps_into_unit_interval() {
        assert_eq!(wrap_phase(1.25), 0.25);
        assert!((wrap_phase(-0.25) - 0.75).abs() < EPS);
        assert_eq!(wrap_phase(-1e-18), 0.0);
    }

    #[test]
    fn fix_mode_accumulates_deltas_along_the_curve() {
        let config = EngineConfig::default();
        let mut component = trajectory(MovementMode::Fix, 0.25);
        let mut total = DVec3::ZERO;
        for _ in 0..60 {
            total += component.compute(1.0 / 60.0, &config).unwrap().unwrap();
        }
        // a quarter turn on a radius-2 circle starting at (2, 0)
        assert!((component.phase() - 0.25).abs() < 1e-9);
        assert!((total - DVec3::new(-2.0, 2.0, 0.0)).length() < 1e-9);
    }

    #[test]
    fn spin_multiplies_speed() {
        let config = EngineConfig::default();
        let mut component = trajectory(MovementMode::Spin, 0.01);
        component.compute(0.5, &config).unwrap();
        assert!((component.phase() - 0.01 * config.spin_factor * 0.5).abs() < EPS);
    }

    #[test]
    fn stop_and_non_positive_dt_leave_phase_untouched() {
        let config = EngineConfig::default();
        let mut component = trajectory(MovementMode::Stop, 1.0).with_phase(0.3);
        assert_eq!(component.compute(0.1, &config).unwrap(), None);
        assert_eq!(component.phase(), 0.3);

        component.set_mode(MovementMode::Fix);
        assert_eq!(component.compute(0.0, &config).unwrap(), None);
        assert_eq!(component.compute(-0.1, &config).unwrap(), None);
        assert_eq!(component.phase(), 0.3);
    }

    #[test]
    fn freeze_holds_the_phase_seen_at_the_switch() {
        let config = EngineConfig::default();
        let mut component = trajectory(MovementMode::Fix, 0.5);
        component.compute(0.2, &config).unwrap();
        let held = component.phase();

        component.set_mode(MovementMode::Freeze);
        for _ in 0..10 {
            let delta = component.compute(0.1, &config).unwrap().unwrap();
            assert!(delta.length() < EPS);
        }
        assert_eq!(component.phase(), held);
    }

    #[test]
    fn random_mode_is_reproducible_and_bounded() {
        let config = EngineConfig::default();
        let mut a = trajectory(MovementMode::Random, 0.2);
        let mut b = trajectory(MovementMode::Random, 0.2);
        let max_step = 0.2 * config.random.speed_max * 0.05 + EPS;
        for _ in 0..200 {
            let before = a.phase();
            let da = a.compute(0.05, &config).unwrap();
            let db = b.compute(0.05, &config).unwrap();
            assert_eq!(da, db);
            let moved = wrap_phase(a.phase() - before);
            assert!(moved.min(1.0 - moved) <= max_step);
        }
    }

    #[test]
    fn vibration_stays_near_a_drifting_centre() {
        let config = EngineConfig::default();
        let mut component = trajectory(MovementMode::Vibration, 0.0).with_phase(0.5);
        for _ in 0..100 {
            component.compute(0.01, &config).unwrap();
            assert!((component.phase() - 0.5).abs() <= config.vibration.amplitude + EPS);
        }
    }

    #[test]
    fn reconfigure_reanchors_without_a_jump() {
        let config = EngineConfig::default();
        let mut component = trajectory(MovementMode::Fix, 0.1);
        component.compute(0.5, &config).unwrap();
        component.reconfigure(
            TrajectoryShape::Square,
            ShapeParams::with_radius(5.0),
            MovementMode::Fix,
            0.0001,
        );
        let delta = component.compute(0.01, &config).unwrap().unwrap();
        assert!(delta.length() < 0.01);
    }

    #[test]
    fn macro_trajectory_steps_sum_to_path_displacement() {
        let mut path = MacroTrajectory::new(TrajectoryShape::Line, ShapeParams::with_radius(1.0), 0.5);
        let total: DVec3 = (0..50).filter_map(|_| path.advance(0.01)).sum();
        // phase 0.25 on the line is the midpoint, starting from -r
        assert!((total - DVec3::new(1.0, 0.0, 0.0)).length() < 1e-9);
        assert_eq!(path.advance(0.0), None);
    }

    #[test]
    fn parses_names_and_rejects_unknown_ones() {
        assert_eq!("Figure8".parse::<TrajectoryShape>().unwrap(), TrajectoryShape::Figure8);
        assert_eq!("fixed".parse::<MovementMode>().unwrap(), MovementMode::Fix);
        assert!(matches!(
            "velocity".parse::<MovementMode>(),
            Err(MotionError::Validation(_))
        ));
        assert!("blob".parse::<TrajectoryShape>().is_err());
    }
}
