mod osc;

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use clap::{Args, Parser, Subcommand};
use glam::DVec3;
use spatial_motion_core::{
    EngineConfig, FixedStep, FormationParams, MotionEngine, MovementMode, ScheduledEvent, Scheduler,
    ShapeParams, TrajectoryShape,
};
use tracing_subscriber::EnvFilter;

use crate::osc::OscUdpTransport;

fn main() -> spatial_motion_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Run {
            scene,
            target,
            duration,
        } => run_live(config, &scene, target, duration),
        Commands::Simulate { scene, ticks, every } => run_simulation(config, &scene, ticks, every),
    }
}

fn run_live(
    config: EngineConfig,
    scene: &SceneArgs,
    target: SocketAddr,
    duration: Option<f64>,
) -> spatial_motion_core::Result<()> {
    tracing::info!(%target, rate = config.tick_rate_hz, "starting real-time loop");

    let mut step = FixedStep::new(config.tick_rate_hz);
    let (mut engine, mut scheduler) = build_scene(config, scene)?;
    engine.set_transport(Box::new(OscUdpTransport::connect(target)?));

    let started = Instant::now();
    let mut last = started;
    loop {
        let now = Instant::now();
        let ticks = step.accumulate(now.duration_since(last).as_secs_f64());
        last = now;

        for _ in 0..ticks {
            apply_due(&mut engine, &mut scheduler);
            engine.tick(step.step());
        }

        if duration.is_some_and(|limit| started.elapsed().as_secs_f64() >= limit) {
            break;
        }
        thread::sleep(Duration::from_secs_f64(step.step() / 2.0));
    }

    tracing::info!(ticks = engine.tick_count(), "stopped");
    Ok(())
}

fn run_simulation(
    config: EngineConfig,
    scene: &SceneArgs,
    ticks: u64,
    every: u64,
) -> spatial_motion_core::Result<()> {
    let dt = config.tick_seconds();
    let (mut engine, mut scheduler) = build_scene(config, scene)?;
    let every = every.max(1);

    for _ in 0..ticks {
        apply_due(&mut engine, &mut scheduler);
        let frame = engine.tick(dt);
        if frame.tick % every == 0 {
            println!("{}", serde_json::to_string(frame)?);
        }
    }
    Ok(())
}

fn apply_due(engine: &mut MotionEngine, scheduler: &mut Scheduler) {
    for command in scheduler.due(engine.clock()) {
        if let Err(err) = engine.apply(command) {
            tracing::warn!(%err, time = engine.time(), "scheduled command rejected");
        }
    }
}

fn build_scene(
    config: EngineConfig,
    scene: &SceneArgs,
) -> spatial_motion_core::Result<(MotionEngine, Scheduler)> {
    let mut engine = MotionEngine::new(config)?;

    let params = FormationParams {
        radius: Some(scene.radius),
        spacing: scene.spacing,
        center: scene.center,
        seed: scene.seed,
        ..Default::default()
    };
    let (group, sources) = engine.create_group(&scene.formation, scene.count, params)?;

    if let Some(speeds) = scene.rotate {
        engine.set_macro_rotation(group, speeds.x, speeds.y, speeds.z)?;
    }
    if let Some(factor) = scene.concentrate {
        engine.set_concentration(group, factor, None)?;
    }
    if let Some(shape) = &scene.trajectory {
        let shape = shape.parse::<TrajectoryShape>()?;
        let mode = scene.movement.parse::<MovementMode>()?;
        for source in &sources {
            engine.set_individual_trajectory(
                *source,
                shape,
                ShapeParams::with_radius(scene.trajectory_radius),
                mode,
                scene.speed,
            )?;
        }
    }

    let mut scheduler = Scheduler::new();
    if let Some(path) = &scene.script {
        let events = load_script(path)?;
        tracing::info!(events = events.len(), ?path, "loaded command script");
        scheduler.set_events(events);
    }

    Ok((engine, scheduler))
}

fn load_script(path: &Path) -> spatial_motion_core::Result<Vec<ScheduledEvent>> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn parse_vec3(value: &str) -> Result<DVec3, String> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<f64>().map_err(|err| format!("`{part}`: {err}")))
        .collect::<Result<Vec<_>, _>>()?;
    match parts.as_slice() {
        [x, y, z] => Ok(DVec3::new(*x, *y, *z)),
        _ => Err(format!("expected x,y,z, got `{value}`")),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Spatial audio source motion engine", long_about = None)]
struct Cli {
    /// JSON engine configuration; defaults apply to missing fields.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive the engine in real time and stream positions over OSC/UDP.
    Run {
        #[command(flatten)]
        scene: SceneArgs,
        /// Renderer address.
        #[arg(long, default_value = "127.0.0.1:18032")]
        target: SocketAddr,
        /// Stop after this many seconds instead of running forever.
        #[arg(long)]
        duration: Option<f64>,
    },
    /// Run a fixed number of ticks offline and print frames as JSON lines.
    Simulate {
        #[command(flatten)]
        scene: SceneArgs,
        #[arg(long, default_value_t = 600)]
        ticks: u64,
        /// Print every n-th frame.
        #[arg(long, default_value_t = 1)]
        every: u64,
    },
}

#[derive(Args, Debug)]
struct SceneArgs {
    /// circle, line, grid, spiral, sphere or random.
    #[arg(long, default_value = "circle")]
    formation: String,
    #[arg(long, default_value_t = 8)]
    count: i64,
    #[arg(long, default_value_t = 2.0)]
    radius: f64,
    #[arg(long)]
    spacing: Option<f64>,
    #[arg(long, value_parser = parse_vec3, default_value = "0,0,0")]
    center: DVec3,
    #[arg(long)]
    seed: Option<u64>,
    /// Group rotation speeds in rad/s, as x,y,z.
    #[arg(long, value_parser = parse_vec3)]
    rotate: Option<DVec3>,
    /// Pull the group toward its centroid; 0 is the strongest pull.
    #[arg(long)]
    concentrate: Option<f64>,
    /// Per-source trajectory shape.
    #[arg(long)]
    trajectory: Option<String>,
    #[arg(long, default_value_t = 0.5)]
    trajectory_radius: f64,
    #[arg(long, default_value = "fix")]
    movement: String,
    /// Trajectory speed in cycles per second.
    #[arg(long, default_value_t = 0.25)]
    speed: f64,
    /// JSON list of time-stamped effect commands.
    #[arg(long)]
    script: Option<PathBuf>,
}
