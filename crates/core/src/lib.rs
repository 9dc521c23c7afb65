//! Core library for the spatial motion engine.
//!
//! Sound sources live in 3D space and are moved by a set of independent
//! effects (trajectories, rotations, concentration) attached either to a
//! single source or to a group of sources. Every tick each effect reports a
//! displacement computed from the same pre-tick state, and the source's new
//! position is the sum of those displacements. The resulting frame is handed
//! to a [`Transport`] once per tick.

pub mod component;
pub mod config;
pub mod engine;
pub mod error;
pub mod formation;
pub mod group;
pub mod source;
pub mod state;
pub mod timeline;
pub mod transport;

pub use component::{
    concentration::ConcentrationMode,
    rotation::Orientation,
    trajectory::{MovementMode, ShapeParams, TrajectoryShape},
    GroupLink, MotionComponent, TickContext,
};
pub use config::EngineConfig;
pub use engine::{command::EffectCommand, MotionEngine};
pub use error::{ComponentFault, MotionError, Result, TransportError};
pub use formation::{CustomFormation, FormationKind, FormationManager, FormationParams};
pub use group::{GroupFrame, MacroGroup};
pub use source::SourceMotion;
pub use state::{ComponentId, GroupId, MotionDelta, MotionState, SourceId};
pub use timeline::{FixedStep, PlaybackClock, ScheduledEvent, Scheduler};
pub use transport::{NullTransport, PositionFrame, RecordingTransport, Transport};
