//! The closed family of motion effects.
//!
//! Every effect answers the same question once per tick: given the source's
//! state at the start of the tick, how far should it move? Effects never see
//! each other's output, which is what makes composition a plain sum.

pub mod concentration;
pub mod rotation;
pub mod trajectory;

use std::collections::BTreeMap;

use crate::{
    config::EngineConfig,
    group::GroupFrame,
    ComponentFault, ComponentId, GroupId, MotionDelta, MotionState,
};

use self::{
    concentration::{pull, Concentration},
    rotation::{orient_about, rotate_about, ManualRotation, Rotation},
    trajectory::IndividualTrajectory,
};

/// Read-only inputs shared by every component during one tick.
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
    /// Absolute engine time at the end of this tick.
    pub time: f64,
    pub dt: f64,
    pub config: &'a EngineConfig,
    /// Per-group steps computed once at the start of the tick.
    pub groups: &'a BTreeMap<GroupId, GroupFrame>,
}

impl<'a> TickContext<'a> {
    pub fn new(
        time: f64,
        dt: f64,
        config: &'a EngineConfig,
        groups: &'a BTreeMap<GroupId, GroupFrame>,
    ) -> Self {
        Self {
            time,
            dt,
            config,
            groups,
        }
    }

    fn group(&self, id: GroupId) -> Option<&'a GroupFrame> {
        self.groups.get(&id)
    }
}

/// Member-side handle on a group-level effect. The effect's parameters and
/// shared phase live on the [`crate::MacroGroup`]; the link only names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupLink {
    pub group: GroupId,
}

impl GroupLink {
    pub fn new(group: GroupId) -> Self {
        Self { group }
    }
}

#[derive(Debug, Clone)]
pub enum MotionComponent {
    IndividualTrajectory(IndividualTrajectory),
    MacroTrajectory(GroupLink),
    MacroRotation(GroupLink),
    ManualMacroRotation(GroupLink),
    IndividualRotation(Rotation),
    ManualIndividualRotation(ManualRotation),
    Concentration(Concentration),
    MacroConcentration(GroupLink),
}

impl MotionComponent {
    /// Slot this component occupies on its source.
    pub fn id(&self) -> ComponentId {
        match self {
            Self::IndividualTrajectory(_) => ComponentId::IndividualTrajectory,
            Self::MacroTrajectory(link) => ComponentId::MacroTrajectory(link.group),
            Self::MacroRotation(link) => ComponentId::MacroRotation(link.group),
            Self::ManualMacroRotation(link) => ComponentId::ManualMacroRotation(link.group),
            Self::IndividualRotation(_) => ComponentId::IndividualRotation,
            Self::ManualIndividualRotation(_) => ComponentId::ManualIndividualRotation,
            Self::Concentration(_) => ComponentId::Concentration,
            Self::MacroConcentration(link) => ComponentId::MacroConcentration(link.group),
        }
    }

    /// Component-owned progress, if the component keeps any.
    pub fn phase(&self) -> Option<f64> {
        match self {
            Self::IndividualTrajectory(trajectory) => Some(trajectory.phase()),
            Self::IndividualRotation(rotation) => Some(rotation.travelled()),
            Self::ManualIndividualRotation(rotation) => Some(rotation.travelled()),
            _ => None,
        }
    }

    /// Computes this tick's delta from the pre-tick `state`.
    ///
    /// Advances only this component's own phase. `Ok(None)` means no
    /// contribution; a fault is turned into a zero contribution by the caller.
    pub fn compute_delta(
        &mut self,
        state: &MotionState,
        ctx: &TickContext<'_>,
    ) -> Result<Option<MotionDelta>, ComponentFault> {
        if !(ctx.dt > 0.0) {
            return Ok(None);
        }

        let tag = self.id();
        let config = ctx.config;
        let position = state.position;

        let offset = match self {
            Self::IndividualTrajectory(trajectory) => trajectory.compute(ctx.dt, config)?,
            Self::MacroTrajectory(link) => ctx.group(link.group).and_then(|frame| frame.trajectory_step),
            Self::MacroRotation(link) => match ctx.group(link.group).and_then(|frame| frame.rotation) {
                Some(step) => Some(rotate_about(
                    position,
                    step.center,
                    step.angles,
                    config.degenerate_radius,
                )?),
                None => None,
            },
            Self::ManualMacroRotation(link) => {
                match ctx.group(link.group).and_then(|frame| frame.manual_rotation) {
                    Some(step) => Some(orient_about(
                        position,
                        step.center,
                        step.step,
                        config.degenerate_radius,
                    )?),
                    None => None,
                }
            }
            Self::IndividualRotation(rotation) => match rotation.step(ctx.dt) {
                Some(angles) => Some(rotate_about(
                    position,
                    rotation.center,
                    angles,
                    config.degenerate_radius,
                )?),
                None => None,
            },
            Self::ManualIndividualRotation(rotation) => {
                match rotation.step(ctx.dt, config.angular_epsilon) {
                    Some(step) => Some(orient_about(
                        position,
                        rotation.center,
                        step,
                        config.degenerate_radius,
                    )?),
                    None => None,
                }
            }
            Self::Concentration(concentration) => {
                return Ok(pull(
                    position,
                    concentration.target,
                    concentration.factor(),
                    config.concentration_rate,
                    ctx.dt,
                )
                .map(|(direction, weight)| MotionDelta::weighted(tag, direction, weight)));
            }
            Self::MacroConcentration(link) => {
                return Ok(ctx
                    .group(link.group)
                    .and_then(|frame| frame.concentration)
                    .and_then(|frame| {
                        pull(
                            position,
                            frame.target,
                            frame.factor,
                            config.concentration_rate,
                            ctx.dt,
                        )
                    })
                    .map(|(direction, weight)| MotionDelta::weighted(tag, direction, weight)));
            }
        };

        Ok(offset.map(|offset| MotionDelta::new(tag, offset)))
    }
}
