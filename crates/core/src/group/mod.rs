use std::collections::BTreeSet;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::{
    component::{
        concentration::ConcentrationMode,
        rotation::{ManualRotation, Orientation, Rotation},
        trajectory::MacroTrajectory,
    },
    ComponentId, GroupId, SourceId,
};

/// Group-level concentration parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroupConcentration {
    pub mode: ConcentrationMode,
    /// Used when `mode` is [`ConcentrationMode::Fixed`].
    pub target: DVec3,
    /// Already clamped into `[0, 1]`.
    pub factor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationStep {
    pub center: DVec3,
    pub angles: DVec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationStep {
    pub center: DVec3,
    pub step: Orientation,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConcentrationFrame {
    pub target: DVec3,
    pub factor: f64,
}

/// What a group's effects do during one tick. Computed once per group and
/// read by every member, so all members see the same step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GroupFrame {
    pub trajectory_step: Option<DVec3>,
    pub rotation: Option<RotationStep>,
    pub manual_rotation: Option<OrientationStep>,
    pub concentration: Option<ConcentrationFrame>,
}

/// A named set of sources sharing group-level effects.
///
/// The group holds the single copy of each effect's parameters and shared
/// phase; members hold only links to it.
#[derive(Debug, Clone)]
pub struct MacroGroup {
    id: GroupId,
    members: BTreeSet<SourceId>,
    center: DVec3,
    pub(crate) trajectory: Option<MacroTrajectory>,
    pub(crate) rotation: Option<Rotation>,
    pub(crate) manual_rotation: Option<ManualRotation>,
    pub(crate) concentration: Option<GroupConcentration>,
}

impl MacroGroup {
    pub fn new(id: GroupId, center: DVec3) -> Self {
        Self {
            id,
            members: BTreeSet::new(),
            center,
            trajectory: None,
            rotation: None,
            manual_rotation: None,
            concentration: None,
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn members(&self) -> &BTreeSet<SourceId> {
        &self.members
    }

    pub fn contains(&self, source: SourceId) -> bool {
        self.members.contains(&source)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Pivot shared by the group's rotations.
    pub fn center(&self) -> DVec3 {
        self.center
    }

    pub fn trajectory(&self) -> Option<&MacroTrajectory> {
        self.trajectory.as_ref()
    }

    pub fn rotation(&self) -> Option<&Rotation> {
        self.rotation.as_ref()
    }

    pub fn manual_rotation(&self) -> Option<&ManualRotation> {
        self.manual_rotation.as_ref()
    }

    pub fn concentration(&self) -> Option<&GroupConcentration> {
        self.concentration.as_ref()
    }

    pub(crate) fn insert(&mut self, source: SourceId) -> bool {
        self.members.insert(source)
    }

    pub(crate) fn remove(&mut self, source: SourceId) -> bool {
        self.members.remove(&source)
    }

    pub(crate) fn set_center(&mut self, center: DVec3) {
        self.center = center;
        if let Some(rotation) = &mut self.rotation {
            rotation.center = center;
        }
        if let Some(rotation) = &mut self.manual_rotation {
            rotation.center = center;
        }
    }

    /// Slots each member needs for the effects currently set on the group.
    pub fn active_components(&self) -> Vec<ComponentId> {
        let mut ids = Vec::with_capacity(4);
        if self.trajectory.is_some() {
            ids.push(ComponentId::MacroTrajectory(self.id));
        }
        if self.rotation.is_some() {
            ids.push(ComponentId::MacroRotation(self.id));
        }
        if self.manual_rotation.is_some() {
            ids.push(ComponentId::ManualMacroRotation(self.id));
        }
        if self.concentration.is_some() {
            ids.push(ComponentId::MacroConcentration(self.id));
        }
        ids
    }

    /// Advances the shared phases by `dt` and returns the step every member
    /// applies this tick. `centroid` is the members' pre-tick centroid.
    ///
    /// A macro trajectory also moves the group centre and rotation pivots,
    /// effective from the next tick.
    pub fn advance(&mut self, dt: f64, angular_epsilon: f64, centroid: Option<DVec3>) -> GroupFrame {
        if !(dt > 0.0) {
            return GroupFrame::default();
        }

        let trajectory_step = self
            .trajectory
            .as_mut()
            .and_then(|trajectory| trajectory.advance(dt));

        let rotation = self.rotation.as_mut().and_then(|rotation| {
            rotation.step(dt).map(|angles| RotationStep {
                center: rotation.center,
                angles,
            })
        });

        let manual_rotation = self.manual_rotation.as_mut().and_then(|rotation| {
            rotation
                .step(dt, angular_epsilon)
                .map(|step| OrientationStep {
                    center: rotation.center,
                    step,
                })
        });

        let concentration = self.concentration.and_then(|concentration| {
            let target = match concentration.mode {
                ConcentrationMode::Fixed => concentration.target,
                ConcentrationMode::Centroid => centroid?,
            };
            Some(ConcentrationFrame {
                target,
                factor: concentration.factor,
            })
        });

        // The path carries the group's frame of reference along with it.
        // This tick's steps above still use the pre-tick pivots.
        if let Some(step) = trajectory_step {
            self.center += step;
            if let Some(rotation) = &mut self.rotation {
                rotation.center += step;
            }
            if let Some(rotation) = &mut self.manual_rotation {
                rotation.center += step;
            }
        }

        GroupFrame {
            trajectory_step,
            rotation,
            manual_rotation,
            concentration,
        }
    }
}
