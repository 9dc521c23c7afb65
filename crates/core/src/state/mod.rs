use std::{collections::BTreeMap, fmt};

use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Engine-side identifier of a sound source (0-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub u32);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a [`crate::MacroGroup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u32);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Slot a component occupies on a source.
///
/// The derived ordering is the composition order: individual effects first,
/// then group-bound effects grouped by group id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "group", rename_all = "snake_case")]
pub enum ComponentId {
    IndividualTrajectory,
    IndividualRotation,
    ManualIndividualRotation,
    Concentration,
    MacroTrajectory(GroupId),
    MacroRotation(GroupId),
    ManualMacroRotation(GroupId),
    MacroConcentration(GroupId),
}

impl ComponentId {
    /// Group this slot is bound to, if any.
    pub fn group(self) -> Option<GroupId> {
        match self {
            Self::MacroTrajectory(group)
            | Self::MacroRotation(group)
            | Self::ManualMacroRotation(group)
            | Self::MacroConcentration(group) => Some(group),
            _ => None,
        }
    }
}

/// Authoritative per-source snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionState {
    pub position: DVec3,
    /// Progress of each stateful component, mirrored after every tick.
    pub phase_by_component: BTreeMap<ComponentId, f64>,
    pub last_update_time: f64,
}

impl MotionState {
    pub fn new(position: DVec3) -> Self {
        Self {
            position,
            phase_by_component: BTreeMap::new(),
            last_update_time: 0.0,
        }
    }

    pub fn phase(&self, id: ComponentId) -> Option<f64> {
        self.phase_by_component.get(&id).copied()
    }
}

/// Additive position offset produced by one component for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionDelta {
    pub position_offset: DVec3,
    /// Blend factor applied to the offset during composition.
    pub weight: f64,
    pub source_tag: ComponentId,
}

impl MotionDelta {
    pub fn new(source_tag: ComponentId, position_offset: DVec3) -> Self {
        Self {
            position_offset,
            weight: 1.0,
            source_tag,
        }
    }

    pub fn weighted(source_tag: ComponentId, position_offset: DVec3, weight: f64) -> Self {
        Self {
            position_offset,
            weight,
            source_tag,
        }
    }

    /// Offset after applying the blend weight.
    pub fn contribution(&self) -> DVec3 {
        self.position_offset * self.weight
    }

    pub fn is_finite(&self) -> bool {
        self.position_offset.is_finite() && self.weight.is_finite()
    }
}
