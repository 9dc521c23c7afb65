use std::collections::BTreeMap;

use glam::DVec3;

use crate::{
    component::{MotionComponent, TickContext},
    ComponentFault, ComponentId, GroupId, MotionState, SourceId,
};

/// A component attached to a source, plus its bookkeeping.
#[derive(Debug, Clone)]
pub struct ComponentSlot {
    pub component: MotionComponent,
    enabled: bool,
    faults: u64,
}

impl ComponentSlot {
    fn new(component: MotionComponent) -> Self {
        Self {
            component,
            enabled: true,
            faults: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of ticks on which this component faulted.
    pub fn faults(&self) -> u64 {
        self.faults
    }
}

/// Fault counters for one component of one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentDiagnostic {
    pub component: ComponentId,
    pub faults: u64,
}

/// One source's state and the effects attached to it.
#[derive(Debug, Clone)]
pub struct SourceMotion {
    id: SourceId,
    initial_position: DVec3,
    state: MotionState,
    components: BTreeMap<ComponentId, ComponentSlot>,
}

impl SourceMotion {
    pub fn new(id: SourceId, position: DVec3) -> Self {
        Self {
            id,
            initial_position: position,
            state: MotionState::new(position),
            components: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn state(&self) -> &MotionState {
        &self.state
    }

    pub fn position(&self) -> DVec3 {
        self.state.position
    }

    /// Where the source was created. Default pivot for in-place rotations.
    pub fn initial_position(&self) -> DVec3 {
        self.initial_position
    }

    /// Attaches `component` in its slot, enabled, and returns whatever
    /// occupied the slot before.
    pub fn attach(&mut self, component: MotionComponent) -> Option<MotionComponent> {
        let id = component.id();
        self.components
            .insert(id, ComponentSlot::new(component))
            .map(|slot| slot.component)
    }

    pub fn detach(&mut self, id: ComponentId) -> Option<MotionComponent> {
        self.state.phase_by_component.remove(&id);
        self.components.remove(&id).map(|slot| slot.component)
    }

    /// Removes every slot bound to `group`.
    pub fn detach_group(&mut self, group: GroupId) -> usize {
        let before = self.components.len();
        self.components.retain(|id, _| id.group() != Some(group));
        self.state
            .phase_by_component
            .retain(|id, _| id.group() != Some(group));
        before - self.components.len()
    }

    /// Returns `false` when no component occupies the slot.
    pub fn set_enabled(&mut self, id: ComponentId, enabled: bool) -> bool {
        match self.components.get_mut(&id) {
            Some(slot) => {
                slot.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn is_enabled(&self, id: ComponentId) -> bool {
        self.components.get(&id).is_some_and(ComponentSlot::is_enabled)
    }

    pub fn component(&self, id: ComponentId) -> Option<&MotionComponent> {
        self.components.get(&id).map(|slot| &slot.component)
    }

    pub fn component_mut(&mut self, id: ComponentId) -> Option<&mut MotionComponent> {
        self.components.get_mut(&id).map(|slot| &mut slot.component)
    }

    /// Attached slots in composition order.
    pub fn components(&self) -> impl Iterator<Item = (ComponentId, &ComponentSlot)> + '_ {
        self.components.iter().map(|(id, slot)| (*id, slot))
    }

    pub fn diagnostics(&self) -> Vec<ComponentDiagnostic> {
        self.components
            .iter()
            .filter(|(_, slot)| slot.faults > 0)
            .map(|(id, slot)| ComponentDiagnostic {
                component: *id,
                faults: slot.faults,
            })
            .collect()
    }

    /// Sums the deltas of every enabled component and applies the sum to
    /// the position. This is the only place the position changes.
    pub fn compose(&mut self, ctx: &TickContext<'_>) -> DVec3 {
        if !(ctx.dt > 0.0) {
            return self.state.position;
        }

        let mut total = DVec3::ZERO;
        for (id, slot) in self.components.iter_mut() {
            if !slot.enabled {
                continue;
            }

            let outcome = slot
                .component
                .compute_delta(&self.state, ctx)
                .and_then(|delta| match delta {
                    Some(delta) if !delta.is_finite() => Err(ComponentFault::NonFinite {
                        what: "component delta",
                    }),
                    other => Ok(other),
                });

            match outcome {
                Ok(Some(delta)) => total += delta.contribution(),
                Ok(None) => {}
                Err(fault) => {
                    slot.faults += 1;
                    if slot.faults == 1 {
                        tracing::warn!(
                            source = %self.id,
                            component = ?id,
                            %fault,
                            "component faulted; contributing zero delta"
                        );
                    }
                }
            }

            if let Some(phase) = slot.component.phase() {
                self.state.phase_by_component.insert(*id, phase);
            }
        }

        let next = self.state.position + total;
        if next.is_finite() {
            self.state.position = next;
        } else {
            tracing::warn!(source = %self.id, "discarding non-finite composed position");
        }
        self.state.last_update_time = ctx.time;
        self.state.position
    }
}
