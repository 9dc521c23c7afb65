//! Top-level driver: owns every source and group, advances time, and hands
//! one complete frame per tick to the transport.

pub mod command;

use std::collections::BTreeMap;

use glam::DVec3;

use crate::{
    component::{
        concentration::{clamp_factor, Concentration, ConcentrationMode},
        rotation::{ManualRotation, Orientation, Rotation},
        trajectory::{IndividualTrajectory, MacroTrajectory, MovementMode, ShapeParams, TrajectoryShape},
        GroupLink, MotionComponent, TickContext,
    },
    config::EngineConfig,
    formation::{FormationKind, FormationManager, FormationParams},
    group::{GroupConcentration, GroupFrame, MacroGroup},
    timeline::PlaybackClock,
    transport::{NullTransport, PositionFrame, Transport},
    ComponentId, GroupId, MotionError, Result, SourceId, SourceMotion,
};

use self::command::EffectCommand;

pub struct MotionEngine {
    config: EngineConfig,
    clock: PlaybackClock,
    sources: BTreeMap<SourceId, SourceMotion>,
    groups: BTreeMap<GroupId, MacroGroup>,
    next_group: u32,
    frame: PositionFrame,
    transport: Box<dyn Transport + Send>,
}

impl std::fmt::Debug for MotionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionEngine")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("sources", &self.sources.len())
            .field("groups", &self.groups.len())
            .finish()
    }
}

fn finite_vec(name: &str, value: DVec3) -> Result<DVec3> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MotionError::validation(format!("{name} must be finite")))
    }
}

fn finite(name: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MotionError::validation(format!("{name} must be finite, got {value}")))
    }
}

fn positive(name: &str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(MotionError::validation(format!("{name} must be positive, got {value}")))
    }
}

fn orientation(yaw: f64, pitch: f64, roll: f64) -> Result<Orientation> {
    Ok(Orientation::new(
        finite("yaw", yaw)?,
        finite("pitch", pitch)?,
        finite("roll", roll)?,
    ))
}

impl MotionEngine {
    /// Creates an engine that publishes to a [`NullTransport`].
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_transport(config, Box::new(NullTransport))
    }

    pub fn with_transport(config: EngineConfig, transport: Box<dyn Transport + Send>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock: PlaybackClock::default(),
            sources: BTreeMap::new(),
            groups: BTreeMap::new(),
            next_group: 0,
            frame: PositionFrame::default(),
            transport,
        })
    }

    pub fn set_transport(&mut self, transport: Box<dyn Transport + Send>) {
        self.transport = transport;
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn time(&self) -> f64 {
        self.clock.time_seconds
    }

    pub fn tick_count(&self) -> u64 {
        self.clock.ticks
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    /// Frame published by the most recent tick.
    pub fn frame(&self) -> &PositionFrame {
        &self.frame
    }

    // ------------------------------------------------------------------
    // Sources
    // ------------------------------------------------------------------

    pub fn add_source(&mut self, id: SourceId, initial_position: DVec3) -> Result<()> {
        if self.sources.contains_key(&id) {
            return Err(MotionError::DuplicateSourceId(id));
        }
        let position = finite_vec("initial position", initial_position)?;
        if self.sources.len() >= self.config.max_sources {
            return Err(MotionError::validation(format!(
                "source limit of {} reached",
                self.config.max_sources
            )));
        }
        self.sources.insert(id, SourceMotion::new(id, position));
        tracing::debug!(source = %id, ?position, "source added");
        Ok(())
    }

    /// Destroys the source and drops it from every group it belonged to.
    pub fn remove_source(&mut self, id: SourceId) -> Result<()> {
        self.sources
            .remove(&id)
            .ok_or(MotionError::UnknownSourceId(id))?;
        for group in self.groups.values_mut() {
            group.remove(id);
        }
        tracing::debug!(source = %id, "source removed");
        Ok(())
    }

    pub fn source(&self, id: SourceId) -> Option<&SourceMotion> {
        self.sources.get(&id)
    }

    /// Live sources in ascending id order.
    pub fn sources(&self) -> impl Iterator<Item = &SourceMotion> + '_ {
        self.sources.values()
    }

    pub fn position(&self, id: SourceId) -> Result<DVec3> {
        self.sources
            .get(&id)
            .map(SourceMotion::position)
            .ok_or(MotionError::UnknownSourceId(id))
    }

    fn source_mut(&mut self, id: SourceId) -> Result<&mut SourceMotion> {
        self.sources
            .get_mut(&id)
            .ok_or(MotionError::UnknownSourceId(id))
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// Lays out `count` sources with the named formation and groups them.
    pub fn create_group(
        &mut self,
        formation_kind: &str,
        count: i64,
        params: FormationParams,
    ) -> Result<(GroupId, Vec<SourceId>)> {
        let kind: FormationKind = formation_kind.parse()?;
        self.create_group_with(kind, count, params)
    }

    /// Ids already in use keep their current position and simply join the
    /// group; missing ids are created at their formation slot.
    pub fn create_group_with(
        &mut self,
        kind: FormationKind,
        count: i64,
        params: FormationParams,
    ) -> Result<(GroupId, Vec<SourceId>)> {
        let max = self.config.max_sources;
        let count = usize::try_from(count)
            .ok()
            .filter(|count| (1..=max).contains(count))
            .ok_or_else(|| {
                MotionError::formation(format!("count must be between 1 and {max}, got {count}"))
            })?;

        let first = match (params.first_source, self.sources.keys().next_back()) {
            (Some(first), _) => first.0,
            (None, Some(last)) => last
                .0
                .checked_add(1)
                .ok_or_else(|| MotionError::formation("source id range overflows"))?,
            (None, None) => 0,
        };
        let ids = (0..count)
            .map(|offset| {
                u32::try_from(offset)
                    .ok()
                    .and_then(|offset| first.checked_add(offset))
                    .map(SourceId)
                    .ok_or_else(|| MotionError::formation("source id range overflows"))
            })
            .collect::<Result<Vec<_>>>()?;

        let created = ids.iter().filter(|id| !self.sources.contains_key(id)).count();
        if self.sources.len() + created > max {
            return Err(MotionError::formation(format!(
                "group would exceed the source limit of {max}"
            )));
        }

        let positions = FormationManager::layout(kind, count as i64, &params)?;

        let group_id = self.allocate_group(params.center);
        for (id, position) in ids.iter().zip(positions) {
            self.sources
                .entry(*id)
                .or_insert_with(|| SourceMotion::new(*id, position));
            if let Some(group) = self.groups.get_mut(&group_id) {
                group.insert(*id);
            }
        }

        tracing::info!(group = %group_id, ?kind, count = ids.len(), "group created");
        Ok((group_id, ids))
    }

    pub fn create_empty_group(&mut self, center: DVec3) -> Result<GroupId> {
        let center = finite_vec("group center", center)?;
        Ok(self.allocate_group(center))
    }

    fn allocate_group(&mut self, center: DVec3) -> GroupId {
        let id = GroupId(self.next_group);
        self.next_group += 1;
        self.groups.insert(id, MacroGroup::new(id, center));
        id
    }

    pub fn group(&self, id: GroupId) -> Option<&MacroGroup> {
        self.groups.get(&id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &MacroGroup> + '_ {
        self.groups.values()
    }

    fn group_mut(&mut self, id: GroupId) -> Result<&mut MacroGroup> {
        self.groups.get_mut(&id).ok_or(MotionError::UnknownGroupId(id))
    }

    pub fn add_to_group(&mut self, group_id: GroupId, source: SourceId) -> Result<()> {
        if !self.sources.contains_key(&source) {
            return Err(MotionError::UnknownSourceId(source));
        }
        let group = self.group_mut(group_id)?;
        group.insert(source);
        let links = group.active_components();
        self.link_source(source, &links);
        Ok(())
    }

    pub fn remove_from_group(&mut self, group_id: GroupId, source: SourceId) -> Result<()> {
        let group = self.group_mut(group_id)?;
        if !group.remove(source) {
            return Err(MotionError::SourceNotInGroup {
                source_id: source,
                group: group_id,
            });
        }
        if let Some(motion) = self.sources.get_mut(&source) {
            motion.detach_group(group_id);
        }
        Ok(())
    }

    /// Deletes the group and unlinks its effects from every member.
    pub fn remove_group(&mut self, group_id: GroupId) -> Result<MacroGroup> {
        let group = self
            .groups
            .remove(&group_id)
            .ok_or(MotionError::UnknownGroupId(group_id))?;
        for member in group.members() {
            if let Some(motion) = self.sources.get_mut(member) {
                motion.detach_group(group_id);
            }
        }
        tracing::debug!(group = %group_id, "group removed");
        Ok(group)
    }

    pub fn set_group_center(&mut self, group_id: GroupId, center: DVec3) -> Result<()> {
        let center = finite_vec("group center", center)?;
        self.group_mut(group_id)?.set_center(center);
        Ok(())
    }

    /// Attaches member-side links for `ids`, keeping any existing slot
    /// (and its enabled flag) untouched.
    fn link_source(&mut self, source: SourceId, ids: &[ComponentId]) {
        let Some(motion) = self.sources.get_mut(&source) else {
            return;
        };
        for id in ids {
            if motion.component(*id).is_some() {
                continue;
            }
            let component = match *id {
                ComponentId::MacroTrajectory(group) => MotionComponent::MacroTrajectory(GroupLink::new(group)),
                ComponentId::MacroRotation(group) => MotionComponent::MacroRotation(GroupLink::new(group)),
                ComponentId::ManualMacroRotation(group) => {
                    MotionComponent::ManualMacroRotation(GroupLink::new(group))
                }
                ComponentId::MacroConcentration(group) => {
                    MotionComponent::MacroConcentration(GroupLink::new(group))
                }
                _ => continue,
            };
            motion.attach(component);
        }
    }

    fn link_members(&mut self, group_id: GroupId, id: ComponentId) {
        let members: Vec<SourceId> = self
            .groups
            .get(&group_id)
            .map(|group| group.members().iter().copied().collect())
            .unwrap_or_default();
        for member in members {
            self.link_source(member, &[id]);
        }
    }

    fn unlink_members(&mut self, group_id: GroupId, id: ComponentId) {
        let Some(group) = self.groups.get(&group_id) else {
            return;
        };
        for member in group.members() {
            if let Some(motion) = self.sources.get_mut(member) {
                motion.detach(id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Group effects
    // ------------------------------------------------------------------

    /// Pulls the group toward `target`, or toward its own centroid when no
    /// target is given. `factor` is clamped into `[0, 1]`.
    pub fn set_concentration(&mut self, group_id: GroupId, factor: f64, target: Option<DVec3>) -> Result<()> {
        let factor = clamp_factor(factor)?;
        let concentration = match target {
            Some(target) => GroupConcentration {
                mode: ConcentrationMode::Fixed,
                target: finite_vec("concentration target", target)?,
                factor,
            },
            None => GroupConcentration {
                mode: ConcentrationMode::Centroid,
                target: DVec3::ZERO,
                factor,
            },
        };
        self.group_mut(group_id)?.concentration = Some(concentration);
        self.link_members(group_id, ComponentId::MacroConcentration(group_id));
        Ok(())
    }

    pub fn clear_concentration(&mut self, group_id: GroupId) -> Result<()> {
        self.group_mut(group_id)?.concentration = None;
        self.unlink_members(group_id, ComponentId::MacroConcentration(group_id));
        Ok(())
    }

    /// Continuous rotation about the group centre, in radians per second.
    pub fn set_macro_rotation(&mut self, group_id: GroupId, speed_x: f64, speed_y: f64, speed_z: f64) -> Result<()> {
        let speeds = finite_vec("rotation speed", DVec3::new(speed_x, speed_y, speed_z))?;
        let group = self.group_mut(group_id)?;
        let center = group.center();
        match &mut group.rotation {
            Some(rotation) => rotation.angular_velocity = speeds,
            slot @ None => *slot = Some(Rotation::new(center, speeds)),
        }
        self.link_members(group_id, ComponentId::MacroRotation(group_id));
        Ok(())
    }

    pub fn clear_macro_rotation(&mut self, group_id: GroupId) -> Result<()> {
        self.group_mut(group_id)?.rotation = None;
        self.unlink_members(group_id, ComponentId::MacroRotation(group_id));
        Ok(())
    }

    /// Rigidly re-orients the group toward an absolute yaw/pitch/roll.
    /// Retargeting keeps the group's current orientation.
    pub fn set_manual_macro_rotation(
        &mut self,
        group_id: GroupId,
        yaw: f64,
        pitch: f64,
        roll: f64,
        interpolation_speed: f64,
    ) -> Result<()> {
        let target = orientation(yaw, pitch, roll)?;
        let speed = positive("interpolation speed", interpolation_speed)?;
        let group = self.group_mut(group_id)?;
        let center = group.center();
        match &mut group.manual_rotation {
            Some(rotation) => rotation.retarget(target, speed),
            slot @ None => *slot = Some(ManualRotation::new(center, target, speed)),
        }
        self.link_members(group_id, ComponentId::ManualMacroRotation(group_id));
        Ok(())
    }

    pub fn clear_manual_macro_rotation(&mut self, group_id: GroupId) -> Result<()> {
        self.group_mut(group_id)?.manual_rotation = None;
        self.unlink_members(group_id, ComponentId::ManualMacroRotation(group_id));
        Ok(())
    }

    /// Moves the whole group along a path; speed is in cycles per second.
    pub fn set_macro_trajectory(
        &mut self,
        group_id: GroupId,
        shape: TrajectoryShape,
        params: ShapeParams,
        speed: f64,
    ) -> Result<()> {
        params.validate()?;
        let speed = finite("trajectory speed", speed)?;
        let group = self.group_mut(group_id)?;
        match &mut group.trajectory {
            Some(trajectory) if trajectory.shape == shape && trajectory.params == params => {
                trajectory.speed = speed;
            }
            slot => *slot = Some(MacroTrajectory::new(shape, params, speed)),
        }
        self.link_members(group_id, ComponentId::MacroTrajectory(group_id));
        Ok(())
    }

    pub fn clear_macro_trajectory(&mut self, group_id: GroupId) -> Result<()> {
        self.group_mut(group_id)?.trajectory = None;
        self.unlink_members(group_id, ComponentId::MacroTrajectory(group_id));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Individual effects
    // ------------------------------------------------------------------

    /// Speed is in cycles per second.
    pub fn set_individual_trajectory(
        &mut self,
        source: SourceId,
        shape: TrajectoryShape,
        params: ShapeParams,
        movement_mode: MovementMode,
        speed: f64,
    ) -> Result<()> {
        params.validate()?;
        let speed = finite("trajectory speed", speed)?;
        let seed = self.config.seed ^ u64::from(source.0).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let motion = self.source_mut(source)?;
        match motion.component_mut(ComponentId::IndividualTrajectory) {
            Some(MotionComponent::IndividualTrajectory(trajectory)) => {
                trajectory.reconfigure(shape, params, movement_mode, speed);
                motion.set_enabled(ComponentId::IndividualTrajectory, true);
            }
            _ => {
                motion.attach(MotionComponent::IndividualTrajectory(IndividualTrajectory::new(
                    shape,
                    params,
                    movement_mode,
                    speed,
                    seed,
                )));
            }
        }
        Ok(())
    }

    pub fn clear_individual_trajectory(&mut self, source: SourceId) -> Result<()> {
        self.source_mut(source)?
            .detach(ComponentId::IndividualTrajectory);
        Ok(())
    }

    /// Continuous rotation of one source. Without a `center` the source
    /// turns about its creation point.
    pub fn set_individual_rotation(
        &mut self,
        source: SourceId,
        center: Option<DVec3>,
        speed_x: f64,
        speed_y: f64,
        speed_z: f64,
    ) -> Result<()> {
        let speeds = finite_vec("rotation speed", DVec3::new(speed_x, speed_y, speed_z))?;
        let center = center.map(|c| finite_vec("rotation center", c)).transpose()?;
        let motion = self.source_mut(source)?;
        let center = center.unwrap_or_else(|| motion.initial_position());
        match motion.component_mut(ComponentId::IndividualRotation) {
            Some(MotionComponent::IndividualRotation(rotation)) => {
                rotation.center = center;
                rotation.angular_velocity = speeds;
                motion.set_enabled(ComponentId::IndividualRotation, true);
            }
            _ => {
                motion.attach(MotionComponent::IndividualRotation(Rotation::new(center, speeds)));
            }
        }
        Ok(())
    }

    pub fn clear_individual_rotation(&mut self, source: SourceId) -> Result<()> {
        self.source_mut(source)?.detach(ComponentId::IndividualRotation);
        Ok(())
    }

    pub fn set_manual_individual_rotation(
        &mut self,
        source: SourceId,
        center: Option<DVec3>,
        yaw: f64,
        pitch: f64,
        roll: f64,
        interpolation_speed: f64,
    ) -> Result<()> {
        let target = orientation(yaw, pitch, roll)?;
        let speed = positive("interpolation speed", interpolation_speed)?;
        let center = center.map(|c| finite_vec("rotation center", c)).transpose()?;
        let motion = self.source_mut(source)?;
        let center = center.unwrap_or_else(|| motion.initial_position());
        match motion.component_mut(ComponentId::ManualIndividualRotation) {
            Some(MotionComponent::ManualIndividualRotation(rotation)) => {
                rotation.center = center;
                rotation.retarget(target, speed);
                motion.set_enabled(ComponentId::ManualIndividualRotation, true);
            }
            _ => {
                motion.attach(MotionComponent::ManualIndividualRotation(ManualRotation::new(
                    center, target, speed,
                )));
            }
        }
        Ok(())
    }

    pub fn clear_manual_individual_rotation(&mut self, source: SourceId) -> Result<()> {
        self.source_mut(source)?
            .detach(ComponentId::ManualIndividualRotation);
        Ok(())
    }

    /// Pulls one source toward a fixed point.
    pub fn set_source_concentration(&mut self, source: SourceId, factor: f64, target: DVec3) -> Result<()> {
        let factor = clamp_factor(factor)?;
        let target = finite_vec("concentration target", target)?;
        self.source_mut(source)?
            .attach(MotionComponent::Concentration(Concentration::new(target, factor)));
        Ok(())
    }

    pub fn clear_source_concentration(&mut self, source: SourceId) -> Result<()> {
        self.source_mut(source)?.detach(ComponentId::Concentration);
        Ok(())
    }

    /// Enables or disables one attached component without touching its state.
    pub fn set_component_enabled(&mut self, source: SourceId, component: ComponentId, enabled: bool) -> Result<()> {
        if self.source_mut(source)?.set_enabled(component, enabled) {
            Ok(())
        } else {
            Err(MotionError::validation(format!(
                "source {source} has no {component:?} component"
            )))
        }
    }

    /// Validates and applies an externally supplied command.
    pub fn apply(&mut self, command: EffectCommand) -> Result<()> {
        match command {
            EffectCommand::SetConcentration {
                group,
                factor,
                target,
            } => self.set_concentration(group, factor, target),
            EffectCommand::ClearConcentration { group } => self.clear_concentration(group),
            EffectCommand::SetMacroRotation {
                group,
                speed_x,
                speed_y,
                speed_z,
            } => self.set_macro_rotation(group, speed_x, speed_y, speed_z),
            EffectCommand::ClearMacroRotation { group } => self.clear_macro_rotation(group),
            EffectCommand::SetManualMacroRotation {
                group,
                yaw,
                pitch,
                roll,
                interpolation_speed,
            } => self.set_manual_macro_rotation(group, yaw, pitch, roll, interpolation_speed),
            EffectCommand::ClearManualMacroRotation { group } => self.clear_manual_macro_rotation(group),
            EffectCommand::SetMacroTrajectory {
                group,
                shape,
                params,
                speed,
            } => self.set_macro_trajectory(group, shape.parse::<TrajectoryShape>()?, params, speed),
            EffectCommand::ClearMacroTrajectory { group } => self.clear_macro_trajectory(group),
            EffectCommand::SetIndividualTrajectory {
                source,
                shape,
                params,
                movement_mode,
                speed,
            } => self.set_individual_trajectory(
                source,
                shape.parse::<TrajectoryShape>()?,
                params,
                movement_mode.parse::<MovementMode>()?,
                speed,
            ),
            EffectCommand::ClearIndividualTrajectory { source } => self.clear_individual_trajectory(source),
            EffectCommand::SetIndividualRotation {
                source,
                center,
                speed_x,
                speed_y,
                speed_z,
            } => self.set_individual_rotation(source, center, speed_x, speed_y, speed_z),
            EffectCommand::ClearIndividualRotation { source } => self.clear_individual_rotation(source),
            EffectCommand::SetManualIndividualRotation {
                source,
                center,
                yaw,
                pitch,
                roll,
                interpolation_speed,
            } => self.set_manual_individual_rotation(source, center, yaw, pitch, roll, interpolation_speed),
            EffectCommand::ClearManualIndividualRotation { source } => {
                self.clear_manual_individual_rotation(source)
            }
            EffectCommand::SetSourceConcentration {
                source,
                factor,
                target,
            } => self.set_source_concentration(source, factor, target),
            EffectCommand::ClearSourceConcentration { source } => self.clear_source_concentration(source),
            EffectCommand::SetEnabled {
                source,
                component,
                enabled,
            } => self.set_component_enabled(source, component, enabled),
        }
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Advances every source by `dt` seconds and publishes the frame.
    ///
    /// A non-positive `dt` moves nothing and leaves time untouched, but a
    /// frame is still published.
    pub fn tick(&mut self, dt: f64) -> &PositionFrame {
        let dt = if dt.is_finite() { dt } else { 0.0 };
        self.clock.advance(dt);

        let frames = self.advance_groups(dt);
        let ctx = TickContext::new(self.clock.time_seconds, dt, &self.config, &frames);

        self.frame.rebuild(self.clock.ticks, self.clock.time_seconds);
        for (id, motion) in self.sources.iter_mut() {
            let position = motion.compose(&ctx);
            self.frame.write(*id, position);
        }

        if let Err(err) = self.transport.publish(&self.frame) {
            tracing::debug!(%err, tick = self.clock.ticks, "frame delivery failed");
        }
        &self.frame
    }

    fn advance_groups(&mut self, dt: f64) -> BTreeMap<GroupId, GroupFrame> {
        let epsilon = self.config.angular_epsilon;
        self.groups
            .iter_mut()
            .map(|(id, group)| {
                let positions: Vec<DVec3> = group
                    .members()
                    .iter()
                    .filter_map(|member| self.sources.get(member).map(SourceMotion::position))
                    .collect();
                let centroid = (!positions.is_empty())
                    .then(|| positions.iter().copied().sum::<DVec3>() / positions.len() as f64);
                (*id, group.advance(dt, epsilon, centroid))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::{FRAC_PI_2, PI};

    use glam::DMat3;

    use super::*;
    use crate::transport::RecordingTransport;

    const DT: f64 = 1.0 / 60.0;
    const EPS: f64 = 1e-6;

    fn engine() -> MotionEngine {
        MotionEngine::new(EngineConfig::default()).unwrap()
    }

    fn run(engine: &mut MotionEngine, ticks: usize) {
        for _ in 0..ticks {
            engine.tick(DT);
        }
    }

    #[test]
    fn circle_group_rotates_a_quarter_turn_about_y() {
        let mut engine = engine();
        let (group, ids) = engine
            .create_group("circle", 4, FormationParams::with_radius(3.0, DVec3::ZERO))
            .unwrap();
        let initial: Vec<DVec3> = ids.iter().map(|id| engine.position(*id).unwrap()).collect();

        engine.set_macro_rotation(group, 0.0, FRAC_PI_2, 0.0).unwrap();
        run(&mut engine, 60);

        for (id, start) in ids.iter().zip(&initial) {
            // right-handed quarter turn about +Y: (x, y, z) -> (z, y, -x)
            let expected = DVec3::new(start.z, start.y, -start.x);
            let actual = engine.position(*id).unwrap();
            assert!((actual - expected).length() < EPS, "{id}: {actual} vs {expected}");
        }
    }

    #[test]
    fn concentration_pulls_a_source_onto_the_target() {
        let mut engine = engine();
        engine.add_source(SourceId(0), DVec3::new(5.0, 0.0, 0.0)).unwrap();
        let group = engine.create_empty_group(DVec3::ZERO).unwrap();
        engine.add_to_group(group, SourceId(0)).unwrap();

        engine.set_concentration(group, 0.0, Some(DVec3::ZERO)).unwrap();
        run(&mut engine, 120);

        assert!(engine.position(SourceId(0)).unwrap().length() < 0.1);
    }

    #[test]
    fn manual_rotation_converges_and_keeps_the_group_rigid() {
        let mut engine = engine();
        let center = DVec3::new(1.0, -1.0, 0.5);
        let (group, ids) = engine
            .create_group("circle", 6, FormationParams::with_radius(2.0, center))
            .unwrap();
        let initial: Vec<DVec3> = ids.iter().map(|id| engine.position(*id).unwrap()).collect();

        engine
            .set_manual_macro_rotation(group, FRAC_PI_2, 0.0, 0.0, PI)
            .unwrap();

        for _ in 0..40 {
            engine.tick(DT);
            for id in &ids {
                let relative = engine.position(*id).unwrap() - center;
                assert!((relative.truncate().length() - 2.0).abs() < EPS);
            }
        }

        let rotation = engine.group(group).unwrap().manual_rotation().unwrap();
        assert!((rotation.current().yaw - FRAC_PI_2).abs() < EPS);
        assert!(rotation.is_inert());

        for (id, start) in ids.iter().zip(&initial) {
            let relative = *start - center;
            let expected = center + DVec3::new(-relative.y, relative.x, relative.z);
            assert!((engine.position(*id).unwrap() - expected).length() < EPS);
        }

        // inert: further ticks leave everything in place
        let before = engine.position(ids[0]).unwrap();
        run(&mut engine, 10);
        assert_eq!(engine.position(ids[0]).unwrap(), before);

        // re-armed by a new target
        engine
            .set_manual_macro_rotation(group, 0.0, 0.0, 0.0, PI)
            .unwrap();
        run(&mut engine, 40);
        assert!((engine.position(ids[0]).unwrap() - initial[0]).length() < EPS);
    }

    #[test]
    fn effects_compose_without_overwriting_each_other() {
        let mut engine = engine();
        let (group, ids) = engine
            .create_group("line", 2, FormationParams::with_spacing(2.0, DVec3::ZERO))
            .unwrap();
        engine.set_macro_rotation(group, 0.0, 0.0, 1.0).unwrap();
        engine
            .set_individual_trajectory(
                ids[0],
                TrajectoryShape::Circle,
                ShapeParams::with_radius(0.5),
                MovementMode::Fix,
                0.5,
            )
            .unwrap();

        let mut reference = self::engine();
        let (reference_group, _) = reference
            .create_group("line", 2, FormationParams::with_spacing(2.0, DVec3::ZERO))
            .unwrap();
        reference.set_macro_rotation(reference_group, 0.0, 0.0, 1.0).unwrap();

        engine.tick(DT);
        reference.tick(DT);

        let rotated_only = reference.position(ids[0]).unwrap();
        let composed = engine.position(ids[0]).unwrap();
        let trajectory_step = (TrajectoryShape::Circle.point(0.5 * DT, &ShapeParams::with_radius(0.5))
            - TrajectoryShape::Circle.point(0.0, &ShapeParams::with_radius(0.5)))
        .length();
        assert!(((composed - rotated_only).length() - trajectory_step).abs() < 1e-12);
        // the untouched member is unaffected by its neighbour's trajectory
        assert_eq!(engine.position(ids[1]).unwrap(), reference.position(ids[1]).unwrap());
    }

    #[test]
    fn publishes_one_complete_frame_per_tick() {
        let recorder = RecordingTransport::new();
        let mut engine =
            MotionEngine::with_transport(EngineConfig::default(), Box::new(recorder.clone())).unwrap();
        engine.add_source(SourceId(0), DVec3::X).unwrap();
        engine.add_source(SourceId(2), DVec3::Y).unwrap();

        run(&mut engine, 3);
        let frames = recorder.frames().unwrap();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|frame| frame.len() == 2));
        assert_eq!(frames[2].tick, 3);
        assert_eq!(frames[2].get(SourceId(2)), Some(DVec3::Y));
        assert_eq!(frames[2].get(SourceId(1)), None);
    }

    #[test]
    fn non_positive_dt_moves_nothing() {
        let mut engine = engine();
        let (group, ids) = engine
            .create_group("circle", 3, FormationParams::with_radius(1.0, DVec3::ZERO))
            .unwrap();
        engine.set_macro_rotation(group, 1.0, 1.0, 1.0).unwrap();
        let before = engine.position(ids[1]).unwrap();
        engine.tick(0.0);
        engine.tick(-DT);
        engine.tick(f64::NAN);
        assert_eq!(engine.position(ids[1]).unwrap(), before);
        assert_eq!(engine.time(), 0.0);
        assert_eq!(engine.group(group).unwrap().rotation().unwrap().travelled(), 0.0);
    }

    #[test]
    fn validation_errors_leave_state_unchanged() {
        let mut engine = engine();
        engine.add_source(SourceId(0), DVec3::ZERO).unwrap();

        assert!(matches!(
            engine.add_source(SourceId(0), DVec3::ONE),
            Err(MotionError::DuplicateSourceId(SourceId(0)))
        ));
        assert!(matches!(
            engine.set_macro_rotation(GroupId(5), 0.0, 1.0, 0.0),
            Err(MotionError::UnknownGroupId(GroupId(5)))
        ));
        assert!(matches!(
            engine.set_individual_rotation(SourceId(9), None, 0.0, 0.0, 1.0),
            Err(MotionError::UnknownSourceId(SourceId(9)))
        ));
        assert!(matches!(
            engine.create_group("hexagon", 3, FormationParams::default()),
            Err(MotionError::InvalidFormationParams(_))
        ));
        assert!(matches!(
            engine.create_group("circle", 0, FormationParams::default()),
            Err(MotionError::InvalidFormationParams(_))
        ));
        assert!(engine.groups().next().is_none());

        let group = engine.create_empty_group(DVec3::ZERO).unwrap();
        assert!(matches!(
            engine.remove_from_group(group, SourceId(0)),
            Err(MotionError::SourceNotInGroup { .. })
        ));
        assert!(matches!(
            engine.set_manual_macro_rotation(group, 1.0, 0.0, 0.0, 0.0),
            Err(MotionError::Validation(_))
        ));
        assert!(engine.group(group).unwrap().manual_rotation().is_none());
        assert!(matches!(
            engine.apply(EffectCommand::SetIndividualTrajectory {
                source: SourceId(0),
                shape: "circle".to_string(),
                params: ShapeParams::default(),
                movement_mode: "velocity".to_string(),
                speed: 1.0,
            }),
            Err(MotionError::Validation(_))
        ));
        assert!(engine.source(SourceId(0)).unwrap().components().next().is_none());
    }

    #[test]
    fn concentration_factor_is_clamped() {
        let mut engine = engine();
        let (group, _) = engine
            .create_group("circle", 2, FormationParams::with_radius(1.0, DVec3::ZERO))
            .unwrap();
        engine.set_concentration(group, 3.5, None).unwrap();
        let concentration = engine.group(group).unwrap().concentration().unwrap();
        assert_eq!(concentration.factor, 1.0);
        assert_eq!(concentration.mode, ConcentrationMode::Centroid);
    }

    #[test]
    fn removing_sources_and_groups_keeps_bookkeeping_consistent() {
        let mut engine = engine();
        let (group, ids) = engine
            .create_group("grid", 4, FormationParams::with_spacing(1.0, DVec3::ZERO))
            .unwrap();
        engine.set_macro_rotation(group, 0.0, 0.0, 1.0).unwrap();

        engine.remove_source(ids[0]).unwrap();
        assert!(!engine.group(group).unwrap().contains(ids[0]));
        assert!(matches!(
            engine.remove_source(ids[0]),
            Err(MotionError::UnknownSourceId(_))
        ));

        // a member keeping a disabled link to a deleted group is harmless
        engine
            .set_component_enabled(ids[1], ComponentId::MacroRotation(group), false)
            .unwrap();
        let mut orphan = engine.source(ids[1]).unwrap().clone();
        engine.remove_group(group).unwrap();
        assert!(engine.source(ids[1]).unwrap().components().next().is_none());

        let config = EngineConfig::default();
        let frames = BTreeMap::new();
        orphan.set_enabled(ComponentId::MacroRotation(group), true);
        let before = orphan.position();
        assert_eq!(orphan.compose(&TickContext::new(DT, DT, &config, &frames)), before);

        engine.tick(DT);
        assert_eq!(engine.frame().len(), 3);
    }

    #[test]
    fn group_creation_reuses_existing_ids() {
        let mut engine = engine();
        engine.add_source(SourceId(1), DVec3::new(9.0, 9.0, 9.0)).unwrap();
        let params = FormationParams {
            radius: Some(1.0),
            first_source: Some(SourceId(0)),
            ..Default::default()
        };
        let (_, ids) = engine.create_group("sphere", 3, params).unwrap();
        assert_eq!(ids, vec![SourceId(0), SourceId(1), SourceId(2)]);
        assert_eq!(engine.position(SourceId(1)).unwrap(), DVec3::new(9.0, 9.0, 9.0));

        let (_, next) = engine
            .create_group("line", 2, FormationParams::default())
            .unwrap();
        assert_eq!(next, vec![SourceId(3), SourceId(4)]);
    }

    #[test]
    fn late_members_pick_up_active_group_effects() {
        let mut engine = engine();
        let group = engine.create_empty_group(DVec3::ZERO).unwrap();
        engine.set_macro_rotation(group, 0.0, 0.0, 1.0).unwrap();
        engine.add_source(SourceId(0), DVec3::X).unwrap();
        engine.add_to_group(group, SourceId(0)).unwrap();

        assert!(engine
            .source(SourceId(0))
            .unwrap()
            .is_enabled(ComponentId::MacroRotation(group)));

        engine.remove_from_group(group, SourceId(0)).unwrap();
        assert!(engine
            .source(SourceId(0))
            .unwrap()
            .component(ComponentId::MacroRotation(group))
            .is_none());
    }

    #[test]
    fn individual_rotation_defaults_to_an_in_place_no_op() {
        let mut engine = engine();
        engine.add_source(SourceId(0), DVec3::new(1.0, 2.0, 3.0)).unwrap();
        engine
            .set_individual_rotation(SourceId(0), None, 1.0, 2.0, 3.0)
            .unwrap();
        run(&mut engine, 30);
        assert_eq!(engine.position(SourceId(0)).unwrap(), DVec3::new(1.0, 2.0, 3.0));

        engine
            .set_individual_rotation(SourceId(0), Some(DVec3::new(1.0, 0.0, 3.0)), 0.0, 0.0, PI)
            .unwrap();
        run(&mut engine, 60);
        let position = engine.position(SourceId(0)).unwrap();
        assert!((position - DVec3::new(1.0, -2.0, 3.0)).length() < EPS);
    }

    #[test]
    fn commands_apply_through_the_same_validation() {
        let mut engine = engine();
        let (group, ids) = engine
            .create_group("circle", 2, FormationParams::with_radius(1.0, DVec3::ZERO))
            .unwrap();
        let commands: Vec<EffectCommand> = serde_json::from_str(&format!(
            r#"[
                {{ "command": "set_macro_trajectory", "group": {group}, "shape": "square", "speed": 0.1 }},
                {{ "command": "set_individual_trajectory", "source": {first}, "shape": "lissajous",
                   "movement_mode": "random", "speed": 0.2 }},
                {{ "command": "set_source_concentration", "source": {first}, "factor": 0.5,
                   "target": [0.0, 0.0, 0.0] }}
            ]"#,
            group = group.0,
            first = ids[0].0,
        ))
        .unwrap();
        for command in commands {
            engine.apply(command).unwrap();
        }

        let slots: Vec<_> = engine
            .source(ids[0])
            .unwrap()
            .components()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(
            slots,
            vec![
                ComponentId::IndividualTrajectory,
                ComponentId::Concentration,
                ComponentId::MacroTrajectory(group),
            ]
        );
        run(&mut engine, 30);
        assert!(engine.frame().iter().all(|(_, position)| position.is_finite()));
    }

    #[test]
    fn sparse_ids_do_not_grow_the_frame() {
        let mut engine = engine();
        engine.add_source(SourceId(u32::MAX - 1), DVec3::X).unwrap();
        engine.add_source(SourceId(u32::MAX), DVec3::Y).unwrap();
        engine.tick(DT);
        assert_eq!(engine.frame().len(), 2);
        assert_eq!(engine.frame().get(SourceId(u32::MAX - 1)), Some(DVec3::X));

        // no id is left after u32::MAX
        assert!(matches!(
            engine.create_group("line", 1, FormationParams::default()),
            Err(MotionError::InvalidFormationParams(_))
        ));
        assert!(engine.groups().next().is_none());
    }

    #[test]
    fn source_limit_is_enforced_before_allocating() {
        let config = EngineConfig {
            max_sources: 4,
            ..Default::default()
        };
        let mut engine = MotionEngine::new(config).unwrap();

        for count in [5, i64::MAX] {
            assert!(matches!(
                engine.create_group("circle", count, FormationParams::default()),
                Err(MotionError::InvalidFormationParams(_))
            ));
        }
        let (_, ids) = engine
            .create_group("circle", 3, FormationParams::default())
            .unwrap();
        assert_eq!(ids.len(), 3);
        assert!(matches!(
            engine.create_group("line", 2, FormationParams::default()),
            Err(MotionError::InvalidFormationParams(_))
        ));

        engine.add_source(SourceId(100), DVec3::ZERO).unwrap();
        assert!(matches!(
            engine.add_source(SourceId(101), DVec3::ZERO),
            Err(MotionError::Validation(_))
        ));
        assert_eq!(engine.sources().count(), 4);
        assert_eq!(engine.groups().count(), 1);
    }

    #[test]
    fn rotation_follows_the_group_along_its_path() {
        let mut engine = engine();
        let (group, ids) = engine
            .create_group("circle", 4, FormationParams::with_radius(1.0, DVec3::ZERO))
            .unwrap();
        let initial: Vec<DVec3> = ids.iter().map(|id| engine.position(*id).unwrap()).collect();

        engine
            .set_macro_trajectory(group, TrajectoryShape::Line, ShapeParams::with_radius(5.0), 0.25)
            .unwrap();
        engine.set_macro_rotation(group, 0.0, 0.0, 1.0).unwrap();
        run(&mut engine, 120);

        // half a cycle along the line: from x = -5 to x = +5
        let travelled = DVec3::new(10.0, 0.0, 0.0);
        let positions: Vec<DVec3> = ids.iter().map(|id| engine.position(*id).unwrap()).collect();
        let centroid = positions.iter().copied().sum::<DVec3>() / positions.len() as f64;
        assert!((centroid - travelled).length() < 1e-9, "centroid {centroid}");
        assert!((engine.group(group).unwrap().center() - travelled).length() < 1e-9);

        let turn = DMat3::from_rotation_z(2.0);
        for (position, start) in positions.iter().zip(&initial) {
            let expected = travelled + turn * *start;
            assert!((*position - expected).length() < 1e-9, "{position} vs {expected}");
        }
    }
}
