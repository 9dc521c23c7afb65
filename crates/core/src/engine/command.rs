use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::{component::trajectory::ShapeParams, ComponentId, GroupId, SourceId};

/// Effect configuration request, as it arrives from outside the engine.
///
/// Shape and mode names stay strings here and are parsed when the command is
/// applied, so an unknown name is rejected before any state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum EffectCommand {
    SetConcentration {
        group: GroupId,
        factor: f64,
        #[serde(default)]
        target: Option<DVec3>,
    },
    ClearConcentration {
        group: GroupId,
    },
    SetMacroRotation {
        group: GroupId,
        #[serde(default)]
        speed_x: f64,
        #[serde(default)]
        speed_y: f64,
        #[serde(default)]
        speed_z: f64,
    },
    ClearMacroRotation {
        group: GroupId,
    },
    SetManualMacroRotation {
        group: GroupId,
        #[serde(default)]
        yaw: f64,
        #[serde(default)]
        pitch: f64,
        #[serde(default)]
        roll: f64,
        interpolation_speed: f64,
    },
    ClearManualMacroRotation {
        group: GroupId,
    },
    SetMacroTrajectory {
        group: GroupId,
        shape: String,
        #[serde(default)]
        params: ShapeParams,
        speed: f64,
    },
    ClearMacroTrajectory {
        group: GroupId,
    },
    SetIndividualTrajectory {
        source: SourceId,
        shape: String,
        #[serde(default)]
        params: ShapeParams,
        movement_mode: String,
        speed: f64,
    },
    ClearIndividualTrajectory {
        source: SourceId,
    },
    SetIndividualRotation {
        source: SourceId,
        #[serde(default)]
        center: Option<DVec3>,
        #[serde(default)]
        speed_x: f64,
        #[serde(default)]
        speed_y: f64,
        #[serde(default)]
        speed_z: f64,
    },
    ClearIndividualRotation {
        source: SourceId,
    },
    SetManualIndividualRotation {
        source: SourceId,
        #[serde(default)]
        center: Option<DVec3>,
        #[serde(default)]
        yaw: f64,
        #[serde(default)]
        pitch: f64,
        #[serde(default)]
        roll: f64,
        interpolation_speed: f64,
    },
    ClearManualIndividualRotation {
        source: SourceId,
    },
    SetSourceConcentration {
        source: SourceId,
        factor: f64,
        target: DVec3,
    },
    ClearSourceConcentration {
        source: SourceId,
    },
    SetEnabled {
        source: SourceId,
        component: ComponentId,
        enabled: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_json() {
        let command: EffectCommand = serde_json::from_str(
            r#"{ "command": "set_individual_trajectory", "source": 2, "shape": "circle",
                 "params": { "radius": 2.0 }, "movement_mode": "fix", "speed": 0.25 }"#,
        )
        .unwrap();
        match command {
            EffectCommand::SetIndividualTrajectory {
                source,
                shape,
                params,
                movement_mode,
                speed,
            } => {
                assert_eq!(source, SourceId(2));
                assert_eq!(shape, "circle");
                assert_eq!(params.radius, 2.0);
                assert_eq!(params.turns, ShapeParams::default().turns);
                assert_eq!(movement_mode, "fix");
                assert_eq!(speed, 0.25);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn component_ids_round_trip_through_json() {
        let command = EffectCommand::SetEnabled {
            source: SourceId(0),
            component: ComponentId::MacroRotation(GroupId(3)),
            enabled: false,
        };
        let json = serde_json::to_string(&command).unwrap();
        assert!(json.contains("macro_rotation"));
        assert_eq!(serde_json::from_str::<EffectCommand>(&json).unwrap(), command);
    }
}
