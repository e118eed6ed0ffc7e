//! Replays scripted editing sessions from JSON.
//!
//! A scenario names a catalog of part definitions, the foundation to start
//! from and a list of steps. Every step produces one [`ScenarioEvent`]; the
//! run ends with [`ScenarioEvent::Finished`].

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use glam::DVec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::assembly::PartId;
use crate::error::{AssemblyError, ScenarioError};
use crate::history::UndoStack;
use crate::model::{Catalog, PartDefinition};
use crate::placement::{PlacementConfig, PlacementOutcome};
use crate::session::AssemblySession;
use crate::types::{Positioned, Transform};

#[derive(Clone, Debug, Deserialize)]
pub struct Scenario {
    pub catalog: Catalog,
    pub foundation: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One scripted user action. Parts are addressed by the label given when
/// they were placed.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Adds a new part. This is not a move, so `undo` does not revert it.
    Place {
        part: String,
        label: String,
        /// Where to drop the part; defaults to the foundation's position.
        #[serde(default)]
        at: Option<DVec3>,
    },
    Move {
        label: String,
        to: DVec3,
        #[serde(default)]
        yaw_degrees: f64,
    },
    Rotate {
        label: String,
        degrees: f64,
    },
    Remove {
        label: String,
    },
    Undo,
    Redo,
}

/// Output of a scenario run, one per line when printed.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioEvent {
    Foundation {
        name: String,
    },
    Placement {
        step: usize,
        action: &'static str,
        label: String,
        outcome: &'static str,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        position: Option<DVec3>,
    },
    Removed {
        step: usize,
        labels: Vec<String>,
        parts: usize,
    },
    History {
        step: usize,
        action: &'static str,
        applied: bool,
    },
    StepFailed {
        step: usize,
        error: String,
    },
    Finished {
        steps: usize,
        failed_steps: usize,
        parts: usize,
        placed: usize,
    },
}

/// Knobs for a scenario run.
#[derive(Clone, Copy, Debug)]
pub struct ScenarioOptions {
    pub placement: PlacementConfig,
    pub history_limit: usize,
    /// Abort at the first failing step instead of reporting it and going on.
    pub stop_on_error: bool,
}

impl Default for ScenarioOptions {
    fn default() -> Self {
        Self {
            placement: PlacementConfig::default(),
            history_limit: UndoStack::<()>::DEFAULT_LIMIT,
            stop_on_error: false,
        }
    }
}

impl Scenario {
    pub fn from_json_str(json: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = serde_json::from_str(json)?;
        for part in &scenario.catalog.parts {
            part.validate().map_err(AssemblyError::from)?;
        }
        if scenario.catalog.find(&scenario.foundation).is_none() {
            return Err(ScenarioError::UnknownDefinition(scenario.foundation));
        }
        Ok(scenario)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    /// Replays the scenario, handing every event to `emit`.
    ///
    /// # Returns
    /// The final event, also passed to `emit`.
    pub fn run(
        &self,
        options: &ScenarioOptions,
        mut emit: impl FnMut(&ScenarioEvent),
    ) -> Result<ScenarioEvent, ScenarioError> {
        let mut runner = Runner::new(self, options);
        let foundation = self.foundation.clone();
        let definition = runner.definition(&foundation)?;
        runner.session.set_foundation(definition)?;
        emit(&ScenarioEvent::Foundation { name: foundation });

        let mut failed_steps = 0;
        for (index, step) in self.steps.iter().enumerate() {
            let event = match runner.apply(index, step) {
                Ok(event) => event,
                Err(err) if options.stop_on_error => return Err(err),
                Err(err) => {
                    warn!("Step {} failed: {}", index, err);
                    failed_steps += 1;
                    ScenarioEvent::StepFailed {
                        step: index,
                        error: err.to_string(),
                    }
                }
            };
            emit(&event);
        }

        let assembly = runner.session.assembly();
        let finished = ScenarioEvent::Finished {
            steps: self.steps.len(),
            failed_steps,
            parts: assembly.len(),
            placed: assembly.iter().filter(|(_, p)| p.registered).count(),
        };
        info!("Scenario finished with {} parts", assembly.len());
        emit(&finished);
        Ok(finished)
    }
}

struct Runner {
    definitions: HashMap<String, Arc<PartDefinition>>,
    labels: BTreeMap<String, PartId>,
    session: AssemblySession,
}

impl Runner {
    fn new(scenario: &Scenario, options: &ScenarioOptions) -> Self {
        let definitions = scenario
            .catalog
            .parts
            .iter()
            .map(|def| (def.name.clone(), Arc::new(def.clone())))
            .collect();
        Self {
            definitions,
            labels: BTreeMap::new(),
            session: AssemblySession::new(options.placement, options.history_limit),
        }
    }

    fn definition(&self, name: &str) -> Result<Arc<PartDefinition>, ScenarioError> {
        self.definitions
            .get(name)
            .cloned()
            .ok_or_else(|| ScenarioError::UnknownDefinition(name.to_string()))
    }

    fn part(&self, label: &str) -> Result<PartId, ScenarioError> {
        self.labels
            .get(label)
            .copied()
            .filter(|id| self.session.assembly().contains(*id))
            .ok_or_else(|| ScenarioError::UnknownLabel(label.to_string()))
    }

    fn placement_event(
        &self,
        step: usize,
        action: &'static str,
        label: &str,
        outcome: PlacementOutcome,
        id: PartId,
    ) -> ScenarioEvent {
        let position = self.session.assembly().get(id).map(|p| p.position());
        ScenarioEvent::Placement {
            step,
            action,
            label: label.to_string(),
            outcome: outcome.code(),
            message: outcome.to_string(),
            position,
        }
    }

    fn apply(&mut self, index: usize, step: &Step) -> Result<ScenarioEvent, ScenarioError> {
        debug!("Applying step {}: {:?}", index, step);
        match step {
            Step::Place { part, label, at } => {
                if self.part(label).is_ok() {
                    return Err(ScenarioError::DuplicateLabel(label.clone()));
                }
                let definition = self.definition(part)?;
                self.session.select_foundation()?;
                let outcome = self.session.start_placing_at(definition, *at)?;
                if outcome == PlacementOutcome::FailureNoFreePlace {
                    let foundation = self.session.foundation().ok_or(AssemblyError::NoFoundation)?;
                    return Ok(self.placement_event(index, "place", label, outcome, foundation));
                }
                let id = self.session.selected().ok_or(AssemblyError::NoFoundation)?;
                self.labels.insert(label.clone(), id);
                Ok(self.placement_event(index, "place", label, outcome, id))
            }
            Step::Move { label, to, yaw_degrees } => {
                let id = self.part(label)?;
                let target = Transform::from_translation_yaw(*to, yaw_degrees.to_radians());
                let outcome = self.session.move_part(id, target)?;
                Ok(self.placement_event(index, "move", label, outcome, id))
            }
            Step::Rotate { label, degrees } => {
                let id = self.part(label)?;
                self.session.select(id)?;
                let outcome = self
                    .session
                    .rotate_selected(*degrees)?
                    .unwrap_or(PlacementOutcome::FailureInvalid);
                Ok(self.placement_event(index, "rotate", label, outcome, id))
            }
            Step::Remove { label } => {
                let id = self.part(label)?;
                self.session.select(id)?;
                let removed = self.session.delete_selected()?;
                let labels: Vec<String> = self
                    .labels
                    .iter()
                    .filter(|(_, part)| removed.contains(part))
                    .map(|(name, _)| name.clone())
                    .collect();
                self.labels.retain(|_, part| !removed.contains(part));
                Ok(ScenarioEvent::Removed {
                    step: index,
                    labels,
                    parts: removed.len(),
                })
            }
            Step::Undo => Ok(ScenarioEvent::History {
                step: index,
                action: "undo",
                applied: self.session.undo(),
            }),
            Step::Redo => Ok(ScenarioEvent::History {
                step: index,
                action: "redo",
                applied: self.session.redo(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SCENARIO: &str = r#"{
        "catalog": {
            "parts": [
                {
                    "name": "Stand",
                    "grids_provided": [
                        { "h_count": 3, "v_count": 3, "center": [0.0, 0.36, 0.0], "max_height": 10.0 }
                    ]
                },
                {
                    "name": "Peg",
                    "grid_pattern_required": [
                        { "h_count": 1, "v_count": 1, "center": [0.0, 0.0, 0.0] }
                    ]
                }
            ]
        },
        "foundation": "Stand",
        "steps": [
            { "action": "place", "part": "Peg", "label": "a" },
            { "action": "place", "part": "Peg", "label": "b", "at": [0.12, 0.4, 0.12] },
            { "action": "move", "label": "a", "to": [-0.12, 0.36, -0.12] },
            { "action": "undo" },
            { "action": "redo" },
            { "action": "remove", "label": "b" },
            { "action": "rotate", "label": "missing", "degrees": 90.0 }
        ]
    }"#;

    fn collect(scenario: &Scenario, options: &ScenarioOptions) -> Vec<ScenarioEvent> {
        let mut events = Vec::new();
        scenario.run(options, |e| events.push(e.clone())).unwrap();
        events
    }

    #[test]
    fn test_scenario_replay() {
        let scenario = Scenario::from_json_str(SCENARIO).unwrap();
        let events = collect(&scenario, &ScenarioOptions::default());
        assert_eq!(events.len(), 9);

        let outcomes: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                ScenarioEvent::Placement { outcome, .. } => Some(*outcome),
                _ => None,
            })
            .collect();
        assert_eq!(outcomes, vec!["success", "success", "success"]);

        assert!(matches!(
            events[4],
            ScenarioEvent::History { action: "undo", applied: true, .. }
        ));
        match &events[6] {
            ScenarioEvent::Removed { labels, parts, .. } => {
                assert_eq!(labels, &vec!["b".to_string()]);
                assert_eq!(*parts, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(events[7], ScenarioEvent::StepFailed { step: 6, .. }));
        assert!(matches!(
            events[8],
            ScenarioEvent::Finished { steps: 7, failed_steps: 1, parts: 2, placed: 2 }
        ));
    }

    #[test]
    fn test_stop_on_error() {
        let scenario = Scenario::from_json_str(SCENARIO).unwrap();
        let options = ScenarioOptions {
            stop_on_error: true,
            ..ScenarioOptions::default()
        };
        let err = scenario.run(&options, |_| {}).unwrap_err();
        assert!(matches!(err, ScenarioError::UnknownLabel(label) if label == "missing"));
    }

    #[test]
    fn test_events_serialize_with_type_tag() {
        let event = ScenarioEvent::History {
            step: 3,
            action: "undo",
            applied: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "history");
        assert_eq!(json["applied"], false);
    }

    #[test]
    fn test_unknown_foundation_is_rejected() {
        let json = r#"{ "catalog": { "parts": [] }, "foundation": "Nowhere" }"#;
        assert!(matches!(
            Scenario::from_json_str(json),
            Err(ScenarioError::UnknownDefinition(name)) if name == "Nowhere"
        ));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SCENARIO.as_bytes()).unwrap();
        let scenario = Scenario::from_path(file.path()).unwrap();
        assert_eq!(scenario.steps.len(), 7);

        let missing = file.path().with_extension("missing");
        assert!(matches!(Scenario::from_path(missing), Err(ScenarioError::Io(_))));
    }

    #[test]
    fn test_place_at_point_is_not_undoable() {
        let json = SCENARIO.replace(
            r#"{ "action": "move", "label": "a", "to": [-0.12, 0.36, -0.12] },"#,
            "",
        );
        let scenario = Scenario::from_json_str(&json).unwrap();
        assert_eq!(scenario.steps.len(), 6);
        let events = collect(&scenario, &ScenarioOptions::default());
        match &events[2] {
            ScenarioEvent::Placement { outcome, position, .. } => {
                assert_eq!(*outcome, "success");
                let position = position.unwrap();
                assert!((position - DVec3::new(0.12, 0.36, 0.12)).length() < 1e-9);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(
            events[3],
            ScenarioEvent::History { action: "undo", applied: false, .. }
        ));
    }
}
