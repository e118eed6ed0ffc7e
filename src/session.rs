//! Interactive placement flow on top of an [`Assembly`].
//!
//! The session tracks the foundation, the current selection and whether the
//! selection is being dragged. Moves of placed parts are recorded in a
//! bounded history so they can be undone.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use glam::DVec3;
use tracing::{debug, info, warn};

use crate::assembly::{Assembly, PartId};
use crate::error::AssemblyError;
use crate::history::{Command, UndoStack};
use crate::model::PartDefinition;
use crate::placement::{self, PlacementConfig, PlacementOutcome};
use crate::search::Candidate;
use crate::types::{Positioned, Transform};

/// Shown when a new part finds no support anywhere.
pub const ALL_AREAS_FULL: &str = "ALL AREAS ARE FULL";

/// Where a dragged part came from.
#[derive(Clone, Copy, Debug)]
struct PickUp {
    origin: Transform,
    was_placed: bool,
}

/// One user's editing session.
#[derive(Debug)]
pub struct AssemblySession {
    assembly: Assembly,
    config: PlacementConfig,
    foundation: Option<PartId>,
    selected: Option<PartId>,
    placing: Option<PickUp>,
    placement_succeeded: bool,
    history: UndoStack<Assembly>,
    /// Set by a recorded move that could not be replayed.
    move_failed: Rc<Cell<bool>>,
    message: Option<String>,
}

impl AssemblySession {
    pub fn new(config: PlacementConfig, history_limit: usize) -> Self {
        Self {
            assembly: Assembly::new(),
            config,
            foundation: None,
            selected: None,
            placing: None,
            placement_succeeded: true,
            history: UndoStack::with_limit(history_limit),
            move_failed: Rc::new(Cell::new(false)),
            message: None,
        }
    }

    pub fn assembly(&self) -> &Assembly {
        &self.assembly
    }

    pub fn config(&self) -> &PlacementConfig {
        &self.config
    }

    pub fn foundation(&self) -> Option<PartId> {
        self.foundation
    }

    pub fn selected(&self) -> Option<PartId> {
        self.selected
    }

    pub fn is_placing(&self) -> bool {
        self.placing.is_some()
    }

    pub fn placement_succeeded(&self) -> bool {
        self.placement_succeeded
    }

    /// Last helper text for the user, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn history(&self) -> &UndoStack<Assembly> {
        &self.history
    }

    /// Replaces the foundation. Keeps the current one if it has the same name.
    pub fn set_foundation(&mut self, definition: Arc<PartDefinition>) -> Result<PartId, AssemblyError> {
        if let Some(current) = self.foundation {
            if self.assembly.part(current)?.name() == definition.name {
                return Ok(current);
            }
            self.deselect()?;
            self.assembly.remove_part(current)?;
        }
        let id = self
            .assembly
            .insert_registered(definition, Transform::IDENTITY);
        self.foundation = Some(id);
        self.history.clear();
        info!("Foundation set to {:?}", id);
        Ok(id)
    }

    /// Selects a part, deselecting the previous one first.
    pub fn select(&mut self, id: PartId) -> Result<(), AssemblyError> {
        self.assembly.part(id)?;
        if self.selected.is_some() {
            self.deselect()?;
        }
        self.selected = Some(id);
        self.placement_succeeded = true;
        Ok(())
    }

    pub fn select_foundation(&mut self) -> Result<(), AssemblyError> {
        let foundation = self.foundation.ok_or(AssemblyError::NoFoundation)?;
        self.select(foundation)
    }

    /// Ends the selection. A selection that could not be placed is deleted.
    pub fn deselect(&mut self) -> Result<(), AssemblyError> {
        self.put_down(true)?;
        self.selected = None;
        Ok(())
    }

    /// Creates a part and tries to place it.
    ///
    /// The part starts at the selected part's position, replacing that part
    /// unless it is the foundation, or at the foundation's position when
    /// nothing is selected. If no support is free anywhere the new part is
    /// dropped and the previous selection restored.
    ///
    /// New parts are not recorded in the move history.
    pub fn start_placing(
        &mut self,
        definition: Arc<PartDefinition>,
    ) -> Result<PlacementOutcome, AssemblyError> {
        self.start_placing_at(definition, None)
    }

    /// Like [`start_placing`](Self::start_placing), starting from `start`
    /// when given.
    pub fn start_placing_at(
        &mut self,
        definition: Arc<PartDefinition>,
        start: Option<DVec3>,
    ) -> Result<PlacementOutcome, AssemblyError> {
        let foundation = self.foundation.ok_or(AssemblyError::NoFoundation)?;
        definition.validate_placeable()?;
        let previous = self.selected;
        let replaced = previous.filter(|id| *id != foundation);
        let start = match start {
            Some(point) => point,
            None => self.assembly.part(previous.unwrap_or(foundation))?.position(),
        };

        if let Some(old) = replaced {
            self.assembly.unregister(old)?;
        }
        self.selected = None;
        self.placing = None;
        self.message = None;

        let id = self
            .assembly
            .insert(definition, Transform::from_translation(start));
        let outcome = placement::try_place(&mut self.assembly, id, &self.config)?;

        if outcome == PlacementOutcome::FailureNoFreePlace {
            self.assembly.remove_part(id)?;
            if let Some(old) = replaced {
                placement::try_place(&mut self.assembly, old, &self.config)?;
            }
            if let Some(prev) = previous {
                self.select(prev)?;
            }
            self.message = Some(ALL_AREAS_FULL.to_string());
            warn!("No free place for new part");
            return Ok(outcome);
        }

        if let Some(old) = replaced {
            self.assembly.remove_part(old)?;
        }
        self.select(id)?;
        self.placement_succeeded = outcome.is_success();
        Ok(outcome)
    }

    /// Starts dragging a part. The foundation cannot be picked up.
    pub fn pick_up(&mut self, id: PartId) -> Result<(), AssemblyError> {
        if Some(id) == self.foundation {
            debug!("Ignoring pick up of the foundation");
            return Ok(());
        }
        let part = self.assembly.part(id)?;
        let pick_up = PickUp {
            origin: part.transform,
            was_placed: part.registered,
        };
        if self.selected != Some(id) {
            self.deselect()?;
            self.select(id)?;
        }
        self.begin_drag(id, pick_up)
    }

    fn begin_drag(&mut self, id: PartId, pick_up: PickUp) -> Result<(), AssemblyError> {
        self.assembly.unregister(id)?;
        self.placing = Some(pick_up);
        Ok(())
    }

    /// Moves the dragged part towards `point`.
    ///
    /// `target` restricts snapping to the supports of the part under the
    /// pointer. With `release` the part is put down where it lands.
    pub fn drag(
        &mut self,
        point: DVec3,
        target: Option<PartId>,
        release: bool,
    ) -> Result<Vec<Candidate>, AssemblyError> {
        let (Some(id), Some(_)) = (self.selected, self.placing) else {
            return Ok(Vec::new());
        };
        let candidates =
            placement::snap(&mut self.assembly, id, point, !release, target, &self.config)?;
        if release {
            self.put_down(false)?;
        }
        Ok(candidates)
    }

    /// Ends a drag by placing the selected part.
    ///
    /// Outside a drag, an unsuccessfully placed selection is deleted when
    /// `delete_on_fail` is set.
    ///
    /// # Returns
    /// The placement outcome, or `None` if nothing was being dragged.
    pub fn put_down(&mut self, delete_on_fail: bool) -> Result<Option<PlacementOutcome>, AssemblyError> {
        let Some(pick_up) = self.placing.take() else {
            if !self.placement_succeeded && delete_on_fail {
                if let Some(id) = self.selected.take() {
                    self.assembly.remove_part(id)?;
                }
                self.placement_succeeded = true;
            }
            return Ok(None);
        };
        let Some(id) = self.selected else {
            return Ok(None);
        };

        let outcome = placement::try_place(&mut self.assembly, id, &self.config)?;
        self.placement_succeeded = outcome.is_success();
        if outcome.is_success() {
            let to = self.assembly.part(id)?.transform;
            if pick_up.was_placed && to != pick_up.origin {
                let command = self.move_command(id, pick_up.origin, to);
                self.history.record(command);
            }
        } else if delete_on_fail {
            self.assembly.remove_part(id)?;
            self.selected = None;
            self.placement_succeeded = true;
        }
        Ok(Some(outcome))
    }

    /// Turns the selected part about the vertical axis and places it again.
    ///
    /// Parts standing on it that also rest on other supports are removed.
    pub fn rotate_selected(&mut self, degrees: f64) -> Result<Option<PlacementOutcome>, AssemblyError> {
        let Some(id) = self.selected else {
            return Ok(None);
        };
        if Some(id) == self.foundation {
            return Ok(None);
        }
        let part = self.assembly.part(id)?;
        let pick_up = PickUp {
            origin: part.transform,
            was_placed: part.registered,
        };
        let spanning: Vec<PartId> = part
            .grids
            .iter()
            .flat_map(|g| g.attached.iter().copied())
            .filter(|child| {
                self.assembly
                    .get(*child)
                    .is_some_and(|c| c.grid_parents.len() > 1)
            })
            .collect();
        for child in spanning {
            if self.assembly.contains(child) {
                self.assembly.remove_part(child)?;
            }
        }

        self.assembly.rotate_in_place(id, degrees)?;
        let position = self.assembly.part(id)?.position();
        self.begin_drag(id, pick_up)?;
        placement::snap(&mut self.assembly, id, position, false, None, &self.config)?;
        self.put_down(false)
    }

    /// Deletes the selected part and everything on it. The foundation stays.
    pub fn delete_selected(&mut self) -> Result<Vec<PartId>, AssemblyError> {
        let Some(id) = self.selected else {
            return Ok(Vec::new());
        };
        if Some(id) == self.foundation {
            return Ok(Vec::new());
        }
        self.selected = None;
        self.placing = None;
        self.placement_succeeded = true;
        self.assembly.remove_part(id)
    }

    /// Moves a placed part programmatically; recorded for undo on success.
    ///
    /// On failure the part returns to where it was.
    pub fn move_part(&mut self, id: PartId, target: Transform) -> Result<PlacementOutcome, AssemblyError> {
        let from = self.assembly.part(id)?.transform;
        self.assembly.reposition(id, target)?;
        let outcome = placement::replace(&mut self.assembly, id, &self.config)?;
        if outcome.is_success() {
            let to = self.assembly.part(id)?.transform;
            let command = self.move_command(id, from, to);
            self.history.record(command);
        } else {
            relocate(&mut self.assembly, id, from, &self.config);
        }
        Ok(outcome)
    }

    /// Reverts the last recorded move. Ignored while dragging.
    ///
    /// If the part no longer fits where it was, it stays put, the move stays
    /// on the undo side and `false` is returned.
    pub fn undo(&mut self) -> bool {
        if self.placing.is_some() {
            return false;
        }
        self.move_failed.set(false);
        if !self.history.undo(&mut self.assembly) {
            return false;
        }
        if self.move_failed.replace(false) {
            self.history.redo(&mut self.assembly);
            return false;
        }
        true
    }

    /// Repeats the last undone move; like [`undo`](Self::undo) on failure.
    pub fn redo(&mut self) -> bool {
        if self.placing.is_some() {
            return false;
        }
        self.move_failed.set(false);
        if !self.history.redo(&mut self.assembly) {
            return false;
        }
        if self.move_failed.replace(false) {
            self.history.undo(&mut self.assembly);
            return false;
        }
        true
    }

    fn move_command(&self, part: PartId, from: Transform, to: Transform) -> Command<Assembly> {
        let config = self.config;
        let (undo_failed, redo_failed) = (self.move_failed.clone(), self.move_failed.clone());
        Command::new(
            "move part",
            move |assembly: &mut Assembly| {
                if !relocate(assembly, part, from, &config) {
                    undo_failed.set(true);
                }
            },
            move |assembly: &mut Assembly| {
                if !relocate(assembly, part, to, &config) {
                    redo_failed.set(true);
                }
            },
        )
    }
}

fn place_at(
    assembly: &mut Assembly,
    part: PartId,
    target: Transform,
    config: &PlacementConfig,
) -> Result<PlacementOutcome, AssemblyError> {
    assembly.reposition(part, target)?;
    placement::replace(assembly, part, config)
}

/// Moves a part with everything on it and places it again.
///
/// On failure the part is placed back where it stood. A part that no longer
/// exists counts as moved.
fn relocate(assembly: &mut Assembly, part: PartId, target: Transform, config: &PlacementConfig) -> bool {
    let Some(origin) = assembly.get(part).map(|p| p.transform) else {
        debug!("Part {:?} no longer exists, nothing to move", part);
        return true;
    };
    match place_at(assembly, part, target, config) {
        Ok(outcome) if outcome.is_success() => return true,
        Ok(outcome) => warn!("Moving {:?} failed: {}", part, outcome),
        Err(err) => warn!("Moving {:?} failed: {}", part, err),
    }
    match place_at(assembly, part, origin, config) {
        Ok(outcome) if outcome.is_success() => {}
        Ok(outcome) => warn!("Could not put {:?} back: {}", part, outcome),
        Err(err) => warn!("Could not put {:?} back: {}", part, err),
    }
    false
}
