//! Arena of placed parts and the links between them.
//!
//! Supports own the lifecycle relation: a grid lists the parts standing on it
//! and an anchor holds the part attached to it. Children keep non-owning back
//! references (`anchor_parent`, `grid_parents`) used for removal and
//! traversal. Every mutation below keeps both directions in agreement.

use std::collections::HashSet;
use std::sync::Arc;

use glam::{DQuat, DVec3};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use tracing::{debug, warn};

use crate::error::AssemblyError;
use crate::geometry::grid_world_center;
use crate::grid::OccupancyGrid;
use crate::model::PartDefinition;
use crate::types::{EPSILON_GENERAL, Motion, Positioned, Transform};

slotmap::new_key_type! {
    /// Stable identifier of a placed part.
    pub struct PartId;
}

/// A grid provided by a part, addressed by the part and the grid's index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridRef {
    pub part: PartId,
    pub grid: usize,
}

/// An anchor provided by a part, addressed by the part and the anchor's index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnchorRef {
    pub part: PartId,
    pub anchor: usize,
}

/// Occupancy of one provided grid plus the parts standing on it.
#[derive(Clone, Debug)]
pub struct GridTracking {
    pub occupancy: OccupancyGrid,
    pub attached: Vec<PartId>,
}

/// One provided anchor and the part attached to it, if any.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnchorTracking {
    pub attached: Option<PartId>,
}

/// One instance of a part in the assembly.
#[derive(Clone, Debug)]
pub struct PlacedPart {
    pub definition: Arc<PartDefinition>,
    pub transform: Transform,
    pub anchor_parent: Option<AnchorRef>,
    pub grid_parents: Vec<GridRef>,
    pub grids: Vec<GridTracking>,
    pub anchors: Vec<AnchorTracking>,
    /// Only registered parts take part in searches.
    pub registered: bool,
}

impl PlacedPart {
    fn new(definition: Arc<PartDefinition>, transform: Transform) -> Self {
        let grids = definition
            .grids_provided
            .iter()
            .map(|g| GridTracking {
                occupancy: OccupancyGrid::surface(g.h_count, g.v_count, g.max_height),
                attached: Vec::new(),
            })
            .collect();
        let anchors = vec![AnchorTracking::default(); definition.base_anchors.len()];
        Self {
            definition,
            transform,
            anchor_parent: None,
            grid_parents: Vec::new(),
            grids,
            anchors,
            registered: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Direct children on this part's anchors and grids, without duplicates.
    pub fn children(&self) -> Vec<PartId> {
        let mut out = Vec::new();
        let anchored = self.anchors.iter().filter_map(|a| a.attached);
        let gridded = self.grids.iter().flat_map(|g| g.attached.iter().copied());
        for child in anchored.chain(gridded) {
            if !out.contains(&child) {
                out.push(child);
            }
        }
        out
    }

    /// World-space center of a provided grid.
    pub fn grid_center(&self, grid: usize) -> Option<DVec3> {
        self.definition
            .grids_provided
            .get(grid)
            .map(|g| grid_world_center(&self.transform, g))
    }

    /// World-space position of a provided anchor.
    pub fn anchor_point(&self, anchor: usize) -> Option<DVec3> {
        self.definition
            .base_anchors
            .get(anchor)
            .map(|p| self.transform.transform_point(*p))
    }

    pub fn is_placed(&self) -> bool {
        self.anchor_parent.is_some() || !self.grid_parents.is_empty()
    }
}

impl Positioned for PlacedPart {
    fn position(&self) -> DVec3 {
        self.transform.translation
    }
}

/// All parts of one assembly.
#[derive(Clone, Debug, Default)]
pub struct Assembly {
    parts: SlotMap<PartId, PlacedPart>,
}

impl Assembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an unregistered, unattached part.
    pub fn insert(&mut self, definition: Arc<PartDefinition>, transform: Transform) -> PartId {
        self.parts.insert(PlacedPart::new(definition, transform))
    }

    /// Adds a part that is immediately searchable, such as a foundation.
    pub fn insert_registered(
        &mut self,
        definition: Arc<PartDefinition>,
        transform: Transform,
    ) -> PartId {
        let mut part = PlacedPart::new(definition, transform);
        part.registered = true;
        self.parts.insert(part)
    }

    pub fn get(&self, id: PartId) -> Option<&PlacedPart> {
        self.parts.get(id)
    }

    pub fn part(&self, id: PartId) -> Result<&PlacedPart, AssemblyError> {
        self.parts.get(id).ok_or(AssemblyError::UnknownPart(id))
    }

    pub fn part_mut(&mut self, id: PartId) -> Result<&mut PlacedPart, AssemblyError> {
        self.parts.get_mut(id).ok_or(AssemblyError::UnknownPart(id))
    }

    pub fn contains(&self, id: PartId) -> bool {
        self.parts.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PartId, &PlacedPart)> {
        self.parts.iter()
    }

    /// Registered parts that provide at least one grid or anchor.
    pub fn supports(&self) -> impl Iterator<Item = (PartId, &PlacedPart)> {
        self.parts
            .iter()
            .filter(|(_, p)| p.registered && p.definition.provides_support())
    }

    pub fn grid(&self, at: GridRef) -> Result<&GridTracking, AssemblyError> {
        self.part(at.part)?
            .grids
            .get(at.grid)
            .ok_or_else(|| AssemblyError::LinkMismatch(format!("no grid {} on {:?}", at.grid, at.part)))
    }

    pub fn grid_mut(&mut self, at: GridRef) -> Result<&mut GridTracking, AssemblyError> {
        self.part_mut(at.part)?
            .grids
            .get_mut(at.grid)
            .ok_or_else(|| AssemblyError::LinkMismatch(format!("no grid {} on {:?}", at.grid, at.part)))
    }

    pub fn register(&mut self, id: PartId) -> Result<(), AssemblyError> {
        self.part_mut(id)?.registered = true;
        Ok(())
    }

    /// Detaches a part from everything it stands on and frees its cells.
    ///
    /// Its own children stay attached to it.
    pub fn unregister(&mut self, id: PartId) -> Result<(), AssemblyError> {
        let part = self.part_mut(id)?;
        part.registered = false;
        let anchor_parent = part.anchor_parent.take();
        let grid_parents = std::mem::take(&mut part.grid_parents);

        if let Some(at) = anchor_parent {
            match self
                .parts
                .get_mut(at.part)
                .and_then(|p| p.anchors.get_mut(at.anchor))
            {
                Some(anchor) if anchor.attached == Some(id) => anchor.attached = None,
                _ => warn!("Anchor {:?} did not hold part {:?}", at, id),
            }
        }

        for at in grid_parents {
            match self.grid_mut(at) {
                Ok(grid) => {
                    grid.attached.retain(|child| *child != id);
                    grid.occupancy.free_cells(id);
                }
                Err(_) => warn!("Grid parent {:?} of part {:?} no longer exists", at, id),
            }
        }
        Ok(())
    }

    /// Attaches `child` to an anchor, in both directions.
    pub fn link_anchor(&mut self, child: PartId, at: AnchorRef) -> Result<(), AssemblyError> {
        self.part(child)?;
        let anchor = self
            .part_mut(at.part)?
            .anchors
            .get_mut(at.anchor)
            .ok_or_else(|| AssemblyError::LinkMismatch(format!("no anchor {} on {:?}", at.anchor, at.part)))?;
        anchor.attached = Some(child);
        self.part_mut(child)?.anchor_parent = Some(at);
        Ok(())
    }

    /// Records that `child` stands on a grid, in both directions.
    pub fn link_grid(&mut self, child: PartId, at: GridRef) -> Result<(), AssemblyError> {
        self.part(child)?;
        let grid = self.grid_mut(at)?;
        if !grid.attached.contains(&child) {
            grid.attached.push(child);
        }
        let part = self.part_mut(child)?;
        if !part.grid_parents.contains(&at) {
            part.grid_parents.push(at);
        }
        Ok(())
    }

    /// Every part transitively attached to `id`, depth first, each listed once.
    pub fn descendants(&self, id: PartId) -> Vec<PartId> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut stack = match self.parts.get(id) {
            Some(part) => part.children(),
            None => return out,
        };
        stack.reverse();
        while let Some(next) = stack.pop() {
            if next == id || !seen.insert(next) {
                continue;
            }
            out.push(next);
            if let Some(part) = self.parts.get(next) {
                stack.extend(part.children().into_iter().rev());
            }
        }
        out
    }

    /// Applies a rigid motion to a part and everything it carries.
    pub fn apply_motion(&mut self, id: PartId, motion: Motion) -> Result<(), AssemblyError> {
        if motion.is_identity() {
            return Ok(());
        }
        let mut moved = vec![id];
        moved.extend(self.descendants(id));
        for part_id in moved {
            motion.apply(&mut self.part_mut(part_id)?.transform);
        }
        Ok(())
    }

    /// Moves a part to `target`, carrying its descendants along rigidly.
    pub fn reposition(&mut self, id: PartId, target: Transform) -> Result<(), AssemblyError> {
        let current = self.part(id)?.transform;
        let turn = (target.rotation * current.rotation.inverse()).normalize();
        if turn.w.abs() < 1.0 - EPSILON_GENERAL {
            self.apply_motion(
                id,
                Motion::RotateAbout {
                    pivot: current.translation,
                    rotation: turn,
                },
            )?;
        }
        self.apply_motion(id, Motion::Shift(target.translation - current.translation))?;
        self.part_mut(id)?.transform = target;
        Ok(())
    }

    /// Turns a part about the vertical axis through its position.
    pub fn rotate_in_place(&mut self, id: PartId, degrees: f64) -> Result<(), AssemblyError> {
        let pivot = self.part(id)?.transform.translation;
        self.apply_motion(
            id,
            Motion::RotateAbout {
                pivot,
                rotation: DQuat::from_rotation_y(degrees.to_radians()),
            },
        )
    }

    /// Removes a part and, depth first, everything attached to it.
    ///
    /// # Returns
    /// Identifiers of all removed parts, children before parents.
    pub fn remove_part(&mut self, id: PartId) -> Result<Vec<PartId>, AssemblyError> {
        let children = self.part(id)?.children();
        let mut removed = Vec::new();
        for child in children {
            // A child spanning several grids may already be gone.
            if self.contains(child) {
                removed.extend(self.remove_part(child)?);
            }
        }
        self.unregister(id)?;
        self.parts.remove(id);
        debug!("Removed part {:?} ({} descendants)", id, removed.len());
        removed.push(id);
        Ok(removed)
    }

    /// Verifies that every link is recorded in both directions and that cell
    /// counts match the cells actually claimed.
    pub fn check_links(&self) -> Result<(), AssemblyError> {
        for (id, part) in &self.parts {
            if let Some(at) = part.anchor_parent {
                let holds = self
                    .parts
                    .get(at.part)
                    .and_then(|p| p.anchors.get(at.anchor))
                    .is_some_and(|a| a.attached == Some(id));
                if !holds {
                    return Err(AssemblyError::LinkMismatch(format!(
                        "{:?} names anchor {:?} which does not hold it",
                        id, at
                    )));
                }
            }
            for at in &part.grid_parents {
                let grid = self.grid(*at)?;
                if !grid.attached.contains(&id) {
                    return Err(AssemblyError::LinkMismatch(format!(
                        "{:?} names grid {:?} which does not list it",
                        id, at
                    )));
                }
            }
            for (index, anchor) in part.anchors.iter().enumerate() {
                if let Some(child) = anchor.attached {
                    let expected = Some(AnchorRef { part: id, anchor: index });
                    if self.parts.get(child).map(|c| c.anchor_parent) != Some(expected) {
                        return Err(AssemblyError::LinkMismatch(format!(
                            "anchor {} of {:?} holds {:?} which does not name it",
                            index, id, child
                        )));
                    }
                }
            }
            for (index, grid) in part.grids.iter().enumerate() {
                let here = GridRef { part: id, grid: index };
                for child in &grid.attached {
                    let names_it = self
                        .parts
                        .get(*child)
                        .is_some_and(|c| c.grid_parents.contains(&here));
                    if !names_it {
                        return Err(AssemblyError::LinkMismatch(format!(
                            "grid {:?} lists {:?} which does not name it",
                            here, child
                        )));
                    }
                }
                if let Some(owner) = grid.occupancy.claims().find(|o| !grid.attached.contains(o)) {
                    return Err(AssemblyError::LinkMismatch(format!(
                        "grid {:?} has cells claimed by unattached {:?}",
                        here, owner
                    )));
                }
                let actual = grid.occupancy.count_unclaimed();
                if actual != grid.occupancy.cells_available() {
                    return Err(AssemblyError::CellCountMismatch {
                        part: id,
                        grid: index,
                        tracked: grid.occupancy.cells_available(),
                        actual,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GridDefinition;

    fn stand() -> Arc<PartDefinition> {
        Arc::new(
            PartDefinition::new("Stand")
                .with_grid(GridDefinition::new(3, 3, DVec3::new(-0.18, 0.36, 0.0)).unwrap())
                .with_grid(GridDefinition::new(3, 3, DVec3::new(0.18, 0.36, 0.0)).unwrap())
                .with_anchor(DVec3::new(0.0, 0.0, 0.5)),
        )
    }

    fn crate_part() -> Arc<PartDefinition> {
        Arc::new(
            PartDefinition::new("Crate")
                .with_footprint(GridDefinition::new(3, 3, DVec3::ZERO).unwrap())
                .with_grid(GridDefinition::new(3, 3, DVec3::new(0.0, 0.36, 0.0)).unwrap()),
        )
    }

    fn claim_whole_grid(assembly: &mut Assembly, child: PartId, at: GridRef) {
        let pattern = OccupancyGrid::footprint(3, 3, child, None);
        let grid = assembly.grid_mut(at).unwrap();
        assert!(grid.occupancy.claim_for_footprint(&pattern, (0, 0), DVec3::X, DVec3::Z));
        assembly.link_grid(child, at).unwrap();
    }

    #[test]
    fn test_insert_builds_surfaces() {
        let mut assembly = Assembly::new();
        let id = assembly.insert_registered(stand(), Transform::IDENTITY);
        let part = assembly.part(id).unwrap();
        assert_eq!(part.grids.len(), 2);
        assert_eq!(part.anchors.len(), 1);
        assert_eq!(part.grids[0].occupancy.cells_available(), 9);
        assert_eq!(assembly.supports().count(), 1);

        let loose = assembly.insert(crate_part(), Transform::IDENTITY);
        assert_eq!(assembly.supports().count(), 1);
        assembly.register(loose).unwrap();
        assert_eq!(assembly.supports().count(), 2);
    }

    #[test]
    fn test_remove_part_spanning_two_grids_restores_both() {
        let mut assembly = Assembly::new();
        let base = assembly.insert_registered(stand(), Transform::IDENTITY);
        let wide = assembly.insert(crate_part(), Transform::IDENTITY);
        let left = GridRef { part: base, grid: 0 };
        let right = GridRef { part: base, grid: 1 };
        claim_whole_grid(&mut assembly, wide, left);
        claim_whole_grid(&mut assembly, wide, right);
        assembly.check_links().unwrap();
        assert_eq!(assembly.part(wide).unwrap().grid_parents.len(), 2);
        assert!(assembly.grid(left).unwrap().occupancy.fully_claimed());

        let removed = assembly.remove_part(wide).unwrap();
        assert_eq!(removed, vec![wide]);
        for at in [left, right] {
            let grid = assembly.grid(at).unwrap();
            assert_eq!(grid.occupancy.cells_available(), 9);
            assert!(grid.attached.is_empty());
        }
        assembly.check_links().unwrap();
    }

    #[test]
    fn test_unregister_keeps_own_children() {
        let mut assembly = Assembly::new();
        let base = assembly.insert_registered(stand(), Transform::IDENTITY);
        let lower = assembly.insert(crate_part(), Transform::IDENTITY);
        let upper = assembly.insert(crate_part(), Transform::IDENTITY);
        claim_whole_grid(&mut assembly, lower, GridRef { part: base, grid: 0 });
        claim_whole_grid(&mut assembly, upper, GridRef { part: lower, grid: 0 });

        assembly.unregister(lower).unwrap();
        let lower_part = assembly.part(lower).unwrap();
        assert!(lower_part.grid_parents.is_empty());
        assert!(!lower_part.registered);
        assert_eq!(lower_part.grids[0].attached, vec![upper]);
        assert_eq!(
            assembly.grid(GridRef { part: base, grid: 0 }).unwrap().occupancy.cells_available(),
            9
        );
        assembly.check_links().unwrap();
    }

    #[test]
    fn test_remove_part_is_recursive() {
        let mut assembly = Assembly::new();
        let base = assembly.insert_registered(stand(), Transform::IDENTITY);
        let lower = assembly.insert(crate_part(), Transform::IDENTITY);
        let upper = assembly.insert(crate_part(), Transform::IDENTITY);
        let hanging = assembly.insert(crate_part(), Transform::IDENTITY);
        claim_whole_grid(&mut assembly, lower, GridRef { part: base, grid: 0 });
        claim_whole_grid(&mut assembly, upper, GridRef { part: lower, grid: 0 });
        assembly
            .link_anchor(hanging, AnchorRef { part: base, anchor: 0 })
            .unwrap();
        assembly.check_links().unwrap();

        let removed = assembly.remove_part(base).unwrap();
        assert_eq!(removed.len(), 4);
        assert_eq!(removed.last(), Some(&base));
        assert!(assembly.is_empty());
    }

    #[test]
    fn test_anchor_link_is_bidirectional() {
        let mut assembly = Assembly::new();
        let base = assembly.insert_registered(stand(), Transform::IDENTITY);
        let child = assembly.insert(crate_part(), Transform::IDENTITY);
        let at = AnchorRef { part: base, anchor: 0 };
        assembly.link_anchor(child, at).unwrap();
        assert_eq!(assembly.part(base).unwrap().anchors[0].attached, Some(child));
        assert!(assembly.part(child).unwrap().is_placed());

        assembly.unregister(child).unwrap();
        assert_eq!(assembly.part(base).unwrap().anchors[0].attached, None);
        assert_eq!(assembly.part(child).unwrap().anchor_parent, None);
    }

    #[test]
    fn test_check_links_detects_one_sided_link() {
        let mut assembly = Assembly::new();
        let base = assembly.insert_registered(stand(), Transform::IDENTITY);
        let child = assembly.insert(crate_part(), Transform::IDENTITY);
        assembly
            .part_mut(child)
            .unwrap()
            .grid_parents
            .push(GridRef { part: base, grid: 1 });
        assert!(matches!(
            assembly.check_links(),
            Err(AssemblyError::LinkMismatch(_))
        ));
    }

    #[test]
    fn test_apply_motion_shifts_descendants() {
        let mut assembly = Assembly::new();
        let base = assembly.insert_registered(stand(), Transform::IDENTITY);
        let lower = assembly.insert(crate_part(), Transform::from_translation(DVec3::new(0.1, 0.36, 0.0)));
        let upper = assembly.insert(crate_part(), Transform::from_translation(DVec3::new(0.1, 0.72, 0.0)));
        claim_whole_grid(&mut assembly, lower, GridRef { part: base, grid: 0 });
        claim_whole_grid(&mut assembly, upper, GridRef { part: lower, grid: 0 });
        assert_eq!(assembly.descendants(base), vec![lower, upper]);

        let delta = DVec3::new(0.24, 0.0, -0.12);
        assembly.apply_motion(lower, Motion::Shift(delta)).unwrap();
        assert_eq!(assembly.part(base).unwrap().transform, Transform::IDENTITY);
        assert_eq!(
            assembly.part(upper).unwrap().transform.translation,
            DVec3::new(0.1, 0.72, 0.0) + delta
        );
    }

    #[test]
    fn test_reposition_with_turn_keeps_children_relative() {
        let mut assembly = Assembly::new();
        let base = assembly.insert_registered(stand(), Transform::IDENTITY);
        let child = assembly.insert(crate_part(), Transform::from_translation(DVec3::new(0.0, 0.0, 0.5)));
        assembly
            .link_anchor(child, AnchorRef { part: base, anchor: 0 })
            .unwrap();

        let target = Transform::from_translation_yaw(DVec3::new(1.0, 0.0, 0.0), std::f64::consts::FRAC_PI_2);
        assembly.reposition(base, target).unwrap();
        assert_eq!(assembly.part(base).unwrap().transform, target);
        let moved = assembly.part(child).unwrap().position();
        let expected = assembly.part(base).unwrap().anchor_point(0).unwrap();
        assert!((moved - expected).length() < EPSILON_GENERAL);
    }
}
