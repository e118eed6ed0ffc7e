//! Placement search: finding the supports nearest to a point.
//!
//! Candidates are ranked by squared distance to the query point. The result
//! is then collapsed: either the single nearest anchor, or every grid at the
//! same height as the nearest grid. A part never spans several anchors, nor
//! grids at different heights.

use std::collections::HashSet;

use glam::DVec3;
use serde::Serialize;

use crate::assembly::{AnchorRef, Assembly, GridRef, PartId, PlacedPart};
use crate::types::EPSILON_HEIGHT;

/// Which support on a part a candidate refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum SupportTarget {
    Grid(usize),
    Anchor(usize),
}

/// A ranked support candidate. Transient, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Candidate {
    pub support: PartId,
    pub target: SupportTarget,
    /// Squared distance from the query point to the support's world position.
    pub dist_sq: f64,
    /// Query height minus support height.
    pub dist_y: f64,
}

impl Candidate {
    pub fn is_anchor(&self) -> bool {
        matches!(self.target, SupportTarget::Anchor(_))
    }

    pub fn grid_ref(&self) -> Option<GridRef> {
        match self.target {
            SupportTarget::Grid(grid) => Some(GridRef {
                part: self.support,
                grid,
            }),
            SupportTarget::Anchor(_) => None,
        }
    }

    pub fn anchor_ref(&self) -> Option<AnchorRef> {
        match self.target {
            SupportTarget::Anchor(anchor) => Some(AnchorRef {
                part: self.support,
                anchor,
            }),
            SupportTarget::Grid(_) => None,
        }
    }
}

/// Search over the registered supports of an assembly.
///
/// # Examples
/// ```
/// use glam::DVec3;
/// use stack_it_now::assembly::Assembly;
/// use stack_it_now::search::PlacementSearch;
///
/// let assembly = Assembly::new();
/// let found = PlacementSearch::new(&assembly)
///     .allow_anchors(true)
///     .closest_to_point(DVec3::ZERO);
/// assert!(found.is_empty());
/// ```
#[derive(Clone, Debug)]
pub struct PlacementSearch<'a> {
    assembly: &'a Assembly,
    allow_anchors: bool,
    exclude: HashSet<PartId>,
    height_epsilon: f64,
}

impl<'a> PlacementSearch<'a> {
    pub fn new(assembly: &'a Assembly) -> Self {
        Self {
            assembly,
            allow_anchors: false,
            exclude: HashSet::new(),
            height_epsilon: EPSILON_HEIGHT,
        }
    }

    pub fn allow_anchors(mut self, allow: bool) -> Self {
        self.allow_anchors = allow;
        self
    }

    /// Parts that must never be offered as supports.
    pub fn excluding(mut self, ids: impl IntoIterator<Item = PartId>) -> Self {
        self.exclude.extend(ids);
        self
    }

    pub fn height_epsilon(mut self, epsilon: f64) -> Self {
        self.height_epsilon = epsilon;
        self
    }

    /// Searches every registered support.
    pub fn closest_to_point(&self, point: DVec3) -> Vec<Candidate> {
        let mut found = Vec::new();
        for (id, part) in self.assembly.supports() {
            if !self.exclude.contains(&id) {
                self.collect_on(id, part, point, &mut found);
            }
        }
        collapse(found, self.height_epsilon)
    }

    /// Searches only the supports of one part.
    pub fn closest_on_part(&self, support: PartId, point: DVec3) -> Vec<Candidate> {
        let mut found = Vec::new();
        if let Some(part) = self.assembly.get(support)
            && !self.exclude.contains(&support)
        {
            self.collect_on(support, part, point, &mut found);
        }
        collapse(found, self.height_epsilon)
    }

    fn collect_on(&self, id: PartId, part: &PlacedPart, point: DVec3, out: &mut Vec<Candidate>) {
        for (index, grid) in part.grids.iter().enumerate() {
            if grid.occupancy.fully_claimed() || grid.occupancy.is_zero_clearance() {
                continue;
            }
            if let Some(center) = part.grid_center(index) {
                out.push(candidate(id, SupportTarget::Grid(index), point, center));
            }
        }
        if !self.allow_anchors {
            return;
        }
        for (index, anchor) in part.anchors.iter().enumerate() {
            if anchor.attached.is_some() {
                continue;
            }
            if let Some(at) = part.anchor_point(index) {
                out.push(candidate(id, SupportTarget::Anchor(index), point, at));
            }
        }
    }
}

fn candidate(support: PartId, target: SupportTarget, point: DVec3, at: DVec3) -> Candidate {
    Candidate {
        support,
        target,
        dist_sq: point.distance_squared(at),
        dist_y: point.y - at.y,
    }
}

/// Sorts candidates by distance and applies the anchor/co-height rule.
pub fn collapse(mut candidates: Vec<Candidate>, height_epsilon: f64) -> Vec<Candidate> {
    candidates.sort_by(|a, b| a.dist_sq.total_cmp(&b.dist_sq));
    let Some(first) = candidates.first().copied() else {
        return candidates;
    };
    if first.is_anchor() {
        return vec![first];
    }
    candidates.retain(|c| !c.is_anchor() && (c.dist_y - first.dist_y).abs() < height_epsilon);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::OccupancyGrid;
    use crate::model::{GridDefinition, PartDefinition};
    use crate::types::Transform;
    use std::sync::Arc;

    fn grid_at(center: DVec3) -> GridDefinition {
        GridDefinition::new(2, 2, center).unwrap()
    }

    fn support(def: PartDefinition) -> (Assembly, PartId) {
        let mut assembly = Assembly::new();
        let id = assembly.insert_registered(Arc::new(def), Transform::IDENTITY);
        (assembly, id)
    }

    #[test]
    fn test_equal_distance_different_heights_keeps_one() {
        let (assembly, id) = support(
            PartDefinition::new("Shelf")
                .with_grid(grid_at(DVec3::new(0.0, 0.0, 0.0)))
                .with_grid(grid_at(DVec3::new(0.0, 0.2, 0.0))),
        );
        let found = PlacementSearch::new(&assembly).closest_to_point(DVec3::new(0.0, 0.1, 0.0));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].support, id);
        assert_eq!(found[0].target, SupportTarget::Grid(0));
    }

    #[test]
    fn test_co_height_grids_are_kept_in_distance_order() {
        let (assembly, _) = support(
            PartDefinition::new("Bench")
                .with_grid(grid_at(DVec3::new(1.0, 0.3, 0.0)))
                .with_grid(grid_at(DVec3::new(0.2, 0.3, 0.0)))
                .with_grid(grid_at(DVec3::new(0.2, 0.6, 0.0))),
        );
        let found = PlacementSearch::new(&assembly).closest_to_point(DVec3::new(0.0, 0.3, 0.0));
        let targets: Vec<_> = found.iter().map(|c| c.target).collect();
        assert_eq!(targets, vec![SupportTarget::Grid(1), SupportTarget::Grid(0)]);
    }

    #[test]
    fn test_nearer_anchor_wins_alone() {
        let (assembly, _) = support(
            PartDefinition::new("Rack")
                .with_grid(grid_at(DVec3::new(1.0, 0.0, 0.0)))
                .with_anchor(DVec3::new(0.1, 0.0, 0.0))
                .with_anchor(DVec3::new(0.2, 0.0, 0.0)),
        );
        let found = PlacementSearch::new(&assembly)
            .allow_anchors(true)
            .closest_to_point(DVec3::ZERO);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].target, SupportTarget::Anchor(0));
        assert!(found[0].anchor_ref().is_some());
    }

    #[test]
    fn test_nearer_grid_drops_anchors() {
        let (assembly, _) = support(
            PartDefinition::new("Rack")
                .with_grid(grid_at(DVec3::new(0.1, 0.0, 0.0)))
                .with_anchor(DVec3::new(0.5, 0.0, 0.0)),
        );
        let found = PlacementSearch::new(&assembly)
            .allow_anchors(true)
            .closest_to_point(DVec3::ZERO);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].target, SupportTarget::Grid(0));
    }

    #[test]
    fn test_anchors_ignored_unless_allowed() {
        let (assembly, _) = support(
            PartDefinition::new("Rack")
                .with_grid(grid_at(DVec3::new(1.0, 0.0, 0.0)))
                .with_anchor(DVec3::ZERO),
        );
        let found = PlacementSearch::new(&assembly).closest_to_point(DVec3::ZERO);
        assert_eq!(found.len(), 1);
        assert!(!found[0].is_anchor());
    }

    #[test]
    fn test_full_and_zero_clearance_grids_are_skipped() {
        let (mut assembly, id) = support(
            PartDefinition::new("Top")
                .with_grid(grid_at(DVec3::ZERO))
                .with_grid(grid_at(DVec3::new(0.1, 0.0, 0.0)).with_max_height(0.0)),
        );
        assert!(PlacementSearch::new(&assembly).closest_to_point(DVec3::ZERO).len() == 1);

        let owner = assembly.insert(Arc::new(PartDefinition::new("Lid")), Transform::IDENTITY);
        let pattern = OccupancyGrid::footprint(2, 2, owner, None);
        let grid = assembly.grid_mut(GridRef { part: id, grid: 0 }).unwrap();
        grid.occupancy.claim_for_footprint(&pattern, (0, 0), DVec3::X, DVec3::Z);
        assert!(PlacementSearch::new(&assembly).closest_to_point(DVec3::ZERO).is_empty());
    }

    #[test]
    fn test_exclusion_and_registration() {
        let (mut assembly, id) = support(PartDefinition::new("Floor").with_grid(grid_at(DVec3::ZERO)));
        let loose = assembly.insert(
            Arc::new(PartDefinition::new("Loose").with_grid(grid_at(DVec3::ZERO))),
            Transform::IDENTITY,
        );
        let found = PlacementSearch::new(&assembly).closest_to_point(DVec3::ZERO);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].support, id);

        assert!(PlacementSearch::new(&assembly)
            .excluding([id])
            .closest_to_point(DVec3::ZERO)
            .is_empty());
        assert_eq!(
            PlacementSearch::new(&assembly).closest_on_part(loose, DVec3::ZERO).len(),
            1
        );
    }

    #[test]
    fn test_collapse_empty() {
        assert!(collapse(Vec::new(), EPSILON_HEIGHT).is_empty());
    }
}
