//! Snapping and the placement transaction.
//!
//! A placement attempt runs in two phases:
//! - probe: every footprint pattern of the part is marked against every
//!   candidate grid without touching the grids
//! - commit: only once all patterns are fully supported (or a free anchor was
//!   found) are cells claimed, links recorded and height limits propagated
//!
//! A failed attempt therefore never leaves partial claims behind.

use glam::DVec3;
use serde::Serialize;
use tracing::debug;

use crate::assembly::{AnchorRef, Assembly, GridRef, PartId};
use crate::error::AssemblyError;
use crate::geometry::{grid_relative_info, grid_relative_position, snap_to_grid};
use crate::grid::FootprintPattern;
use crate::search::{Candidate, PlacementSearch, SupportTarget};
use crate::types::{EPSILON_HEIGHT, Motion, Positioned};

/// Tunables for snapping and placement.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PlacementConfig {
    /// Edge length of one grid cell in world units
    pub cell_size: f64,
    /// Tolerance below which two candidate grids count as co-planar
    pub height_epsilon: f64,
    /// Vertical lift applied while a part is being dragged
    pub drag_offset: f64,
}

impl PlacementConfig {
    pub const DEFAULT_CELL_SIZE: f64 = 0.12;
    pub const DEFAULT_HEIGHT_EPSILON: f64 = EPSILON_HEIGHT;
    pub const DEFAULT_DRAG_OFFSET: f64 = 0.015;

    pub fn builder() -> PlacementConfigBuilder {
        PlacementConfigBuilder::default()
    }
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            cell_size: Self::DEFAULT_CELL_SIZE,
            height_epsilon: Self::DEFAULT_HEIGHT_EPSILON,
            drag_offset: Self::DEFAULT_DRAG_OFFSET,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct PlacementConfigBuilder {
    config: PlacementConfig,
}

impl PlacementConfigBuilder {
    pub fn cell_size(mut self, size: f64) -> Self {
        self.config.cell_size = size;
        self
    }

    pub fn height_epsilon(mut self, epsilon: f64) -> Self {
        self.config.height_epsilon = epsilon;
        self
    }

    pub fn drag_offset(mut self, offset: f64) -> Self {
        self.config.drag_offset = offset;
        self
    }

    pub fn build(self) -> PlacementConfig {
        self.config
    }
}

/// Result of a placement attempt. Both failures are recoverable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PlacementOutcome {
    Success,
    /// Supports were found but they cannot hold the whole footprint.
    FailureInvalid,
    /// No support is available at all.
    FailureNoFreePlace,
}

impl PlacementOutcome {
    pub fn code(&self) -> &'static str {
        match self {
            PlacementOutcome::Success => "success",
            PlacementOutcome::FailureInvalid => "failure_invalid",
            PlacementOutcome::FailureNoFreePlace => "failure_no_free_place",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PlacementOutcome::Success)
    }
}

impl std::fmt::Display for PlacementOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlacementOutcome::Success => write!(f, "Part placed"),
            PlacementOutcome::FailureInvalid => {
                write!(f, "The part is not fully supported at this position")
            }
            PlacementOutcome::FailureNoFreePlace => write!(f, "All areas are full"),
        }
    }
}

/// Lifecycle of one placement attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlacementState {
    Unattempted,
    Evaluating,
    Finished(PlacementOutcome),
}

/// Events emitted while placing a part, for live visualization.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum PlacementEvent {
    /// The part was moved onto the nearest support.
    Snapped {
        part: PartId,
        position: DVec3,
        candidates: usize,
    },
    /// The part was attached to an anchor.
    AnchorClaimed { part: PartId, support: PartId, anchor: usize },
    /// The part claimed cells on a grid.
    CellsClaimed {
        part: PartId,
        support: PartId,
        grid: usize,
        cells: usize,
    },
    /// A grid provided by the placed part received a new clearance limit.
    HeightLimited {
        part: PartId,
        grid: usize,
        max_height: f64,
    },
    /// The attempt is over.
    Finished {
        part: PartId,
        outcome_code: String,
        outcome_text: String,
    },
}

/// Moves `part` onto the nearest support around `point`.
///
/// Grid targets align the part's first footprint with the grid's cells;
/// anchor targets put the part on the anchor. Everything the part carries
/// moves along by the same offset.
///
/// # Parameters
/// * `assembly` - The assembly holding the part
/// * `part` - Part to move
/// * `point` - Requested world position
/// * `dragging` - Lifts the part by the drag offset
/// * `target` - Restricts the search to the supports of one part
/// * `config` - Cell size and tolerances
///
/// # Returns
/// The candidates the position was derived from; empty if nothing was found,
/// in which case the part is left where it was.
pub fn snap(
    assembly: &mut Assembly,
    part: PartId,
    point: DVec3,
    dragging: bool,
    target: Option<PartId>,
    config: &PlacementConfig,
) -> Result<Vec<Candidate>, AssemblyError> {
    let placed = assembly.part(part)?;
    let definition = placed.definition.clone();
    let part_transform = placed.transform;

    let mut exclude = assembly.descendants(part);
    exclude.push(part);
    let search = PlacementSearch::new(assembly)
        .allow_anchors(definition.can_use_base_anchor)
        .excluding(exclude)
        .height_epsilon(config.height_epsilon);
    let candidates = match target {
        Some(support) => search.closest_on_part(support, point),
        None => search.closest_to_point(point),
    };
    let Some(first) = candidates.first().copied() else {
        return Ok(candidates);
    };

    let support = assembly.part(first.support)?;
    let mut position = match first.target {
        SupportTarget::Anchor(anchor) => support
            .anchor_point(anchor)
            .ok_or_else(|| AssemblyError::LinkMismatch(format!("no anchor {} on {:?}", anchor, first.support)))?,
        SupportTarget::Grid(grid) => {
            let grid_def = support
                .definition
                .grids_provided
                .get(grid)
                .ok_or_else(|| AssemblyError::LinkMismatch(format!("no grid {} on {:?}", grid, first.support)))?;
            let info = grid_relative_info(&part_transform, &support.transform, grid_def, config.cell_size);
            let local = snap_to_grid(
                support.transform.inverse_transform_point(point),
                info.local_right,
                info.local_up,
                definition.grid_pattern_required.first(),
                info.support_grid_origin,
                config.cell_size,
            );
            support.transform.transform_point(local)
        }
    };
    if dragging {
        position.y += config.drag_offset;
    }

    assembly.apply_motion(part, Motion::Shift(position - part_transform.translation))?;
    Ok(candidates)
}

/// One attempt to place a part at its current position.
#[derive(Debug)]
pub struct PlacementTransaction {
    part: PartId,
    state: PlacementState,
    patterns: Vec<FootprintPattern>,
}

impl PlacementTransaction {
    pub fn new(part: PartId) -> Self {
        Self {
            part,
            state: PlacementState::Unattempted,
            patterns: Vec::new(),
        }
    }

    pub fn state(&self) -> PlacementState {
        self.state
    }

    /// Footprint patterns as they stood after probing.
    pub fn patterns(&self) -> &[FootprintPattern] {
        &self.patterns
    }

    /// Runs the attempt. Calling it again after it finished returns the same outcome.
    pub fn run(
        &mut self,
        assembly: &mut Assembly,
        config: &PlacementConfig,
        mut on_event: impl FnMut(&PlacementEvent),
    ) -> Result<PlacementOutcome, AssemblyError> {
        if let PlacementState::Finished(outcome) = self.state {
            return Ok(outcome);
        }
        self.state = PlacementState::Evaluating;

        let start = assembly.part(self.part)?.position();
        let candidates = snap(assembly, self.part, start, false, None, config)?;
        on_event(&PlacementEvent::Snapped {
            part: self.part,
            position: assembly.part(self.part)?.position(),
            candidates: candidates.len(),
        });

        let outcome = if candidates.is_empty() {
            PlacementOutcome::FailureNoFreePlace
        } else {
            match self.probe(assembly, &candidates, config)? {
                Some(anchor) => {
                    assembly.link_anchor(self.part, anchor)?;
                    on_event(&PlacementEvent::AnchorClaimed {
                        part: self.part,
                        support: anchor.part,
                        anchor: anchor.anchor,
                    });
                    self.propagate_height(assembly, None, &mut on_event)?;
                    assembly.register(self.part)?;
                    PlacementOutcome::Success
                }
                None if self.fully_supported() => {
                    self.commit_grids(assembly, &candidates, config, &mut on_event)?;
                    assembly.register(self.part)?;
                    PlacementOutcome::Success
                }
                None => PlacementOutcome::FailureInvalid,
            }
        };

        debug!("Placement of {:?}: {}", self.part, outcome.code());
        on_event(&PlacementEvent::Finished {
            part: self.part,
            outcome_code: outcome.code().to_string(),
            outcome_text: outcome.to_string(),
        });
        self.state = PlacementState::Finished(outcome);
        Ok(outcome)
    }

    fn fully_supported(&self) -> bool {
        !self.patterns.is_empty() && self.patterns.iter().all(|p| p.fully_claimed())
    }

    /// Probes every candidate; returns the first free anchor if there is one.
    fn probe(
        &mut self,
        assembly: &Assembly,
        candidates: &[Candidate],
        config: &PlacementConfig,
    ) -> Result<Option<AnchorRef>, AssemblyError> {
        let placed = assembly.part(self.part)?;
        for candidate in candidates {
            if let Some(anchor) = candidate.anchor_ref() {
                return Ok(Some(anchor));
            }
            let Some(at) = candidate.grid_ref() else {
                continue;
            };
            if self.patterns.is_empty() {
                let owner = self.part;
                self.patterns = placed
                    .definition
                    .grid_pattern_required
                    .iter()
                    .map(|fp| {
                        FootprintPattern::footprint(
                            fp.h_count,
                            fp.v_count,
                            owner,
                            placed.definition.footprint_required_height(fp),
                        )
                    })
                    .collect();
            }

            let support = assembly.part(at.part)?;
            let grid = assembly.grid(at)?;
            let Some(grid_def) = support.definition.grids_provided.get(at.grid) else {
                continue;
            };
            let info = grid_relative_info(&placed.transform, &support.transform, grid_def, config.cell_size);
            for (pattern, fp) in self
                .patterns
                .iter_mut()
                .zip(&placed.definition.grid_pattern_required)
            {
                let origin = grid_relative_position(&info, fp, config.cell_size);
                grid.occupancy
                    .mark_for_placement(pattern, origin, info.local_right, info.local_up);
            }
        }
        Ok(None)
    }

    fn commit_grids(
        &self,
        assembly: &mut Assembly,
        candidates: &[Candidate],
        config: &PlacementConfig,
        on_event: &mut impl FnMut(&PlacementEvent),
    ) -> Result<(), AssemblyError> {
        let placed = assembly.part(self.part)?;
        let definition = placed.definition.clone();
        let part_transform = placed.transform;
        let mut min_max_height: Option<f64> = None;

        for at in candidates.iter().filter_map(Candidate::grid_ref) {
            let support = assembly.part(at.part)?;
            let Some(grid_def) = support.definition.grids_provided.get(at.grid) else {
                continue;
            };
            let info = grid_relative_info(&part_transform, &support.transform, grid_def, config.cell_size);

            let grid = assembly.grid_mut(at)?;
            grid.occupancy.free_cells(self.part);
            let mut claimed = false;
            for (pattern, fp) in self.patterns.iter().zip(&definition.grid_pattern_required) {
                let origin = grid_relative_position(&info, fp, config.cell_size);
                claimed |= grid.occupancy.claim_for_footprint(
                    pattern,
                    origin,
                    info.local_right,
                    info.local_up,
                );
            }
            if !claimed {
                continue;
            }
            let cells = grid.occupancy.claimed_by(self.part);
            if let Some(limit) = grid.occupancy.max_height() {
                min_max_height = Some(min_max_height.map_or(limit, |m| m.min(limit)));
            }
            assembly.link_grid(self.part, at)?;
            on_event(&PlacementEvent::CellsClaimed {
                part: self.part,
                support: at.part,
                grid: at.grid,
                cells,
            });
        }

        self.propagate_height(assembly, min_max_height, on_event)
    }

    /// Passes the clearance left above the placed part on to its own grids.
    ///
    /// Without a limit from below, the grids fall back to their declared
    /// maximum so a limit from an earlier placement does not stick.
    fn propagate_height(
        &self,
        assembly: &mut Assembly,
        min_max_height: Option<f64>,
        on_event: &mut impl FnMut(&PlacementEvent),
    ) -> Result<(), AssemblyError> {
        let part = assembly.part_mut(self.part)?;
        let definition = part.definition.clone();
        let remaining = match (min_max_height, self.patterns.first()) {
            (Some(limit), Some(first)) => {
                let own_height = first
                    .required_height()
                    .filter(|h| *h > 0.0)
                    .or(definition.height)
                    .unwrap_or(0.0)
                    .max(0.0);
                Some((limit - own_height).max(0.0))
            }
            _ => None,
        };

        for (index, (grid, grid_def)) in part
            .grids
            .iter_mut()
            .zip(&definition.grids_provided)
            .enumerate()
        {
            let max_height = match remaining {
                Some(remaining) => Some(grid_def.max_height.map_or(remaining, |m| m.min(remaining))),
                None => grid_def.max_height,
            };
            grid.occupancy.set_max_height(max_height);
            if let Some(max_height) = max_height {
                on_event(&PlacementEvent::HeightLimited {
                    part: self.part,
                    grid: index,
                    max_height,
                });
            }
        }
        Ok(())
    }
}

/// Attempts to place `part` where it currently stands.
pub fn try_place(
    assembly: &mut Assembly,
    part: PartId,
    config: &PlacementConfig,
) -> Result<PlacementOutcome, AssemblyError> {
    try_place_with_events(assembly, part, config, |_| {})
}

/// Like [`try_place`], reporting each step through `on_event`.
pub fn try_place_with_events(
    assembly: &mut Assembly,
    part: PartId,
    config: &PlacementConfig,
    on_event: impl FnMut(&PlacementEvent),
) -> Result<PlacementOutcome, AssemblyError> {
    PlacementTransaction::new(part).run(assembly, config, on_event)
}

/// Like [`try_place`], but first removes the part from wherever it stood.
///
/// Used when an already placed part is moved programmatically.
pub fn replace(
    assembly: &mut Assembly,
    part: PartId,
    config: &PlacementConfig,
) -> Result<PlacementOutcome, AssemblyError> {
    assembly.unregister(part)?;
    try_place(assembly, part, config)
}
