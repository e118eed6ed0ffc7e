//! Cell occupancy tracking for support surfaces and footprints.
//!
//! The same structure serves two roles:
//! - a support surface, whose cells record which part stands on them
//! - a footprint pattern, whose cells record which parts of the part being
//!   placed have already found support
//!
//! Probing ([`OccupancyGrid::mark_for_placement`]) only ever writes to the
//! pattern, so candidates can be evaluated before anything is committed.

use glam::DVec3;

use crate::assembly::PartId;
use crate::types::EPSILON_BASIS;

/// Footprint of a part being placed. Structurally identical to a surface grid.
pub type FootprintPattern = OccupancyGrid;

#[derive(Clone, Debug, PartialEq)]
pub struct OccupancyGrid {
    width: usize,
    height: usize,
    /// Row-major, `height` rows of `width` cells.
    cells: Vec<Option<PartId>>,
    cells_available: usize,
    /// Identity written into surfaces when this grid is a footprint.
    owner: Option<PartId>,
    /// Clearance a footprint needs above the surface it stands on.
    required_height: Option<f64>,
    /// Clearance a surface leaves for parts placed on it.
    max_height: Option<f64>,
}

impl OccupancyGrid {
    /// Creates a surface grid. `max_height` of `None` means unlimited.
    pub fn surface(width: usize, height: usize, max_height: Option<f64>) -> Self {
        Self::with_parts(width, height, None, None, max_height)
    }

    /// Creates a footprint pattern owned by the part being placed.
    pub fn footprint(
        width: usize,
        height: usize,
        owner: PartId,
        required_height: Option<f64>,
    ) -> Self {
        Self::with_parts(width, height, Some(owner), required_height, None)
    }

    fn with_parts(
        width: usize,
        height: usize,
        owner: Option<PartId>,
        required_height: Option<f64>,
        max_height: Option<f64>,
    ) -> Self {
        Self {
            width,
            height,
            cells: vec![None; width * height],
            cells_available: width * height,
            owner,
            required_height,
            max_height,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn cells_available(&self) -> usize {
        self.cells_available
    }

    #[inline]
    pub fn owner(&self) -> Option<PartId> {
        self.owner
    }

    #[inline]
    pub fn required_height(&self) -> Option<f64> {
        self.required_height
    }

    #[inline]
    pub fn max_height(&self) -> Option<f64> {
        self.max_height
    }

    pub fn set_max_height(&mut self, max_height: Option<f64>) {
        self.max_height = max_height;
    }

    /// A surface with no clearance at all cannot host anything.
    pub fn is_zero_clearance(&self) -> bool {
        matches!(self.max_height, Some(h) if h <= 0.0)
    }

    /// Returns the claim on a cell, or `None` if out of bounds or unclaimed.
    pub fn cell(&self, x: usize, y: usize) -> Option<PartId> {
        if x < self.width && y < self.height {
            self.cells[y * self.width + x]
        } else {
            None
        }
    }

    /// Number of cells currently held by `owner`.
    pub fn claimed_by(&self, owner: PartId) -> usize {
        self.cells.iter().filter(|c| **c == Some(owner)).count()
    }

    /// Owner of every claimed cell, one entry per cell.
    pub fn claims(&self) -> impl Iterator<Item = PartId> + '_ {
        self.cells.iter().flatten().copied()
    }

    /// Recounts unclaimed cells from scratch.
    pub fn count_unclaimed(&self) -> usize {
        self.cells.iter().filter(|c| c.is_none()).count()
    }

    /// Claims a cell for `owner` unless it is already claimed.
    pub fn mark_cell(&mut self, x: usize, y: usize, owner: PartId) {
        debug_assert!(x < self.width && y < self.height, "cell ({x}, {y}) out of bounds");
        let idx = y * self.width + x;
        if self.cells[idx].is_none() {
            self.cells[idx] = Some(owner);
            self.cells_available -= 1;
        }
        debug_assert_eq!(self.cells_available, self.count_unclaimed());
    }

    #[inline]
    pub fn fully_claimed(&self) -> bool {
        self.cells_available == 0
    }

    /// Releases every cell held by `owner`, returning how many were freed.
    pub fn free_cells(&mut self, owner: PartId) -> usize {
        let mut freed = 0;
        for cell in self.cells.iter_mut().filter(|c| **c == Some(owner)) {
            *cell = None;
            freed += 1;
        }
        self.cells_available += freed;
        debug_assert_eq!(self.cells_available, self.count_unclaimed());
        freed
    }

    /// Whether this surface can hold a cell of `pattern` whose current claim is `claim`.
    fn supports(&self, claim: Option<PartId>, pattern: &OccupancyGrid) -> bool {
        let free = claim.is_none() || claim == pattern.owner;
        let clearance = match (self.max_height, pattern.required_height) {
            (Some(max), Some(required)) => required <= max,
            _ => true,
        };
        free && clearance
    }

    /// Maps every cell of a `pattern_width` x `pattern_height` pattern onto this
    /// grid, yielding `(pattern cell, grid cell)` for cells that land in bounds.
    ///
    /// `right` and `up` are the pattern's X and Z axes expressed in this grid's
    /// frame; only their X and Z components matter.
    fn mapped_cells(
        &self,
        pattern_width: usize,
        pattern_height: usize,
        origin: (i64, i64),
        right: DVec3,
        up: DVec3,
    ) -> impl Iterator<Item = ((usize, usize), (usize, usize))> + use<> {
        // A basis vector pointing backwards puts the pattern's first cell one
        // cell before the origin grid line.
        let x0 = origin.0
            - i64::from(right.x < -EPSILON_BASIS || up.x < -EPSILON_BASIS);
        let y0 = origin.1
            - i64::from(right.z < -EPSILON_BASIS || up.z < -EPSILON_BASIS);
        let (width, height) = (self.width as i64, self.height as i64);

        (0..pattern_height).flat_map(move |yi| {
            (0..pattern_width).filter_map(move |xi| {
                let (xf, yf) = (xi as f64, yi as f64);
                let lx = (x0 as f64 + xf * right.x + yf * up.x).round() as i64;
                let ly = (y0 as f64 + xf * right.z + yf * up.z).round() as i64;
                if (0..width).contains(&lx) && (0..height).contains(&ly) {
                    Some(((xi, yi), (lx as usize, ly as usize)))
                } else {
                    None
                }
            })
        })
    }

    /// Marks on `pattern` every cell this grid could support. Read-only on `self`.
    ///
    /// # Parameters
    /// * `pattern` - Footprint of the part being placed
    /// * `origin` - Cell coordinate of the pattern's bottom-left corner on this grid
    /// * `right` - Pattern X axis in this grid's frame
    /// * `up` - Pattern Z axis in this grid's frame
    pub fn mark_for_placement(
        &self,
        pattern: &mut FootprintPattern,
        origin: (i64, i64),
        right: DVec3,
        up: DVec3,
    ) {
        let Some(owner) = pattern.owner else {
            debug_assert!(false, "footprint pattern without owner");
            return;
        };
        for ((px, py), (gx, gy)) in
            self.mapped_cells(pattern.width, pattern.height, origin, right, up)
        {
            let claim = self.cells[gy * self.width + gx];
            if self.supports(claim, pattern) {
                pattern.mark_cell(px, py, owner);
            }
        }
    }

    /// Claims the cells under `pattern` for its owner.
    ///
    /// Only call once the placement is known to be fully supported.
    /// Returns `true` if any cell of this grid now belongs to the pattern's owner.
    pub fn claim_for_footprint(
        &mut self,
        pattern: &FootprintPattern,
        origin: (i64, i64),
        right: DVec3,
        up: DVec3,
    ) -> bool {
        let Some(owner) = pattern.owner else {
            return false;
        };
        let targets: Vec<(usize, usize)> = self
            .mapped_cells(pattern.width, pattern.height, origin, right, up)
            .map(|(_, grid_cell)| grid_cell)
            .collect();

        let mut claimed = false;
        for (gx, gy) in targets {
            let claim = self.cells[gy * self.width + gx];
            if self.supports(claim, pattern) {
                self.mark_cell(gx, gy, owner);
                claimed = true;
            }
        }
        claimed
    }
}
