//! Geometric helpers for relating a part to a support grid.
//!
//! All cell math happens in the support part's local frame: the support grid
//! lies in its X/Z plane with Y up. Rounding is half-away-from-zero
//! ([`f64::round`]) throughout.

use glam::DVec3;

use crate::model::GridDefinition;
use crate::types::Transform;

/// A part's frame re-expressed in a support part's local frame.
///
/// # Fields
/// * `local_right` - The part's local X axis in support coordinates
/// * `local_up` - The part's local Z axis in support coordinates
/// * `local_origin` - The part's position in support coordinates
/// * `support_grid_origin` - Bottom-left corner of the support grid in support coordinates
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridRelativeInfo {
    pub local_right: DVec3,
    pub local_up: DVec3,
    pub local_origin: DVec3,
    pub support_grid_origin: DVec3,
}

/// Bottom-left corner of a grid in the frame of the part that declares it.
pub fn grid_origin(grid: &GridDefinition, cell_size: f64) -> DVec3 {
    grid.center
        - DVec3::new(
            grid.h_count as f64 * cell_size / 2.0,
            0.0,
            grid.v_count as f64 * cell_size / 2.0,
        )
}

/// World-space center of a grid provided by a part.
#[inline]
pub fn grid_world_center(support: &Transform, grid: &GridDefinition) -> DVec3 {
    support.transform_point(grid.center)
}

/// Computes the basis and origin of `part` relative to `support_grid` on `support`.
///
/// # Parameters
/// * `part` - World transform of the part being placed
/// * `support` - World transform of the part providing the grid
/// * `support_grid` - The candidate grid
/// * `cell_size` - Edge length of one cell
pub fn grid_relative_info(
    part: &Transform,
    support: &Transform,
    support_grid: &GridDefinition,
    cell_size: f64,
) -> GridRelativeInfo {
    let part_to_support = support.inverse_matrix() * part.matrix();
    GridRelativeInfo {
        local_right: part_to_support.transform_vector3(DVec3::X),
        local_up: part_to_support.transform_vector3(DVec3::Z),
        local_origin: support.inverse_transform_point(part.translation),
        support_grid_origin: grid_origin(support_grid, cell_size),
    }
}

/// Cell coordinate on the support grid of the bottom-left corner of `pattern`.
///
/// The pattern's declared center is projected through the relative basis,
/// moved to its corner and expressed in cells from the support grid origin.
///
/// # Returns
/// `(column, row)`, possibly outside the support grid.
pub fn grid_relative_position(
    info: &GridRelativeInfo,
    pattern: &GridDefinition,
    cell_size: f64,
) -> (i64, i64) {
    let origin =
        info.local_origin + info.local_right * pattern.center.x + info.local_up * pattern.center.z;
    let bottom_left = origin
        - info.local_right * (pattern.h_count as f64 * cell_size / 2.0)
        - info.local_up * (pattern.v_count as f64 * cell_size / 2.0)
        - info.support_grid_origin;
    let cells = bottom_left / cell_size;
    (cells.x.round() as i64, cells.z.round() as i64)
}

/// Rounds the X and Z components to the nearest multiple of `cell_size`.
#[inline]
pub fn round_to_cell(v: DVec3, cell_size: f64) -> DVec3 {
    DVec3::new(
        (v.x / cell_size).round() * cell_size,
        v.y,
        (v.z / cell_size).round() * cell_size,
    )
}

/// Snaps a part origin, given in support coordinates, onto a support grid.
///
/// The corner of the part's footprint is aligned with the nearest cell corner
/// of the grid and the part is lowered (or raised) to the grid's surface.
/// Without a footprint the part origin itself is aligned.
///
/// # Parameters
/// * `local_point` - Requested part origin in support coordinates
/// * `right`, `up` - Part basis in support coordinates
/// * `footprint` - First footprint of the part, if any
/// * `support_grid_origin` - Bottom-left corner of the support grid
/// * `cell_size` - Edge length of one cell
///
/// # Returns
/// The corrected part origin in support coordinates.
pub fn snap_to_grid(
    local_point: DVec3,
    right: DVec3,
    up: DVec3,
    footprint: Option<&GridDefinition>,
    support_grid_origin: DVec3,
    cell_size: f64,
) -> DVec3 {
    let half = cell_size / 2.0;
    let corner_offset = footprint.map_or(DVec3::ZERO, |fp| {
        right * (fp.center.x - fp.h_count as f64 * half)
            + up * (fp.center.z - fp.v_count as f64 * half)
    });
    let corner = local_point + corner_offset;
    let mut corrected = round_to_cell(corner - support_grid_origin, cell_size) + support_grid_origin;
    corrected.y = support_grid_origin.y;
    local_point + (corrected - corner)
}
