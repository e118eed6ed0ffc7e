//! Part catalog for the assembly engine.
//!
//! This module defines the declarative description of placeable parts:
//! - `GridDefinition`: a rectangular cell grid, either provided by a part (a
//!   surface others can stand on) or required by it (its footprint)
//! - `PartDefinition`: everything the engine needs to know about one kind of part
//! - `Catalog`: a named collection of part definitions loaded from JSON

use glam::DVec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation error for catalog data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Invalid grid: {0}")]
    InvalidGrid(String),
    #[error("Invalid height: {0}")]
    InvalidHeight(String),
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),
    #[error("Part '{0}' cannot be placed: it declares no footprint and may not use anchors")]
    NotPlaceable(String),
}

fn validate_cell_count(value: usize, name: &str) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::InvalidGrid(format!(
            "{} must be at least 1",
            name
        )));
    }
    Ok(())
}

fn validate_optional_height(value: Option<f64>, name: &str) -> Result<(), ValidationError> {
    match value {
        Some(h) if h < 0.0 || !h.is_finite() => Err(ValidationError::InvalidHeight(format!(
            "{} must be a non-negative finite number, got: {}",
            name, h
        ))),
        _ => Ok(()),
    }
}

fn validate_point(point: DVec3, name: &str) -> Result<(), ValidationError> {
    if !point.is_finite() {
        return Err(ValidationError::InvalidCoordinate(format!(
            "{} must be finite, got: {}",
            name, point
        )));
    }
    Ok(())
}

/// A rectangular grid of cells in a part's local X/Z plane.
///
/// # Fields
/// * `h_count` - Number of cell columns (along local X)
/// * `v_count` - Number of cell rows (along local Z)
/// * `required_height` - For footprints: clearance the part needs above the surface it stands on
/// * `max_height` - For provided grids: clearance available above this surface
/// * `center` - Center of the grid in the part's local frame
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridDefinition {
    pub h_count: usize,
    pub v_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_height: Option<f64>,
    pub center: DVec3,
}

impl GridDefinition {
    /// Creates a new grid definition with validation.
    ///
    /// # Examples
    /// ```
    /// use glam::DVec3;
    /// use stack_it_now::model::GridDefinition;
    ///
    /// assert!(GridDefinition::new(3, 3, DVec3::ZERO).is_ok());
    /// assert!(GridDefinition::new(0, 3, DVec3::ZERO).is_err());
    /// ```
    pub fn new(h_count: usize, v_count: usize, center: DVec3) -> Result<Self, ValidationError> {
        let grid = Self {
            h_count,
            v_count,
            required_height: None,
            max_height: None,
            center,
        };
        grid.validate()?;
        Ok(grid)
    }

    pub fn with_required_height(mut self, height: f64) -> Self {
        self.required_height = Some(height);
        self
    }

    pub fn with_max_height(mut self, height: f64) -> Self {
        self.max_height = Some(height);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_cell_count(self.h_count, "h_count")?;
        validate_cell_count(self.v_count, "v_count")?;
        validate_optional_height(self.required_height, "required_height")?;
        validate_optional_height(self.max_height, "max_height")?;
        validate_point(self.center, "center")?;
        Ok(())
    }

    /// Number of cells in the grid.
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.h_count * self.v_count
    }
}

/// Describes one kind of placeable part.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartDefinition {
    pub name: String,
    #[serde(default)]
    pub model_pieces: Vec<String>,
    /// Dotted name suffixes of the sub-parts that receive color changes.
    #[serde(default)]
    pub parts_styled: Vec<String>,
    #[serde(default)]
    pub grids_provided: Vec<GridDefinition>,
    #[serde(default)]
    pub base_anchors: Vec<DVec3>,
    #[serde(default)]
    pub grid_pattern_required: Vec<GridDefinition>,
    #[serde(default)]
    pub can_use_base_anchor: bool,
    /// Vertical extent of the part, used when a footprint declares no height.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

impl PartDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model_pieces: Vec::new(),
            parts_styled: Vec::new(),
            grids_provided: Vec::new(),
            base_anchors: Vec::new(),
            grid_pattern_required: Vec::new(),
            can_use_base_anchor: false,
            height: None,
        }
    }

    pub fn with_grid(mut self, grid: GridDefinition) -> Self {
        self.grids_provided.push(grid);
        self
    }

    pub fn with_anchor(mut self, point: DVec3) -> Self {
        self.base_anchors.push(point);
        self
    }

    pub fn with_footprint(mut self, pattern: GridDefinition) -> Self {
        self.grid_pattern_required.push(pattern);
        self
    }

    pub fn with_anchor_usage(mut self, allowed: bool) -> Self {
        self.can_use_base_anchor = allowed;
        self
    }

    pub fn with_height(mut self, height: f64) -> Self {
        self.height = Some(height);
        self
    }

    pub fn with_styled_parts<I, S>(mut self, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parts_styled.extend(parts.into_iter().map(Into::into));
        self
    }

    /// Checks the structural validity of every grid, anchor and height.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for grid in self.grids_provided.iter().chain(&self.grid_pattern_required) {
            grid.validate()?;
        }
        for anchor in &self.base_anchors {
            validate_point(*anchor, "anchor")?;
        }
        validate_optional_height(self.height, "height")?;
        Ok(())
    }

    /// Like [`validate`](Self::validate), and additionally requires that the
    /// part can stand on something.
    pub fn validate_placeable(&self) -> Result<(), ValidationError> {
        self.validate()?;
        if !self.can_use_base_anchor && self.grid_pattern_required.is_empty() {
            return Err(ValidationError::NotPlaceable(self.name.clone()));
        }
        Ok(())
    }

    /// Returns `true` if other parts can be placed on this one.
    pub fn provides_support(&self) -> bool {
        !self.grids_provided.is_empty() || !self.base_anchors.is_empty()
    }

    /// Clearance a footprint needs: its own declaration, else the part height.
    pub fn footprint_required_height(&self, pattern: &GridDefinition) -> Option<f64> {
        pattern.required_height.or(self.height)
    }
}

/// A set of part definitions addressable by name.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub parts: Vec<PartDefinition>,
}

impl Catalog {
    /// Parses and validates a catalog from JSON.
    pub fn from_json_str(json: &str) -> Result<Self, crate::error::ScenarioError> {
        let catalog: Catalog = serde_json::from_str(json)?;
        for part in &catalog.parts {
            part.validate().map_err(crate::error::AssemblyError::from)?;
        }
        Ok(catalog)
    }

    pub fn find(&self, name: &str) -> Option<&PartDefinition> {
        self.parts.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_validation() {
        assert!(GridDefinition::new(3, 3, DVec3::ZERO).is_ok());
        assert!(GridDefinition::new(3, 0, DVec3::ZERO).is_err());
        assert!(GridDefinition::new(3, 3, DVec3::new(f64::NAN, 0.0, 0.0)).is_err());

        let grid = GridDefinition::new(2, 2, DVec3::ZERO)
            .unwrap()
            .with_max_height(-1.0);
        assert!(matches!(
            grid.validate(),
            Err(ValidationError::InvalidHeight(_))
        ));
    }

    #[test]
    fn test_placeable_requires_footprint_or_anchor() {
        let foundation = PartDefinition::new("Stand")
            .with_grid(GridDefinition::new(3, 3, DVec3::new(0.0, 0.36, 0.0)).unwrap());
        assert!(foundation.validate().is_ok());
        assert_eq!(
            foundation.validate_placeable(),
            Err(ValidationError::NotPlaceable("Stand".to_string()))
        );

        let base = PartDefinition::new("Base").with_anchor_usage(true);
        assert!(base.validate_placeable().is_ok());
    }

    #[test]
    fn test_footprint_height_falls_back_to_part_height() {
        let pattern = GridDefinition::new(1, 1, DVec3::ZERO).unwrap();
        let part = PartDefinition::new("Box").with_height(0.24);
        assert_eq!(part.footprint_required_height(&pattern), Some(0.24));

        let explicit = pattern.clone().with_required_height(0.12);
        assert_eq!(part.footprint_required_height(&explicit), Some(0.12));
        assert_eq!(PartDefinition::new("Flat").footprint_required_height(&pattern), None);
    }

    #[test]
    fn test_catalog_from_json() {
        let json = r#"{
            "parts": [
                {
                    "name": "Stand 1",
                    "grids_provided": [{ "h_count": 3, "v_count": 3, "center": [0.0, 0.36, 0.0] }]
                },
                {
                    "name": "Box",
                    "grid_pattern_required": [{ "h_count": 2, "v_count": 1, "center": [0.0, 0.0, 0.0] }],
                    "height": 0.24
                }
            ]
        }"#;
        let catalog = Catalog::from_json_str(json).unwrap();
        assert_eq!(catalog.parts.len(), 2);
        let stand = catalog.find("Stand 1").unwrap();
        assert_eq!(stand.grids_provided[0].cell_count(), 9);
        assert!(stand.provides_support());
        assert!(!catalog.find("Box").unwrap().provides_support());
        assert!(catalog.find("Missing").is_none());
    }

    #[test]
    fn test_catalog_rejects_invalid_grid() {
        let json = r#"{ "parts": [ { "name": "Bad", "grids_provided": [{ "h_count": 0, "v_count": 3, "center": [0, 0, 0] }] } ] }"#;
        assert!(Catalog::from_json_str(json).is_err());
    }
}
