//! Error types shared across the crate.
//!
//! Geometric infeasibility is not an error: it is reported through
//! [`crate::placement::PlacementOutcome`].

use thiserror::Error;

use crate::assembly::PartId;
use crate::model::ValidationError;

/// Errors raised by assembly bookkeeping.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AssemblyError {
    #[error("unknown part {0:?}")]
    UnknownPart(PartId),

    #[error("invalid part definition: {0}")]
    InvalidDefinition(#[from] ValidationError),

    #[error("no foundation has been set")]
    NoFoundation,

    #[error("link mismatch: {0}")]
    LinkMismatch(String),

    #[error("cell count mismatch on grid {grid} of part {part:?}: tracked {tracked}, actual {actual}")]
    CellCountMismatch {
        part: PartId,
        grid: usize,
        tracked: usize,
        actual: usize,
    },
}

/// Errors raised when building undo/redo commands.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HistoryError {
    #[error("undo not defined")]
    MissingUndo,

    #[error("redo not defined")]
    MissingRedo,
}

/// Errors raised while loading or replaying a scenario file.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("could not read scenario: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse scenario: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown part definition '{0}'")]
    UnknownDefinition(String),

    #[error("unknown part label '{0}'")]
    UnknownLabel(String),

    #[error("label '{0}' is already in use")]
    DuplicateLabel(String),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),
}
