//! Grid and anchor placement engine for modular furniture assemblies.
//!
//! Parts provide grids of cells and anchor points; other parts stand on them
//! by claiming cells with their footprint patterns or by attaching to a free
//! anchor. [`session::AssemblySession`] drives the interactive flow and
//! [`scenario::Scenario`] replays scripted sessions.

pub mod appearance;
pub mod assembly;
pub mod config;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod history;
pub mod model;
pub mod placement;
pub mod scenario;
pub mod search;
pub mod session;
pub mod types;
