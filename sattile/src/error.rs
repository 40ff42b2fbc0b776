//! Per-tile error taxonomy.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while processing a single tile.
///
/// Batch loops never propagate these: they are logged with the tile index and
/// recorded as a [`crate::commons::batch::TileOutcome`].
#[derive(Error, Debug)]
pub enum TileError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("catalog returned no items for collection {collection} ({datetime})")]
    NoScenes { collection: String, datetime: String },

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("reference raster not found: {}", .0.display())]
    MissingReference(PathBuf),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TileError {
    /// Whether the tile should be reported as skipped rather than failed.
    pub fn is_skip(&self) -> bool {
        matches!(self, TileError::NoScenes { .. } | TileError::MissingReference(_))
    }
}
