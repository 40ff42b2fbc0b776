//! Best-effort batch bookkeeping: one outcome per tile, never abort.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::TileError;

/// Result of processing a single tile.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TileOutcome {
    Success { tile_id: usize, outputs: Vec<PathBuf> },
    Skipped { tile_id: usize, reason: String },
    Failed { tile_id: usize, reason: String },
}

impl TileOutcome {
    pub fn tile_id(&self) -> usize {
        match self {
            TileOutcome::Success { tile_id, .. }
            | TileOutcome::Skipped { tile_id, .. }
            | TileOutcome::Failed { tile_id, .. } => *tile_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TileOutcome::Success { .. })
    }

    /// Classify a per-tile result and log it with the tile index.
    pub fn from_result(
        tile_id: usize,
        position: usize,
        total: usize,
        result: std::result::Result<Vec<PathBuf>, TileError>,
    ) -> Self {
        match result {
            Ok(outputs) => {
                log::info!("[{}/{}] Tile {} done", position, total, tile_id);
                TileOutcome::Success { tile_id, outputs }
            }
            Err(e) if e.is_skip() => {
                log::warn!("[{}/{}] Tile {} skipped: {}", position, total, tile_id, e);
                TileOutcome::Skipped {
                    tile_id,
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                log::error!("[{}/{}] Error in tile {}: {:#}", position, total, tile_id, e);
                TileOutcome::Failed {
                    tile_id,
                    reason: format!("{:#}", e),
                }
            }
        }
    }
}

/// Outcomes of a whole batch, in processing order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub outcomes: Vec<TileOutcome>,
}

impl BatchReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, outcome: TileOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, TileOutcome::Skipped { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, TileOutcome::Failed { .. }))
            .count()
    }

    pub fn get(&self, tile_id: usize) -> Option<&TileOutcome> {
        self.outcomes.iter().find(|o| o.tile_id() == tile_id)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} tiles: {} succeeded, {} skipped, {} failed",
            self.outcomes.len(),
            self.succeeded(),
            self.skipped(),
            self.failed()
        )
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create output directory: {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        std::fs::write(path, json).context(format!("Failed to write report: {:?}", path))?;
        Ok(())
    }
}

#[cfg(feature = "indicatif")]
pub(crate) fn progress_bar(len: usize) -> indicatif::ProgressBar {
    let bar = indicatif::ProgressBar::new(len as u64);
    if let Ok(style) = indicatif::ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {percent} {msg}")
    {
        bar.set_style(style.progress_chars("##-"));
    }
    bar
}
