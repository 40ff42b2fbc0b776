use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::collect::global_variables::{
    get_temp_path, DEFAULT_BANDS, DEFAULT_COLLECTION, DEFAULT_EDGE_SIZE_PX, DEFAULT_END_DATE,
    DEFAULT_FEATURE_BUFFER_M, DEFAULT_RESOLUTION_M, DEFAULT_START_DATE, DEFAULT_SUPERSAMPLING,
    PLANETARY_COMPUTER_STAC,
};
use crate::geometric::acquisition::AcquisitionRequest;
use crate::geometric::groundtruth::GroundTruthOptions;

/// Batch settings read from a JSON file; every field is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub stac_url: String,
    pub collection: String,
    pub bands: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    pub edge_size_px: u32,
    pub resolution_m: f64,
    /// STAC query extension filters; `None` keeps the default cloud cover filter
    pub query: Option<Map<String, Value>>,
    /// Cap on catalog items collected per tile across pages
    pub max_items: usize,
    pub out_dir: PathBuf,
    pub write_all_timesteps: bool,
    pub supersampling: u32,
    pub buffer_m: f64,
    /// Where to write the batch report, if anywhere
    pub report: Option<PathBuf>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            stac_url: PLANETARY_COMPUTER_STAC.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            bands: DEFAULT_BANDS.iter().map(|b| b.to_string()).collect(),
            start_date: DEFAULT_START_DATE.to_string(),
            end_date: DEFAULT_END_DATE.to_string(),
            edge_size_px: DEFAULT_EDGE_SIZE_PX,
            resolution_m: DEFAULT_RESOLUTION_M,
            query: None,
            max_items: 500,
            out_dir: get_temp_path(),
            write_all_timesteps: false,
            supersampling: DEFAULT_SUPERSAMPLING,
            buffer_m: DEFAULT_FEATURE_BUFFER_M,
            report: None,
        }
    }
}

impl BatchConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {:?}", path))?;
        let config: BatchConfig = serde_json::from_str(&text)
            .context(format!("Failed to parse config file: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.edge_size_px == 0 {
            anyhow::bail!("edge_size_px must be positive");
        }
        if !(self.resolution_m.is_finite() && self.resolution_m > 0.0) {
            anyhow::bail!("resolution_m must be positive, got {}", self.resolution_m);
        }
        if self.supersampling == 0 {
            anyhow::bail!("supersampling must be positive");
        }
        if self.bands.is_empty() {
            anyhow::bail!("at least one band is required");
        }
        if self.max_items == 0 {
            anyhow::bail!("max_items must be positive");
        }
        Ok(())
    }

    pub fn acquisition_request(&self) -> AcquisitionRequest {
        let defaults = AcquisitionRequest::default();
        AcquisitionRequest {
            collection: self.collection.clone(),
            bands: self.bands.clone(),
            start_date: self.start_date.clone(),
            end_date: self.end_date.clone(),
            edge_size_px: self.edge_size_px,
            resolution_m: self.resolution_m,
            query: self.query.clone().unwrap_or(defaults.query),
            out_dir: self.out_dir.clone(),
            write_all_timesteps: self.write_all_timesteps,
        }
    }

    pub fn groundtruth_options(&self) -> GroundTruthOptions {
        GroundTruthOptions {
            supersampling: self.supersampling,
            buffer_m: self.buffer_m,
        }
    }
}
