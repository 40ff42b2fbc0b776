//! Glue for running pre-trained segmentation or super-resolution models on
//! acquired tiles.
//!
//! Models are opaque: anything implementing [`ImageModel`] maps an input
//! [`Tensor`] to an output `Tensor`. This module only reads rasters,
//! normalises them, thresholds the predictions and writes them back on the
//! source footprint.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::commons::basic_functions::parse_tile_id;
use crate::commons::batch::{BatchReport, TileOutcome};
use crate::commons::raster_io::{read_raster_f32, write_geotiff, GeoTiffOptions};
use crate::error::TileError;

/// Probability above which a prediction is foreground.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Dense `(bands, height, width)` `f32` tensor, band-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    bands: usize,
    height: usize,
    width: usize,
    data: Vec<f32>,
}

impl Tensor {
    pub fn new(bands: usize, height: usize, width: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != bands * height * width {
            anyhow::bail!(
                "Tensor data holds {} values, shape ({}, {}, {}) needs {}",
                data.len(),
                bands,
                height,
                width,
                bands * height * width
            );
        }
        Ok(Tensor {
            bands,
            height,
            width,
            data,
        })
    }

    pub fn zeros(bands: usize, height: usize, width: usize) -> Self {
        Tensor {
            bands,
            height,
            width,
            data: vec![0.0; bands * height * width],
        }
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.bands, self.height, self.width)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn band(&self, index: usize) -> &[f32] {
        let n = self.height * self.width;
        &self.data[index * n..(index + 1) * n]
    }

    pub fn band_mut(&mut self, index: usize) -> &mut [f32] {
        let n = self.height * self.width;
        &mut self.data[index * n..(index + 1) * n]
    }
}

/// A pre-trained model used as a black box.
pub trait ImageModel {
    fn predict(&self, input: &Tensor) -> Result<Tensor>;
}

/// Input preparation applied before prediction, in field order.
#[derive(Debug, Clone, Default)]
pub struct Preprocess {
    /// Multiplier applied to raw values (`1e-4` turns Sentinel-2 L2A DN into reflectance)
    pub scale: Option<f32>,
    /// Zero-based bands to keep, in order
    pub bands: Option<Vec<usize>>,
    /// Per-band mean and standard deviation of the selected bands
    pub normalize: Option<(Vec<f32>, Vec<f32>)>,
}

impl Preprocess {
    pub fn apply(&self, input: &Tensor) -> Result<Tensor> {
        let selected: Vec<usize> = match &self.bands {
            Some(bands) => bands.clone(),
            None => (0..input.bands).collect(),
        };
        if let Some(bad) = selected.iter().find(|b| **b >= input.bands) {
            anyhow::bail!("Band {} requested from a {}-band input", bad, input.bands);
        }

        let mut output = Tensor::zeros(selected.len(), input.height, input.width);
        for (out_index, in_index) in selected.iter().enumerate() {
            output.band_mut(out_index).copy_from_slice(input.band(*in_index));
        }

        if let Some(scale) = self.scale {
            output.data.iter_mut().for_each(|v| *v *= scale);
        }

        if let Some((mean, std)) = &self.normalize {
            if mean.len() != output.bands || std.len() != output.bands {
                anyhow::bail!(
                    "Normalisation has {} means and {} stds for {} bands",
                    mean.len(),
                    std.len(),
                    output.bands
                );
            }
            for b in 0..output.bands {
                let (m, s) = (mean[b], std[b]);
                if s == 0.0 {
                    anyhow::bail!("Standard deviation of band {} is zero", b);
                }
                output.band_mut(b).iter_mut().for_each(|v| *v = (*v - m) / s);
            }
        }

        Ok(output)
    }
}

/// `1` where the value is strictly greater than `threshold`, else `0`.
pub fn binarize(tensor: &Tensor, threshold: f32) -> Vec<u8> {
    tensor
        .data
        .iter()
        .map(|v| u8::from(*v > threshold))
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct InferenceOptions {
    pub preprocess: Preprocess,
    /// Write a binary `u8` mask instead of raw `f32` predictions
    pub threshold: Option<f32>,
}

/// `out_dir/<stem>_pred.tif`
pub fn prediction_path(out_dir: &Path, image: &Path) -> PathBuf {
    let stem = image
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    out_dir.join(format!("{}_pred.tif", stem))
}

/// Predict one image and write the result on its footprint.
pub fn predict_image<M: ImageModel>(
    model: &M,
    image: &Path,
    out_dir: &Path,
    options: &InferenceOptions,
) -> Result<PathBuf> {
    let raster = read_raster_f32(image)?;
    let input = Tensor::new(
        raster.bands,
        raster.grid.height,
        raster.grid.width,
        raster.data,
    )?;
    let input = options.preprocess.apply(&input)?;

    let prediction = model
        .predict(&input)
        .context(format!("Model failed on {:?}", image))?;
    let (bands, height, width) = prediction.shape();
    let grid = raster.grid.resized(width, height);

    let output = prediction_path(out_dir, image);
    match options.threshold {
        Some(threshold) => {
            let mask = binarize(&prediction, threshold);
            write_geotiff(&output, &grid, bands, &mask, &GeoTiffOptions::lzw())?;
        }
        None => {
            write_geotiff(
                &output,
                &grid,
                bands,
                prediction.data(),
                &GeoTiffOptions::default(),
            )?;
        }
    }
    Ok(output)
}

/// Run `model` over every image; a failing image is logged and the rest continue.
pub fn run_inference<M: ImageModel>(
    model: &M,
    images: &[PathBuf],
    out_dir: &Path,
    options: &InferenceOptions,
) -> BatchReport {
    let total = images.len();
    let mut report = BatchReport::new();

    for (position, image) in images.iter().enumerate() {
        let tile_id = parse_tile_id(image).unwrap_or(position);
        let result = if image.exists() {
            predict_image(model, image, out_dir, options)
                .map(|path| vec![path])
                .map_err(TileError::from)
        } else {
            Err(TileError::MissingReference(image.clone()))
        };
        report.push(TileOutcome::from_result(tile_id, position + 1, total, result));
    }

    log::info!("Inference: {}", report.summary());
    report
}
