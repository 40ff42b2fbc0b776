use anyhow::{Context, Result};
use gdal::cpl::CslStringList;
use gdal::raster::{Buffer, GdalType};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager, Metadata};
use std::path::Path;

use crate::geo_core::BoundingBox;

/// Pixel grid of a north-up raster.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterGrid {
    pub width: usize,
    pub height: usize,
    /// GDAL order: `[origin_x, pixel_w, rot, origin_y, rot, pixel_h]`
    pub geo_transform: [f64; 6],
    pub epsg: u32,
}

impl RasterGrid {
    /// Grid covering `bbox` at `resolution` metres per pixel.
    pub fn from_bbox(bbox: &BoundingBox, resolution: f64, epsg: u32) -> Self {
        RasterGrid {
            width: (bbox.width() / resolution).round() as usize,
            height: (bbox.height() / resolution).round() as usize,
            geo_transform: [bbox.min_x, resolution, 0.0, bbox.max_y, 0.0, -resolution],
            epsg,
        }
    }

    pub fn from_dataset(dataset: &Dataset) -> Result<Self> {
        let (width, height) = dataset.raster_size();
        let geo_transform = dataset
            .geo_transform()
            .context("Failed to read geotransform")?;
        let srs = dataset
            .spatial_ref()
            .context("Raster has no spatial reference")?;
        let epsg = srs
            .auth_code()
            .context("Raster CRS has no EPSG code")?;
        Ok(RasterGrid {
            width,
            height,
            geo_transform,
            epsg: epsg as u32,
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let dataset =
            Dataset::open(path).context(format!("Failed to open raster: {:?}", path))?;
        Self::from_dataset(&dataset)
    }

    pub fn pixel_size(&self) -> (f64, f64) {
        (self.geo_transform[1], self.geo_transform[5])
    }

    pub fn bounds(&self) -> BoundingBox {
        let gt = &self.geo_transform;
        let x0 = gt[0];
        let y0 = gt[3];
        let x1 = gt[0] + self.width as f64 * gt[1];
        let y1 = gt[3] + self.height as f64 * gt[5];
        BoundingBox::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }

    /// Same origin, `ratio` times more pixels along each axis.
    pub fn supersampled(&self, ratio: u32) -> Self {
        let r = ratio as f64;
        let gt = &self.geo_transform;
        RasterGrid {
            width: self.width * ratio as usize,
            height: self.height * ratio as usize,
            geo_transform: [gt[0], gt[1] / r, gt[2] / r, gt[3], gt[4] / r, gt[5] / r],
            epsg: self.epsg,
        }
    }

    /// Same footprint resampled to `width` x `height` pixels.
    pub fn resized(&self, width: usize, height: usize) -> Self {
        let sx = self.width as f64 / width as f64;
        let sy = self.height as f64 / height as f64;
        let gt = &self.geo_transform;
        RasterGrid {
            width,
            height,
            geo_transform: [gt[0], gt[1] * sx, gt[2] * sy, gt[3], gt[4] * sx, gt[5] * sy],
            epsg: self.epsg,
        }
    }
}

/// All bands of a raster as `f32`, band-major.
#[derive(Debug, Clone)]
pub struct RasterData {
    pub grid: RasterGrid,
    pub bands: usize,
    pub data: Vec<f32>,
}

impl RasterData {
    pub fn band(&self, index: usize) -> &[f32] {
        let n = self.grid.width * self.grid.height;
        &self.data[index * n..(index + 1) * n]
    }
}

pub fn read_raster_f32(path: &Path) -> Result<RasterData> {
    let dataset = Dataset::open(path).context(format!("Failed to open raster: {:?}", path))?;
    let grid = RasterGrid::from_dataset(&dataset)?;
    let bands = dataset.raster_count() as usize;
    let (w, h) = (grid.width, grid.height);

    let mut data = Vec::with_capacity(bands * w * h);
    for index in 1..=bands {
        let band = dataset
            .rasterband(index as _)
            .context(format!("Failed to get band {}", index))?;
        let buffer = band
            .read_as::<f32>((0, 0), (w, h), (w, h), None)
            .context(format!("Failed to read band {}", index))?;
        data.extend_from_slice(buffer.data());
    }

    Ok(RasterData { grid, bands, data })
}

/// Creation and tagging options for [`write_geotiff`].
#[derive(Debug, Clone, Default)]
pub struct GeoTiffOptions {
    /// GTiff `COMPRESS` creation option (e.g. `LZW`)
    pub compress: Option<String>,
    pub nodata: Option<f64>,
    /// One description per band
    pub band_names: Vec<String>,
    /// Dataset-level metadata items (default domain)
    pub metadata: Vec<(String, String)>,
}

impl GeoTiffOptions {
    pub fn lzw() -> Self {
        GeoTiffOptions {
            compress: Some("LZW".to_string()),
            ..Default::default()
        }
    }
}

/// Write a band-major buffer as a GeoTIFF on `grid`.
pub fn write_geotiff<T: GdalType + Copy>(
    path: &Path,
    grid: &RasterGrid,
    bands: usize,
    data: &[T],
    options: &GeoTiffOptions,
) -> Result<()> {
    let (w, h) = (grid.width, grid.height);
    if data.len() != bands * w * h {
        anyhow::bail!(
            "Buffer holds {} values, expected {} bands x {} x {}",
            data.len(),
            bands,
            w,
            h
        );
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .context(format!("Failed to create output directory: {:?}", parent))?;
    }

    let driver =
        DriverManager::get_driver_by_name("GTiff").context("Failed to get GTiff driver")?;

    let mut creation_options = CslStringList::new();
    if let Some(compress) = &options.compress {
        creation_options
            .set_name_value("COMPRESS", compress)
            .context("Invalid creation option")?;
    }

    let mut dataset = driver
        .create_with_band_type_with_options::<T, _>(
            path,
            w as _,
            h as _,
            bands as _,
            &creation_options,
        )
        .context(format!("Failed to create GeoTIFF dataset: {:?}", path))?;

    dataset
        .set_geo_transform(&grid.geo_transform)
        .context("Failed to set geotransform")?;

    let srs = SpatialRef::from_epsg(grid.epsg).context("Failed to create spatial reference")?;
    dataset
        .set_spatial_ref(&srs)
        .context("Failed to set spatial reference")?;

    for (key, value) in &options.metadata {
        dataset
            .set_metadata_item(key, value, "")
            .context(format!("Failed to set metadata item {}", key))?;
    }

    let n = w * h;
    for index in 0..bands {
        let mut band = dataset
            .rasterband((index + 1) as _)
            .context(format!("Failed to get band {}", index + 1))?;
        let mut buffer = Buffer::new((w, h), data[index * n..(index + 1) * n].to_vec());
        band.write((0, 0), (w, h), &mut buffer)
            .context("Failed to write raster band")?;
        if let Some(nodata) = options.nodata {
            band.set_no_data_value(Some(nodata))
                .context("Failed to set no data value")?;
        }
        if let Some(name) = options.band_names.get(index) {
            band.set_description(name)
                .context("Failed to set band description")?;
        }
    }

    Ok(())
}
