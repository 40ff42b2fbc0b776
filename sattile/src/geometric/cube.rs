use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::collect::stac::StacItem;
use crate::commons::raster_io::{read_raster_f32, write_geotiff, GeoTiffOptions, RasterGrid};
use crate::geometric::tile::Tile;

/// Provenance attached to every persisted cube.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CubeAttributes {
    pub collection: String,
    pub stac: String,
    pub epsg: u32,
    pub resolution: f64,
    /// Realised edge size in pixels
    pub edge_size: usize,
    pub edge_size_m: f64,
    pub central_lat: f64,
    pub central_lon: f64,
    /// Unrounded projected centre
    pub central_y: f64,
    pub central_x: f64,
    pub time_coverage_start: String,
    pub time_coverage_end: String,
}

impl CubeAttributes {
    pub fn new(
        tile: &Tile,
        edge_size: usize,
        collection: &str,
        stac: &str,
        start_date: &str,
        end_date: &str,
    ) -> Self {
        CubeAttributes {
            collection: collection.to_string(),
            stac: stac.to_string(),
            epsg: tile.epsg,
            resolution: tile.resolution_m,
            edge_size,
            edge_size_m: edge_size as f64 * tile.resolution_m,
            central_lat: tile.point.lat,
            central_lon: tile.point.lon,
            central_y: tile.center_utm.1,
            central_x: tile.center_utm.0,
            time_coverage_start: start_date.to_string(),
            time_coverage_end: end_date.to_string(),
        }
    }

    /// Key/value pairs in a fixed order, as written to raster metadata.
    pub fn entries(&self) -> Vec<(String, String)> {
        vec![
            ("collection".into(), self.collection.clone()),
            ("stac".into(), self.stac.clone()),
            ("epsg".into(), self.epsg.to_string()),
            ("resolution".into(), self.resolution.to_string()),
            ("edge_size".into(), self.edge_size.to_string()),
            ("edge_size_m".into(), self.edge_size_m.to_string()),
            ("central_lat".into(), self.central_lat.to_string()),
            ("central_lon".into(), self.central_lon.to_string()),
            ("central_y".into(), self.central_y.to_string()),
            ("central_x".into(), self.central_x.to_string()),
            ("time_coverage_start".into(), self.time_coverage_start.clone()),
            ("time_coverage_end".into(), self.time_coverage_end.clone()),
        ]
    }
}

/// One acquisition date of the cube, all bands, band-major.
#[derive(Debug, Clone)]
pub struct TimeStep {
    pub datetime: DateTime<Utc>,
    pub item_id: String,
    pub data: Vec<f32>,
}

impl TimeStep {
    pub fn date_string(&self) -> String {
        self.datetime.format("%Y-%m-%d").to_string()
    }
}

/// Multi-band, multi-date `f32` raster clipped to a tile footprint.
#[derive(Debug, Clone)]
pub struct ImageCube {
    pub bands: Vec<String>,
    pub grid: RasterGrid,
    pub time_steps: Vec<TimeStep>,
    pub attrs: BTreeMap<String, String>,
}

impl ImageCube {
    pub fn new(bands: Vec<String>, grid: RasterGrid) -> Self {
        ImageCube {
            bands,
            grid,
            time_steps: Vec::new(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, step: TimeStep) -> Result<()> {
        let expected = self.bands.len() * self.grid.width * self.grid.height;
        if step.data.len() != expected {
            anyhow::bail!(
                "Time step {} holds {} values, expected {}",
                step.item_id,
                step.data.len(),
                expected
            );
        }
        self.time_steps.push(step);
        Ok(())
    }

    /// Order time steps by acquisition datetime.
    pub fn sort_by_time(&mut self) {
        self.time_steps.sort_by_key(|s| s.datetime);
    }

    pub fn is_empty(&self) -> bool {
        self.time_steps.is_empty()
    }

    /// Drop whatever the builder recorded and keep only the provenance set.
    pub fn set_provenance(&mut self, attributes: &CubeAttributes) {
        self.attrs = attributes.entries().into_iter().collect();
    }

    /// Write one time step as a multi-band GeoTIFF tagged with the cube attributes.
    pub fn write_time_step(&self, index: usize, path: &Path) -> Result<PathBuf> {
        let step = self
            .time_steps
            .get(index)
            .context(format!("Cube has no time step {}", index))?;

        let mut metadata: Vec<(String, String)> =
            self.attrs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        metadata.push(("datetime".into(), step.datetime.to_rfc3339()));
        metadata.push(("item_id".into(), step.item_id.clone()));

        let options = GeoTiffOptions {
            nodata: Some(f64::NAN),
            band_names: self.bands.clone(),
            metadata,
            ..Default::default()
        };
        write_geotiff(path, &self.grid, self.bands.len(), &step.data, &options)?;
        Ok(path.to_path_buf())
    }
}

/// Builds the cube of a tile from catalog items.
pub trait CubeBuilder {
    fn build(&self, items: &[StacItem], bands: &[String], tile: &Tile) -> Result<ImageCube>;
}

/// Cube builder warping each asset to the tile grid with `gdalwarp`.
pub struct GdalWarpCubeBuilder {
    /// `gdalwarp -r` method
    pub resampling: String,
}

impl Default for GdalWarpCubeBuilder {
    fn default() -> Self {
        GdalWarpCubeBuilder {
            resampling: "near".to_string(),
        }
    }
}

/// GDAL source name for an asset href.
pub fn asset_source(href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        format!("/vsicurl/{}", href)
    } else {
        href.to_string()
    }
}

impl GdalWarpCubeBuilder {
    fn warp(&self, source: &str, output: &Path, tile: &Tile) -> Result<()> {
        let bbox = &tile.bbox_utm;
        let res = tile.resolution_m.to_string();

        let status = Command::new("gdalwarp")
            .arg("-q")
            .arg("-overwrite")
            .arg("-of")
            .arg("GTiff")
            .arg("-te")
            .arg(bbox.min_x.to_string())
            .arg(bbox.min_y.to_string())
            .arg(bbox.max_x.to_string())
            .arg(bbox.max_y.to_string())
            .arg("-tr")
            .arg(&res)
            .arg(&res)
            .arg("-t_srs")
            .arg(format!("EPSG:{}", tile.epsg))
            .arg("-r")
            .arg(&self.resampling)
            .arg("-ot")
            .arg("Float32")
            .arg("-dstnodata")
            .arg("nan")
            .arg(source)
            .arg(output)
            .status()
            .context(
                "Failed to execute gdalwarp. Make sure GDAL is installed and gdalwarp is in PATH",
            )?;

        if !status.success() {
            anyhow::bail!("gdalwarp failed for {}", source);
        }
        Ok(())
    }
}

impl CubeBuilder for GdalWarpCubeBuilder {
    fn build(&self, items: &[StacItem], bands: &[String], tile: &Tile) -> Result<ImageCube> {
        let grid = RasterGrid::from_bbox(&tile.bbox_utm, tile.resolution_m, tile.epsg);
        let mut cube = ImageCube::new(bands.to_vec(), grid);
        let work_dir = tempfile::tempdir().context("Failed to create temporary directory")?;

        for item in items {
            let datetime = item
                .acquired()
                .context(format!("Item {} has no datetime", item.id))?;
            let mut data = Vec::with_capacity(bands.len() * cube.grid.width * cube.grid.height);

            for band in bands {
                let asset = item
                    .asset(band)
                    .context(format!("Item {} has no asset {}", item.id, band))?;
                let output = work_dir.path().join(format!("{}_{}.tif", item.id, band));
                self.warp(&asset_source(&asset.href), &output, tile)?;

                let warped = read_raster_f32(&output)?;
                if warped.grid.width != cube.grid.width || warped.grid.height != cube.grid.height {
                    anyhow::bail!(
                        "Warped {} is {}x{}, expected {}x{}",
                        band,
                        warped.grid.width,
                        warped.grid.height,
                        cube.grid.width,
                        cube.grid.height
                    );
                }
                data.extend_from_slice(warped.band(0));
            }

            log::debug!("Stacked item {} ({} bands)", item.id, bands.len());
            cube.push(TimeStep {
                datetime,
                item_id: item.id.clone(),
                data,
            })?;
        }

        cube.sort_by_time();
        let ids: Vec<&str> = cube.time_steps.iter().map(|s| s.item_id.as_str()).collect();
        cube.attrs.insert("items".into(), ids.join(","));
        cube.attrs
            .insert("resampling".into(), self.resampling.clone());
        Ok(cube)
    }
}

/// GeoJSON `crs` member naming an EPSG code.
pub fn named_crs(epsg: u32) -> JsonObject {
    let mut crs = JsonObject::new();
    crs.insert(
        "crs".to_string(),
        json!({
            "type": "name",
            "properties": {"name": format!("urn:ogc:def:crs:EPSG::{}", epsg)}
        }),
    );
    crs
}

/// Write the projected footprint of a raster grid as a one-feature collection.
pub fn write_bbox_geojson(grid: &RasterGrid, path: &Path) -> Result<PathBuf> {
    let polygon = grid.bounds().to_polygon();
    let feature = Feature::from(geojson::Geometry::new(geojson::Value::from(&polygon)));
    let collection = FeatureCollection {
        bbox: None,
        features: vec![feature],
        foreign_members: Some(named_crs(grid.epsg)),
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .context(format!("Failed to create output directory: {:?}", parent))?;
    }
    std::fs::write(path, GeoJson::from(collection).to_string())
        .context(format!("Failed to write GeoJSON file: {:?}", path))?;
    Ok(path.to_path_buf())
}
