use anyhow::Context;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

use crate::collect::global_variables::{
    get_temp_path, DEFAULT_BANDS, DEFAULT_COLLECTION, DEFAULT_EDGE_SIZE_PX, DEFAULT_END_DATE,
    DEFAULT_MAX_CLOUD_COVER, DEFAULT_RESOLUTION_M, DEFAULT_START_DATE,
};
use crate::collect::stac::{ImageryCatalog, StacItem, StacSearchParams};
use crate::commons::basic_functions::{bbox_path, image_path, tile_suffix, ACQUISITION_FOLDERS};
use crate::commons::batch::{BatchReport, TileOutcome};
use crate::error::TileError;
use crate::geo_core::Projector;
use crate::geometric::cube::{write_bbox_geojson, CubeAttributes, CubeBuilder};
use crate::geometric::tile::{compute_tile, LatLon, Tile};

/// Everything an acquisition needs besides the point itself.
#[derive(Debug, Clone)]
pub struct AcquisitionRequest {
    pub collection: String,
    /// Asset keys stacked as bands, in order
    pub bands: Vec<String>,
    /// `YYYY-MM-DD`
    pub start_date: String,
    pub end_date: String,
    pub edge_size_px: u32,
    pub resolution_m: f64,
    /// Extra catalog filters passed verbatim as the STAC `query` member
    pub query: Map<String, Value>,
    pub out_dir: PathBuf,
    /// Also write `image_NNNNN_YYYY-MM-DD.tif` for every time step
    pub write_all_timesteps: bool,
}

impl Default for AcquisitionRequest {
    fn default() -> Self {
        let mut query = Map::new();
        query.insert(
            "eo:cloud_cover".to_string(),
            json!({ "lt": DEFAULT_MAX_CLOUD_COVER }),
        );
        AcquisitionRequest {
            collection: DEFAULT_COLLECTION.to_string(),
            bands: DEFAULT_BANDS.iter().map(|b| b.to_string()).collect(),
            start_date: DEFAULT_START_DATE.to_string(),
            end_date: DEFAULT_END_DATE.to_string(),
            edge_size_px: DEFAULT_EDGE_SIZE_PX,
            resolution_m: DEFAULT_RESOLUTION_M,
            query,
            out_dir: get_temp_path(),
            write_all_timesteps: false,
        }
    }
}

impl AcquisitionRequest {
    /// `start/end` as sent to the catalog.
    pub fn datetime(&self) -> String {
        format!("{}/{}", self.start_date, self.end_date)
    }

    fn search_params(&self, tile: &Tile) -> StacSearchParams {
        StacSearchParams::new()
            .intersects(tile.latlon_geometry())
            .datetime(&self.start_date, &self.end_date)
            .collections(&[self.collection.as_str()])
            .query(self.query.clone())
    }
}

/// Create `input`, `output` and `geojson` under `out_dir`.
pub fn create_folders(out_dir: &Path) -> anyhow::Result<()> {
    for folder in ACQUISITION_FOLDERS {
        let path = out_dir.join(folder);
        std::fs::create_dir_all(&path)
            .context(format!("Failed to create output directory: {:?}", path))?;
    }
    Ok(())
}

/// Downloads one image cube per sample point.
pub struct Acquisition<C: ImageryCatalog, B: CubeBuilder> {
    catalog: C,
    builder: B,
    request: AcquisitionRequest,
    projector: Projector,
}

impl<C: ImageryCatalog, B: CubeBuilder> Acquisition<C, B> {
    pub fn new(catalog: C, builder: B, request: AcquisitionRequest) -> Self {
        Acquisition {
            catalog,
            builder,
            request,
            projector: Projector::new(),
        }
    }

    pub fn request(&self) -> &AcquisitionRequest {
        &self.request
    }

    fn find_items(&self, tile_id: usize, tile: &Tile) -> Result<Vec<StacItem>, TileError> {
        let params = self.request.search_params(tile);
        let items = self
            .catalog
            .search(&params)
            .map_err(|e| TileError::Catalog(format!("{:#}", e)))?;

        if items.is_empty() {
            return Err(TileError::NoScenes {
                collection: self.request.collection.clone(),
                datetime: self.request.datetime(),
            });
        }

        let total = items.len();
        let usable: Vec<StacItem> = items
            .into_iter()
            .filter(|item| item.has_assets(&self.request.bands))
            .collect();
        if usable.len() < total {
            log::warn!(
                "Tile {}: dropped {} items missing one of {:?}",
                tile_id,
                total - usable.len(),
                self.request.bands
            );
        }
        if usable.is_empty() {
            return Err(TileError::NoScenes {
                collection: self.request.collection.clone(),
                datetime: self.request.datetime(),
            });
        }

        usable
            .into_iter()
            .map(|item| {
                self.catalog
                    .sign(item, &self.request.bands)
                    .map_err(|e| TileError::Catalog(format!("{:#}", e)))
            })
            .collect()
    }

    /// Acquire the cube around `point` and persist it under tile index `tile_id`.
    pub fn acquire(&mut self, tile_id: usize, point: LatLon) -> Result<Vec<PathBuf>, TileError> {
        let tile = compute_tile(
            &mut self.projector,
            point,
            self.request.edge_size_px,
            self.request.resolution_m,
        )?;
        log::debug!(
            "Tile {}: EPSG:{} bbox {:?}",
            tile_id,
            tile.epsg,
            tile.bbox_utm.to_array()
        );

        let items = self.find_items(tile_id, &tile)?;
        log::info!("Tile {}: {} items", tile_id, items.len());

        let mut cube = self.builder.build(&items, &self.request.bands, &tile)?;
        if cube.is_empty() {
            return Err(TileError::NoScenes {
                collection: self.request.collection.clone(),
                datetime: self.request.datetime(),
            });
        }

        let attributes = CubeAttributes::new(
            &tile,
            cube.grid.width,
            &self.request.collection,
            self.catalog.url(),
            &self.request.start_date,
            &self.request.end_date,
        );
        cube.set_provenance(&attributes);

        let out_dir = &self.request.out_dir;
        create_folders(out_dir)?;

        let mut outputs = vec![
            write_bbox_geojson(&cube.grid, &bbox_path(out_dir, tile_id))?,
            cube.write_time_step(0, &image_path(out_dir, tile_id))?,
        ];

        if self.request.write_all_timesteps {
            for (index, step) in cube.time_steps.iter().enumerate() {
                let name = format!("image_{}_{}.tif", tile_suffix(tile_id), step.date_string());
                outputs.push(cube.write_time_step(index, &out_dir.join("input").join(name))?);
            }
        }

        Ok(outputs)
    }

    /// Acquire every point in order; tile indices are the point positions.
    ///
    /// A `None` entry is a source row without a usable geometry: it is
    /// reported as failed and keeps its index.
    pub fn run_batch<P>(&mut self, points: &[P]) -> BatchReport
    where
        P: Into<Option<LatLon>> + Copy,
    {
        let total = points.len();
        let mut report = BatchReport::new();

        #[cfg(feature = "indicatif")]
        let pb = crate::commons::batch::progress_bar(total);

        for (tile_id, point) in points.iter().enumerate() {
            let result = match (*point).into() {
                Some(point) => self.acquire(tile_id, point),
                None => Err(TileError::InvalidInput(format!(
                    "row {} has no usable geometry",
                    tile_id
                ))),
            };
            report.push(TileOutcome::from_result(tile_id, tile_id + 1, total, result));

            #[cfg(feature = "indicatif")]
            pb.inc(1);
        }

        #[cfg(feature = "indicatif")]
        pb.finish_with_message("acquisition done");

        log::info!("Acquisition: {}", report.summary());
        report
    }
}
