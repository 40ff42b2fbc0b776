use anyhow::{Context, Result};
use geo::coordinate_position::CoordPos;
use geo::dimensions::Dimensions;
use geo::{BoundingRect, Geometry as GeoGeometry, Intersects, Rect, Relate};
use geos::{Geom, Geometry as GeosGeometry};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::collect::global_variables::{DEFAULT_FEATURE_BUFFER_M, DEFAULT_SUPERSAMPLING};
use crate::commons::basic_functions::{mask_path, parse_tile_id, reference_image_for_bbox};
use crate::commons::batch::{BatchReport, TileOutcome};
use crate::commons::raster_io::{write_geotiff, GeoTiffOptions, RasterGrid};
use crate::error::TileError;
use crate::geo_core::Projector;
use crate::geometric::vector_store::{read_geojson_file, VectorStore};

/// Segments per quarter circle used by GEOS when buffering.
const BUFFER_QUADSEGS: i32 = 16;

/// Ground-truth vector class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FeatureClass {
    Buildings,
    Roads,
}

impl FeatureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureClass::Buildings => "buildings",
            FeatureClass::Roads => "roads",
        }
    }
}

impl fmt::Display for FeatureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureClass {
    type Err = TileError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buildings" => Ok(FeatureClass::Buildings),
            "roads" => Ok(FeatureClass::Roads),
            other => Err(TileError::InvalidInput(format!(
                "unknown feature class '{}', expected buildings or roads",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundTruthOptions {
    /// Mask pixels per reference pixel along each axis
    pub supersampling: u32,
    /// Buffer distance applied to every kept feature, in CRS units
    pub buffer_m: f64,
}

impl Default for GroundTruthOptions {
    fn default() -> Self {
        GroundTruthOptions {
            supersampling: DEFAULT_SUPERSAMPLING,
            buffer_m: DEFAULT_FEATURE_BUFFER_M,
        }
    }
}

fn to_geos(geometry: &GeoGeometry<f64>) -> Result<GeosGeometry> {
    geometry
        .clone()
        .try_into()
        .context("Failed to convert geo geometry to GEOS")
}

/// Features lying entirely inside `aoi`; partial overlaps are dropped.
pub fn features_within<'a, I>(features: I, aoi: &GeoGeometry<f64>) -> Result<Vec<GeosGeometry>>
where
    I: IntoIterator<Item = &'a GeoGeometry<f64>>,
{
    let aoi = to_geos(aoi)?;
    let mut kept = Vec::new();
    for feature in features {
        let geos_geom = to_geos(feature)?;
        if geos_geom.within(&aoi).context("GEOS within failed")? {
            kept.push(geos_geom);
        }
    }
    Ok(kept)
}

/// Buffer each geometry by `distance` and convert back to geo.
pub fn buffer_features(features: &[GeosGeometry], distance: f64) -> Result<Vec<GeoGeometry<f64>>> {
    features
        .iter()
        .map(|g| {
            let buffered = g
                .buffer(distance, BUFFER_QUADSEGS)
                .context("Failed to buffer geometry")?;
            buffered
                .try_into()
                .context("Failed to convert GEOS geometry to geo")
        })
        .collect()
}

/// Whether `feature` reaches the interior of `pixel`; contact along the pixel
/// edge alone does not count.
pub fn covers_pixel_interior(feature: &GeoGeometry<f64>, pixel: &Rect<f64>) -> bool {
    let pixel = pixel.to_polygon();
    if !feature.intersects(&pixel) {
        return false;
    }
    feature.relate(&GeoGeometry::from(pixel)).get(CoordPos::Inside, CoordPos::Inside) != Dimensions::Empty
}

/// Burn `1` into every pixel of `grid` that the geometries touch.
///
/// Only pixels inside each geometry's envelope are tested.
pub fn rasterize_all_touched(features: &[GeoGeometry<f64>], grid: &RasterGrid) -> Vec<u8> {
    let (width, height) = (grid.width, grid.height);
    let mut mask = vec![0u8; width * height];

    let x_origin = grid.geo_transform[0];
    let pixel_width = grid.geo_transform[1];
    let y_origin = grid.geo_transform[3];
    let pixel_height = grid.geo_transform[5];

    for feature in features {
        let Some(envelope) = feature.bounding_rect() else {
            continue;
        };

        let min_col = ((envelope.min().x - x_origin) / pixel_width).floor().max(0.0) as usize;
        let max_col = ((envelope.max().x - x_origin) / pixel_width)
            .ceil()
            .clamp(0.0, width as f64) as usize;
        let min_row = ((y_origin - envelope.max().y) / pixel_height.abs())
            .floor()
            .max(0.0) as usize;
        let max_row = ((y_origin - envelope.min().y) / pixel_height.abs())
            .ceil()
            .clamp(0.0, height as f64) as usize;

        for row in min_row..max_row {
            for col in min_col..max_col {
                let idx = row * width + col;
                if mask[idx] == 1 {
                    continue;
                }
                let pixel = Rect::new(
                    (
                        x_origin + col as f64 * pixel_width,
                        y_origin + row as f64 * pixel_height,
                    ),
                    (
                        x_origin + (col + 1) as f64 * pixel_width,
                        y_origin + (row + 1) as f64 * pixel_height,
                    ),
                );
                if covers_pixel_interior(feature, &pixel) {
                    mask[idx] = 1;
                }
            }
        }
    }

    mask
}

/// Single-band LZW `u8` mask.
pub fn write_mask(path: &Path, grid: &RasterGrid, mask: &[u8]) -> Result<()> {
    write_geotiff(path, grid, 1, mask, &GeoTiffOptions::lzw())
}

/// Sorted `*.geojson` files of a directory with their tile index.
pub fn bbox_files(dir: &Path) -> Result<Vec<(usize, PathBuf)>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .context(format!("Failed to read directory: {:?}", dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("geojson"))
        .collect();
    files.sort();

    Ok(files
        .into_iter()
        .filter_map(|path| match parse_tile_id(&path) {
            Some(id) => Some((id, path)),
            None => {
                log::warn!("Ignoring {:?}: no tile index in file name", path);
                None
            }
        })
        .collect())
}

/// Rasterizes one feature class against previously acquired tiles.
pub struct GroundTruth {
    store: VectorStore,
    class: FeatureClass,
    options: GroundTruthOptions,
    projector: Projector,
}

impl GroundTruth {
    pub fn new(store: VectorStore, class: FeatureClass, options: GroundTruthOptions) -> Self {
        GroundTruth {
            store,
            class,
            options,
            projector: Projector::new(),
        }
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Mask for the tile described by `bbox_file`.
    pub fn rasterize_tile(
        &mut self,
        bbox_file: &Path,
        tile_id: usize,
        out_dir: &Path,
    ) -> std::result::Result<PathBuf, TileError> {
        if self.options.supersampling == 0 {
            return Err(TileError::InvalidInput("supersampling ratio must be positive".into()));
        }

        let reference = reference_image_for_bbox(bbox_file, tile_id);
        if !reference.exists() {
            return Err(TileError::MissingReference(reference));
        }
        let source_grid = RasterGrid::open(&reference)?;

        let (aoi_geometries, aoi_epsg) = read_geojson_file(bbox_file)?;
        let aoi = aoi_geometries
            .first()
            .ok_or_else(|| TileError::InvalidInput(format!("{:?} has no geometry", bbox_file)))?;
        let aoi = self
            .projector
            .transform_geometry(aoi_epsg, source_grid.epsg, aoi)?;
        let aoi_rect = aoi
            .bounding_rect()
            .ok_or_else(|| TileError::InvalidInput(format!("{:?} has an empty footprint", bbox_file)))?;

        let layer = self.store.in_crs(source_grid.epsg, &mut self.projector)?;
        let candidates = layer.candidates_within(&aoi_rect);
        let kept = features_within(candidates.iter().copied(), &aoi)?;
        let buffered = buffer_features(&kept, self.options.buffer_m)?;
        log::debug!(
            "Tile {}: {} of {} {} inside the footprint ({} envelope candidates)",
            tile_id,
            kept.len(),
            layer.len(),
            self.class,
            candidates.len()
        );

        let mask_grid = source_grid.supersampled(self.options.supersampling);
        let mask = rasterize_all_touched(&buffered, &mask_grid);

        let output = mask_path(out_dir, self.class.as_str(), tile_id);
        write_mask(&output, &mask_grid, &mask)?;
        Ok(output)
    }

    /// Rasterize every `bbox_NNNNN.geojson` in `bbox_dir`, one outcome per tile.
    pub fn run(&mut self, bbox_dir: &Path, out_dir: &Path) -> Result<BatchReport> {
        let files = bbox_files(bbox_dir)?;
        let total = files.len();
        let mut report = BatchReport::new();

        #[cfg(feature = "indicatif")]
        let pb = crate::commons::batch::progress_bar(total);

        for (position, (tile_id, file)) in files.iter().enumerate() {
            let result = self
                .rasterize_tile(file, *tile_id, out_dir)
                .map(|path| vec![path]);
            report.push(TileOutcome::from_result(*tile_id, position + 1, total, result));

            #[cfg(feature = "indicatif")]
            pb.inc(1);
        }

        #[cfg(feature = "indicatif")]
        pb.finish_with_message(format!("{} masks done", self.class));

        log::info!("{}: {}", self.class, report.summary());
        Ok(report)
    }
}

/// Load `vector_path` once and rasterize `feature_class` for every bbox file.
pub fn rasterize_groundtruth(
    bbox_dir: &Path,
    feature_class: FeatureClass,
    vector_path: &Path,
    out_dir: &Path,
    options: GroundTruthOptions,
) -> Result<BatchReport> {
    let store = VectorStore::open(vector_path)?;
    let mut groundtruth = GroundTruth::new(store, feature_class, options);
    groundtruth.run(bbox_dir, out_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, polygon};

    fn grid() -> RasterGrid {
        RasterGrid {
            width: 8,
            height: 8,
            geo_transform: [0.0, 10.0, 0.0, 80.0, 0.0, -10.0],
            epsg: 32610,
        }
    }

    fn square(x0: f64, y0: f64, size: f64) -> GeoGeometry<f64> {
        polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
            (x: x0, y: y0),
        ]
        .into()
    }

    #[test]
    fn feature_class_parsing() {
        assert_eq!("Buildings".parse::<FeatureClass>().unwrap(), FeatureClass::Buildings);
        assert_eq!("roads".parse::<FeatureClass>().unwrap(), FeatureClass::Roads);
        assert!("rivers".parse::<FeatureClass>().is_err());
        assert_eq!(FeatureClass::Roads.to_string(), "roads");
    }

    #[test]
    fn containment_keeps_only_inner_features() {
        let aoi = square(0.0, 0.0, 80.0);
        let inside = square(20.0, 20.0, 5.0);
        let straddling = square(75.0, 20.0, 10.0);
        let outside = square(200.0, 200.0, 5.0);
        let road: GeoGeometry<f64> = line_string![(x: 10.0, y: 10.0), (x: 50.0, y: 10.0)].into();

        let kept = features_within(&[inside, straddling, outside, road], &aoi).unwrap();
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn far_features_never_reach_containment_check() {
        let mut store = VectorStore::from_geometries(
            vec![
                square(20.0, 20.0, 5.0),
                square(5_000.0, 5_000.0, 5.0),
                square(-9_000.0, 40.0, 5.0),
                square(70.0, 70.0, 20.0),
            ],
            32610,
        );
        let mut projector = Projector::new();
        let aoi = square(0.0, 0.0, 80.0);
        let layer = store.in_crs(32610, &mut projector).unwrap();

        let candidates = layer.candidates_within(&aoi.bounding_rect().unwrap());
        assert_eq!(candidates.len(), 1);
        let kept = features_within(candidates.iter().copied(), &aoi).unwrap();
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn buffer_grows_geometry() {
        let aoi = square(0.0, 0.0, 80.0);
        let kept = features_within(&[square(30.0, 30.0, 10.0)], &aoi).unwrap();
        let buffered = buffer_features(&kept, 5.0).unwrap();
        let rect = buffered[0].bounding_rect().unwrap();
        assert!((rect.min().x - 25.0).abs() < 1e-9);
        assert!((rect.max().y - 45.0).abs() < 1e-9);
    }

    #[test]
    fn all_touched_burns_partially_covered_pixels() {
        // Spans columns 1-3 and rows 4-5 without covering any of them fully
        let feature = square(19.0, 21.0, 12.0);
        let mask = rasterize_all_touched(&[feature], &grid());
        let burned: Vec<(usize, usize)> = mask
            .iter()
            .enumerate()
            .filter(|(_, v)| **v == 1)
            .map(|(i, _)| (i % 8, i / 8))
            .collect();
        assert_eq!(burned, vec![(1, 4), (2, 4), (3, 4), (1, 5), (2, 5), (3, 5)]);
    }

    #[test]
    fn shared_pixel_edge_is_not_touching() {
        let feature = square(20.0, 20.0, 20.0);
        assert!(!covers_pixel_interior(&feature, &Rect::new((10.0, 20.0), (20.0, 30.0))));
        assert!(!covers_pixel_interior(&feature, &Rect::new((20.0, 40.0), (30.0, 50.0))));
        assert!(covers_pixel_interior(&feature, &Rect::new((15.0, 15.0), (25.0, 25.0))));

        // grid-aligned square burns exactly its own 2x2 pixels
        let mask = rasterize_all_touched(&[feature], &grid());
        assert_eq!(mask.iter().filter(|v| **v == 1).count(), 4);
        for (col, row) in [(2, 4), (3, 4), (2, 5), (3, 5)] {
            assert_eq!(mask[row * 8 + col], 1);
        }
    }

    #[test]
    fn pixel_edges_off_the_origin_stay_clear() {
        // origin and pixel size that do not divide evenly in floating point
        let fine = RasterGrid {
            width: 8,
            height: 8,
            geo_transform: [553_000.1, 2.5, 0.0, 4_514_000.3, 0.0, -2.5],
            epsg: 32610,
        };
        let (ox, oy) = (553_000.1, 4_514_000.3);
        let (x0, x1) = (ox + 2.0 * 2.5, ox + 4.0 * 2.5);
        let (y0, y1) = (oy + 4.0 * -2.5, oy + 2.0 * -2.5);
        let feature: GeoGeometry<f64> = polygon![
            (x: x0, y: y0),
            (x: x1, y: y0),
            (x: x1, y: y1),
            (x: x0, y: y1),
            (x: x0, y: y0),
        ]
        .into();
        let mask = rasterize_all_touched(&[feature], &fine);
        assert_eq!(mask.iter().filter(|v| **v == 1).count(), 4);
        assert_eq!(mask[2 * 8 + 1], 0);
        assert_eq!(mask[1 * 8 + 2], 0);
    }

    #[test]
    fn rasterize_clamps_to_grid() {
        let mask = rasterize_all_touched(&[square(-50.0, -50.0, 500.0)], &grid());
        assert!(mask.iter().all(|v| *v == 1));
        let empty = rasterize_all_touched(&[square(500.0, 500.0, 5.0)], &grid());
        assert!(empty.iter().all(|v| *v == 0));
    }

    #[test]
    fn missing_reference_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let geojson_dir = dir.path().join("geojson");
        std::fs::create_dir_all(&geojson_dir).unwrap();
        std::fs::write(
            geojson_dir.join("bbox_00003.geojson"),
            r#"{"type": "FeatureCollection", "features": []}"#,
        )
        .unwrap();

        let store = VectorStore::from_geometries(vec![], 4326);
        let mut gt = GroundTruth::new(store, FeatureClass::Buildings, GroundTruthOptions::default());
        let report = gt.run(&geojson_dir, dir.path()).unwrap();

        assert_eq!(report.skipped(), 1);
        assert!(matches!(report.get(3), Some(TileOutcome::Skipped { .. })));
    }

    #[test]
    fn bbox_files_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["bbox_00002.geojson", "bbox_00000.geojson", "notes.txt", "bbox_final.geojson"] {
            std::fs::write(dir.path().join(name), "{}").unwrap();
        }
        let files = bbox_files(dir.path()).unwrap();
        let ids: Vec<usize> = files.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![0, 2]);
    }
}
