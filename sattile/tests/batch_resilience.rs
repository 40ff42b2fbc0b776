use anyhow::Result;
use chrono::{TimeZone, Utc};
use sattile::collect::stac::{ImageryCatalog, StacItem, StacSearchParams};
use sattile::commons::basic_functions::{bbox_path, image_path};
use sattile::commons::batch::TileOutcome;
use sattile::commons::raster_io::RasterGrid;
use sattile::geometric::acquisition::{Acquisition, AcquisitionRequest};
use sattile::geometric::cube::{CubeBuilder, ImageCube, TimeStep};
use sattile::{LatLon, Tile};
use serde_json::json;
use std::cell::Cell;

/// Answers every search with one item, except the `fail_on`-th search.
struct FlakyCatalog {
    calls: Cell<usize>,
    fail_on: usize,
}

impl ImageryCatalog for FlakyCatalog {
    fn url(&self) -> &str {
        "https://example.com/stac"
    }

    fn search(&self, _params: &StacSearchParams) -> Result<Vec<StacItem>> {
        let call = self.calls.get();
        self.calls.set(call + 1);
        if call == self.fail_on {
            anyhow::bail!("HTTP 502 Bad Gateway");
        }
        let item = serde_json::from_value(json!({
            "type": "Feature",
            "id": format!("item-{}", call),
            "properties": {"datetime": "2022-06-12T18:49:19Z"},
            "assets": {
                "B04": {"href": "https://example.com/B04.tif"},
                "B08": {"href": "https://example.com/B08.tif"}
            }
        }))?;
        Ok(vec![item])
    }

    fn sign(&self, item: StacItem, _assets: &[String]) -> Result<StacItem> {
        Ok(item)
    }
}

struct ZeroCube;

impl CubeBuilder for ZeroCube {
    fn build(&self, items: &[StacItem], bands: &[String], tile: &Tile) -> Result<ImageCube> {
        let grid = RasterGrid::from_bbox(&tile.bbox_utm, tile.resolution_m, tile.epsg);
        let n = bands.len() * grid.width * grid.height;
        let mut cube = ImageCube::new(bands.to_vec(), grid);
        for item in items {
            cube.push(TimeStep {
                datetime: Utc.with_ymd_and_hms(2022, 6, 12, 18, 49, 19).unwrap(),
                item_id: item.id.clone(),
                data: vec![0.0; n],
            })?;
        }
        Ok(cube)
    }
}

#[test]
fn failing_query_does_not_stop_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let points: Vec<LatLon> = (0..10)
        .map(|i| LatLon::new(40.70 + i as f64 * 0.01, -122.40))
        .collect();

    let request = AcquisitionRequest {
        bands: vec!["B04".into(), "B08".into()],
        edge_size_px: 8,
        out_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let catalog = FlakyCatalog {
        calls: Cell::new(0),
        fail_on: 7,
    };
    let mut acquisition = Acquisition::new(catalog, ZeroCube, request);
    let report = acquisition.run_batch(&points);

    assert_eq!(report.outcomes.len(), 10);
    assert_eq!(report.succeeded(), 9);
    assert_eq!(report.failed(), 1);
    assert!(matches!(report.get(7), Some(TileOutcome::Failed { reason, .. }) if reason.contains("502")));

    for tile_id in (0..7).chain(8..10) {
        assert!(image_path(dir.path(), tile_id).exists(), "tile {}", tile_id);
        assert!(bbox_path(dir.path(), tile_id).exists(), "tile {}", tile_id);
    }
    assert!(!image_path(dir.path(), 7).exists());
    assert!(!bbox_path(dir.path(), 7).exists());
}
