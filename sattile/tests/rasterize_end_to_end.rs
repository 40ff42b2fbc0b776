use geo::{Coord, LineString, Polygon};
use geojson::{Feature, FeatureCollection, GeoJson};
use sattile::commons::basic_functions::{bbox_path, image_path, mask_path};
use sattile::commons::raster_io::{read_raster_f32, write_geotiff, GeoTiffOptions, RasterGrid};
use sattile::geo_core::WGS84_EPSG;
use sattile::geometric::cube::write_bbox_geojson;
use sattile::geometric::groundtruth::{rasterize_groundtruth, FeatureClass, GroundTruthOptions};
use sattile::{compute_tile, LatLon, Projector};
use std::path::Path;

/// Square in UTM, reprojected to a WGS84 GeoJSON feature.
fn square_feature(projector: &mut Projector, epsg: u32, x0: f64, y0: f64, size: f64) -> Feature {
    let ring: Vec<Coord<f64>> = [
        (x0, y0),
        (x0 + size, y0),
        (x0 + size, y0 + size),
        (x0, y0 + size),
        (x0, y0),
    ]
    .iter()
    .map(|(x, y)| {
        let (lon, lat) = projector.transform_coords(epsg, WGS84_EPSG, *x, *y).unwrap();
        Coord { x: lon, y: lat }
    })
    .collect();
    let polygon = Polygon::new(LineString::from(ring), vec![]);
    Feature::from(geojson::Geometry::new(geojson::Value::from(&polygon)))
}

fn write_features(path: &Path, features: Vec<Feature>) {
    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };
    std::fs::write(path, GeoJson::from(collection).to_string()).unwrap();
}

#[test]
fn san_francisco_buildings_mask() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let mut projector = Projector::new();

    let tile = compute_tile(&mut projector, LatLon::new(40.78, -122.38), 128, 10.0).unwrap();
    assert!((tile.bbox_utm.width() - 1280.0).abs() < 1e-9);

    // Reference image and footprint, as the acquisition step leaves them
    let grid = RasterGrid::from_bbox(&tile.bbox_utm, 10.0, tile.epsg);
    let image = vec![0.0f32; grid.width * grid.height];
    write_geotiff(&image_path(root, 0), &grid, 1, &image, &GeoTiffOptions::default()).unwrap();
    write_bbox_geojson(&grid, &bbox_path(root, 0)).unwrap();

    let (cx, cy) = tile.bbox_utm.center();
    let bbox = tile.bbox_utm;
    let features = vec![
        // inside
        square_feature(&mut projector, tile.epsg, cx - 10.0, cy - 10.0, 20.0),
        square_feature(&mut projector, tile.epsg, bbox.min_x + 100.0, bbox.min_y + 100.0, 12.0),
        // crosses the eastern edge
        square_feature(&mut projector, tile.epsg, bbox.max_x - 20.0, cy - 10.0, 40.0),
        // far outside
        square_feature(&mut projector, tile.epsg, bbox.max_x + 500.0, cy, 20.0),
    ];
    let vector = root.join("buildings.geojson");
    write_features(&vector, features);

    let report = rasterize_groundtruth(
        &root.join("geojson"),
        FeatureClass::Buildings,
        &vector,
        root,
        GroundTruthOptions::default(),
    )
    .unwrap();
    assert_eq!(report.succeeded(), 1, "{}", report.summary());

    let mask = read_raster_f32(&mask_path(root, "buildings", 0)).unwrap();
    assert_eq!((mask.grid.width, mask.grid.height), (512, 512));
    assert_eq!(mask.bands, 1);
    assert_eq!(mask.grid.epsg, tile.epsg);

    // Same origin, pixel size divided by the ratio
    assert_eq!(mask.grid.geo_transform[0], grid.geo_transform[0]);
    assert_eq!(mask.grid.geo_transform[3], grid.geo_transform[3]);
    assert!((mask.grid.geo_transform[1] * 4.0 - grid.geo_transform[1]).abs() < 1e-9);
    assert!((mask.grid.geo_transform[5] * 4.0 - grid.geo_transform[5]).abs() < 1e-9);

    let values = mask.band(0);
    assert!(values.iter().all(|v| *v == 0.0 || *v == 1.0));
    let burned = values.iter().filter(|v| **v == 1.0).count();
    assert!(burned > 0);

    // Centre building: 20 m + 2 x 5 m buffer at 2.5 m -> about 12 x 12 pixels
    assert_eq!(values[256 * 512 + 256], 1.0);
    assert!(burned > 12 * 12 && burned < 2 * 16 * 16 + 12 * 12);

    // The building crossing the eastern edge is dropped entirely
    for row in 248..264 {
        for col in 500..512 {
            assert_eq!(values[row * 512 + col], 0.0, "pixel ({}, {})", col, row);
        }
    }
}
