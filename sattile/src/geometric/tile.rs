use anyhow::Result;
use geo::{Coord, Polygon};
use serde::Serialize;

use crate::error::TileError;
use crate::geo_core::{utm_epsg, BoundingBox, Projector, WGS84_EPSG};

/// Geographic sample location (WGS84 degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        LatLon { lat, lon }
    }
}

/// Square footprint of one tile, in its UTM zone and in WGS84.
#[derive(Debug, Clone)]
pub struct Tile {
    pub point: LatLon,
    /// UTM zone EPSG code
    pub epsg: u32,
    /// Projected point before snapping to the pixel grid
    pub center_utm: (f64, f64),
    /// Projected point snapped to the nearest multiple of the resolution
    pub center_rounded: (f64, f64),
    pub bbox_utm: BoundingBox,
    /// Closed `[W,S] [E,S] [E,N] [W,N] [W,S]` ring in lon/lat
    pub bbox_latlon: Polygon<f64>,
    pub edge_size_px: u32,
    pub resolution_m: f64,
}

impl Tile {
    /// Expected raster size in pixels for this footprint.
    pub fn size_px(&self) -> (usize, usize) {
        (
            (self.bbox_utm.width() / self.resolution_m).round() as usize,
            (self.bbox_utm.height() / self.resolution_m).round() as usize,
        )
    }

    /// GeoJSON geometry of the geographic footprint (for catalog search).
    pub fn latlon_geometry(&self) -> geojson::Geometry {
        geojson::Geometry::new(geojson::Value::from(&self.bbox_latlon))
    }
}

/// Snap a projected coordinate to the nearest multiple of `resolution`.
/// Halfway values go to the even multiple.
pub fn snap_to_grid(value: f64, resolution: f64) -> f64 {
    (value / resolution).round_ties_even() * resolution
}

/// Compute the square tile centred on `point`.
///
/// The centre is projected into the UTM zone containing the point and snapped
/// to the pixel grid so image and mask rasters align exactly; the box extends
/// `round(edge_size_px * resolution_m / 2)` metres on each side, halves
/// rounding to even.
pub fn compute_tile(
    projector: &mut Projector,
    point: LatLon,
    edge_size_px: u32,
    resolution_m: f64,
) -> std::result::Result<Tile, TileError> {
    if edge_size_px == 0 {
        return Err(TileError::InvalidInput("edge size must be positive".into()));
    }
    if !resolution_m.is_finite() || resolution_m <= 0.0 {
        return Err(TileError::InvalidInput(format!(
            "resolution must be positive, got {}",
            resolution_m
        )));
    }

    let epsg = utm_epsg(point.lat, point.lon)?;
    let center_utm = projector.transform_coords(WGS84_EPSG, epsg, point.lon, point.lat)?;

    let center_rounded = (
        snap_to_grid(center_utm.0, resolution_m),
        snap_to_grid(center_utm.1, resolution_m),
    );

    let buffer = (edge_size_px as f64 * resolution_m / 2.0).round_ties_even();

    let bbox_utm = BoundingBox::new(
        center_rounded.0 - buffer,
        center_rounded.1 - buffer,
        center_rounded.0 + buffer,
        center_rounded.1 + buffer,
    );

    let bbox_latlon = bbox_utm.transform(projector, epsg, WGS84_EPSG)?;

    Ok(Tile {
        point,
        epsg,
        center_utm,
        center_rounded,
        bbox_utm,
        bbox_latlon,
        edge_size_px,
        resolution_m,
    })
}

/// Reproject the geographic ring of a tile back to its UTM zone.
pub fn latlon_ring_to_utm(projector: &mut Projector, tile: &Tile) -> Result<Vec<Coord<f64>>> {
    tile.bbox_latlon
        .exterior()
        .coords()
        .map(|c| {
            projector
                .transform_coords(WGS84_EPSG, tile.epsg, c.x, c.y)
                .map(|(x, y)| Coord { x, y })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sample_points() -> Vec<LatLon> {
        vec![
            LatLon::new(40.78, -122.38),
            LatLon::new(40.4168, -3.7038),
            LatLon::new(-33.87, 151.21),
            LatLon::new(64.13, -21.9),
            LatLon::new(0.5, 9.45),
        ]
    }

    #[test]
    fn side_length_matches_edge_times_resolution() {
        let mut projector = Projector::new();
        for point in sample_points() {
            for (edge, res) in [(128u32, 10.0), (256, 10.0), (64, 20.0), (100, 3.0)] {
                let tile = compute_tile(&mut projector, point, edge, res).unwrap();
                assert_abs_diff_eq!(tile.bbox_utm.width(), edge as f64 * res, epsilon = 1e-6);
                assert_abs_diff_eq!(tile.bbox_utm.height(), edge as f64 * res, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn center_within_half_pixel_of_projected_point() {
        let mut projector = Projector::new();
        for point in sample_points() {
            let tile = compute_tile(&mut projector, point, 128, 10.0).unwrap();
            let (cx, cy) = tile.bbox_utm.center();
            assert!((cx - tile.center_utm.0).abs() <= 5.0 + 1e-9);
            assert!((cy - tile.center_utm.1).abs() <= 5.0 + 1e-9);
            assert_abs_diff_eq!(cx % 10.0, 0.0, epsilon = 1e-6);
            assert_abs_diff_eq!(cy % 10.0, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn recomputing_from_rounded_center_is_idempotent() {
        let mut projector = Projector::new();
        for point in sample_points() {
            let first = compute_tile(&mut projector, point, 128, 10.0).unwrap();
            let (x, y) = first.center_rounded;
            let (lon, lat) = projector
                .transform_coords(first.epsg, WGS84_EPSG, x, y)
                .unwrap();
            let second = compute_tile(&mut projector, LatLon::new(lat, lon), 128, 10.0).unwrap();
            assert_eq!(first.epsg, second.epsg);
            assert_abs_diff_eq!(first.bbox_utm.min_x, second.bbox_utm.min_x, epsilon = 1e-6);
            assert_abs_diff_eq!(first.bbox_utm.min_y, second.bbox_utm.min_y, epsilon = 1e-6);
            assert_abs_diff_eq!(first.bbox_utm.max_x, second.bbox_utm.max_x, epsilon = 1e-6);
            assert_abs_diff_eq!(first.bbox_utm.max_y, second.bbox_utm.max_y, epsilon = 1e-6);
        }
    }

    #[test]
    fn geographic_corners_round_trip_below_a_millimetre() {
        let mut projector = Projector::new();
        for point in sample_points() {
            let tile = compute_tile(&mut projector, point, 128, 10.0).unwrap();
            let back = latlon_ring_to_utm(&mut projector, &tile).unwrap();
            for (orig, round_trip) in tile.bbox_utm.ring().iter().zip(back.iter()) {
                assert!((orig.x - round_trip.x).abs() < 1e-3);
                assert!((orig.y - round_trip.y).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn san_francisco_tile() {
        let mut projector = Projector::new();
        let tile = compute_tile(&mut projector, LatLon::new(40.78, -122.38), 128, 10.0).unwrap();
        assert_eq!(tile.epsg, 32610);
        assert_abs_diff_eq!(tile.bbox_utm.width(), 1280.0, epsilon = 1e-9);
        assert_eq!(tile.size_px(), (128, 128));
        assert_eq!(tile.bbox_latlon.exterior().coords().count(), 5);
        let geom = tile.latlon_geometry();
        assert!(matches!(geom.value, geojson::Value::Polygon(_)));
    }

    #[test]
    fn rejects_degenerate_parameters() {
        let mut projector = Projector::new();
        let point = LatLon::new(40.78, -122.38);
        assert!(matches!(
            compute_tile(&mut projector, point, 0, 10.0),
            Err(TileError::InvalidInput(_))
        ));
        assert!(matches!(
            compute_tile(&mut projector, point, 128, 0.0),
            Err(TileError::InvalidInput(_))
        ));
        assert!(matches!(
            compute_tile(&mut projector, LatLon::new(120.0, 0.0), 128, 10.0),
            Err(TileError::InvalidInput(_))
        ));
    }

    #[test]
    fn snap_to_grid_rounds_to_nearest_multiple() {
        assert_eq!(snap_to_grid(554_123.4, 10.0), 554_120.0);
        assert_eq!(snap_to_grid(554_126.0, 10.0), 554_130.0);
        assert_eq!(snap_to_grid(12.0, 2.5), 12.5);
        // halfway values go to the even multiple
        assert_eq!(snap_to_grid(15.0, 10.0), 20.0);
        assert_eq!(snap_to_grid(25.0, 10.0), 20.0);
        assert_eq!(snap_to_grid(-25.0, 10.0), -20.0);
    }

    #[test]
    fn odd_extent_buffer_rounds_half_to_even() {
        let mut projector = Projector::new();
        let point = LatLon::new(40.78, -122.38);
        // 125 px at 1 m: 62.5 m rounds down to 62
        let tile = compute_tile(&mut projector, point, 125, 1.0).unwrap();
        assert_abs_diff_eq!(tile.bbox_utm.width(), 124.0, epsilon = 1e-6);
        // 127 px at 1 m: 63.5 m rounds up to 64
        let tile = compute_tile(&mut projector, point, 127, 1.0).unwrap();
        assert_abs_diff_eq!(tile.bbox_utm.width(), 128.0, epsilon = 1e-6);
    }
}
