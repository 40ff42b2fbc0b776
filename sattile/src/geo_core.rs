use anyhow::{Context, Result};
use geo::{Coord, LineString, Polygon};
use proj::Proj;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::TileError;

/// EPSG code of WGS84 geographic coordinates (lon/lat axis order through PROJ).
pub const WGS84_EPSG: u32 = 4326;

/// Latitude limits of the UTM system; polar areas use UPS instead.
pub const UTM_MIN_LAT: f64 = -80.0;
pub const UTM_MAX_LAT: f64 = 84.0;

/// UTM zone EPSG code containing a WGS84 coordinate.
///
/// Zones are the regular 6° bands (`326zz` north of the equator, `327zz`
/// south). A longitude sitting exactly on a zone boundary falls into the
/// eastern zone; longitude 180 wraps back into zone 60.
pub fn utm_epsg(lat: f64, lon: f64) -> std::result::Result<u32, TileError> {
    if !lat.is_finite() || !lon.is_finite() {
        return Err(TileError::InvalidInput(format!(
            "non-finite coordinate ({}, {})",
            lat, lon
        )));
    }
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(TileError::InvalidInput(format!(
            "coordinate out of range: lat={}, lon={}",
            lat, lon
        )));
    }

    if !(UTM_MIN_LAT..=UTM_MAX_LAT).contains(&lat) {
        return Err(TileError::InvalidInput(format!(
            "latitude {} outside the UTM domain ({}..={})",
            lat, UTM_MIN_LAT, UTM_MAX_LAT
        )));
    }

    let zone = (((lon + 180.0) / 6.0).floor() as u32 + 1).clamp(1, 60);
    let base = if lat >= 0.0 { 32600 } else { 32700 };
    Ok(base + zone)
}

/// Cache of PROJ transformations keyed by `(from_epsg, to_epsg)`.
///
/// Creating a `Proj` is far more expensive than running it, so batch loops
/// keep one `Projector` and reuse it for every tile. The cache is owned by
/// the caller; there is no process-wide state.
#[derive(Default)]
pub struct Projector {
    transforms: HashMap<(u32, u32), Proj>,
}

impl Projector {
    pub fn new() -> Self {
        Self::default()
    }

    fn proj(&mut self, from_epsg: u32, to_epsg: u32) -> Result<&Proj> {
        if !self.transforms.contains_key(&(from_epsg, to_epsg)) {
            let from_crs = format!("EPSG:{}", from_epsg);
            let to_crs = format!("EPSG:{}", to_epsg);
            let proj = Proj::new_known_crs(&from_crs, &to_crs, None).with_context(|| {
                format!("Failed to create Proj transformation {} -> {}", from_crs, to_crs)
            })?;
            self.transforms.insert((from_epsg, to_epsg), proj);
        }
        self.transforms
            .get(&(from_epsg, to_epsg))
            .context("Proj transformation missing from cache")
    }

    /// Transform coordinates from one CRS to another.
    /// Geographic coordinates are always `(lon, lat)`.
    pub fn transform_coords(
        &mut self,
        from_epsg: u32,
        to_epsg: u32,
        x: f64,
        y: f64,
    ) -> Result<(f64, f64)> {
        if from_epsg == to_epsg {
            return Ok((x, y));
        }
        let proj = self.proj(from_epsg, to_epsg)?;
        let result = proj
            .convert((x, y))
            .with_context(|| format!("Failed to transform ({}, {})", x, y))?;
        Ok(result)
    }

    /// Transform every coordinate of a geometry.
    pub fn transform_geometry(
        &mut self,
        from_epsg: u32,
        to_epsg: u32,
        geometry: &geo::Geometry<f64>,
    ) -> Result<geo::Geometry<f64>> {
        use geo::MapCoords;

        if from_epsg == to_epsg {
            return Ok(geometry.clone());
        }
        let proj = self.proj(from_epsg, to_epsg)?;
        geometry.try_map_coords(|c| {
            let (x, y) = proj
                .convert((c.x, c.y))
                .with_context(|| format!("Failed to transform ({}, {})", c.x, c.y))?;
            Ok::<_, anyhow::Error>(Coord { x, y })
        })
    }

    pub fn cached_transforms(&self) -> usize {
        self.transforms.len()
    }
}

/// Axis-aligned bounding box in a single CRS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Closed ring `[W,S] [E,S] [E,N] [W,N] [W,S]`.
    pub fn ring(&self) -> Vec<Coord<f64>> {
        vec![
            Coord { x: self.min_x, y: self.min_y },
            Coord { x: self.max_x, y: self.min_y },
            Coord { x: self.max_x, y: self.max_y },
            Coord { x: self.min_x, y: self.max_y },
            Coord { x: self.min_x, y: self.min_y },
        ]
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        Polygon::new(LineString::from(self.ring()), vec![])
    }

    /// Transform the four corners to another CRS.
    ///
    /// The result is a polygon because a box is generally not axis-aligned
    /// once reprojected.
    pub fn transform(
        &self,
        projector: &mut Projector,
        from_epsg: u32,
        to_epsg: u32,
    ) -> Result<Polygon<f64>> {
        let ring = self
            .ring()
            .into_iter()
            .map(|c| {
                projector
                    .transform_coords(from_epsg, to_epsg, c.x, c.y)
                    .map(|(x, y)| Coord { x, y })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Polygon::new(LineString::from(ring), vec![]))
    }

    /// `[min_x, min_y, max_x, max_y]`
    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_utm_epsg_hemispheres() {
        // San Francisco Bay, zone 10 north
        assert_eq!(utm_epsg(40.78, -122.38).unwrap(), 32610);
        // Madrid, zone 30 north
        assert_eq!(utm_epsg(40.4168, -3.7038).unwrap(), 32630);
        // Sydney, zone 56 south
        assert_eq!(utm_epsg(-33.87, 151.21).unwrap(), 32756);
    }

    #[test]
    fn test_utm_epsg_zone_edges() {
        assert_eq!(utm_epsg(0.0, -180.0).unwrap(), 32601);
        assert_eq!(utm_epsg(0.0, 180.0).unwrap(), 32660);
        // On the 0° meridian: eastern zone (31), western would be 30
        assert_eq!(utm_epsg(45.0, 0.0).unwrap(), 32631);
    }

    #[test]
    fn test_utm_epsg_rejects_invalid() {
        assert!(utm_epsg(f64::NAN, 0.0).is_err());
        assert!(utm_epsg(91.0, 0.0).is_err());
        assert!(utm_epsg(0.0, -181.0).is_err());
    }

    #[test]
    fn test_utm_epsg_polar_limits() {
        assert_eq!(utm_epsg(84.0, 10.0).unwrap(), 32632);
        assert_eq!(utm_epsg(-80.0, 10.0).unwrap(), 32732);
        assert!(matches!(utm_epsg(84.5, 10.0), Err(TileError::InvalidInput(_))));
        assert!(matches!(utm_epsg(-80.5, 10.0), Err(TileError::InvalidInput(_))));
    }

    #[test]
    fn test_bounding_box() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 2.0);
        assert_eq!(bbox.width(), 1.0);
        assert_eq!(bbox.height(), 2.0);
        assert_eq!(bbox.center(), (0.5, 1.0));
        let ring = bbox.ring();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.first(), ring.last());
    }

    #[test]
    fn test_projector_caches_transforms() {
        let mut projector = Projector::new();
        let (x, y) = projector
            .transform_coords(WGS84_EPSG, 32630, -3.7038, 40.4168)
            .unwrap();
        assert!(x.is_finite() && y.is_finite());
        projector
            .transform_coords(WGS84_EPSG, 32630, -3.70, 40.41)
            .unwrap();
        assert_eq!(projector.cached_transforms(), 1);

        // identity never touches PROJ
        let same = projector.transform_coords(32630, 32630, x, y).unwrap();
        assert_eq!(same, (x, y));
        assert_eq!(projector.cached_transforms(), 1);
    }

    #[test]
    fn test_transform_round_trip() {
        let mut projector = Projector::new();
        let (x, y) = projector
            .transform_coords(WGS84_EPSG, 32610, -122.38, 40.78)
            .unwrap();
        let (lon, lat) = projector.transform_coords(32610, WGS84_EPSG, x, y).unwrap();
        assert_abs_diff_eq!(lon, -122.38, epsilon = 1e-9);
        assert_abs_diff_eq!(lat, 40.78, epsilon = 1e-9);
    }
}
