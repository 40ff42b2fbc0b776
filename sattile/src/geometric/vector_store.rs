use anyhow::{Context, Result};
use gdal::vector::LayerAccess;
use gdal::Dataset;
use geo::{BoundingRect, Centroid, Geometry as GeoGeometry, Rect};
use geojson::GeoJson;
use geos::{Geom, Geometry as GeosGeometry};
use rstar::{RTree, RTreeObject, AABB};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::geo_core::{Projector, WGS84_EPSG};
use crate::geometric::tile::LatLon;

/// EPSG code from a CRS name such as `EPSG:32610`,
/// `urn:ogc:def:crs:EPSG::32610` or `urn:ogc:def:crs:OGC:1.3:CRS84`.
pub fn epsg_from_crs_name(name: &str) -> Option<u32> {
    if name.ends_with("CRS84") {
        return Some(WGS84_EPSG);
    }
    name.rsplit(':').next()?.parse().ok()
}

fn geojson_crs(geojson: &GeoJson) -> Option<u32> {
    let members = match geojson {
        GeoJson::FeatureCollection(fc) => fc.foreign_members.as_ref(),
        GeoJson::Feature(f) => f.foreign_members.as_ref(),
        GeoJson::Geometry(g) => g.foreign_members.as_ref(),
    }?;
    let name = members.get("crs")?.get("properties")?.get("name")?.as_str()?;
    epsg_from_crs_name(name)
}

fn geojson_geometry_to_geo(geometry: &geojson::Geometry) -> Result<GeoGeometry<f64>> {
    GeoGeometry::<f64>::try_from(geometry.value.clone())
        .context("Failed to convert GeoJSON geometry to geo geometry")
}

/// One entry per GeoJSON feature (`None` for a null geometry) with the file
/// CRS (EPSG:4326 when the file does not name one).
pub fn read_geojson_rows(path: &Path) -> Result<(Vec<Option<GeoGeometry<f64>>>, u32)> {
    let text =
        std::fs::read_to_string(path).context(format!("Failed to read GeoJSON: {:?}", path))?;
    let geojson: GeoJson = text
        .parse()
        .context(format!("Failed to parse GeoJSON: {:?}", path))?;
    let epsg = geojson_crs(&geojson).unwrap_or(WGS84_EPSG);

    let rows = match &geojson {
        GeoJson::FeatureCollection(fc) => fc
            .features
            .iter()
            .map(|f| f.geometry.as_ref().map(geojson_geometry_to_geo).transpose())
            .collect::<Result<Vec<_>>>()?,
        GeoJson::Feature(f) => vec![f.geometry.as_ref().map(geojson_geometry_to_geo).transpose()?],
        GeoJson::Geometry(g) => vec![Some(geojson_geometry_to_geo(g)?)],
    };

    Ok((rows, epsg))
}

/// Every non-null geometry of a GeoJSON file with its CRS.
pub fn read_geojson_file(path: &Path) -> Result<(Vec<GeoGeometry<f64>>, u32)> {
    let (rows, epsg) = read_geojson_rows(path)?;
    Ok((rows.into_iter().flatten().collect(), epsg))
}

/// First layer of any OGR-readable file, one entry per feature. Features
/// without a geometry, or with an empty one, are `None`.
pub fn read_ogr_rows(path: &Path) -> Result<(Vec<Option<GeoGeometry<f64>>>, u32)> {
    let dataset = Dataset::open(path).context(format!("Failed to open vector file: {:?}", path))?;
    let mut layer = dataset.layer(0).context("Failed to access first layer")?;

    let epsg = match layer
        .spatial_ref()
        .context("Layer has no spatial reference")
        .and_then(|srs| srs.auth_code().context("Layer CRS has no EPSG code"))
    {
        Ok(code) => code as u32,
        Err(e) => {
            log::warn!("{:?}: {}, assuming EPSG:{}", path, e, WGS84_EPSG);
            WGS84_EPSG
        }
    };

    let mut rows = Vec::new();
    for feature in layer.features() {
        let Some(geom) = feature.geometry() else {
            rows.push(None);
            continue;
        };
        let wkt = geom.wkt().context("Failed to get WKT from GDAL geometry")?;
        let geos_geom =
            GeosGeometry::new_from_wkt(&wkt).context("Failed to parse WKT with GEOS")?;
        if geos_geom.is_empty().context("GEOS is_empty failed")? {
            rows.push(None);
            continue;
        }
        let geo_geom: GeoGeometry<f64> = geos_geom
            .try_into()
            .context("Failed to convert GEOS geometry to geo")?;
        rows.push(Some(geo_geom));
    }

    Ok((rows, epsg))
}

/// Per-feature rows of `.geojson` / `.json` files (geojson crate) or of
/// anything else (OGR).
pub fn read_vector_rows(path: &Path) -> Result<(Vec<Option<GeoGeometry<f64>>>, u32)> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("geojson") | Some("json") => read_geojson_rows(path),
        _ => read_ogr_rows(path),
    }
}

#[derive(Debug, Clone)]
struct FeatureBox {
    index: usize,
    env: AABB<[f64; 2]>,
}

impl RTreeObject for FeatureBox {
    type Envelope = AABB<[f64; 2]>;

    #[inline]
    fn envelope(&self) -> Self::Envelope {
        self.env
    }
}

fn rect_envelope(rect: &Rect<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
}

/// Geometries in a single CRS with an R-tree over their envelopes.
pub struct IndexedLayer {
    features: Vec<GeoGeometry<f64>>,
    tree: RTree<FeatureBox>,
}

impl IndexedLayer {
    pub fn new(features: Vec<GeoGeometry<f64>>) -> Self {
        let boxes: Vec<FeatureBox> = features
            .iter()
            .enumerate()
            .filter_map(|(index, g)| {
                g.bounding_rect().map(|rect| FeatureBox {
                    index,
                    env: rect_envelope(&rect),
                })
            })
            .collect();

        IndexedLayer {
            features,
            tree: RTree::bulk_load(boxes),
        }
    }

    pub fn features(&self) -> &[GeoGeometry<f64>] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Features whose envelope lies inside `rect`, in source order.
    pub fn candidates_within(&self, rect: &Rect<f64>) -> Vec<&GeoGeometry<f64>> {
        let mut indices: Vec<usize> = self
            .tree
            .locate_in_envelope(&rect_envelope(rect))
            .map(|b| b.index)
            .collect();
        indices.sort_unstable();
        indices.into_iter().map(|i| &self.features[i]).collect()
    }
}

/// Vector dataset kept in memory for a whole batch.
///
/// The source geometries are never modified; reprojected copies are built on
/// first use and cached per target EPSG, each with its own envelope index.
pub struct VectorStore {
    path: PathBuf,
    source_epsg: u32,
    source: IndexedLayer,
    reprojected: HashMap<u32, IndexedLayer>,
}

impl VectorStore {
    /// Load `.geojson` / `.json` with the geojson crate, anything else through OGR.
    pub fn open(path: &Path) -> Result<Self> {
        let (rows, source_epsg) = read_vector_rows(path)?;
        let features: Vec<GeoGeometry<f64>> = rows.into_iter().flatten().collect();

        log::info!(
            "Loaded {} features from {:?} (EPSG:{})",
            features.len(),
            path,
            source_epsg
        );

        let mut store = VectorStore::from_geometries(features, source_epsg);
        store.path = path.to_path_buf();
        Ok(store)
    }

    pub fn from_geometries(features: Vec<GeoGeometry<f64>>, source_epsg: u32) -> Self {
        VectorStore {
            path: PathBuf::new(),
            source_epsg,
            source: IndexedLayer::new(features),
            reprojected: HashMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source_epsg(&self) -> u32 {
        self.source_epsg
    }

    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn features(&self) -> &[GeoGeometry<f64>] {
        self.source.features()
    }

    /// The dataset in `epsg`, reprojected and indexed on first request.
    pub fn in_crs(&mut self, epsg: u32, projector: &mut Projector) -> Result<&IndexedLayer> {
        if epsg == self.source_epsg {
            return Ok(&self.source);
        }

        if !self.reprojected.contains_key(&epsg) {
            let copies = self
                .source
                .features
                .iter()
                .map(|g| projector.transform_geometry(self.source_epsg, epsg, g))
                .collect::<Result<Vec<_>>>()
                .context(format!(
                    "Failed to reproject {:?} to EPSG:{}",
                    self.path, epsg
                ))?;
            log::info!("Cached {} features in EPSG:{}", copies.len(), epsg);
            self.reprojected.insert(epsg, IndexedLayer::new(copies));
        }

        self.reprojected
            .get(&epsg)
            .context("Reprojected copy missing from cache")
    }

    /// EPSG codes with a cached reprojected copy.
    pub fn cached_epsgs(&self) -> Vec<u32> {
        let mut codes: Vec<u32> = self.reprojected.keys().copied().collect();
        codes.sort_unstable();
        codes
    }
}

/// Sample points from a centroid dataset, one entry per source row.
///
/// Rows without a usable geometry stay in place as `None` so that positions
/// keep matching the source row numbers.
pub fn load_points(path: &Path) -> Result<Vec<Option<LatLon>>> {
    let (rows, epsg) = read_vector_rows(path)?;
    let mut projector = Projector::new();

    let mut points = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        match row.as_ref().and_then(|g| g.centroid()) {
            Some(p) => {
                let (lon, lat) = projector.transform_coords(epsg, WGS84_EPSG, p.x(), p.y())?;
                points.push(Some(LatLon::new(lat, lon)));
            }
            None => {
                log::warn!("Row {} of {:?} has no usable geometry", index, path);
                points.push(None);
            }
        }
    }

    Ok(points)
}
