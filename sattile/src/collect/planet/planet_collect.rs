use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde_json::{json, Map, Value};

use crate::collect::global_variables::{PLANET_DATA_API, PLANET_ORDERS_API};

/// Geometry type inferred from a bare coordinate array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryKind {
    Point,
    LineString,
    Polygon,
    Unknown,
}

impl GeometryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryKind::Point => "Point",
            GeometryKind::LineString => "LineString",
            GeometryKind::Polygon => "Polygon",
            GeometryKind::Unknown => "Unknown",
        }
    }
}

fn is_pair(value: &Value) -> bool {
    value
        .as_array()
        .map(|a| a.len() == 2 && a.iter().all(Value::is_number))
        .unwrap_or(false)
}

/// Identify the geometry type of a JSON coordinate array.
///
/// `[x, y]` is a Point, `[[x, y], [x, y]]` a LineString and
/// `[[[x, y], ...]]` with a closed ring of at least three positions a Polygon.
pub fn identify_geometry(coordinates_json: &str) -> Result<GeometryKind> {
    let coords: Value =
        serde_json::from_str(coordinates_json).context("Failed to parse coordinates JSON")?;

    let Some(array) = coords.as_array() else {
        return Ok(GeometryKind::Unknown);
    };

    if is_pair(&coords) {
        return Ok(GeometryKind::Point);
    }

    if !array.iter().all(Value::is_array) {
        return Ok(GeometryKind::Unknown);
    }

    if array.len() == 2 && array.iter().all(is_pair) {
        return Ok(GeometryKind::LineString);
    }

    if let Some(ring) = array.first().and_then(Value::as_array) {
        if ring.len() >= 3 && ring.iter().all(is_pair) && ring.first() == ring.last() {
            return Ok(GeometryKind::Polygon);
        }
    }

    Ok(GeometryKind::Unknown)
}

/// Logical operator combining the Planet search filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalFilter {
    And,
    Or,
}

impl LogicalFilter {
    fn as_str(&self) -> &'static str {
        match self {
            LogicalFilter::And => "AndFilter",
            LogicalFilter::Or => "OrFilter",
        }
    }
}

/// Build the Planet Data API search filter.
///
/// `cloud_cover` is a fraction in `[0, 1]`; items are kept when their cloud
/// cover is lower than or equal to it.
pub fn create_filters(
    geometry_json: &str,
    start_date: &str,
    end_date: &str,
    cloud_cover: f64,
    logical: LogicalFilter,
) -> Result<Value> {
    let kind = identify_geometry(geometry_json)?;
    let coordinates: Value =
        serde_json::from_str(geometry_json).context("Failed to parse geometry JSON")?;

    let geometry_filter = json!({
        "type": "GeometryFilter",
        "field_name": "geometry",
        "config": {"type": kind.as_str(), "coordinates": coordinates},
    });

    let date_range_filter = json!({
        "type": "DateRangeFilter",
        "field_name": "acquired",
        "config": {"gte": start_date, "lte": end_date},
    });

    let cloud_cover_filter = json!({
        "type": "RangeFilter",
        "field_name": "cloud_cover",
        "config": {"lte": cloud_cover},
    });

    Ok(json!({
        "type": logical.as_str(),
        "config": [geometry_filter, date_range_filter, cloud_cover_filter],
    }))
}

/// Build an order request clipping the items to the AOI, compositing them
/// and harmonizing to Sentinel-2.
pub fn create_order_request(
    item_type: &str,
    items: &[Value],
    geometry_json: &str,
    order_name: &str,
    product_bundle: &str,
) -> Result<Value> {
    let item_ids = items
        .iter()
        .map(|item| {
            item["id"]
                .as_str()
                .map(str::to_string)
                .context("Planet item without 'id'")
        })
        .collect::<Result<Vec<_>>>()?;

    let kind = identify_geometry(geometry_json)?;
    let coordinates: Value =
        serde_json::from_str(geometry_json).context("Failed to parse geometry JSON")?;

    Ok(json!({
        "name": order_name,
        "products": [{
            "item_ids": item_ids,
            "item_type": item_type,
            "product_bundle": product_bundle,
        }],
        "tools": [
            {"clip": {"aoi": {"type": kind.as_str(), "coordinates": coordinates}}},
            {"composite": {}},
            {"harmonize": {"target_sensor": "Sentinel-2"}},
        ],
    }))
}

/// Blocking client for the Planet Data and Orders APIs.
///
/// Order polling and download are handled by Planet's own tooling.
pub struct PlanetCollect {
    api_key: String,
    client: Client,
    pub data_url: String,
    pub orders_url: String,
}

impl PlanetCollect {
    pub fn new(api_key: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            anyhow::bail!("Planet API key is empty");
        }
        let client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(PlanetCollect {
            api_key,
            client,
            data_url: PLANET_DATA_API.to_string(),
            orders_url: PLANET_ORDERS_API.to_string(),
        })
    }

    /// Quick search, keeping items that provide `asset`.
    ///
    /// Items are keyed `Item_1`, `Item_2`, ... in result order.
    pub fn quick_search(
        &self,
        item_type: &str,
        filter: &Value,
        asset: &str,
    ) -> Result<Map<String, Value>> {
        let request = json!({"item_types": [item_type], "filter": filter});
        let mut url = format!("{}/quick-search", self.data_url);
        let mut page = self
            .client
            .post(&url)
            .basic_auth(&self.api_key, Some(""))
            .json(&request)
            .send()
            .context("Failed to send Planet quick search")?;

        let mut items = Map::new();
        loop {
            if !page.status().is_success() {
                let status = page.status();
                let body = page.text().unwrap_or_default();
                anyhow::bail!("Planet API returned error {}: {}", status, body);
            }
            let body: Value = page.json().context("Failed to parse Planet search response")?;
            collect_items_with_asset(&body, asset, &mut items);

            match body["_links"]["_next"].as_str() {
                Some(next) if !next.is_empty() && next != url => {
                    url = next.to_string();
                    page = self
                        .client
                        .get(&url)
                        .basic_auth(&self.api_key, Some(""))
                        .send()
                        .context("Failed to fetch Planet search page")?;
                }
                _ => break,
            }
        }

        log::info!("Planet search returned {} items with asset {}", items.len(), asset);
        Ok(items)
    }

    /// Submit an order and return its id.
    pub fn create_order(&self, order_request: &Value) -> Result<String> {
        let response = self
            .client
            .post(&self.orders_url)
            .basic_auth(&self.api_key, Some(""))
            .json(order_request)
            .send()
            .context("Failed to send Planet order")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            anyhow::bail!("Planet Orders API returned error {}: {}", status, body);
        }

        let body: Value = response.json().context("Failed to parse Planet order response")?;
        let id = body["id"]
            .as_str()
            .context("Planet order response missing 'id'")?
            .to_string();
        log::info!("Planet order {} created", id);
        Ok(id)
    }
}

/// Append `features` that expose `asset` to `items`, continuing the
/// `Item_n` numbering.
fn collect_items_with_asset(page: &Value, asset: &str, items: &mut Map<String, Value>) {
    let Some(features) = page["features"].as_array() else {
        return;
    };
    for feature in features {
        let has_asset = feature["assets"]
            .as_array()
            .map(|a| a.iter().any(|v| v.as_str() == Some(asset)))
            .unwrap_or(false);
        if has_asset {
            let key = format!("Item_{}", items.len() + 1);
            items.insert(key, feature.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_geometry() {
        assert_eq!(identify_geometry("[-3.7, 40.4]").unwrap(), GeometryKind::Point);
        assert_eq!(
            identify_geometry("[[-3.7, 40.4], [-3.6, 40.5]]").unwrap(),
            GeometryKind::LineString
        );
        assert_eq!(
            identify_geometry("[[[0, 0], [1, 0], [1, 1], [0, 0]]]").unwrap(),
            GeometryKind::Polygon
        );
        // Open ring
        assert_eq!(
            identify_geometry("[[[0, 0], [1, 0], [1, 1], [0, 1]]]").unwrap(),
            GeometryKind::Unknown
        );
        assert_eq!(identify_geometry("{\"a\": 1}").unwrap(), GeometryKind::Unknown);
        assert!(identify_geometry("not json").is_err());
    }

    #[test]
    fn test_create_filters() {
        let filter = create_filters(
            "[[[0, 0], [1, 0], [1, 1], [0, 0]]]",
            "2021-01-01T00:00:00Z",
            "2021-12-31T23:59:59Z",
            0.5,
            LogicalFilter::And,
        )
        .unwrap();

        assert_eq!(filter["type"], "AndFilter");
        let config = filter["config"].as_array().unwrap();
        assert_eq!(config.len(), 3);
        assert_eq!(config[0]["type"], "GeometryFilter");
        assert_eq!(config[0]["config"]["type"], "Polygon");
        assert_eq!(config[1]["config"]["gte"], "2021-01-01T00:00:00Z");
        assert_eq!(config[2]["field_name"], "cloud_cover");
        assert_eq!(config[2]["config"]["lte"], 0.5);
    }

    #[test]
    fn test_create_order_request() {
        let items = vec![json!({"id": "20220601_101010_00_2420"}), json!({"id": "20220602_101010_00_2420"})];
        let order = create_order_request(
            "PSScene",
            &items,
            "[[[0, 0], [1, 0], [1, 1], [0, 0]]]",
            "order_2022",
            "analytic_sr_udm2",
        )
        .unwrap();

        assert_eq!(order["name"], "order_2022");
        assert_eq!(order["products"][0]["item_ids"].as_array().unwrap().len(), 2);
        assert_eq!(order["products"][0]["product_bundle"], "analytic_sr_udm2");
        assert_eq!(order["tools"][0]["clip"]["aoi"]["type"], "Polygon");
        assert_eq!(order["tools"][2]["harmonize"]["target_sensor"], "Sentinel-2");
    }

    #[test]
    fn test_order_request_requires_ids() {
        let items = vec![json!({"properties": {}})];
        assert!(create_order_request("PSScene", &items, "[0, 0]", "o", "analytic_sr_udm2").is_err());
    }

    #[test]
    fn test_collect_items_with_asset() {
        let page = json!({
            "features": [
                {"id": "a", "assets": ["ortho_analytic_4b_sr", "ortho_udm2"]},
                {"id": "b", "assets": ["ortho_visual"]},
                {"id": "c", "assets": ["ortho_analytic_4b_sr"]}
            ]
        });
        let mut items = Map::new();
        collect_items_with_asset(&page, "ortho_analytic_4b_sr", &mut items);
        assert_eq!(items.len(), 2);
        assert_eq!(items["Item_1"]["id"], "a");
        assert_eq!(items["Item_2"]["id"], "c");
    }

    #[test]
    fn test_empty_api_key_rejected() {
        assert!(PlanetCollect::new("  ".to_string()).is_err());
    }
}
