use std::path::PathBuf;

pub const TEMP_PATH: &str = "./temp";

/// Planetary Computer STAC API root.
pub const PLANETARY_COMPUTER_STAC: &str = "https://planetarycomputer.microsoft.com/api/stac/v1";

/// Planetary Computer SAS signing endpoint.
pub const PLANETARY_COMPUTER_SIGN: &str =
    "https://planetarycomputer.microsoft.com/api/sas/v1/sign";

pub const DEFAULT_COLLECTION: &str = "sentinel-2-l2a";

/// Red, green, blue, near infrared.
pub const DEFAULT_BANDS: [&str; 4] = ["B04", "B03", "B02", "B08"];

pub const DEFAULT_EDGE_SIZE_PX: u32 = 128;

pub const DEFAULT_RESOLUTION_M: f64 = 10.0;

/// Mask pixels per source pixel along each axis (10 m -> 2.5 m).
pub const DEFAULT_SUPERSAMPLING: u32 = 4;

/// Buffer applied to ground-truth features before rasterizing, in metres.
pub const DEFAULT_FEATURE_BUFFER_M: f64 = 5.0;

pub const PLANET_DATA_API: &str = "https://api.planet.com/data/v1";

pub const PLANET_ORDERS_API: &str = "https://api.planet.com/compute/ops/orders/v2";

pub fn get_temp_path() -> PathBuf {
    PathBuf::from(TEMP_PATH)
}

/// Default acquisition window (`YYYY-MM-DD`).
pub const DEFAULT_START_DATE: &str = "2022-06-01";
pub const DEFAULT_END_DATE: &str = "2022-07-01";

/// Scene-level cloud cover ceiling applied through the STAC query extension, in percent.
pub const DEFAULT_MAX_CLOUD_COVER: f64 = 10.0;
