pub mod models;
pub mod stac_collect;

pub use models::{StacAsset, StacItem, StacItemCollection, StacLink, StacSearchParams};
pub use stac_collect::{ImageryCatalog, StacCollect};
