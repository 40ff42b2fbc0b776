pub mod collect;
pub mod commons;
pub mod config;
pub mod error;
pub mod geo_core;
pub mod geometric;
pub mod inference;

pub use error::TileError;
pub use geo_core::{BoundingBox, Projector};
pub use geometric::tile::{compute_tile, LatLon, Tile};
