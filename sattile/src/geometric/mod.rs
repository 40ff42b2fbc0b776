pub mod acquisition;
pub mod cube;
pub mod groundtruth;
pub mod tile;
pub mod vector_store;
