pub mod basic_functions;
pub mod batch;
pub mod raster_io;
