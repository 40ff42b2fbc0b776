pub mod planet_collect;

pub use planet_collect::{
    create_filters, create_order_request, identify_geometry, GeometryKind, LogicalFilter,
    PlanetCollect,
};
