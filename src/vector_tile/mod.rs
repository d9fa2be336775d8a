//! Mapbox Vector Tile (MVT) decoding, encoding and subdivision.

mod feature;
mod geometry_type;
mod layer;
pub mod subdivide;
mod tile;
mod value;

pub use feature::VectorTileFeature;
pub use geometry_type::GeomType;
pub use layer::VectorTileLayer;
pub use subdivide::{subdivide_tile, SubdivideOptions};
pub use tile::VectorTile;
pub use value::TileValue;
