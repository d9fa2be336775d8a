//! Shared primitive types: byte buffers, byte ranges, tile coordinates and
//! compression tags.

mod blob;
mod byte_range;
mod tile_compression;
mod tile_coord;

pub use blob::Blob;
pub use byte_range::ByteRange;
pub use tile_compression::TileCompression;
pub use tile_coord::TileCoord;
