//! Read-only access to Esri TilePackage archives.
//!
//! A TilePackage is a ZIP (possibly ZIP64) archive with stored entries that
//! carries a raster (`.tpkx`) or vector (`.vtpk`) tile pyramid, split into
//! bundle files of 128×128 tiles, plus descriptor JSONs. Vector packages
//! additionally ship styles, sprites and glyphs.
//!
//! This crate locates tiles through the archive's central directory without
//! ever reading the whole file, which makes it equally usable over a local
//! file and over HTTP range requests. For vector packages with a sparse
//! (indexed) pyramid it synthesizes missing high-zoom tiles by subdividing
//! an ancestor tile's MVT payload.
//!
//! ```rust,no_run
//! use tilepack::TilePackage;
//! use anyhow::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let package = TilePackage::open_path(std::path::Path::new("/data/world.vtpk"))?;
//!     let header = package.get_header().await?;
//!     println!("{} z{}..z{}", header.name, header.min_zoom, header.max_zoom);
//!
//!     if let Some(tile) = package.get_tile(&tilepack::TileCoord::new(5, 3, 7)?).await? {
//!         println!("tile: {} bytes", tile.bytes.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod error;
pub mod io;
pub mod package;
pub mod testing;
pub mod types;
pub mod utils;
pub mod vector_tile;

pub use error::PackageError;
pub use package::{PackageConfig, TilePackage, TileResponse};
pub use types::{Blob, ByteRange, TileCompression, TileCoord};
