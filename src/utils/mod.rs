//! Support utilities: tile decompression and a minimal XML element tree.

pub mod compression;
pub mod xml;

pub use compression::{compress_gzip, decompress, decompress_gzip};
pub use xml::XmlNode;
