//! The tile compression tag declared by a package header.

use std::fmt::Display;

/// How the tile payloads inside the bundles are compressed.
///
/// Unknown tags are preserved rather than rejected at parse time: a package
/// with an exotic compression is still useful for resources and metadata,
/// and only tile requests fail (with `UnsupportedCompression`).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum TileCompression {
	#[default]
	Uncompressed,
	Gzip,
	Unsupported(String),
}

impl TileCompression {
	/// Parses a header tag. An empty or absent tag means uncompressed.
	pub fn parse_str(value: &str) -> TileCompression {
		match value.to_lowercase().trim() {
			"" | "none" | "raw" => TileCompression::Uncompressed,
			"gz" | "gzip" => TileCompression::Gzip,
			other => TileCompression::Unsupported(other.to_string()),
		}
	}
}

impl Display for TileCompression {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			TileCompression::Uncompressed => "none",
			TileCompression::Gzip => "gzip",
			TileCompression::Unsupported(tag) => tag,
		})
	}
}
