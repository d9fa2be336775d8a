//! Archive paths of bundle files.

use crate::archive::BUNDLE_DIM;
use crate::types::TileCoord;

/// The archive-relative path of the bundle covering `coord`.
///
/// Bundles are addressed by the 128-aligned origin of their block: zoom is
/// zero-padded decimal, row and column are lowercase hex padded to four
/// digits, as in `{prefix}/L05/R0080C0100.bundle`.
pub fn bundle_path(prefix: &str, coord: &TileCoord) -> String {
	let row = (coord.y / BUNDLE_DIM) * BUNDLE_DIM;
	let col = (coord.x / BUNDLE_DIM) * BUNDLE_DIM;
	format!("{prefix}/L{:02}/R{row:04x}C{col:04x}.bundle", coord.level)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn coord(level: u8, x: u32, y: u32) -> TileCoord {
		TileCoord::new(level, x, y).unwrap()
	}

	#[test]
	fn origin_block() {
		assert_eq!(bundle_path("tile", &coord(5, 3, 7)), "tile/L05/R0000C0000.bundle");
	}

	#[test]
	fn aligned_origins_in_hex() {
		// 300 / 128 * 128 = 256 = 0x100; 140 / 128 * 128 = 128 = 0x80.
		assert_eq!(
			bundle_path("p12/tile", &coord(12, 300, 140)),
			"p12/tile/L12/R0080C0100.bundle"
		);
	}

	#[test]
	fn deep_zoom_levels_keep_two_digits() {
		assert_eq!(bundle_path("tile", &coord(14, 0, 0)), "tile/L14/R0000C0000.bundle");
		assert_eq!(bundle_path("tile", &coord(3, 0, 0)), "tile/L03/R0000C0000.bundle");
	}

	#[test]
	fn large_coordinates() {
		// 70000 -> block origin 69 888 = 0x11100.
		assert_eq!(
			bundle_path("tile", &coord(17, 70_000, 70_000)),
			"tile/L17/R11100C11100.bundle"
		);
	}
}
