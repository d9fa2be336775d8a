//! The tile directory inside a bundle file.
//!
//! A bundle packs a 128×128 block of tiles of one zoom level. Its layout is
//! a 64-byte opaque header, a 131 072-byte index (128·128 entries of 8
//! little-endian bytes: 5 bytes of offset, 3 bytes of size), then the raw
//! tile payloads. Entry offsets are relative to the start of the bundle
//! file; a zero size marks an absent tile.

use crate::io::ValueReaderSlice;
use crate::types::{Blob, ByteRange};
use crate::PackageError;
use anyhow::Result;

pub const BUNDLE_DIM: u32 = 128;
pub const BUNDLE_HEADER_LENGTH: u64 = 64;
pub const BUNDLE_INDEX_LENGTH: u64 = 8 * (BUNDLE_DIM as u64) * (BUNDLE_DIM as u64);

const OFFSET_MASK: u64 = 0xFF_FFFF_FFFF;

/// The decoded 128×128 tile index of one bundle.
///
/// Absent tiles are retained as `None` rather than stripped, so the
/// directory's shape stays inspectable.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleDirectory {
	entries: Vec<Option<ByteRange>>,
}

impl BundleDirectory {
	/// Decodes the index blob (the bytes after the 64-byte bundle header).
	pub fn from_blob(blob: &Blob) -> Result<BundleDirectory> {
		if blob.len() != BUNDLE_INDEX_LENGTH {
			return Err(
				PackageError::MalformedArchive(format!(
					"bundle index must be {BUNDLE_INDEX_LENGTH} bytes, found {}",
					blob.len()
				))
				.into(),
			);
		}

		let mut reader = ValueReaderSlice::new(blob.as_slice());
		let mut entries = Vec::with_capacity((BUNDLE_DIM * BUNDLE_DIM) as usize);
		for _ in 0..BUNDLE_DIM * BUNDLE_DIM {
			let value = reader.read_u64()?;
			let offset = value & OFFSET_MASK;
			let size = value >> 40;
			entries.push(if size == 0 {
				None
			} else {
				Some(ByteRange::new(offset, size))
			});
		}

		Ok(BundleDirectory { entries })
	}

	/// Looks up a tile by its absolute column/row; only the position within
	/// the 128×128 block matters.
	pub fn get(&self, x: u32, y: u32) -> Option<ByteRange> {
		let index = (BUNDLE_DIM * (y % BUNDLE_DIM) + (x % BUNDLE_DIM)) as usize;
		self.entries[index]
	}

	/// Number of present tiles.
	pub fn count_present(&self) -> usize {
		self.entries.iter().filter(|e| e.is_some()).count()
	}
}
