//! Tile payload decompression.
//!
//! TilePackage archives store their entries uncompressed at the ZIP level;
//! compression, when used, applies to individual tile payloads and is
//! declared once in the package header.

use crate::error::PackageError;
use crate::types::{Blob, TileCompression};
use anyhow::{Context, Result};
use flate2::bufread::{GzDecoder, GzEncoder};
use std::io::Read;

/// Decompresses a tile payload according to the header's compression tag.
pub fn decompress(blob: Blob, compression: &TileCompression) -> Result<Blob> {
	match compression {
		TileCompression::Uncompressed => Ok(blob),
		TileCompression::Gzip => decompress_gzip(&blob),
		TileCompression::Unsupported(tag) => Err(PackageError::UnsupportedCompression(tag.clone()).into()),
	}
}

pub fn decompress_gzip(blob: &Blob) -> Result<Blob> {
	let mut decoder = GzDecoder::new(blob.as_slice());
	let mut data = Vec::new();
	decoder
		.read_to_end(&mut data)
		.context("failed to decompress gzip data")?;
	Ok(Blob::from(data))
}

/// Gzip compression, used by archive fixtures in tests.
pub fn compress_gzip(blob: &Blob) -> Result<Blob> {
	let mut encoder = GzEncoder::new(blob.as_slice(), flate2::Compression::best());
	let mut data = Vec::new();
	encoder.read_to_end(&mut data).context("failed to compress gzip data")?;
	Ok(Blob::from(data))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::PackageError;

	#[test]
	fn gzip_round_trip() -> Result<()> {
		let data = Blob::from("a tile payload, repeated a tile payload");
		let compressed = compress_gzip(&data)?;
		assert_ne!(compressed, data);
		let decompressed = decompress(compressed, &TileCompression::Gzip)?;
		assert_eq!(decompressed, data);
		Ok(())
	}

	#[test]
	fn uncompressed_passes_through() -> Result<()> {
		let data = Blob::from(&[1u8, 2, 3]);
		assert_eq!(decompress(data.clone(), &TileCompression::Uncompressed)?, data);
		Ok(())
	}

	#[test]
	fn unknown_tag_fails_typed() {
		let err = decompress(
			Blob::from(&[0u8]),
			&TileCompression::Unsupported("lzma".to_string()),
		)
		.unwrap_err();
		assert!(matches!(
			err.downcast_ref::<PackageError>(),
			Some(PackageError::UnsupportedCompression(tag)) if tag == "lzma"
		));
	}

	#[test]
	fn garbage_gzip_fails() {
		assert!(decompress_gzip(&Blob::from(&[0u8, 1, 2, 3])).is_err());
	}
}
