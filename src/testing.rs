//! Fixture builders for tests: in-memory byte sources with read logging
//! and ETag rotation, stored-entry ZIP archives (classical and ZIP64),
//! bundle files and descriptor documents.

use crate::io::{DataReader, DataReaderTrait, RangeResponse, ValueWriterBlob};
use crate::types::{Blob, ByteRange};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// An in-memory byte source that records every read and can swap its
/// content and ETag mid-session (simulating an archive mutation behind an
/// HTTP endpoint).
#[derive(Debug)]
pub struct MockDataReader {
	name: String,
	state: Mutex<(Blob, Option<String>)>,
	reads: Mutex<Vec<ByteRange>>,
}

impl MockDataReader {
	pub fn new(name: &str, blob: Blob, etag: Option<String>) -> Arc<MockDataReader> {
		Arc::new(MockDataReader {
			name: name.to_string(),
			state: Mutex::new((blob, etag)),
			reads: Mutex::new(Vec::new()),
		})
	}

	/// Replaces the archive content and ETag, as a server rotation would.
	pub fn rotate(&self, blob: Blob, etag: Option<String>) {
		*self.state.lock().unwrap() = (blob, etag);
	}

	pub fn read_log(&self) -> Vec<ByteRange> {
		self.reads.lock().unwrap().clone()
	}

	pub fn read_count(&self) -> usize {
		self.reads.lock().unwrap().len()
	}

	/// Number of logged reads with exactly this length.
	pub fn reads_of_length(&self, length: u64) -> usize {
		self.reads.lock().unwrap().iter().filter(|r| r.length == length).count()
	}
}

#[async_trait]
impl DataReaderTrait for MockDataReader {
	async fn read_range(&self, range: &ByteRange) -> Result<RangeResponse> {
		self.reads.lock().unwrap().push(*range);
		let (blob, etag) = {
			let state = self.state.lock().unwrap();
			(state.0.clone(), state.1.clone())
		};
		if range.end() > blob.len() {
			bail!("read {range:?} past the end of '{}' ({} bytes)", self.name, blob.len());
		}
		Ok(RangeResponse {
			blob: Blob::from(blob.get_range(range.as_range_usize())),
			etag,
			cache_control: None,
			expires: None,
		})
	}

	fn size(&self) -> u64 {
		self.state.lock().unwrap().0.len()
	}

	fn name(&self) -> &str {
		&self.name
	}
}

/// A reader named `archive.vtpk` over the given bytes.
pub fn reader_from_blob(blob: Blob, etag: Option<String>) -> DataReader {
	MockDataReader::new("archive.vtpk", blob, etag)
}

/// Same, with an explicit archive name (the extension drives the package
/// flavor dispatch).
pub fn reader_named(name: &str, blob: Blob, etag: Option<String>) -> DataReader {
	MockDataReader::new(name, blob, etag)
}

const LOCAL_SIG: u32 = 0x0403_4b50;
const CENTRAL_SIG: u32 = 0x0201_4b50;
const EOCD_SIG: u32 = 0x0605_4b50;
const EOCD64_SIG: u32 = 0x0606_4b50;
const EOCD64_LOCATOR_SIG: u32 = 0x0706_4b50;

/// Builds stored-entry ZIP archives the way TilePackage writers do: no
/// archive-level compression, no extra fields in local headers.
#[derive(Default)]
pub struct ZipBuilder {
	entries: Vec<(String, Blob)>,
	zip64: bool,
}

impl ZipBuilder {
	pub fn new() -> ZipBuilder {
		ZipBuilder::default()
	}

	pub fn entry(mut self, name: &str, content: Blob) -> ZipBuilder {
		self.entries.push((name.to_string(), content));
		self
	}

	/// Writes the central directory with ZIP64 sentinel fields and
	/// extended info blocks, plus the ZIP64 end records.
	pub fn zip64(mut self, zip64: bool) -> ZipBuilder {
		self.zip64 = zip64;
		self
	}

	pub fn build(&self) -> Result<Blob> {
		let mut writer = ValueWriterBlob::new();
		let mut offsets = Vec::with_capacity(self.entries.len());

		for (name, content) in &self.entries {
			offsets.push(writer.position());
			writer.write_u32(LOCAL_SIG)?;
			writer.write_u16(20)?; // version needed
			writer.write_u16(0)?; // flags
			writer.write_u16(0)?; // method: stored
			writer.write_u32(0)?; // mod time + date
			writer.write_u32(0)?; // crc (not validated by readers)
			writer.write_u32(content.len() as u32)?;
			writer.write_u32(content.len() as u32)?;
			writer.write_u16(name.len() as u16)?;
			writer.write_u16(0)?; // no extra field
			writer.write_string(name)?;
			writer.write_blob(content)?;
		}

		let directory_offset = writer.position();
		for ((name, content), offset) in self.entries.iter().zip(&offsets) {
			writer.write_u32(CENTRAL_SIG)?;
			writer.write_u16(20)?; // version made by
			writer.write_u16(20)?; // version needed
			writer.write_u16(0)?; // flags
			writer.write_u16(0)?; // method
			writer.write_u32(0)?; // mod time + date
			writer.write_u32(0)?; // crc
			if self.zip64 {
				writer.write_u32(u32::MAX)?; // compressed size -> extra
				writer.write_u32(content.len() as u32)?;
			} else {
				writer.write_u32(content.len() as u32)?;
				writer.write_u32(content.len() as u32)?;
			}
			writer.write_u16(name.len() as u16)?;
			writer.write_u16(if self.zip64 { 20 } else { 0 })?; // extra length
			writer.write_u16(0)?; // comment length
			writer.write_u16(0)?; // disk number
			writer.write_u16(0)?; // internal attributes
			writer.write_u32(0)?; // external attributes
			if self.zip64 {
				writer.write_u32(u32::MAX)?; // offset -> extra
			} else {
				writer.write_u32(*offset as u32)?;
			}
			writer.write_string(name)?;
			if self.zip64 {
				writer.write_u16(0x0001)?; // ZIP64 extended info
				writer.write_u16(16)?;
				writer.write_u64(content.len() as u64)?; // size
				writer.write_u64(*offset)?; // offset
			}
		}
		let directory_length = writer.position() - directory_offset;

		if self.zip64 {
			let zip64_eocd_offset = writer.position();
			writer.write_u32(EOCD64_SIG)?;
			writer.write_u64(44)?; // record size (excluding sig + this field)
			writer.write_u16(45)?; // version made by
			writer.write_u16(45)?; // version needed
			writer.write_u32(0)?; // this disk
			writer.write_u32(0)?; // central directory disk
			writer.write_u64(self.entries.len() as u64)?;
			writer.write_u64(self.entries.len() as u64)?;
			writer.write_u64(directory_length)?;
			writer.write_u64(directory_offset)?;

			writer.write_u32(EOCD64_LOCATOR_SIG)?;
			writer.write_u32(0)?;
			writer.write_u64(zip64_eocd_offset)?;
			writer.write_u32(1)?;

			writer.write_u32(EOCD_SIG)?;
			writer.write_u16(0)?;
			writer.write_u16(0)?;
			writer.write_u16(u16::MAX)?;
			writer.write_u16(u16::MAX)?;
			writer.write_u32(u32::MAX)?;
			writer.write_u32(u32::MAX)?;
			writer.write_u16(0)?;
		} else {
			writer.write_u32(EOCD_SIG)?;
			writer.write_u16(0)?; // this disk
			writer.write_u16(0)?; // central directory disk
			writer.write_u16(self.entries.len() as u16)?;
			writer.write_u16(self.entries.len() as u16)?;
			writer.write_u32(directory_length as u32)?;
			writer.write_u32(directory_offset as u32)?;
			writer.write_u16(0)?; // comment length
		}

		Ok(writer.into_blob())
	}
}

/// Builds a bundle file: 64-byte header, 128×128 index, concatenated tile
/// payloads. Tile coordinates are absolute; only their position within the
/// block matters.
pub fn make_bundle(tiles: &[(u32, u32, Blob)]) -> Result<Blob> {
	use crate::archive::{BUNDLE_DIM, BUNDLE_HEADER_LENGTH, BUNDLE_INDEX_LENGTH};

	let mut entries = vec![0u64; (BUNDLE_DIM * BUNDLE_DIM) as usize];
	let mut payload = ValueWriterBlob::new();
	let payload_base = BUNDLE_HEADER_LENGTH + BUNDLE_INDEX_LENGTH;

	for (x, y, content) in tiles {
		let offset = payload_base + payload.position();
		let index = (BUNDLE_DIM * (y % BUNDLE_DIM) + (x % BUNDLE_DIM)) as usize;
		entries[index] = offset | ((content.len()) << 40);
		payload.write_blob(content)?;
	}

	let mut writer = ValueWriterBlob::new();
	writer.write_blob(&Blob::new_sized(BUNDLE_HEADER_LENGTH as usize))?;
	for entry in entries {
		writer.write_u64(entry)?;
	}
	writer.write_blob(&payload.into_blob())?;
	Ok(writer.into_blob())
}

/// A raster package descriptor (`root.json` of a `.tpkx`).
pub fn tpkx_root_json(min_zoom: u8, max_zoom: u8, compression: &str) -> Blob {
	Blob::from(
		serde_json::json!({
			"currentVersion": 10.9,
			"tileInfo": {
				"rows": 256,
				"cols": 256,
				"spatialReference": { "wkid": 102100, "latestWkid": 3857 }
			},
			"tileImageInfo": { "format": "jpg" },
			"resourceInfo": { "tileCompression": compression },
			"minZoom": min_zoom,
			"maxZoom": max_zoom,
			"extent": { "xmin": -180.0, "ymin": -85.05, "xmax": 180.0, "ymax": 85.05 }
		})
		.to_string(),
	)
}

/// A vector package descriptor (`p12/root.json`), gzip tile compression.
pub fn vtpk_root_json(min_zoom: u8, max_zoom: u8) -> Blob {
	Blob::from(
		serde_json::json!({
			"currentVersion": 10.9,
			"tileInfo": {
				"format": "pbf",
				"rows": 512,
				"cols": 512,
				"spatialReference": { "wkid": 102100, "latestWkid": 3857 }
			},
			"resourceInfo": { "tileCompression": "gzip" },
			"minZoom": min_zoom,
			"maxZoom": max_zoom,
			"extent": { "xmin": -180.0, "ymin": -85.05, "xmax": 180.0, "ymax": 85.05 }
		})
		.to_string(),
	)
}

/// A tilemap whose only materialized tile is (4, 2, 3).
pub fn tilemap_json() -> Blob {
	Blob::from(
		serde_json::json!({
			"index": [[[0, 0, 0, [0, 0, 1, 0]], 0, 0, 0], 0, 0, 0]
		})
		.to_string(),
	)
}

/// A small uncompressed vector tile: one layer with a polygon covering the
/// full extent, one line and one point, all carrying properties.
pub fn mvt_tile_bytes() -> Blob {
	use crate::vector_tile::{GeomType, TileValue, VectorTile, VectorTileFeature, VectorTileLayer};

	let mut layer = VectorTileLayer::new("features".to_string());
	layer.keys = vec!["kind".to_string()];
	layer.values = vec![
		TileValue::String("area".to_string()),
		TileValue::String("way".to_string()),
		TileValue::String("spot".to_string()),
	];
	layer.features = vec![
		VectorTileFeature::from_geometry(
			Some(1),
			vec![0, 0],
			GeomType::Polygon,
			&vec![vec![[0, 0], [4096, 0], [4096, 4096], [0, 4096], [0, 0]]],
		)
		.unwrap(),
		VectorTileFeature::from_geometry(
			Some(2),
			vec![0, 1],
			GeomType::LineString,
			&vec![vec![[0, 2048], [4096, 2048]]],
		)
		.unwrap(),
		VectorTileFeature::from_geometry(Some(3), vec![0, 2], GeomType::Point, &vec![vec![[1000, 1000]]]).unwrap(),
	];

	VectorTile::new(vec![layer]).to_blob().unwrap()
}
