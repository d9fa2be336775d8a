//! Building the typed package header from the archive's descriptor files.
//!
//! The archive key's extension picks the layout: `.tpkx` reads `root.json`
//! and merges `iteminfo.json`; everything else is treated as a VTPK and
//! reads `p12/root.json`, the optional `esriinfo/iteminfo.xml`, the byte
//! range of `p12/metadata.json` and, when coverage checking is on, the
//! sparse-pyramid tilemap at `p12/tilemap/root.json`.

use super::coverage::CoverageMap;
use crate::archive::{FileEntry, ZipIndex};
use crate::error::PackageError;
use crate::io::DataReader;
use crate::types::{Blob, ByteRange, TileCompression};
use crate::utils::xml;
use anyhow::{Context, Result};
use serde_json::Value;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PackageKind {
	Tpkx,
	Vtpk,
}

/// Everything a tile request needs to know about the archive; immutable
/// once built and shared behind an `Arc`.
#[derive(Debug)]
pub struct PackageHeader {
	pub kind: PackageKind,
	pub name: String,
	pub description: String,
	pub attribution: String,
	pub version: String,
	/// Declared spatial reference (`latestWkid`), when present.
	pub spatial_reference: Option<u32>,
	pub tile_compression: TileCompression,
	/// `pbf` for vector tiles, a raster format string otherwise.
	pub tile_media_type: String,
	pub tile_size: u32,
	pub min_zoom: u8,
	pub max_zoom: u8,
	/// [min_lon, min_lat, max_lon, max_lat]
	pub bounds: [f64; 4],
	pub files: ZipIndex,
	/// Present on indexed VTPK packages with coverage checking enabled.
	pub coverage: Option<CoverageMap>,
	/// The archive version observed while the header was built; all later
	/// reads are checked against it.
	pub etag: Option<String>,
	pub metadata_range: Option<ByteRange>,
}

impl PackageHeader {
	pub async fn from_reader(reader: &DataReader, coverage_check: bool) -> Result<PackageHeader> {
		let (files, etag) = ZipIndex::from_reader(reader).await.context("failed to index archive")?;

		let archive_key = reader.name().to_string();
		if archive_key.to_lowercase().ends_with(".tpkx") {
			build_tpkx(reader, files, etag, &archive_key).await
		} else {
			build_vtpk(reader, files, etag, &archive_key, coverage_check).await
		}
	}

	/// True when missing tiles may be synthesized from an ancestor.
	pub fn is_indexed_vtpk(&self) -> bool {
		self.kind == PackageKind::Vtpk && self.coverage.is_some()
	}

	/// Archive directory holding the bundle files.
	pub fn bundle_prefix(&self) -> &'static str {
		match self.kind {
			PackageKind::Tpkx => "tile",
			PackageKind::Vtpk => "p12/tile",
		}
	}
}

async fn build_tpkx(reader: &DataReader, files: ZipIndex, etag: Option<String>, archive_key: &str) -> Result<PackageHeader> {
	let root = read_json(reader, &files, "root.json", &etag)
		.await?
		.context("archive has no root.json")?;
	let iteminfo = read_json(reader, &files, "iteminfo.json", &etag).await?;

	let mut header = extract_common(&root, files, etag, archive_key)?;
	if let Some(item) = iteminfo {
		if let Some(title) = str_at(&item, &["title"]).or_else(|| str_at(&item, &["name"])) {
			header.name = title;
		}
		if let Some(description) = str_at(&item, &["description"]).or_else(|| str_at(&item, &["snippet"])) {
			header.description = description;
		}
		if let Some(attribution) = str_at(&item, &["accessinformation"]).or_else(|| str_at(&item, &["licenseInfo"])) {
			header.attribution = attribution;
		}
	}
	Ok(header)
}

async fn build_vtpk(
	reader: &DataReader,
	files: ZipIndex,
	etag: Option<String>,
	archive_key: &str,
	coverage_check: bool,
) -> Result<PackageHeader> {
	let root = read_json(reader, &files, "p12/root.json", &etag)
		.await?
		.context("archive has no p12/root.json")?;

	let metadata_range = files.get("p12/metadata.json").map(FileEntry::as_range);

	let iteminfo = match read_file(reader, &files, "esriinfo/iteminfo.xml", &etag).await? {
		Some(blob) => match xml::parse_document(blob.as_str()) {
			Ok((_, node)) => Some(node),
			Err(err) => {
				log::warn!("ignoring unparsable iteminfo.xml: {err:#}");
				None
			}
		},
		None => None,
	};

	let coverage = if coverage_check {
		match read_json(reader, &files, "p12/tilemap/root.json", &etag).await? {
			Some(tilemap) => Some(CoverageMap::from_tilemap(&tilemap).context("failed to expand tilemap index")?),
			None => None,
		}
	} else {
		None
	};

	let mut header = extract_common(&root, files, etag, archive_key)?;
	header.metadata_range = metadata_range;
	header.coverage = coverage;

	if let Some(item) = iteminfo {
		if let Some(title) = item.child_text("title").filter(|t| !t.is_empty()) {
			header.name = title.to_string();
		}
		if let Some(description) = item.child_text("description").filter(|t| !t.is_empty()) {
			header.description = description.to_string();
		}
		if let Some(attribution) = item.child_text("accessinformation").filter(|t| !t.is_empty()) {
			header.attribution = attribution.to_string();
		}
	}
	Ok(header)
}

/// Field extraction shared by both layouts.
fn extract_common(root: &Value, files: ZipIndex, etag: Option<String>, archive_key: &str) -> Result<PackageHeader> {
	let tile_info = root.get("tileInfo");

	// The tile-info block of a vector package declares the tile format;
	// raster packages put theirs under tileImageInfo.
	let kind = match tile_info.and_then(|info| info.get("format")) {
		Some(_) => PackageKind::Vtpk,
		None => PackageKind::Tpkx,
	};

	let tile_media_type = match kind {
		PackageKind::Vtpk => str_at(root, &["tileInfo", "format"]).unwrap_or_else(|| "pbf".to_string()),
		PackageKind::Tpkx => str_at(root, &["tileImageInfo", "format"]).unwrap_or_else(|| "png".to_string()),
	};

	let tile_compression = match str_at(root, &["resourceInfo", "tileCompression"]) {
		Some(tag) => TileCompression::parse_str(&tag),
		None => TileCompression::Uncompressed,
	};

	let spatial_reference = tile_info
		.and_then(|info| info.get("spatialReference"))
		.and_then(|sr| sr.get("latestWkid"))
		.and_then(Value::as_u64)
		.and_then(|wkid| u32::try_from(wkid).ok());

	let min_zoom = zoom_at(root, "minZoom").or_else(|| zoom_at(root, "minLOD")).unwrap_or(0);
	let max_zoom = zoom_at(root, "maxZoom")
		.or_else(|| zoom_at(root, "maxLOD"))
		.unwrap_or(min_zoom.max(23));

	let bounds = extract_bounds(root).unwrap_or_else(|| {
		log::debug!("package has no usable extent, assuming world bounds");
		[-180.0, -90.0, 180.0, 90.0]
	});

	let tile_size = tile_info
		.and_then(|info| info.get("rows"))
		.and_then(Value::as_u64)
		.and_then(|rows| u32::try_from(rows).ok())
		.unwrap_or(512);

	let version = match root.get("currentVersion") {
		Some(Value::String(text)) => text.clone(),
		Some(Value::Number(number)) => number.to_string(),
		_ => String::new(),
	};

	Ok(PackageHeader {
		kind,
		name: archive_stem(archive_key),
		description: String::new(),
		attribution: String::new(),
		version,
		spatial_reference,
		tile_compression,
		tile_media_type,
		tile_size,
		min_zoom,
		max_zoom,
		bounds,
		files,
		coverage: None,
		etag,
		metadata_range: None,
	})
}

fn extract_bounds(root: &Value) -> Option<[f64; 4]> {
	let extent = root.get("extent")?;
	let field = |name: &str| extent.get(name).and_then(Value::as_f64).filter(|v| v.is_finite());
	Some([field("xmin")?, field("ymin")?, field("xmax")?, field("ymax")?])
}

fn zoom_at(root: &Value, field: &str) -> Option<u8> {
	root.get(field).and_then(Value::as_u64).and_then(|z| u8::try_from(z).ok())
}

fn str_at(value: &Value, path: &[&str]) -> Option<String> {
	let mut current = value;
	for field in path {
		current = current.get(field)?;
	}
	current.as_str().map(str::to_string)
}

/// The last path segment of the archive key, without its extension.
fn archive_stem(archive_key: &str) -> String {
	let name = archive_key
		.rsplit(['/', '\\'])
		.next()
		.unwrap_or(archive_key)
		.trim_end_matches('/');
	match name.rsplit_once('.') {
		Some((stem, _)) if !stem.is_empty() => stem.to_string(),
		_ => name.to_string(),
	}
}

/// Reads one archive member, verifying the archive version along the way.
pub(crate) async fn read_file(
	reader: &DataReader,
	files: &ZipIndex,
	path: &str,
	expected_etag: &Option<String>,
) -> Result<Option<Blob>> {
	let Some(entry) = files.get(path) else {
		return Ok(None);
	};
	let response = reader
		.read_range(&entry.as_range())
		.await
		.with_context(|| format!("failed to read '{path}'"))?;
	if let (Some(expected), Some(found)) = (expected_etag, &response.etag) {
		if expected != found {
			return Err(PackageError::EtagMismatch {
				expected: expected.clone(),
				found: found.clone(),
			}
			.into());
		}
	}
	Ok(Some(response.blob))
}

async fn read_json(
	reader: &DataReader,
	files: &ZipIndex,
	path: &str,
	expected_etag: &Option<String>,
) -> Result<Option<Value>> {
	match read_file(reader, files, path, expected_etag).await? {
		Some(blob) => Ok(Some(
			serde_json::from_slice(blob.as_slice()).with_context(|| format!("'{path}' is not valid JSON"))?,
		)),
		None => Ok(None),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{self, reader_from_blob, reader_named, ZipBuilder};

	#[tokio::test]
	async fn builds_tpkx_header() -> Result<()> {
		let archive = ZipBuilder::new()
			.entry("root.json", testing::tpkx_root_json(0, 16, "gzip"))
			.entry(
				"iteminfo.json",
				Blob::from(r#"{"title":"Satellite","description":"Imagery","accessinformation":"© Example"}"#),
			)
			.build()?;
		let reader = reader_named("satellite.tpkx", archive, None);

		let header = PackageHeader::from_reader(&reader, true).await?;
		assert_eq!(header.kind, PackageKind::Tpkx);
		assert_eq!(header.name, "Satellite");
		assert_eq!(header.description, "Imagery");
		assert_eq!(header.attribution, "© Example");
		assert_eq!(header.tile_compression, TileCompression::Gzip);
		assert_eq!(header.tile_media_type, "jpg");
		assert_eq!((header.min_zoom, header.max_zoom), (0, 16));
		assert_eq!(header.spatial_reference, Some(3857));
		assert_eq!(header.bundle_prefix(), "tile");
		assert!(!header.is_indexed_vtpk());
		assert!(header.metadata_range.is_none());
		Ok(())
	}

	#[tokio::test]
	async fn builds_indexed_vtpk_header() -> Result<()> {
		let archive = ZipBuilder::new()
			.entry("p12/root.json", testing::vtpk_root_json(0, 15))
			.entry("p12/metadata.json", Blob::from(r#"{"iso":"metadata"}"#))
			.entry(
				"esriinfo/iteminfo.xml",
				Blob::from("<ESRI_ItemInformation><title>Streets</title></ESRI_ItemInformation>"),
			)
			.entry("p12/tilemap/root.json", testing::tilemap_json())
			.build()?;
		let reader = reader_from_blob(archive, Some("\"v1\"".to_string()));

		let header = PackageHeader::from_reader(&reader, true).await?;
		assert_eq!(header.kind, PackageKind::Vtpk);
		assert_eq!(header.name, "Streets");
		assert_eq!(header.tile_media_type, "pbf");
		assert_eq!(header.tile_compression, TileCompression::Gzip);
		assert_eq!(header.etag, Some("\"v1\"".to_string()));
		assert_eq!(header.bundle_prefix(), "p12/tile");
		assert!(header.is_indexed_vtpk());
		assert!(header.metadata_range.is_some());
		Ok(())
	}

	#[tokio::test]
	async fn coverage_check_off_skips_the_tilemap() -> Result<()> {
		let archive = ZipBuilder::new()
			.entry("p12/root.json", testing::vtpk_root_json(0, 15))
			.entry("p12/tilemap/root.json", testing::tilemap_json())
			.build()?;
		let reader = reader_from_blob(archive, None);

		let header = PackageHeader::from_reader(&reader, false).await?;
		assert!(header.coverage.is_none());
		assert!(!header.is_indexed_vtpk());
		// The package name falls back to the archive stem.
		assert_eq!(header.name, "archive");
		Ok(())
	}

	#[test]
	fn archive_stem_variants() {
		assert_eq!(archive_stem("/data/world.vtpk"), "world");
		assert_eq!(archive_stem("https://example.com/tiles/basemap.tpkx"), "basemap");
		assert_eq!(archive_stem("plain"), "plain");
	}
}
