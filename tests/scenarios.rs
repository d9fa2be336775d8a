//! End-to-end scenarios against in-memory archives.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tilepack::archive::BUNDLE_INDEX_LENGTH;
use tilepack::error::is_etag_mismatch;
use tilepack::io::{DataReaderTrait, RangeResponse};
use tilepack::testing::{
	make_bundle, mvt_tile_bytes, tilemap_json, tpkx_root_json, vtpk_root_json, MockDataReader, ZipBuilder,
};
use tilepack::utils::compress_gzip;
use tilepack::vector_tile::VectorTile;
use tilepack::{Blob, ByteRange, PackageConfig, PackageError, TileCoord, TilePackage};
use tokio_util::sync::CancellationToken;

fn coord(level: u8, x: u32, y: u32) -> TileCoord {
	TileCoord::new(level, x, y).unwrap()
}

const RASTER_PAYLOAD: &[u8] = b"not really a jpeg, but served like one";

/// A raster package with one bundle holding tile (5, 3, 7), gzip payloads.
fn tpkx_archive() -> Result<Blob> {
	let bundle = make_bundle(&[(3, 7, compress_gzip(&Blob::from(RASTER_PAYLOAD))?)])?;
	ZipBuilder::new()
		.entry("root.json", tpkx_root_json(0, 16, "gzip"))
		.entry("iteminfo.json", Blob::from(r#"{"title":"Raster"}"#))
		.entry("tile/L05/R0000C0000.bundle", bundle)
		.build()
}

/// An indexed vector package whose only materialized tile is (4, 2, 3).
fn vtpk_archive() -> Result<Blob> {
	let bundle = make_bundle(&[(2, 3, compress_gzip(&mvt_tile_bytes())?)])?;
	ZipBuilder::new()
		.entry("p12/root.json", vtpk_root_json(0, 15))
		.entry("p12/metadata.json", Blob::from(r#"{"iso":"19139"}"#))
		.entry("p12/tilemap/root.json", tilemap_json())
		.entry("p12/resources/styles/root.json", Blob::from(r#"{"version":8}"#))
		.entry("p12/tile/L04/R0000C0000.bundle", bundle)
		.build()
}

// S1: direct hit in a raster package, including decompression; a tile
// outside any bundle is "no data".
#[tokio::test]
async fn s1_tpkx_direct_hit() -> Result<()> {
	let reader = MockDataReader::new("test.tpkx", tpkx_archive()?, None);
	let package = TilePackage::from_reader(reader.clone(), PackageConfig::default());

	let tile = package.get_tile(&coord(5, 3, 7)).await?.expect("tile must exist");
	assert_eq!(tile.bytes.as_slice(), RASTER_PAYLOAD);

	assert!(package.get_tile(&coord(5, 300, 300)).await?.is_none());
	assert!(package.get_tile(&coord(5, 3, 8)).await?.is_none());
	Ok(())
}

// S2: a missing vector tile is synthesized from its ancestor; the result
// is cached byte-identically; out-of-range zoom is "no data".
#[tokio::test]
async fn s2_vtpk_overzoom_with_cache() -> Result<()> {
	let reader = MockDataReader::new("streets.vtpk", vtpk_archive()?, None);
	let package = TilePackage::from_reader(reader.clone(), PackageConfig::default());

	let first = package.get_tile(&coord(5, 4, 6)).await?.expect("synthesized tile");
	assert!(!first.bytes.is_empty());
	let decoded = VectorTile::from_blob(&first.bytes)?;
	assert!(!decoded.layers.is_empty());

	let reads_after_first = reader.read_count();
	let second = package.get_tile(&coord(5, 4, 6)).await?.expect("cached tile");
	assert_eq!(second.bytes, first.bytes);
	assert_eq!(reader.read_count(), reads_after_first, "cached subdivision must not re-read");

	assert!(package.get_tile(&coord(20, 0, 0)).await?.is_none());
	Ok(())
}

// S2 continued: the materialized ancestor itself is served directly.
#[tokio::test]
async fn vtpk_direct_ancestor_tile() -> Result<()> {
	let reader = MockDataReader::new("streets.vtpk", vtpk_archive()?, None);
	let package = TilePackage::from_reader(reader, PackageConfig::default());

	let tile = package.get_tile(&coord(4, 2, 3)).await?.expect("stored tile");
	assert_eq!(tile.bytes, mvt_tile_bytes());
	Ok(())
}

// S3: the max_dz cap turns deep synthesis into "no data" without touching
// the subdivider.
#[tokio::test]
async fn s3_max_dz_cap() -> Result<()> {
	let reader = MockDataReader::new("streets.vtpk", vtpk_archive()?, None);
	let config = PackageConfig {
		max_dz: 2,
		..Default::default()
	};
	let package = TilePackage::from_reader(reader.clone(), config);

	// (10, 133, 201) descends from (4, 2, 3) across dz = 6 > 2.
	assert!(package.get_tile(&coord(10, 133, 201)).await?.is_none());
	// The parent's tile slab was never fetched (only descriptor files were).
	let gzip_tile_length = compress_gzip(&mvt_tile_bytes())?.len();
	assert_eq!(reader.reads_of_length(gzip_tile_length), 0);

	// Within the cap the same pyramid synthesizes fine.
	assert!(package.get_tile(&coord(6, 9, 13)).await?.is_some());
	Ok(())
}

// S4: one mid-session archive rotation heals transparently.
#[tokio::test]
async fn s4_etag_rotation_recovers_once() -> Result<()> {
	let archive = vtpk_archive()?;
	let reader = MockDataReader::new("streets.vtpk", archive.clone(), Some("\"v1\"".to_string()));
	let package = TilePackage::from_reader(reader.clone(), PackageConfig::default());

	let header = package.get_header().await?;
	assert_eq!(header.etag.as_deref(), Some("\"v1\""));

	// The server swaps the archive (same layout, new validator).
	reader.rotate(archive, Some("\"v2\"".to_string()));

	let tile = package.get_tile(&coord(4, 2, 3)).await?.expect("retried tile");
	assert_eq!(tile.bytes, mvt_tile_bytes());
	assert_eq!(package.get_header().await?.etag.as_deref(), Some("\"v2\""));
	Ok(())
}

/// A byte source that reports a different ETag on every read.
#[derive(Debug)]
struct RotatingEtagReader {
	blob: Blob,
	counter: AtomicU64,
}

#[async_trait]
impl DataReaderTrait for RotatingEtagReader {
	async fn read_range(&self, range: &ByteRange) -> Result<RangeResponse> {
		let version = self.counter.fetch_add(1, Ordering::SeqCst);
		Ok(RangeResponse {
			blob: Blob::from(self.blob.get_range(range.as_range_usize())),
			etag: Some(format!("\"v{version}\"")),
			cache_control: None,
			expires: None,
		})
	}
	fn size(&self) -> u64 {
		self.blob.len()
	}
	fn name(&self) -> &str {
		"rotating.vtpk"
	}
}

// S4 continued: a second mismatch on the retried operation is fatal.
#[tokio::test]
async fn s4_second_mismatch_is_fatal() -> Result<()> {
	let reader = Arc::new(RotatingEtagReader {
		blob: vtpk_archive()?,
		counter: AtomicU64::new(0),
	});
	let package = TilePackage::from_reader(reader, PackageConfig::default());

	let err = package.get_tile(&coord(4, 2, 3)).await.unwrap_err();
	assert!(is_etag_mismatch(&err), "unexpected error: {err:#}");
	Ok(())
}

// S5: the whole flow works over a ZIP64 archive with sentinel fields.
#[tokio::test]
async fn s5_zip64_archive_serves_tiles() -> Result<()> {
	let bundle = make_bundle(&[(2, 3, compress_gzip(&mvt_tile_bytes())?)])?;
	let archive = ZipBuilder::new()
		.entry("p12/root.json", vtpk_root_json(0, 15))
		.entry("p12/tilemap/root.json", tilemap_json())
		.entry("p12/tile/L04/R0000C0000.bundle", bundle)
		.zip64(true)
		.build()?;
	let reader = MockDataReader::new("big.vtpk", archive, None);
	let package = TilePackage::from_reader(reader, PackageConfig::default());

	let tile = package.get_tile(&coord(4, 2, 3)).await?.expect("stored tile");
	assert_eq!(tile.bytes, mvt_tile_bytes());
	Ok(())
}

// S6: many simultaneous requests for tiles of one bundle share a single
// directory fetch.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn s6_concurrent_requests_coalesce_directory_fetch() -> Result<()> {
	let mut tiles = Vec::new();
	for x in 0..10u32 {
		for y in 0..10u32 {
			tiles.push((x, y, compress_gzip(&Blob::from(format!("tile {x} {y}")))?));
		}
	}
	let bundle = make_bundle(&tiles)?;
	let archive = ZipBuilder::new()
		.entry("root.json", tpkx_root_json(0, 16, "gzip"))
		.entry("tile/L05/R0000C0000.bundle", bundle)
		.build()?;
	let reader = MockDataReader::new("grid.tpkx", archive, None);
	let package = Arc::new(TilePackage::from_reader(reader.clone(), PackageConfig::default()));

	let mut handles = Vec::new();
	for x in 0..10u32 {
		for y in 0..10u32 {
			let package = package.clone();
			handles.push(tokio::spawn(async move { package.get_tile(&coord(5, x, y)).await }));
		}
	}
	for (i, handle) in handles.into_iter().enumerate() {
		let tile = handle.await??.expect("tile present");
		let (x, y) = ((i / 10) as u32, (i % 10) as u32);
		assert_eq!(tile.bytes.as_str(), format!("tile {x} {y}"));
	}

	assert_eq!(
		reader.reads_of_length(BUNDLE_INDEX_LENGTH),
		1,
		"the bundle directory must be fetched exactly once"
	);
	Ok(())
}

// Invariant 7: two concurrent requests for the *same* tile issue one
// directory read and one slab read.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_same_tile_single_slab_read() -> Result<()> {
	let slab = compress_gzip(&Blob::from(RASTER_PAYLOAD))?;
	let slab_length = slab.len();
	let bundle = make_bundle(&[(3, 7, slab)])?;
	let archive = ZipBuilder::new()
		.entry("root.json", tpkx_root_json(0, 16, "gzip"))
		.entry("tile/L05/R0000C0000.bundle", bundle)
		.build()?;
	let reader = MockDataReader::new("one.tpkx", archive, None);
	let package = Arc::new(TilePackage::from_reader(reader.clone(), PackageConfig::default()));

	let a = package.clone();
	let b = package.clone();
	let (first, second) = tokio::join!(
		tokio::spawn(async move { a.get_tile(&coord(5, 3, 7)).await }),
		tokio::spawn(async move { b.get_tile(&coord(5, 3, 7)).await }),
	);
	assert_eq!(first??.unwrap().bytes.as_slice(), RASTER_PAYLOAD);
	assert_eq!(second??.unwrap().bytes.as_slice(), RASTER_PAYLOAD);

	assert_eq!(reader.reads_of_length(BUNDLE_INDEX_LENGTH), 1);
	assert_eq!(reader.reads_of_length(slab_length), 1);
	Ok(())
}

#[tokio::test]
async fn resources_and_metadata() -> Result<()> {
	let reader = MockDataReader::new("streets.vtpk", vtpk_archive()?, None);
	let package = TilePackage::from_reader(reader, PackageConfig::default());

	let style = package
		.get_resource("p12/resources/styles/root.json")
		.await?
		.expect("style resource");
	assert_eq!(style.bytes.as_str(), r#"{"version":8}"#);
	assert!(package.get_resource("p12/resources/sprites/sprite.png").await?.is_none());

	let metadata = package.get_metadata().await?.expect("metadata document");
	assert_eq!(metadata["iso"], "19139");
	assert_eq!(metadata["name"], "streets");

	// Raster packages have no metadata document.
	let raster = TilePackage::from_reader(MockDataReader::new("r.tpkx", tpkx_archive()?, None), PackageConfig::default());
	assert!(raster.get_metadata().await?.is_none());
	Ok(())
}

#[tokio::test]
async fn cancellation_is_typed() -> Result<()> {
	let reader = MockDataReader::new("streets.vtpk", vtpk_archive()?, None);
	let package = TilePackage::from_reader(reader, PackageConfig::default());

	let cancel = CancellationToken::new();
	cancel.cancel();
	let err = package.get_tile_cancellable(&coord(4, 2, 3), &cancel).await.unwrap_err();
	assert!(matches!(
		err.downcast_ref::<PackageError>(),
		Some(PackageError::Cancelled)
	));

	// An un-cancelled token leaves the call untouched.
	let cancel = CancellationToken::new();
	assert!(package.get_tile_cancellable(&coord(4, 2, 3), &cancel).await?.is_some());
	Ok(())
}

// Coverage checking off: the package loses its overzoom ability but still
// serves stored tiles.
#[tokio::test]
async fn coverage_check_off_disables_overzoom() -> Result<()> {
	let reader = MockDataReader::new("streets.vtpk", vtpk_archive()?, None);
	let config = PackageConfig {
		coverage_check: false,
		..Default::default()
	};
	let package = TilePackage::from_reader(reader, config);

	assert!(package.get_tile(&coord(4, 2, 3)).await?.is_some());
	assert!(package.get_tile(&coord(5, 4, 6)).await?.is_none());
	Ok(())
}

/// A wrapper that counts how often the underlying archive is re-indexed
/// (reads of the 98-byte tail).
#[derive(Debug)]
struct TailCountingReader {
	inner: Arc<MockDataReader>,
	tail_reads: Mutex<Vec<u64>>,
}

#[async_trait]
impl DataReaderTrait for TailCountingReader {
	async fn read_range(&self, range: &ByteRange) -> Result<RangeResponse> {
		if range.length == 98 {
			self.tail_reads.lock().unwrap().push(range.offset);
		}
		self.inner.read_range(range).await
	}
	fn size(&self) -> u64 {
		self.inner.size()
	}
	fn name(&self) -> &str {
		self.inner.name()
	}
}

// Concurrent first requests share one header build.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_header_builds_coalesce() -> Result<()> {
	let reader = Arc::new(TailCountingReader {
		inner: MockDataReader::new("streets.vtpk", vtpk_archive()?, None),
		tail_reads: Mutex::new(Vec::new()),
	});
	let package = Arc::new(TilePackage::from_reader(reader.clone(), PackageConfig::default()));

	let mut handles = Vec::new();
	for _ in 0..16 {
		let package = package.clone();
		handles.push(tokio::spawn(async move { package.get_header().await }));
	}
	for handle in handles {
		handle.await??;
	}
	assert_eq!(reader.tail_reads.lock().unwrap().len(), 1);
	Ok(())
}
