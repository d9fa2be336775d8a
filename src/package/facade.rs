//! The public package facade.
//!
//! `TilePackage` wires the byte source, archive index, header, locator and
//! cache together and exposes the four public operations: `get_header`,
//! `get_tile`, `get_resource` and `get_metadata`. Every operation observes
//! the archive version (ETag) recorded in the header; on a mismatch the
//! header is invalidated and the operation retried exactly once, so one
//! mid-session archive swap heals transparently while a second one fails.

use super::cache::{CacheEntry, FetchedBlob, PackageCache, SlotKey, SlotKind};
use super::header::PackageHeader;
use super::locator::bundle_path;
use crate::archive::{BundleDirectory, FileEntry, BUNDLE_HEADER_LENGTH, BUNDLE_INDEX_LENGTH};
use crate::error::{is_containment_violation, is_etag_mismatch, PackageError};
use crate::io::{DataReader, DataReaderFile, DataReaderHttp};
use crate::types::{Blob, ByteRange, TileCoord};
use crate::utils::decompress;
use crate::vector_tile::{subdivide_tile, SubdivideOptions};
use anyhow::{anyhow, Context, Result};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Tuning knobs of one package instance.
#[derive(Clone, Debug)]
pub struct PackageConfig {
	/// Load the sparse-pyramid tilemap and enable overzoom (VTPK only).
	pub coverage_check: bool,
	/// Hard cap on the zoom distance bridged by subdivision.
	pub max_dz: u8,
	/// Capacity of the header/resource/tile-index cache.
	pub max_cache_entries: usize,
}

impl Default for PackageConfig {
	fn default() -> Self {
		PackageConfig {
			coverage_check: true,
			max_dz: 8,
			max_cache_entries: 100,
		}
	}
}

/// A served tile or resource: the payload bytes plus the freshness headers
/// observed when they were read.
#[derive(Clone, Debug)]
pub struct TileResponse {
	pub bytes: Blob,
	pub cache_control: Option<String>,
	pub expires: Option<String>,
}

/// Read-only accessor for one TilePackage archive.
///
/// Cheap to share: all state lives behind the byte source and the cache.
/// The header is built lazily on the first request and shared by all
/// subsequent ones.
#[derive(Debug)]
pub struct TilePackage {
	reader: DataReader,
	config: PackageConfig,
	cache: PackageCache,
	subdivide_options: SubdivideOptions,
}

impl TilePackage {
	/// Opens a package from a local file.
	pub fn open_path(path: &Path) -> Result<TilePackage> {
		Self::open_path_with_config(path, PackageConfig::default())
	}

	pub fn open_path_with_config(path: &Path, config: PackageConfig) -> Result<TilePackage> {
		Ok(Self::from_reader(Arc::new(DataReaderFile::open(path)?), config))
	}

	/// Opens a package over HTTP range requests.
	pub async fn open_url(url: reqwest::Url) -> Result<TilePackage> {
		Self::open_url_with_config(url, PackageConfig::default()).await
	}

	pub async fn open_url_with_config(url: reqwest::Url, config: PackageConfig) -> Result<TilePackage> {
		Ok(Self::from_reader(Arc::new(DataReaderHttp::from_url(url).await?), config))
	}

	/// Builds a package on top of any byte source.
	pub fn from_reader(reader: DataReader, config: PackageConfig) -> TilePackage {
		TilePackage {
			cache: PackageCache::new(config.max_cache_entries),
			reader,
			config,
			subdivide_options: SubdivideOptions::default(),
		}
	}

	/// Replaces the subdivision options (clip buffer, layer filter).
	pub fn set_subdivide_options(&mut self, options: SubdivideOptions) {
		self.subdivide_options = options;
	}

	/// The package header, built on first use and cached.
	pub async fn get_header(&self) -> Result<Arc<PackageHeader>> {
		self.with_retry(move |header| async move { Ok(header) }.boxed()).await
	}

	/// The tile at `coord`, or `None` when the package legitimately has no
	/// data there (zoom out of range, bundle or entry missing, no usable
	/// ancestor).
	pub async fn get_tile(&self, coord: &TileCoord) -> Result<Option<TileResponse>> {
		self
			.with_retry(move |header| self.get_tile_inner(header, coord).boxed())
			.await
	}

	/// Like [`get_tile`](Self::get_tile), aborting early when `cancel`
	/// fires. A shared in-flight load keeps running for other callers.
	pub async fn get_tile_cancellable(&self, coord: &TileCoord, cancel: &CancellationToken) -> Result<Option<TileResponse>> {
		tokio::select! {
			biased;
			result = self.get_tile(coord) => result,
			() = cancel.cancelled() => Err(PackageError::Cancelled.into()),
		}
	}

	/// The bytes of a named archive member (style, sprite, glyph range, …),
	/// or `None` when the archive has no such file.
	pub async fn get_resource(&self, path: &str) -> Result<Option<TileResponse>> {
		self
			.with_retry(move |header| {
				async move {
					let Some(entry) = header.files.get(path) else {
						return Ok(None);
					};
					let fetched = self.fetch_bytes(&header, path.to_string(), entry.as_range()).await?;
					Ok(Some(TileResponse {
						bytes: fetched.blob.clone(),
						cache_control: fetched.cache_control.clone(),
						expires: fetched.expires.clone(),
					}))
				}
				.boxed()
			})
			.await
	}

	pub async fn get_resource_cancellable(&self, path: &str, cancel: &CancellationToken) -> Result<Option<TileResponse>> {
		tokio::select! {
			biased;
			result = self.get_resource(path) => result,
			() = cancel.cancelled() => Err(PackageError::Cancelled.into()),
		}
	}

	/// The decoded `p12/metadata.json` of a vector package, augmented with
	/// the package name. `None` for packages without metadata.
	pub async fn get_metadata(&self) -> Result<Option<Value>> {
		self
			.with_retry(move |header| {
				async move {
					let Some(range) = header.metadata_range else {
						return Ok(None);
					};
					let fetched = self.fetch_bytes(&header, "p12/metadata.json".to_string(), range).await?;
					let mut value: Value =
						serde_json::from_slice(fetched.blob.as_slice()).context("metadata.json is not valid JSON")?;
					if let Value::Object(map) = &mut value {
						map.insert("name".to_string(), Value::String(header.name.clone()));
					}
					Ok(Some(value))
				}
				.boxed()
			})
			.await
	}

	/// Runs `op` against the (lazily built) header, recovering exactly once
	/// from an ETag mismatch by reloading the header. A second mismatch
	/// propagates.
	async fn with_retry<'a, T, F>(&'a self, op: F) -> Result<T>
	where
		F: Fn(Arc<PackageHeader>) -> BoxFuture<'a, Result<T>>,
	{
		let mut attempt = 0;
		loop {
			let (generation, header) = self.header_attempt().await;
			let result = match header {
				Ok(header) => op(header).await,
				Err(err) => Err(err),
			};
			match result {
				Err(err) if is_etag_mismatch(&err) && attempt == 0 => {
					log::debug!("archive '{}' changed, reloading header: {err:#}", self.reader.name());
					self.cache.invalidate_header(generation);
					self.reader.invalidate();
					attempt += 1;
				}
				other => return other,
			}
		}
	}

	async fn header_attempt(&self) -> (u64, Result<Arc<PackageHeader>>) {
		let reader = self.reader.clone();
		let coverage_check = self.config.coverage_check;
		let (result, generation) = self
			.cache
			.get_header(move || {
				async move {
					let header = PackageHeader::from_reader(&reader, coverage_check).await?;
					log::debug!(
						"opened {:?} '{}' z{}..z{}, {} files",
						header.kind,
						header.name,
						header.min_zoom,
						header.max_zoom,
						header.files.len()
					);
					Ok(Arc::new(header))
				}
				.boxed()
			})
			.await;
		(generation, result)
	}

	async fn get_tile_inner(&self, header: Arc<PackageHeader>, coord: &TileCoord) -> Result<Option<TileResponse>> {
		if coord.level < header.min_zoom || coord.level > header.max_zoom || !coord.is_valid() {
			return Ok(None);
		}

		if let Some(response) = self.read_bundled_tile(&header, coord).await? {
			return Ok(Some(response));
		}

		if !header.is_indexed_vtpk() {
			return Ok(None);
		}
		self.subdivide_from_ancestor(&header, coord).await
	}

	/// Direct lookup: bundle file → cached directory → tile slab →
	/// decompression. `None` when the bundle or the entry is absent.
	async fn read_bundled_tile(&self, header: &Arc<PackageHeader>, coord: &TileCoord) -> Result<Option<TileResponse>> {
		let path = bundle_path(header.bundle_prefix(), coord);
		let Some(entry) = header.files.get(&path).copied() else {
			return Ok(None);
		};

		let directory = self.bundle_directory(header, &path, &entry).await?;
		let Some(tile_range) = directory.get(coord.x, coord.y) else {
			return Ok(None);
		};

		let slab_range = tile_range.get_shifted_forward(entry.payload_offset);
		let slab_key = format!("{path}@{}+{}", tile_range.offset, tile_range.length);
		let fetched = self.fetch_bytes(header, slab_key, slab_range).await?;

		let bytes = decompress(fetched.blob.clone(), &header.tile_compression)
			.with_context(|| format!("failed to decompress tile {coord:?}"))?;
		Ok(Some(TileResponse {
			bytes,
			cache_control: fetched.cache_control.clone(),
			expires: fetched.expires.clone(),
		}))
	}

	/// The decoded 128×128 directory of one bundle, shared via the cache.
	async fn bundle_directory(
		&self,
		header: &Arc<PackageHeader>,
		path: &str,
		entry: &FileEntry,
	) -> Result<Arc<BundleDirectory>> {
		if entry.size < BUNDLE_HEADER_LENGTH + BUNDLE_INDEX_LENGTH {
			return Err(
				PackageError::MalformedArchive(format!("bundle '{path}' is too small ({} bytes)", entry.size)).into(),
			);
		}

		let key = SlotKey {
			etag: header.etag.clone().unwrap_or_default(),
			path: path.to_string(),
			kind: SlotKind::TileIndex,
		};
		let reader = self.reader.clone();
		let expected_etag = header.etag.clone();
		let index_range = ByteRange::new(entry.payload_offset + BUNDLE_HEADER_LENGTH, BUNDLE_INDEX_LENGTH);

		let entry = self
			.cache
			.fetch(key, move || {
				async move {
					let response = reader.read_range(&index_range).await?;
					check_etag(&expected_etag, &response.etag)?;
					Ok(CacheEntry::TileIndex(Arc::new(BundleDirectory::from_blob(&response.blob)?)))
				}
				.boxed()
			})
			.await?;

		match entry {
			CacheEntry::TileIndex(directory) => Ok(directory),
			CacheEntry::Bytes(_) => Err(anyhow!("cache returned the wrong entry kind for '{path}'")),
		}
	}

	/// A byte fetch deduplicated and cached under the resource store.
	async fn fetch_bytes(&self, header: &Arc<PackageHeader>, path_key: String, range: ByteRange) -> Result<Arc<FetchedBlob>> {
		let key = SlotKey {
			etag: header.etag.clone().unwrap_or_default(),
			path: path_key.clone(),
			kind: SlotKind::Resource,
		};
		let reader = self.reader.clone();
		let expected_etag = header.etag.clone();

		let entry = self
			.cache
			.fetch(key, move || {
				async move {
					let response = reader.read_range(&range).await?;
					check_etag(&expected_etag, &response.etag)?;
					Ok(CacheEntry::Bytes(Arc::new(FetchedBlob {
						blob: response.blob,
						cache_control: response.cache_control,
						expires: response.expires,
					})))
				}
				.boxed()
			})
			.await?;

		match entry {
			CacheEntry::Bytes(fetched) => Ok(fetched),
			CacheEntry::TileIndex(_) => Err(anyhow!("cache returned the wrong entry kind for '{path_key}'")),
		}
	}

	/// Overzoom: find the nearest materialized ancestor, fetch its tile and
	/// subdivide it into the requested coordinate. Failures other than
	/// containment bugs degrade to "no data".
	async fn subdivide_from_ancestor(&self, header: &Arc<PackageHeader>, coord: &TileCoord) -> Result<Option<TileResponse>> {
		let Some(coverage) = header.coverage.as_ref() else {
			return Ok(None);
		};
		let Some(parent) = coverage.find_ancestor(coord, header.min_zoom) else {
			return Ok(None);
		};

		let dz = coord.level - parent.level;
		if dz > self.config.max_dz {
			log::debug!("not synthesizing {coord:?}: ancestor {parent:?} is {dz} levels up (cap {})", self.config.max_dz);
			return Ok(None);
		}

		if let Some(bytes) = self.cache.get_subdivided(coord) {
			return Ok(Some(TileResponse {
				bytes,
				cache_control: None,
				expires: None,
			}));
		}

		let Some(parent_tile) = self.read_bundled_tile(header, &parent).await? else {
			log::debug!("coverage lists {parent:?} but its bundle has no tile");
			return Ok(None);
		};

		match subdivide_tile(&parent_tile.bytes, &parent, coord, &self.subdivide_options) {
			Ok(bytes) => {
				self.cache.insert_subdivided(*coord, bytes.clone());
				Ok(Some(TileResponse {
					bytes,
					cache_control: parent_tile.cache_control,
					expires: parent_tile.expires,
				}))
			}
			Err(err) if is_containment_violation(&err) => Err(err),
			Err(err) => {
				log::warn!("subdividing {coord:?} from {parent:?} failed, serving no data: {err:#}");
				Ok(None)
			}
		}
	}
}

fn check_etag(expected: &Option<String>, found: &Option<String>) -> Result<()> {
	if let (Some(expected), Some(found)) = (expected, found) {
		if expected != found {
			return Err(PackageError::EtagMismatch {
				expected: expected.clone(),
				found: found.clone(),
			}
			.into());
		}
	}
	Ok(())
}
