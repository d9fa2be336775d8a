//! The random-access byte source contract.

use crate::types::{Blob, ByteRange};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// Shared handle to a byte source; readers are used concurrently by the
/// cache's spawned loads.
pub type DataReader = Arc<dyn DataReaderTrait>;

/// The result of one range read: the bytes plus whatever freshness headers
/// the origin attached. Local files leave the options empty.
#[derive(Clone, Debug, Default)]
pub struct RangeResponse {
	pub blob: Blob,
	/// Strong validator of the archive version (weak `W/` prefixes are
	/// already stripped by the HTTP reader).
	pub etag: Option<String>,
	pub cache_control: Option<String>,
	pub expires: Option<String>,
}

impl RangeResponse {
	pub fn from_blob(blob: Blob) -> RangeResponse {
		RangeResponse {
			blob,
			..Default::default()
		}
	}
}

/// A source of random-access byte ranges with a known total size.
///
/// Implementations must tolerate overlapping concurrent reads.
#[async_trait]
pub trait DataReaderTrait: Debug + Send + Sync {
	/// Reads exactly `range.length` bytes starting at `range.offset`.
	async fn read_range(&self, range: &ByteRange) -> Result<RangeResponse>;

	/// Total size of the underlying archive in bytes.
	fn size(&self) -> u64;

	/// A human-readable identifier (path or URL) used in errors and as the
	/// archive key for dispatching on the package flavor.
	fn name(&self) -> &str;

	/// Marks the source as possibly stale. HTTP readers start requesting
	/// uncached data; local sources ignore this.
	fn invalidate(&self) {}
}
