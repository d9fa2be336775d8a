//! Process-local cache with shared in-flight slots.
//!
//! Every slot holds the *pending work* (a [`Shared`] future of a spawned
//! task), not just its product: concurrent callers for the same key attach
//! to one load instead of re-issuing it, and a caller that goes away leaves
//! the load running for everyone else. Three sub-stores exist:
//!
//! * one header slot (invalidated as a whole on an ETag mismatch, with a
//!   generation counter so concurrent invalidations coalesce onto a single
//!   refresh),
//! * a keyed resource/tile-index store with recency-based single eviction
//!   at capacity. Keys carry the archive ETag, so entries of a stale
//!   archive version simply become unreachable,
//! * a subdivided-tile byte store without per-entry bookkeeping that drops
//!   the first half of its entries in iteration order beyond `2×` capacity.

use super::header::PackageHeader;
use crate::error::PackageError;
use crate::types::{Blob, TileCoord};
use anyhow::{anyhow, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Cloneable error for shared futures; re-surfaces the typed kind on the
/// way back into `anyhow`.
#[derive(Clone, Debug)]
pub struct SlotError(Arc<anyhow::Error>);

impl SlotError {
	fn new(err: anyhow::Error) -> SlotError {
		SlotError(Arc::new(err))
	}

	fn to_anyhow(&self) -> anyhow::Error {
		match self.0.downcast_ref::<PackageError>() {
			Some(typed) => typed.clone().into(),
			None => anyhow!("{:#}", self.0),
		}
	}
}

type SlotFuture<T> = Shared<BoxFuture<'static, Result<T, SlotError>>>;

/// Spawns `work` on the runtime and wraps it into a shareable slot future.
/// The spawned task keeps running even if every waiter is cancelled, so a
/// completed load always lands in the cache.
fn spawn_slot<T>(work: BoxFuture<'static, Result<T>>) -> SlotFuture<T>
where
	T: Clone + Send + 'static,
{
	let handle = tokio::spawn(work);
	async move {
		match handle.await {
			Ok(result) => result.map_err(SlotError::new),
			Err(join_error) => Err(SlotError::new(anyhow!("cache load task failed: {join_error}"))),
		}
	}
	.boxed()
	.shared()
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SlotKind {
	Resource,
	TileIndex,
}

/// Key of the resource/tile-index store. The ETag pins the archive version
/// the entry was read from.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SlotKey {
	pub etag: String,
	pub path: String,
	pub kind: SlotKind,
}

/// Bytes of a fetched archive member plus the freshness headers observed
/// on the read.
#[derive(Clone, Debug, Default)]
pub struct FetchedBlob {
	pub blob: Blob,
	pub cache_control: Option<String>,
	pub expires: Option<String>,
}

/// What a slot resolves to.
#[derive(Clone, Debug)]
pub enum CacheEntry {
	Bytes(Arc<FetchedBlob>),
	TileIndex(Arc<crate::archive::BundleDirectory>),
}

struct Slot {
	future: SlotFuture<CacheEntry>,
	last_used: u64,
}

struct HeaderSlot {
	future: SlotFuture<Arc<PackageHeader>>,
	generation: u64,
}

pub struct PackageCache {
	max_entries: usize,
	header: Mutex<HeaderState>,
	slots: Mutex<SlotMap>,
	subdivided: Mutex<HashMap<TileCoord, Blob>>,
}

#[derive(Default)]
struct HeaderState {
	slot: Option<HeaderSlot>,
	generation: u64,
}

#[derive(Default)]
struct SlotMap {
	map: HashMap<SlotKey, Slot>,
	counter: u64,
}

impl PackageCache {
	pub fn new(max_entries: usize) -> PackageCache {
		PackageCache {
			max_entries: max_entries.max(1),
			header: Mutex::new(HeaderState::default()),
			slots: Mutex::new(SlotMap::default()),
			subdivided: Mutex::new(HashMap::new()),
		}
	}

	/// The shared header load, together with its generation for later
	/// invalidation. `make` runs only when no load is in flight.
	fn header_slot<F>(&self, make: F) -> (SlotFuture<Arc<PackageHeader>>, u64)
	where
		F: FnOnce() -> BoxFuture<'static, Result<Arc<PackageHeader>>>,
	{
		let mut state = self.header.lock().unwrap();
		if let Some(slot) = &state.slot {
			return (slot.future.clone(), slot.generation);
		}
		let future = spawn_slot(make());
		state.generation += 1;
		let generation = state.generation;
		state.slot = Some(HeaderSlot {
			future: future.clone(),
			generation,
		});
		(future, generation)
	}

	/// Awaits the header load; failed loads leave no poisoned slot behind.
	pub async fn get_header<F>(&self, make: F) -> (Result<Arc<PackageHeader>>, u64)
	where
		F: FnOnce() -> BoxFuture<'static, Result<Arc<PackageHeader>>>,
	{
		let (future, generation) = self.header_slot(make);
		match future.await {
			Ok(header) => (Ok(header), generation),
			Err(err) => {
				self.invalidate_header(generation);
				(Err(err.to_anyhow()), generation)
			}
		}
	}

	/// Drops the header slot of the given generation. A later generation
	/// means someone already refreshed: the call coalesces into a no-op.
	pub fn invalidate_header(&self, generation: u64) {
		let mut state = self.header.lock().unwrap();
		if state.slot.as_ref().is_some_and(|slot| slot.generation == generation) {
			state.slot = None;
		}
	}

	/// Fetches through the resource/tile-index store. Concurrent calls for
	/// the same key share one in-flight load; failures evict the slot so
	/// later calls retry.
	pub async fn fetch<F>(&self, key: SlotKey, make: F) -> Result<CacheEntry>
	where
		F: FnOnce() -> BoxFuture<'static, Result<CacheEntry>>,
	{
		let future = {
			let mut slots = self.slots.lock().unwrap();
			slots.counter += 1;
			let counter = slots.counter;

			if let Some(slot) = slots.map.get_mut(&key) {
				slot.last_used = counter;
				slot.future.clone()
			} else {
				if slots.map.len() >= self.max_entries {
					evict_least_recently_used(&mut slots.map);
				}
				let future = spawn_slot(make());
				slots.map.insert(
					key.clone(),
					Slot {
						future: future.clone(),
						last_used: counter,
					},
				);
				future
			}
		};

		match future.clone().await {
			Ok(entry) => Ok(entry),
			Err(err) => {
				let mut slots = self.slots.lock().unwrap();
				if let Some(slot) = slots.map.get(&key) {
					if Shared::ptr_eq(&slot.future, &future) {
						slots.map.remove(&key);
					}
				}
				Err(err.to_anyhow())
			}
		}
	}

	pub fn get_subdivided(&self, coord: &TileCoord) -> Option<Blob> {
		self.subdivided.lock().unwrap().get(coord).cloned()
	}

	pub fn insert_subdivided(&self, coord: TileCoord, bytes: Blob) {
		let mut store = self.subdivided.lock().unwrap();
		if store.len() >= 2 * self.max_entries {
			let victims: Vec<TileCoord> = store.keys().take(store.len() / 2).copied().collect();
			for victim in victims {
				store.remove(&victim);
			}
		}
		store.insert(coord, bytes);
	}

	#[cfg(test)]
	pub fn slot_count(&self) -> usize {
		self.slots.lock().unwrap().map.len()
	}

	#[cfg(test)]
	pub fn subdivided_count(&self) -> usize {
		self.subdivided.lock().unwrap().len()
	}
}

fn evict_least_recently_used(map: &mut HashMap<SlotKey, Slot>) {
	if let Some(victim) = map
		.iter()
		.min_by_key(|(_, slot)| slot.last_used)
		.map(|(key, _)| key.clone())
	{
		map.remove(&victim);
	}
}

impl std::fmt::Debug for PackageCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PackageCache")
			.field("max_entries", &self.max_entries)
			.field("slots", &self.slots.lock().unwrap().map.len())
			.field("subdivided", &self.subdivided.lock().unwrap().len())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	fn key(path: &str) -> SlotKey {
		SlotKey {
			etag: String::new(),
			path: path.to_string(),
			kind: SlotKind::Resource,
		}
	}

	fn bytes_entry(data: &[u8]) -> CacheEntry {
		CacheEntry::Bytes(Arc::new(FetchedBlob {
			blob: Blob::from(data),
			..Default::default()
		}))
	}

	#[tokio::test]
	async fn concurrent_fetches_share_one_load() -> Result<()> {
		let cache = Arc::new(PackageCache::new(10));
		let loads = Arc::new(AtomicUsize::new(0));

		let mut handles = Vec::new();
		for _ in 0..20 {
			let cache = cache.clone();
			let loads = loads.clone();
			handles.push(tokio::spawn(async move {
				cache
					.fetch(key("shared"), move || {
						async move {
							loads.fetch_add(1, Ordering::SeqCst);
							tokio::time::sleep(Duration::from_millis(20)).await;
							Ok(bytes_entry(b"payload"))
						}
						.boxed()
					})
					.await
			}));
		}
		for handle in handles {
			let entry = handle.await??;
			match entry {
				CacheEntry::Bytes(fetched) => assert_eq!(fetched.blob.as_slice(), b"payload"),
				CacheEntry::TileIndex(_) => panic!("wrong entry kind"),
			}
		}
		assert_eq!(loads.load(Ordering::SeqCst), 1);
		Ok(())
	}

	#[tokio::test]
	async fn failed_loads_are_not_poisoned() -> Result<()> {
		let cache = PackageCache::new(10);
		let attempts = AtomicUsize::new(0);

		let result = cache
			.fetch(key("flaky"), || {
				attempts.fetch_add(1, Ordering::SeqCst);
				async { Err(anyhow!("transient")) }.boxed()
			})
			.await;
		assert!(result.is_err());
		assert_eq!(cache.slot_count(), 0);

		let result = cache
			.fetch(key("flaky"), || {
				attempts.fetch_add(1, Ordering::SeqCst);
				async { Ok(bytes_entry(b"ok")) }.boxed()
			})
			.await;
		assert!(result.is_ok());
		assert_eq!(attempts.load(Ordering::SeqCst), 2);
		Ok(())
	}

	#[tokio::test]
	async fn capacity_evicts_the_least_recently_used_slot() -> Result<()> {
		let cache = PackageCache::new(3);
		for name in ["a", "b", "c"] {
			cache
				.fetch(key(name), || async { Ok(bytes_entry(b"x")) }.boxed())
				.await?;
		}
		// Touch "a" so "b" is now the oldest.
		cache
			.fetch(key("a"), || async { panic!("must be cached") }.boxed())
			.await?;
		cache
			.fetch(key("d"), || async { Ok(bytes_entry(b"x")) }.boxed())
			.await?;
		assert_eq!(cache.slot_count(), 3);

		// "b" must reload, "a" must not.
		let reloaded = AtomicUsize::new(0);
		cache
			.fetch(key("b"), || {
				reloaded.fetch_add(1, Ordering::SeqCst);
				async { Ok(bytes_entry(b"x")) }.boxed()
			})
			.await?;
		assert_eq!(reloaded.load(Ordering::SeqCst), 1);
		Ok(())
	}

	#[tokio::test]
	async fn cancelled_waiter_does_not_abort_the_load() -> Result<()> {
		let cache = Arc::new(PackageCache::new(10));
		let loads = Arc::new(AtomicUsize::new(0));

		let loads_inner = loads.clone();
		let waiter = {
			let cache = cache.clone();
			tokio::spawn(async move {
				cache
					.fetch(key("slow"), move || {
						async move {
							loads_inner.fetch_add(1, Ordering::SeqCst);
							tokio::time::sleep(Duration::from_millis(30)).await;
							Ok(bytes_entry(b"done"))
						}
						.boxed()
					})
					.await
			})
		};
		tokio::time::sleep(Duration::from_millis(5)).await;
		waiter.abort();
		let _ = waiter.await;

		// The spawned load finished and stayed cached.
		tokio::time::sleep(Duration::from_millis(50)).await;
		let entry = cache
			.fetch(key("slow"), || async { panic!("must be cached") }.boxed())
			.await?;
		match entry {
			CacheEntry::Bytes(fetched) => assert_eq!(fetched.blob.as_slice(), b"done"),
			CacheEntry::TileIndex(_) => panic!("wrong entry kind"),
		}
		assert_eq!(loads.load(Ordering::SeqCst), 1);
		Ok(())
	}

	#[tokio::test]
	async fn header_invalidation_coalesces_by_generation() {
		let cache = PackageCache::new(10);
		let loads = Arc::new(AtomicUsize::new(0));

		let make = |loads: Arc<AtomicUsize>| {
			move || {
				async move {
					loads.fetch_add(1, Ordering::SeqCst);
					Err(anyhow!("load failed"))
				}
				.boxed()
			}
		};

		let (result, generation) = cache.get_header(make(loads.clone())).await;
		assert!(result.is_err());
		assert_eq!(loads.load(Ordering::SeqCst), 1);

		// Invalidating the observed generation twice only clears once; a
		// stale invalidation after a refresh is a no-op.
		cache.invalidate_header(generation);
		let (_, second_generation) = cache.get_header(make(loads.clone())).await;
		assert_ne!(generation, second_generation);
		cache.invalidate_header(generation); // stale, ignored
		assert_eq!(loads.load(Ordering::SeqCst), 2);
	}

	#[test]
	fn subdivided_store_halves_beyond_twice_capacity() {
		let cache = PackageCache::new(4);
		for i in 0..8 {
			cache.insert_subdivided(TileCoord::new(10, i, 0).unwrap(), Blob::from("x"));
		}
		assert_eq!(cache.subdivided_count(), 8);
		cache.insert_subdivided(TileCoord::new(10, 8, 0).unwrap(), Blob::from("x"));
		assert_eq!(cache.subdivided_count(), 5);
	}
}
