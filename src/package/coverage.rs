//! Coverage lookup for sparse (indexed) vector pyramids.
//!
//! The tilemap document describes the materialized tiles as a quadtree: the
//! implicit root is tile (0,0,0), each non-scalar node has four children in
//! NW, NE, SW, SE order one level deeper, and a scalar leaf of `1` marks a
//! real tile (below which nothing deeper exists). The expansion stores one
//! sparse coordinate set per level; the only operation that matters
//! afterwards is "does (z,x,y) carry a 1?".

use crate::types::TileCoord;
use anyhow::{bail, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet, VecDeque};

#[derive(Clone, Debug, Default)]
pub struct CoverageMap {
	levels: BTreeMap<u8, HashSet<(u32, u32)>>,
}

impl CoverageMap {
	/// Expands the `index` field of a tilemap document, breadth-first.
	pub fn from_tilemap(document: &Value) -> Result<CoverageMap> {
		let Some(index) = document.get("index") else {
			bail!("tilemap document has no 'index' field");
		};

		let mut map = CoverageMap::default();
		let mut queue: VecDeque<(TileCoord, &Value)> = VecDeque::new();
		queue.push_back((TileCoord::new(0, 0, 0)?, index));

		while let Some((coord, node)) = queue.pop_front() {
			match node {
				Value::Array(children) => {
					if children.len() != 4 {
						bail!("tilemap node at {coord:?} has {} children, expected 4", children.len());
					}
					if coord.level >= 30 {
						bail!("tilemap recurses deeper than level 30");
					}
					// NW, NE, SW, SE
					let offsets = [(0u32, 0u32), (1, 0), (0, 1), (1, 1)];
					for ((dx, dy), child) in offsets.iter().zip(children) {
						queue.push_back((
							TileCoord::new(coord.level + 1, coord.x * 2 + dx, coord.y * 2 + dy)?,
							child,
						));
					}
				}
				Value::Number(value) => {
					if value.as_u64() == Some(1) {
						map.levels.entry(coord.level).or_default().insert((coord.x, coord.y));
					}
				}
				// The root's "blob" sentinel and anything else scalar: no
				// materialized tile at this coordinate.
				_ => (),
			}
		}

		Ok(map)
	}

	/// True if a real tile is materialized exactly at `coord`.
	pub fn has_tile(&self, coord: &TileCoord) -> bool {
		self
			.levels
			.get(&coord.level)
			.is_some_and(|level| level.contains(&(coord.x, coord.y)))
	}

	/// Walks up from `coord` and returns the nearest ancestor (strictly
	/// above) that carries a real tile, stopping at `min_zoom`.
	pub fn find_ancestor(&self, coord: &TileCoord, min_zoom: u8) -> Option<TileCoord> {
		let mut current = *coord;
		while let Some(parent) = current.parent() {
			if parent.level < min_zoom {
				return None;
			}
			if self.has_tile(&parent) {
				return Some(parent);
			}
			current = parent;
		}
		None
	}

	pub fn is_empty(&self) -> bool {
		self.levels.values().all(HashSet::is_empty)
	}

	/// Number of materialized tiles across all levels.
	pub fn count_tiles(&self) -> usize {
		self.levels.values().map(HashSet::len).sum()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn coord(level: u8, x: u32, y: u32) -> TileCoord {
		TileCoord::new(level, x, y).unwrap()
	}

	#[test]
	fn expands_nested_quadtree() -> Result<()> {
		// Root -> NE child (1,1,0) recurses -> its SW child (2,2,1) is a tile.
		let document = json!({
			"index": [0, [0, 0, 1, 0], 0, 1]
		});
		let map = CoverageMap::from_tilemap(&document)?;

		// Root children: NW (1,0,0)=0, NE (1,1,0)=[...], SW (1,0,1)=0, SE (1,1,1)=1.
		assert!(map.has_tile(&coord(1, 1, 1)));
		assert!(!map.has_tile(&coord(1, 0, 0)));
		assert!(!map.has_tile(&coord(1, 1, 0)));

		// NE children at level 2: (2,2,0), (2,3,0), (2,2,1), (2,3,1); SW is 1.
		assert!(map.has_tile(&coord(2, 2, 1)));
		assert!(!map.has_tile(&coord(2, 3, 0)));
		assert_eq!(map.count_tiles(), 2);
		Ok(())
	}

	#[test]
	fn ancestor_search_walks_up() -> Result<()> {
		let document = json!({ "index": [0, [0, 0, 1, 0], 0, 0] });
		let map = CoverageMap::from_tilemap(&document)?;

		// (2,2,1) is a tile; deep descendants resolve to it.
		assert_eq!(map.find_ancestor(&coord(5, 16, 8), 0), Some(coord(2, 2, 1)));
		assert_eq!(map.find_ancestor(&coord(3, 4, 2), 0), Some(coord(2, 2, 1)));
		// Not a descendant of any tile.
		assert_eq!(map.find_ancestor(&coord(5, 0, 0), 0), None);
		// min_zoom cuts the walk short.
		assert_eq!(map.find_ancestor(&coord(5, 16, 8), 3), None);
		Ok(())
	}

	#[test]
	fn ancestor_is_strictly_above() -> Result<()> {
		let document = json!({ "index": [1, 0, 0, 0] });
		let map = CoverageMap::from_tilemap(&document)?;
		// (1,0,0) itself is a tile; its ancestor search must not return itself.
		assert!(map.has_tile(&coord(1, 0, 0)));
		assert_eq!(map.find_ancestor(&coord(1, 0, 0), 0), None);
		assert_eq!(map.find_ancestor(&coord(2, 0, 0), 0), Some(coord(1, 0, 0)));
		Ok(())
	}

	#[test]
	fn malformed_nodes_fail() {
		assert!(CoverageMap::from_tilemap(&json!({})).is_err());
		assert!(CoverageMap::from_tilemap(&json!({ "index": [1, 0, 0] })).is_err());
	}

	#[test]
	fn root_blob_sentinel_is_not_a_tile() -> Result<()> {
		let map = CoverageMap::from_tilemap(&json!({ "index": "blob" }))?;
		assert!(map.is_empty());
		assert!(!map.has_tile(&coord(0, 0, 0)));
		Ok(())
	}
}
