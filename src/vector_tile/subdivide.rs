//! Tile subdivision (overzoom): synthesize a high-zoom tile from an
//! ancestor's payload.
//!
//! The transform works in the *target* tile's integer coordinate frame:
//! with `dz = target.level - parent.level` and `scale = 2^dz`, every parent
//! coordinate maps to `p' = p·scale − offset`, where the offset selects the
//! target's quadrant. Downstream renderers therefore see the same extent
//! and buffer they would for a natively encoded tile, and jumping several
//! levels at once stays exact (uniform integer scaling, no accumulation).
//!
//! Clipping runs per axis against `[-buffer, extent+buffer]`:
//! * points survive only strictly inside the window,
//! * lines are clipped per segment and may fragment into several parts,
//! * polygon rings are clipped Sutherland–Hodgman style (one output ring
//!   per input ring, holes stay distinct rings) and re-closed.
//!
//! Properties and feature ids pass through verbatim; so do the layer's
//! key/value tables.

use super::{GeomType, VectorTile, VectorTileFeature, VectorTileLayer};
use crate::error::PackageError;
use crate::types::{Blob, TileCoord};
use crate::vector_tile::feature::GeometryParts;
use anyhow::{ensure, Result};

#[derive(Clone, Debug)]
pub struct SubdivideOptions {
	/// Clip window margin around the tile extent, in tile-extent units.
	pub buffer: i64,
	/// When set, only layers with these names are processed and kept.
	pub include_layers: Option<Vec<String>>,
	/// Zoom distances beyond this log a warning (but still subdivide).
	pub max_dz_warn: u8,
}

impl Default for SubdivideOptions {
	fn default() -> Self {
		SubdivideOptions {
			buffer: 128,
			include_layers: None,
			max_dz_warn: 4,
		}
	}
}

/// Builds the tile at `target` out of the MVT payload of `parent`.
///
/// Returns the input bytes unchanged when `target` and `parent` are the
/// same coordinate (or `target` is above `parent`). Fails with
/// `ContainmentViolation` when `target` does not lie underneath `parent`.
pub fn subdivide_tile(
	parent_bytes: &Blob,
	parent: &TileCoord,
	target: &TileCoord,
	options: &SubdivideOptions,
) -> Result<Blob> {
	if target.level <= parent.level {
		return Ok(parent_bytes.clone());
	}
	let dz = target.level - parent.level;

	if !target.is_descendant_of(parent) {
		return Err(PackageError::ContainmentViolation {
			parent: *parent,
			target: *target,
		}
		.into());
	}
	ensure!(dz <= 30, "zoom distance {dz} is out of range");

	if dz > options.max_dz_warn {
		log::warn!("subdividing across {dz} zoom levels ({parent:?} -> {target:?})");
	}

	let scale = 1i64 << dz;
	let tile = VectorTile::from_blob(parent_bytes)?;
	let mut layers = Vec::with_capacity(tile.layers.len());

	for layer in tile.layers {
		if let Some(include) = &options.include_layers {
			if !include.iter().any(|name| name == &layer.name) {
				continue;
			}
		}
		if let Some(clipped) = subdivide_layer(layer, scale, target, parent, options.buffer)? {
			layers.push(clipped);
		}
	}

	VectorTile::new(layers).to_blob()
}

fn subdivide_layer(
	layer: VectorTileLayer,
	scale: i64,
	target: &TileCoord,
	parent: &TileCoord,
	buffer: i64,
) -> Result<Option<VectorTileLayer>> {
	let extent = i64::from(layer.extent);
	if layer.extent != super::layer::DEFAULT_EXTENT {
		log::debug!("layer '{}' uses a non-standard extent of {}", layer.name, layer.extent);
	}

	let offset = [
		(i64::from(target.x) - i64::from(parent.x) * scale) * extent,
		(i64::from(target.y) - i64::from(parent.y) * scale) * extent,
	];
	let min = -buffer;
	let max = extent + buffer;

	let mut features = Vec::new();
	for feature in &layer.features {
		let mut parts = feature.geometry()?;
		for part in &mut parts {
			for point in part.iter_mut() {
				point[0] = point[0] * scale - offset[0];
				point[1] = point[1] * scale - offset[1];
			}
		}

		let clipped = match feature.geom_type {
			GeomType::Point => clip_points(parts, min, max),
			GeomType::LineString => clip_lines(clip_lines(parts, 0, min, max), 1, min, max),
			GeomType::Polygon => clip_rings(parts, min, max),
			GeomType::Unknown => {
				log::debug!("dropping feature with unknown geometry type in layer '{}'", layer.name);
				Vec::new()
			}
		};

		if clipped.is_empty() {
			continue;
		}
		features.push(VectorTileFeature::from_geometry(
			feature.id,
			feature.tag_ids.clone(),
			feature.geom_type,
			&clipped,
		)?);
	}

	if features.is_empty() {
		return Ok(None);
	}
	Ok(Some(VectorTileLayer { features, ..layer }))
}

/// Where the segment `a -> b` crosses `axis == bound`.
fn intersect(a: [i64; 2], b: [i64; 2], axis: usize, bound: i64) -> [i64; 2] {
	let other = 1 - axis;
	let t = (bound - a[axis]) as f64 / (b[axis] - a[axis]) as f64;
	let mut point = [0i64; 2];
	point[axis] = bound;
	point[other] = (a[other] as f64 + t * (b[other] - a[other]) as f64).round() as i64;
	point
}

/// Points survive only strictly inside the window on both axes.
fn clip_points(parts: GeometryParts, min: i64, max: i64) -> GeometryParts {
	parts
		.into_iter()
		.flatten()
		.filter(|p| p[0] > min && p[0] < max && p[1] > min && p[1] < max)
		.map(|p| vec![p])
		.collect()
}

/// Per-segment clip of line strings against one axis; exits split the line
/// into separate parts.
fn clip_lines(parts: GeometryParts, axis: usize, min: i64, max: i64) -> GeometryParts {
	let mut out: GeometryParts = Vec::new();

	let flush = |current: &mut Vec<[i64; 2]>, out: &mut GeometryParts| {
		if current.len() >= 2 {
			out.push(std::mem::take(current));
		} else {
			current.clear();
		}
	};

	for part in parts {
		let mut current: Vec<[i64; 2]> = Vec::new();
		for segment in part.windows(2) {
			let (a, b) = (segment[0], segment[1]);
			if (a[axis] < min && b[axis] < min) || (a[axis] > max && b[axis] > max) {
				flush(&mut current, &mut out);
				continue;
			}

			let ca = clamp_to_window(a, b, axis, min, max);
			let cb = clamp_to_window(b, a, axis, min, max);

			match current.last() {
				Some(last) if *last == ca => (),
				Some(_) => {
					flush(&mut current, &mut out);
					current.push(ca);
				}
				None => current.push(ca),
			}
			current.push(cb);

			// The segment left the window: end this slice.
			if cb != b {
				flush(&mut current, &mut out);
			}
		}
		flush(&mut current, &mut out);
	}

	out
}

/// Moves `point` onto the window boundary along the segment to `towards`
/// when it lies outside on `axis`.
fn clamp_to_window(point: [i64; 2], towards: [i64; 2], axis: usize, min: i64, max: i64) -> [i64; 2] {
	if point[axis] < min {
		intersect(point, towards, axis, min)
	} else if point[axis] > max {
		intersect(point, towards, axis, max)
	} else {
		point
	}
}

/// Sutherland–Hodgman clip of polygon rings: one pass per window edge,
/// each input ring stays a single output ring, re-closed at the end.
fn clip_rings(parts: GeometryParts, min: i64, max: i64) -> GeometryParts {
	let mut out = Vec::new();

	for ring in parts {
		// Work on the open form; the closing point is restored afterwards.
		let mut points = ring;
		if points.len() >= 2 && points.first() == points.last() {
			points.pop();
		}

		for (axis, bound, keep_greater) in [(0, min, true), (0, max, false), (1, min, true), (1, max, false)] {
			points = clip_ring_edge(&points, axis, bound, keep_greater);
			if points.is_empty() {
				break;
			}
		}

		if points.len() < 3 {
			continue;
		}
		if points.first() != points.last() {
			points.push(points[0]);
		}
		out.push(points);
	}

	out
}

fn clip_ring_edge(points: &[[i64; 2]], axis: usize, bound: i64, keep_greater: bool) -> Vec<[i64; 2]> {
	let inside = |p: &[i64; 2]| {
		if keep_greater {
			p[axis] >= bound
		} else {
			p[axis] <= bound
		}
	};

	let mut out: Vec<[i64; 2]> = Vec::new();
	let mut push = |p: [i64; 2], out: &mut Vec<[i64; 2]>| {
		if out.last() != Some(&p) {
			out.push(p);
		}
	};

	for i in 0..points.len() {
		let current = points[i];
		let next = points[(i + 1) % points.len()];
		if inside(&current) {
			push(current, &mut out);
			if !inside(&next) {
				push(intersect(current, next, axis, bound), &mut out);
			}
		} else if inside(&next) {
			push(intersect(current, next, axis, bound), &mut out);
		}
	}

	// The wrap-around edge can duplicate the first point at the end.
	if out.len() >= 2 && out.first() == out.last() {
		out.pop();
	}

	out
}
