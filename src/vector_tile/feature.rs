//! A single vector tile feature: id, tag ids and the geometry command stream.

use super::geometry_type::GeomType;
use crate::io::{ValueReaderSlice, ValueWriterBlob};
use crate::types::Blob;
use anyhow::{bail, ensure, Context, Result};

/// Geometry is a list of parts; a part is a point run, a line string or a
/// polygon ring depending on the feature's [`GeomType`].
pub type GeometryParts = Vec<Vec<[i64; 2]>>;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VectorTileFeature {
	pub id: Option<u64>,
	/// Interleaved key/value indices into the layer's property tables.
	pub tag_ids: Vec<u32>,
	pub geom_type: GeomType,
	/// Raw MVT geometry command stream.
	pub geom_data: Blob,
}

impl VectorTileFeature {
	pub fn read(reader: &mut ValueReaderSlice) -> Result<VectorTileFeature> {
		let mut feature = VectorTileFeature::default();

		while reader.has_remaining() {
			match reader.read_pbf_key().context("failed to read PBF key")? {
				(1, 0) => feature.id = Some(reader.read_varint().context("failed to read feature id")?),
				(2, 2) => feature.tag_ids = reader.read_pbf_packed_uint32().context("failed to read tag ids")?,
				(3, 0) => feature.geom_type = GeomType::from(reader.read_varint().context("failed to read geometry type")?),
				(4, 2) => feature.geom_data = reader.read_pbf_blob().context("failed to read geometry data")?,
				(f, w) => bail!("unexpected field number ({f}) / wire type ({w}) in feature"),
			}
		}

		Ok(feature)
	}

	pub fn to_blob(&self) -> Result<Blob> {
		let mut writer = ValueWriterBlob::new();

		if let Some(id) = self.id {
			writer.write_pbf_key(1, 0)?;
			writer.write_varint(id)?;
		}
		if !self.tag_ids.is_empty() {
			writer.write_pbf_key(2, 2)?;
			writer.write_pbf_packed_uint32(&self.tag_ids)?;
		}
		writer.write_pbf_key(3, 0)?;
		writer.write_varint(self.geom_type.as_u64())?;
		if !self.geom_data.is_empty() {
			writer.write_pbf_key(4, 2)?;
			writer.write_pbf_blob(&self.geom_data)?;
		}

		Ok(writer.into_blob())
	}

	/// Decodes the command stream into geometry parts.
	///
	/// MoveTo opens a new part, LineTo extends it, ClosePath repeats the
	/// first point (rings come back explicitly closed).
	pub fn geometry(&self) -> Result<GeometryParts> {
		let mut reader = ValueReaderSlice::new(self.geom_data.as_slice());

		let mut parts: GeometryParts = Vec::new();
		let mut part: Vec<[i64; 2]> = Vec::new();
		let mut x = 0i64;
		let mut y = 0i64;

		while reader.has_remaining() {
			let value = reader.read_varint().context("failed to read geometry command")?;
			let command = value & 0x7;
			let count = value >> 3;

			match command {
				1 | 2 => {
					for _ in 0..count {
						if command == 1 && !part.is_empty() {
							parts.push(part);
							part = Vec::new();
						}
						x += reader.read_svarint().context("failed to read x delta")?;
						y += reader.read_svarint().context("failed to read y delta")?;
						part.push([x, y]);
					}
				}
				7 => {
					ensure!(!part.is_empty(), "ClosePath on an empty part");
					part.push(part[0]);
				}
				_ => bail!("unknown geometry command {command}"),
			}
		}

		if !part.is_empty() {
			parts.push(part);
		}

		Ok(parts)
	}

	/// Encodes geometry parts back into a feature, keeping `id` and
	/// `tag_ids` untouched.
	///
	/// For `Polygon`, parts are rings whose closing point (if present) is
	/// emitted as a ClosePath command.
	pub fn from_geometry(id: Option<u64>, tag_ids: Vec<u32>, geom_type: GeomType, parts: &GeometryParts) -> Result<VectorTileFeature> {
		let mut writer = ValueWriterBlob::new();
		let mut cursor = [0i64, 0i64];

		let mut write_point = |writer: &mut ValueWriterBlob, point: &[i64; 2]| -> Result<()> {
			writer.write_svarint(point[0] - cursor[0])?;
			writer.write_svarint(point[1] - cursor[1])?;
			cursor = *point;
			Ok(())
		};

		match geom_type {
			GeomType::Point => {
				let count: usize = parts.iter().map(Vec::len).sum();
				ensure!(count > 0, "point features must have at least one point");
				writer.write_varint((count as u64) << 3 | 0x1)?;
				for part in parts {
					for point in part {
						write_point(&mut writer, point)?;
					}
				}
			}
			GeomType::LineString => {
				for part in parts {
					ensure!(part.len() >= 2, "line parts must have at least two points");
					writer.write_varint(1 << 3 | 0x1)?;
					write_point(&mut writer, &part[0])?;
					writer.write_varint(((part.len() - 1) as u64) << 3 | 0x2)?;
					for point in &part[1..] {
						write_point(&mut writer, point)?;
					}
				}
			}
			GeomType::Polygon => {
				for part in parts {
					let closed = part.len() >= 2 && part.first() == part.last();
					let ring = if closed { &part[..part.len() - 1] } else { &part[..] };
					ensure!(ring.len() >= 3, "polygon rings must have at least three distinct points");
					writer.write_varint(1 << 3 | 0x1)?;
					write_point(&mut writer, &ring[0])?;
					writer.write_varint(((ring.len() - 1) as u64) << 3 | 0x2)?;
					for point in &ring[1..] {
						write_point(&mut writer, point)?;
					}
					writer.write_varint(7)?;
				}
			}
			GeomType::Unknown => bail!("cannot encode geometry of unknown type"),
		}

		Ok(VectorTileFeature {
			id,
			tag_ids,
			geom_type,
			geom_data: writer.into_blob(),
		})
	}
}
