//! The top-level vector tile message: a list of layers.

use super::layer::VectorTileLayer;
use crate::io::{ValueReaderSlice, ValueWriterBlob};
use crate::types::Blob;
use anyhow::{bail, Context, Result};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VectorTile {
	pub layers: Vec<VectorTileLayer>,
}

impl VectorTile {
	pub fn new(layers: Vec<VectorTileLayer>) -> VectorTile {
		VectorTile { layers }
	}

	pub fn from_blob(blob: &Blob) -> Result<VectorTile> {
		let mut reader = ValueReaderSlice::new(blob.as_slice());

		let mut tile = VectorTile::default();
		while reader.has_remaining() {
			match reader.read_pbf_key().context("failed to read PBF key")? {
				(3, 2) => {
					let mut sub = reader.pbf_sub_reader().context("failed to read layer message")?;
					tile
						.layers
						.push(VectorTileLayer::read(&mut sub).context("failed to read layer")?);
				}
				(f, w) => bail!("unexpected field number ({f}) / wire type ({w}) in tile"),
			}
		}

		Ok(tile)
	}

	pub fn to_blob(&self) -> Result<Blob> {
		let mut writer = ValueWriterBlob::new();
		for layer in &self.layers {
			writer.write_pbf_key(3, 2)?;
			writer.write_pbf_blob(&layer.to_blob().context("failed to encode layer")?)?;
		}
		Ok(writer.into_blob())
	}

	pub fn find_layer(&self, name: &str) -> Option<&VectorTileLayer> {
		self.layers.iter().find(|layer| layer.name == name)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::vector_tile::{GeomType, TileValue, VectorTileFeature};

	#[test]
	fn round_trip() -> Result<()> {
		let mut layer = VectorTileLayer::new("water".to_string());
		layer.keys = vec!["kind".to_string()];
		layer.values = vec![TileValue::String("ocean".to_string())];
		layer.features.push(VectorTileFeature::from_geometry(
			None,
			vec![0, 0],
			GeomType::Polygon,
			&vec![vec![[0, 0], [4096, 0], [4096, 4096], [0, 4096], [0, 0]]],
		)?);
		let tile = VectorTile::new(vec![layer]);

		let blob = tile.to_blob()?;
		let decoded = VectorTile::from_blob(&blob)?;
		assert_eq!(decoded, tile);
		assert!(decoded.find_layer("water").is_some());
		assert!(decoded.find_layer("roads").is_none());
		Ok(())
	}

	#[test]
	fn garbage_fails() {
		assert!(VectorTile::from_blob(&Blob::from(&[0xFFu8, 0xFF])).is_err());
	}
}
