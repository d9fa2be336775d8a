//! A vector tile layer: name, extent, features and property tables.
//!
//! Wire format (MVT layer message):
//!  * field 1: `name` (string)
//!  * field 2: repeated `feature`
//!  * field 3: repeated `keys` (string)
//!  * field 4: repeated `values` (message)
//!  * field 5: `extent` (varint, default 4096)
//!  * field 15: `version` (varint, default 1)

use super::{feature::VectorTileFeature, value::TileValue};
use crate::io::{ValueReaderSlice, ValueWriterBlob};
use crate::types::Blob;
use anyhow::{anyhow, bail, Context, Result};

pub const DEFAULT_EXTENT: u32 = 4096;

#[derive(Clone, Debug, PartialEq)]
pub struct VectorTileLayer {
	pub name: String,
	pub extent: u32,
	pub version: u32,
	pub features: Vec<VectorTileFeature>,
	/// Key table; features reference entries via even `tag_ids`.
	pub keys: Vec<String>,
	/// Value table; features reference entries via odd `tag_ids`.
	pub values: Vec<TileValue>,
}

impl VectorTileLayer {
	pub fn new(name: String) -> VectorTileLayer {
		VectorTileLayer {
			name,
			extent: DEFAULT_EXTENT,
			version: 1,
			features: Vec::new(),
			keys: Vec::new(),
			values: Vec::new(),
		}
	}

	pub fn read(reader: &mut ValueReaderSlice) -> Result<VectorTileLayer> {
		let mut name = None;
		let mut extent = DEFAULT_EXTENT;
		let mut version = 1;
		let mut features = Vec::new();
		let mut keys = Vec::new();
		let mut values = Vec::new();

		while reader.has_remaining() {
			match reader.read_pbf_key().context("failed to read PBF key")? {
				(1, 2) => name = Some(reader.read_pbf_string().context("failed to read layer name")?),
				(2, 2) => {
					let mut sub = reader.pbf_sub_reader().context("failed to read feature message")?;
					features.push(VectorTileFeature::read(&mut sub).context("failed to read feature")?);
				}
				(3, 2) => keys.push(reader.read_pbf_string().context("failed to read key")?),
				(4, 2) => {
					let mut sub = reader.pbf_sub_reader().context("failed to read value message")?;
					values.push(TileValue::read(&mut sub).context("failed to read value")?);
				}
				(5, 0) => extent = u32::try_from(reader.read_varint().context("failed to read extent")?)?,
				(15, 0) => version = u32::try_from(reader.read_varint().context("failed to read version")?)?,
				(f, w) => bail!("unexpected field number ({f}) / wire type ({w}) in layer"),
			}
		}

		Ok(VectorTileLayer {
			name: name.ok_or_else(|| anyhow!("layer has no name"))?,
			extent,
			version,
			features,
			keys,
			values,
		})
	}

	pub fn to_blob(&self) -> Result<Blob> {
		let mut writer = ValueWriterBlob::new();

		writer.write_pbf_key(1, 2)?;
		writer.write_pbf_string(&self.name)?;

		for feature in &self.features {
			writer.write_pbf_key(2, 2)?;
			writer.write_pbf_blob(&feature.to_blob().context("failed to encode feature")?)?;
		}

		for key in &self.keys {
			writer.write_pbf_key(3, 2)?;
			writer.write_pbf_string(key)?;
		}

		for value in &self.values {
			writer.write_pbf_key(4, 2)?;
			writer.write_pbf_blob(&value.to_blob().context("failed to encode value")?)?;
		}

		if self.extent != DEFAULT_EXTENT {
			writer.write_pbf_key(5, 0)?;
			writer.write_varint(u64::from(self.extent))?;
		}

		if self.version != 1 {
			writer.write_pbf_key(15, 0)?;
			writer.write_varint(u64::from(self.version))?;
		}

		Ok(writer.into_blob())
	}
}
