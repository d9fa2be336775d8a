//! Typed property values of a vector tile layer's value table.

use crate::io::{ValueReaderSlice, ValueWriterBlob};
use crate::types::Blob;
use anyhow::{anyhow, bail, Context, Result};

/// One entry of a layer's value table.
///
/// The wire encoding uses one field per variant (MVT `Value` message); the
/// subdivision path carries these through without interpreting them.
#[derive(Clone, Debug, PartialEq)]
pub enum TileValue {
	String(String),
	Float(f32),
	Double(f64),
	Int(i64),
	UInt(u64),
	SInt(i64),
	Bool(bool),
}

impl TileValue {
	pub fn read(reader: &mut ValueReaderSlice) -> Result<TileValue> {
		let mut value: Option<TileValue> = None;

		while reader.has_remaining() {
			value = Some(match reader.read_pbf_key().context("failed to read PBF key")? {
				(1, 2) => TileValue::String(reader.read_pbf_string().context("failed to read string value")?),
				(2, 5) => TileValue::Float(reader.read_f32().context("failed to read float value")?),
				(3, 1) => TileValue::Double(reader.read_f64().context("failed to read double value")?),
				(4, 0) => TileValue::Int(reader.read_varint().context("failed to read int value")? as i64),
				(5, 0) => TileValue::UInt(reader.read_varint().context("failed to read uint value")?),
				(6, 0) => TileValue::SInt(reader.read_svarint().context("failed to read sint value")?),
				(7, 0) => TileValue::Bool(reader.read_varint().context("failed to read bool value")? != 0),
				(f, w) => bail!("unexpected field number ({f}) / wire type ({w}) in value"),
			})
		}

		value.ok_or_else(|| anyhow!("empty value message"))
	}

	pub fn to_blob(&self) -> Result<Blob> {
		let mut writer = ValueWriterBlob::new();
		match self {
			TileValue::String(v) => {
				writer.write_pbf_key(1, 2)?;
				writer.write_pbf_string(v)?;
			}
			TileValue::Float(v) => {
				writer.write_pbf_key(2, 5)?;
				writer.write_f32(*v)?;
			}
			TileValue::Double(v) => {
				writer.write_pbf_key(3, 1)?;
				writer.write_f64(*v)?;
			}
			TileValue::Int(v) => {
				writer.write_pbf_key(4, 0)?;
				writer.write_varint(*v as u64)?;
			}
			TileValue::UInt(v) => {
				writer.write_pbf_key(5, 0)?;
				writer.write_varint(*v)?;
			}
			TileValue::SInt(v) => {
				writer.write_pbf_key(6, 0)?;
				writer.write_svarint(*v)?;
			}
			TileValue::Bool(v) => {
				writer.write_pbf_key(7, 0)?;
				writer.write_varint(u64::from(*v))?;
			}
		}
		Ok(writer.into_blob())
	}
}
