//! Little-endian binary writer into an in-memory blob.
//!
//! Used to re-encode vector tiles after subdivision and to build archive
//! fixtures in tests.

use crate::types::Blob;
use anyhow::{Context, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Cursor;

#[derive(Default)]
pub struct ValueWriterBlob {
	cursor: Cursor<Vec<u8>>,
}

impl ValueWriterBlob {
	pub fn new() -> ValueWriterBlob {
		ValueWriterBlob {
			cursor: Cursor::new(Vec::new()),
		}
	}

	pub fn position(&self) -> u64 {
		self.cursor.position()
	}

	pub fn into_blob(self) -> Blob {
		Blob::from(self.cursor.into_inner())
	}

	pub fn write_u8(&mut self, value: u8) -> Result<()> {
		Ok(self.cursor.write_u8(value)?)
	}

	pub fn write_u16(&mut self, value: u16) -> Result<()> {
		Ok(self.cursor.write_u16::<LittleEndian>(value)?)
	}

	pub fn write_u32(&mut self, value: u32) -> Result<()> {
		Ok(self.cursor.write_u32::<LittleEndian>(value)?)
	}

	pub fn write_u64(&mut self, value: u64) -> Result<()> {
		Ok(self.cursor.write_u64::<LittleEndian>(value)?)
	}

	pub fn write_f32(&mut self, value: f32) -> Result<()> {
		Ok(self.cursor.write_f32::<LittleEndian>(value)?)
	}

	pub fn write_f64(&mut self, value: f64) -> Result<()> {
		Ok(self.cursor.write_f64::<LittleEndian>(value)?)
	}

	pub fn write_varint(&mut self, mut value: u64) -> Result<()> {
		use std::io::Write;
		while value >= 0x80 {
			self.cursor.write_all(&[((value as u8) & 0x7F) | 0x80])?;
			value >>= 7;
		}
		self.cursor.write_all(&[value as u8])?;
		Ok(())
	}

	pub fn write_svarint(&mut self, value: i64) -> Result<()> {
		self.write_varint(((value << 1) ^ (value >> 63)) as u64)
	}

	pub fn write_slice(&mut self, buf: &[u8]) -> Result<()> {
		use std::io::Write;
		self.cursor.write_all(buf)?;
		Ok(())
	}

	pub fn write_blob(&mut self, blob: &Blob) -> Result<()> {
		self.write_slice(blob.as_slice())
	}

	pub fn write_string(&mut self, text: &str) -> Result<()> {
		self.write_slice(text.as_bytes())
	}

	pub fn write_pbf_key(&mut self, field_number: u32, wire_type: u8) -> Result<()> {
		self
			.write_varint((u64::from(field_number) << 3) | u64::from(wire_type))
			.context("failed to write PBF key")
	}

	pub fn write_pbf_blob(&mut self, blob: &Blob) -> Result<()> {
		self.write_varint(blob.len())?;
		self.write_blob(blob)
	}

	pub fn write_pbf_string(&mut self, text: &str) -> Result<()> {
		self.write_varint(text.len() as u64)?;
		self.write_string(text)
	}

	pub fn write_pbf_packed_uint32(&mut self, data: &[u32]) -> Result<()> {
		let mut inner = ValueWriterBlob::new();
		for &value in data {
			inner.write_varint(u64::from(value))?;
		}
		self.write_pbf_blob(&inner.into_blob())
	}
}
