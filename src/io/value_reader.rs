//! Little-endian binary reader over a byte slice.
//!
//! Covers the two wire formats this crate parses: fixed-width ZIP structures
//! and protobuf-encoded vector tiles (varint, zig-zag, key, length-delimited
//! fields).

use crate::types::Blob;
use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

pub struct ValueReaderSlice<'a> {
	cursor: Cursor<&'a [u8]>,
	len: u64,
}

impl<'a> ValueReaderSlice<'a> {
	#[must_use]
	pub fn new(slice: &'a [u8]) -> ValueReaderSlice<'a> {
		ValueReaderSlice {
			len: slice.len() as u64,
			cursor: Cursor::new(slice),
		}
	}

	pub fn len(&self) -> u64 {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	pub fn position(&self) -> u64 {
		self.cursor.position()
	}

	pub fn set_position(&mut self, position: u64) -> Result<()> {
		if position > self.len {
			bail!("position {position} lies outside the slice (length {})", self.len);
		}
		self.cursor.set_position(position);
		Ok(())
	}

	pub fn remaining(&self) -> u64 {
		self.len - self.cursor.position()
	}

	pub fn has_remaining(&self) -> bool {
		self.remaining() > 0
	}

	pub fn read_u8(&mut self) -> Result<u8> {
		Ok(self.cursor.read_u8()?)
	}

	pub fn read_u16(&mut self) -> Result<u16> {
		Ok(self.cursor.read_u16::<LittleEndian>()?)
	}

	pub fn read_u32(&mut self) -> Result<u32> {
		Ok(self.cursor.read_u32::<LittleEndian>()?)
	}

	pub fn read_u64(&mut self) -> Result<u64> {
		Ok(self.cursor.read_u64::<LittleEndian>()?)
	}

	pub fn read_f32(&mut self) -> Result<f32> {
		Ok(self.cursor.read_f32::<LittleEndian>()?)
	}

	pub fn read_f64(&mut self) -> Result<f64> {
		Ok(self.cursor.read_f64::<LittleEndian>()?)
	}

	pub fn read_varint(&mut self) -> Result<u64> {
		let mut value = 0;
		let mut shift = 0;
		loop {
			let byte = self.cursor.read_u8()?;
			value |= (u64::from(byte) & 0x7F) << shift;
			if byte & 0x80 == 0 {
				break;
			}
			shift += 7;
			if shift >= 70 {
				bail!("varint too long");
			}
		}
		Ok(value)
	}

	pub fn read_svarint(&mut self) -> Result<i64> {
		let value = self.read_varint()? as i64;
		Ok((value >> 1) ^ -(value & 1))
	}

	pub fn read_blob(&mut self, length: u64) -> Result<Blob> {
		let mut blob = Blob::new_sized(length as usize);
		std::io::Read::read_exact(&mut self.cursor, blob.as_mut_slice())?;
		Ok(blob)
	}

	pub fn read_string(&mut self, length: u64) -> Result<String> {
		let mut vec = vec![0u8; length as usize];
		std::io::Read::read_exact(&mut self.cursor, &mut vec)?;
		Ok(String::from_utf8(vec)?)
	}

	/// Field number and wire type of the next protobuf field.
	pub fn read_pbf_key(&mut self) -> Result<(u32, u8)> {
		let value = self.read_varint().context("failed to read varint for PBF key")?;
		Ok(((value >> 3) as u32, (value & 0x07) as u8))
	}

	/// A reader limited to the next `length` bytes; the outer reader skips
	/// past them.
	pub fn sub_reader(&mut self, length: u64) -> Result<ValueReaderSlice<'a>> {
		let start = self.cursor.position();
		let end = start + length;
		if end > self.len {
			bail!("sub-reader length {length} exceeds remaining data ({})", self.remaining());
		}
		self.cursor.set_position(end);
		let full: &'a [u8] = self.cursor.get_ref();
		Ok(ValueReaderSlice::new(&full[start as usize..end as usize]))
	}

	/// A sub-reader for a length-delimited protobuf field.
	pub fn pbf_sub_reader(&mut self) -> Result<ValueReaderSlice<'a>> {
		let length = self.read_varint().context("failed to read field length")?;
		self.sub_reader(length)
	}

	pub fn read_pbf_string(&mut self) -> Result<String> {
		let length = self.read_varint().context("failed to read string length")?;
		self.read_string(length)
	}

	pub fn read_pbf_blob(&mut self) -> Result<Blob> {
		let length = self.read_varint().context("failed to read blob length")?;
		self.read_blob(length)
	}

	pub fn read_pbf_packed_uint32(&mut self) -> Result<Vec<u32>> {
		let mut reader = self.pbf_sub_reader()?;
		let mut values = Vec::new();
		while reader.has_remaining() {
			values.push(reader.read_varint()? as u32);
		}
		Ok(values)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fixed_width_reads() -> Result<()> {
		let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
		let mut reader = ValueReaderSlice::new(&data);
		assert_eq!(reader.read_u16()?, 0x0201);
		assert_eq!(reader.read_u32()?, 0x06050403);
		assert_eq!(reader.remaining(), 2);
		Ok(())
	}

	#[test]
	fn varint() -> Result<()> {
		let mut reader = ValueReaderSlice::new(&[0xAC, 0x02]);
		assert_eq!(reader.read_varint()?, 300);
		Ok(())
	}

	#[test]
	fn varint_too_long_fails() {
		let data = [0x80; 11];
		let mut reader = ValueReaderSlice::new(&data);
		assert!(reader.read_varint().is_err());
	}

	#[test]
	fn svarint() -> Result<()> {
		let mut reader = ValueReaderSlice::new(&[0x96, 0x01]);
		assert_eq!(reader.read_svarint()?, 75);
		let mut reader = ValueReaderSlice::new(&[0x95, 0x01]);
		assert_eq!(reader.read_svarint()?, -75);
		Ok(())
	}

	#[test]
	fn pbf_key() -> Result<()> {
		let mut reader = ValueReaderSlice::new(&[0x08]);
		assert_eq!(reader.read_pbf_key()?, (1, 0));
		Ok(())
	}

	#[test]
	fn pbf_string_and_packed() -> Result<()> {
		let mut reader = ValueReaderSlice::new(&[0x05, b'h', b'e', b'l', b'l', b'o']);
		assert_eq!(reader.read_pbf_string()?, "hello");

		let mut reader = ValueReaderSlice::new(&[0x05, 0x64, 0x96, 0x01, 0xAC, 0x02]);
		assert_eq!(reader.read_pbf_packed_uint32()?, vec![100, 150, 300]);
		Ok(())
	}

	#[test]
	fn sub_reader_advances_outer() -> Result<()> {
		let data = [0x01, 0x02, 0x03, 0x04, 0x05];
		let mut reader = ValueReaderSlice::new(&data);
		reader.set_position(1)?;
		let mut sub = reader.sub_reader(3)?;
		assert_eq!(sub.read_u8()?, 0x02);
		assert_eq!(reader.position(), 4);
		assert!(reader.sub_reader(5).is_err());
		Ok(())
	}
}
