//! ZIP/ZIP64 central directory parsing.
//!
//! TilePackage archives store their entries (no DEFLATE at the archive
//! level) and write local headers without extra fields, so each entry's
//! payload starts at `local_header_offset + 30 + name_length`. Only the end
//! of the archive and the central directory are ever read; entries are
//! fetched on demand by whoever holds the file table.

use crate::io::{DataReader, ValueReaderSlice};
use crate::types::{Blob, ByteRange};
use crate::PackageError;
use anyhow::{Context, Result};
use std::collections::HashMap;

const EOCD_SIG: u32 = 0x0605_4b50;
const EOCD64_SIG: u32 = 0x0606_4b50;
const CENTRAL_DIR_SIG: u32 = 0x0201_4b50;
const ZIP64_EXTRA_TAG: u16 = 0x0001;

const EOCD_LENGTH: u64 = 22;
/// ZIP64 EOCD (56) + ZIP64 locator (20) + classical EOCD (22).
const TAIL_LENGTH: u64 = 98;

/// Fixed distance from a local file header to its stored bytes when the
/// local header carries no extra field; TilePackage writers conform.
const LOCAL_HEADER_LENGTH: u64 = 30;

/// One archive member: its stored size and the offset of its payload bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileEntry {
	pub size: u64,
	pub payload_offset: u64,
}

impl FileEntry {
	pub fn as_range(&self) -> ByteRange {
		ByteRange::new(self.payload_offset, self.size)
	}
}

/// The archive's file table, built from one read of the tail and one read
/// of the central directory.
#[derive(Debug, Default)]
pub struct ZipIndex {
	entries: HashMap<String, FileEntry>,
}

impl ZipIndex {
	/// Reads and parses the central directory.
	///
	/// Returns the index together with the ETag observed on the tail read
	/// (if the source produced one), so the caller can pin the archive
	/// version for all subsequent reads.
	pub async fn from_reader(reader: &DataReader) -> Result<(ZipIndex, Option<String>)> {
		let archive_size = reader.size();
		let tail_length = TAIL_LENGTH.min(archive_size);
		let tail_offset = archive_size - tail_length;

		let tail = reader
			.read_range(&ByteRange::new(tail_offset, tail_length))
			.await
			.context("failed to read archive tail")?;
		let etag = tail.etag.clone();

		let (entry_count, directory_range) = parse_tail(&tail.blob)?;
		if directory_range.end() > archive_size {
			return Err(malformed(format!(
				"central directory {directory_range:?} extends past the archive end ({archive_size})"
			)));
		}

		let directory = reader
			.read_range(&directory_range)
			.await
			.context("failed to read central directory")?;
		if let (Some(expected), Some(found)) = (&etag, &directory.etag) {
			if expected != found {
				return Err(PackageError::EtagMismatch {
					expected: expected.clone(),
					found: found.clone(),
				}
				.into());
			}
		}

		let entries = parse_central_directory(&directory.blob, entry_count, archive_size)?;
		Ok((ZipIndex { entries }, etag))
	}

	pub fn get(&self, path: &str) -> Option<&FileEntry> {
		self.entries.get(path)
	}

	pub fn contains(&self, path: &str) -> bool {
		self.entries.contains_key(path)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&String, &FileEntry)> {
		self.entries.iter()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

fn malformed(message: impl Into<String>) -> anyhow::Error {
	PackageError::MalformedArchive(message.into()).into()
}

/// Locates the end-of-central-directory record in the archive tail and
/// returns the total entry count plus the central directory's byte range.
fn parse_tail(tail: &Blob) -> Result<(u64, ByteRange)> {
	let mut reader = ValueReaderSlice::new(tail.as_slice());

	// A full-length tail whose first record is the ZIP64 EOCD.
	if tail.len() == TAIL_LENGTH && reader.read_u32()? == EOCD64_SIG {
		reader.set_position(32)?;
		let entry_count = reader.read_u64()?;
		let directory_size = reader.read_u64()?;
		let directory_offset = reader.read_u64()?;
		return Ok((entry_count, ByteRange::new(directory_offset, directory_size)));
	}

	// Classical EOCD: the last 22 bytes of a comment-free archive.
	if tail.len() >= EOCD_LENGTH {
		let eocd_start = tail.len() - EOCD_LENGTH;
		let mut reader = ValueReaderSlice::new(tail.get_range(eocd_start as usize..tail.len() as usize));
		if reader.read_u32()? == EOCD_SIG {
			reader.set_position(10)?;
			let entry_count = u64::from(reader.read_u16()?);
			let directory_size = u64::from(reader.read_u32()?);
			let directory_offset = u64::from(reader.read_u32()?);
			return Ok((entry_count, ByteRange::new(directory_offset, directory_size)));
		}
	}

	Err(malformed("no end-of-central-directory record found"))
}

/// Walks the central directory and builds the file table.
fn parse_central_directory(directory: &Blob, entry_count: u64, archive_size: u64) -> Result<HashMap<String, FileEntry>> {
	let mut reader = ValueReaderSlice::new(directory.as_slice());
	let mut entries = HashMap::with_capacity(entry_count as usize);

	for index in 0..entry_count {
		let entry_start = reader.position();
		if reader.read_u32()? != CENTRAL_DIR_SIG {
			return Err(malformed(format!("bad central directory signature at entry {index}")));
		}

		reader.set_position(entry_start + 20)?;
		let mut size = u64::from(reader.read_u32()?);
		reader.set_position(entry_start + 28)?;
		let name_length = u64::from(reader.read_u16()?);
		let extra_length = u64::from(reader.read_u16()?);
		let comment_length = u64::from(reader.read_u16()?);
		reader.set_position(entry_start + 42)?;
		let mut relative_offset = u64::from(reader.read_u32()?);

		let name = reader
			.read_string(name_length)
			.with_context(|| format!("invalid file name in central directory entry {index}"))?;
		let extra = reader.read_blob(extra_length)?;
		reader.set_position(reader.position() + comment_length)?;

		// ZIP64: 0xffffffff sentinels are replaced from the extended info
		// block, in field order (size, then offset).
		if size == u64::from(u32::MAX) || relative_offset == u64::from(u32::MAX) {
			if let Some(mut zip64) = find_zip64_block(&extra)? {
				if size == u64::from(u32::MAX) {
					size = zip64
						.read_u64()
						.map_err(|_| malformed(format!("truncated ZIP64 size for '{name}'")))?;
				}
				if relative_offset == u64::from(u32::MAX) {
					relative_offset = zip64
						.read_u64()
						.map_err(|_| malformed(format!("truncated ZIP64 offset for '{name}'")))?;
				}
			}
		}

		let payload_offset = relative_offset + LOCAL_HEADER_LENGTH + name_length;
		if payload_offset + size > archive_size {
			return Err(malformed(format!(
				"entry '{name}' ({size} bytes at {payload_offset}) extends past the archive end ({archive_size})"
			)));
		}

		entries.insert(name, FileEntry { size, payload_offset });
	}

	Ok(entries)
}

/// Finds the ZIP64 extended info block (tag 0x0001) in an extra field.
fn find_zip64_block<'a>(extra: &'a Blob) -> Result<Option<ValueReaderSlice<'a>>> {
	let mut reader = ValueReaderSlice::new(extra.as_slice());
	while reader.remaining() >= 4 {
		let tag = reader.read_u16()?;
		let length = u64::from(reader.read_u16()?);
		if length > reader.remaining() {
			return Err(malformed("truncated extra field block"));
		}
		let block = reader.sub_reader(length)?;
		if tag == ZIP64_EXTRA_TAG {
			return Ok(Some(block));
		}
	}
	Ok(None)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{reader_from_blob, ZipBuilder};

	#[tokio::test]
	async fn parses_classical_archive() -> Result<()> {
		let archive = ZipBuilder::new()
			.entry("root.json", Blob::from("{}"))
			.entry("tile/L05/R0000C0000.bundle", Blob::from(&[1u8, 2, 3, 4]))
			.build()?;
		let reader = reader_from_blob(archive.clone(), None);

		let (index, etag) = ZipIndex::from_reader(&reader).await?;
		assert_eq!(index.len(), 2);
		assert!(etag.is_none());

		let entry = index.get("root.json").unwrap();
		assert_eq!(entry.size, 2);
		let payload = &archive.as_slice()[entry.as_range().as_range_usize()];
		assert_eq!(payload, b"{}");

		assert!(index.contains("tile/L05/R0000C0000.bundle"));
		assert!(!index.contains("missing.json"));
		Ok(())
	}

	#[tokio::test]
	async fn parses_zip64_archive() -> Result<()> {
		let archive = ZipBuilder::new()
			.entry("p12/root.json", Blob::from("{\"a\":1}"))
			.entry("p12/metadata.json", Blob::from("{\"b\":2}"))
			.zip64(true)
			.build()?;
		let reader = reader_from_blob(archive.clone(), None);

		let (index, _) = ZipIndex::from_reader(&reader).await?;
		assert_eq!(index.len(), 2);

		let entry = index.get("p12/metadata.json").unwrap();
		assert_eq!(entry.size, 7);
		let payload = &archive.as_slice()[entry.as_range().as_range_usize()];
		assert_eq!(payload, b"{\"b\":2}");
		Ok(())
	}

	#[tokio::test]
	async fn all_payloads_lie_inside_the_archive() -> Result<()> {
		let archive = ZipBuilder::new()
			.entry("a", Blob::from("first"))
			.entry("dir/b", Blob::from("second"))
			.entry("dir/c", Blob::new_sized(1000))
			.build()?;
		let size = archive.len();
		let reader = reader_from_blob(archive, None);

		let (index, _) = ZipIndex::from_reader(&reader).await?;
		for (_, entry) in index.iter() {
			assert!(entry.payload_offset < size);
			assert!(entry.payload_offset + entry.size <= size);
		}
		Ok(())
	}

	#[tokio::test]
	async fn garbage_fails_as_malformed() {
		let reader = reader_from_blob(Blob::from(vec![0u8; 200]), None);
		let err = ZipIndex::from_reader(&reader).await.unwrap_err();
		assert!(matches!(
			err.downcast_ref::<PackageError>(),
			Some(PackageError::MalformedArchive(_))
		));
	}

	#[tokio::test]
	async fn tiny_file_fails_as_malformed() {
		let reader = reader_from_blob(Blob::from(&[1u8, 2, 3]), None);
		assert!(ZipIndex::from_reader(&reader).await.is_err());
	}
}
