//! Byte source backed by a local file.

use super::{DataReaderTrait, RangeResponse};
use crate::types::{Blob, ByteRange};
use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use std::{
	fs::File,
	io::{Read, Seek, SeekFrom},
	path::Path,
};

/// Reads byte ranges from a file on disk. Stateless apart from the open
/// handle; never produces an ETag.
#[derive(Debug)]
pub struct DataReaderFile {
	name: String,
	file: File,
	size: u64,
}

impl DataReaderFile {
	pub fn open(path: &Path) -> Result<DataReaderFile> {
		ensure!(path.exists(), "no file at {path:?}");
		ensure!(path.is_file(), "{path:?} is not a regular file");

		let path = path.canonicalize()?;
		let file = File::open(&path)?;
		let size = file.metadata()?.len();

		Ok(DataReaderFile {
			name: path.to_string_lossy().to_string(),
			file,
			size,
		})
	}
}

#[async_trait]
impl DataReaderTrait for DataReaderFile {
	async fn read_range(&self, range: &ByteRange) -> Result<RangeResponse> {
		// Each read gets its own handle so concurrent reads never share a
		// file cursor.
		let mut file = self
			.file
			.try_clone()
			.with_context(|| format!("could not duplicate the handle for '{}'", self.name))?;
		file
			.seek(SeekFrom::Start(range.offset))
			.with_context(|| format!("seek to byte {} of '{}' failed", range.offset, self.name))?;

		let mut buffer = vec![0; range.length as usize];
		file
			.read_exact(&mut buffer)
			.with_context(|| format!("short read of {range:?} from '{}'", self.name))?;
		Ok(RangeResponse::from_blob(Blob::from(buffer)))
	}

	fn size(&self) -> u64 {
		self.size
	}

	fn name(&self) -> &str {
		&self.name
	}
}
