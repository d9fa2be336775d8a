//! A thin wrapper around `Vec<u8>` used for all byte payloads in this crate.

use std::fmt::Debug;
use std::ops::Range;

/// An owned byte buffer.
///
/// ```rust
/// use tilepack::Blob;
///
/// let blob = Blob::from("Hello, world!");
/// assert_eq!(blob.len(), 13);
/// assert_eq!(blob.as_str(), "Hello, world!");
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Blob(Vec<u8>);

impl Blob {
	/// Creates an empty `Blob`.
	#[must_use]
	pub fn new_empty() -> Blob {
		Blob(Vec::new())
	}

	/// Creates a `Blob` of `length` zero bytes.
	#[must_use]
	pub fn new_sized(length: usize) -> Blob {
		Blob(vec![0u8; length])
	}

	/// Returns the bytes in `range`.
	///
	/// # Panics
	/// Panics if the range is out of bounds.
	#[must_use]
	pub fn get_range(&self, range: Range<usize>) -> &[u8] {
		&self.0[range]
	}

	#[must_use]
	pub fn as_slice(&self) -> &[u8] {
		&self.0
	}

	#[must_use]
	pub fn as_mut_slice(&mut self) -> &mut [u8] {
		&mut self.0
	}

	/// Interprets the bytes as UTF-8, lossily.
	#[must_use]
	pub fn as_str(&self) -> &str {
		std::str::from_utf8(&self.0).unwrap_or("<invalid utf-8>")
	}

	#[must_use]
	pub fn into_vec(self) -> Vec<u8> {
		self.0
	}

	#[must_use]
	pub fn len(&self) -> u64 {
		self.0.len() as u64
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl From<Vec<u8>> for Blob {
	fn from(value: Vec<u8>) -> Self {
		Blob(value)
	}
}

impl From<&Vec<u8>> for Blob {
	fn from(value: &Vec<u8>) -> Self {
		Blob(value.clone())
	}
}

impl From<&[u8]> for Blob {
	fn from(value: &[u8]) -> Self {
		Blob(value.to_vec())
	}
}

impl<const N: usize> From<&[u8; N]> for Blob {
	fn from(value: &[u8; N]) -> Self {
		Blob(value.to_vec())
	}
}

impl From<&str> for Blob {
	fn from(value: &str) -> Self {
		Blob(value.as_bytes().to_vec())
	}
}

impl From<String> for Blob {
	fn from(value: String) -> Self {
		Blob(value.into_bytes())
	}
}

impl Debug for Blob {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "Blob({} bytes)", self.0.len())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn basic_accessors() {
		let vec = vec![0, 1, 2, 3, 4, 5, 6, 7];
		let blob = Blob::from(&vec);
		assert_eq!(blob.len(), 8);
		assert_eq!(blob.get_range(2..5), &vec![2, 3, 4][..]);
		assert_eq!(blob.clone().into_vec(), vec);
	}

	#[test]
	fn string_round_trip() {
		let text = String::from("Xylofön");
		let blob = Blob::from(text.clone());
		assert_eq!(blob.as_str(), "Xylofön");
		assert!(!blob.is_empty());
	}

	#[test]
	fn sized_is_zeroed() {
		let blob = Blob::new_sized(5);
		assert_eq!(blob.as_slice(), &[0, 0, 0, 0, 0]);
	}

	#[test]
	fn debug_shows_length() {
		assert_eq!(format!("{:?}", Blob::from("abc")), "Blob(3 bytes)");
	}
}
