//! Typed error kinds that drive control flow.
//!
//! Most fallible paths in this crate return `anyhow::Result` with context
//! attached along the way. The variants below are the errors that callers
//! (and the retry logic in [`crate::package::TilePackage`]) need to tell
//! apart; they travel inside `anyhow::Error` and are recovered by downcast.

use crate::types::TileCoord;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum PackageError {
	/// The archive has no readable end-of-central-directory record or the
	/// central directory itself is damaged.
	#[error("malformed archive: {0}")]
	MalformedArchive(String),

	/// The header declares a tile compression this crate cannot decode.
	#[error("unsupported tile compression '{0}'")]
	UnsupportedCompression(String),

	/// A byte source returned a different ETag than the one recorded when
	/// the header was built: the archive changed mid-session. Recovered
	/// exactly once by reloading the header; a second occurrence is fatal.
	#[error("archive changed: etag was '{expected}', is now '{found}'")]
	EtagMismatch { expected: String, found: String },

	/// The subdivision target does not lie underneath its claimed parent.
	/// This indicates a bug in the caller, not bad data.
	#[error("tile {target:?} is not a descendant of {parent:?}")]
	ContainmentViolation { parent: TileCoord, target: TileCoord },

	/// The caller's cancellation handle fired before the operation finished.
	#[error("operation cancelled")]
	Cancelled,
}

/// True if `err` carries an [`PackageError::EtagMismatch`] anywhere in its chain.
pub fn is_etag_mismatch(err: &anyhow::Error) -> bool {
	matches!(
		err.downcast_ref::<PackageError>(),
		Some(PackageError::EtagMismatch { .. })
	)
}

/// True if `err` carries an [`PackageError::ContainmentViolation`].
pub fn is_containment_violation(err: &anyhow::Error) -> bool {
	matches!(
		err.downcast_ref::<PackageError>(),
		Some(PackageError::ContainmentViolation { .. })
	)
}

#[cfg(test)]
mod tests {
	use super::*;
	use anyhow::Context;

	#[test]
	fn detects_etag_mismatch() {
		let err: anyhow::Error = PackageError::EtagMismatch {
			expected: "a".to_string(),
			found: "b".to_string(),
		}
		.into();
		assert!(is_etag_mismatch(&err));

		let other = anyhow::anyhow!("something else");
		assert!(!is_etag_mismatch(&other));
	}

	#[test]
	fn downcast_survives_context() {
		let result: anyhow::Result<()> = Err(PackageError::MalformedArchive("no eocd".to_string()).into());
		let err = result.context("while opening archive").unwrap_err();
		assert!(err.downcast_ref::<PackageError>().is_some());
	}
}
