use std::{
	io,
	path::{Path, PathBuf},
};

use thiserror::Error;

/// I/O failure on a file below the data directory, keeping the path around.
#[derive(Error, Debug)]
#[error("failed to {action} '{}': {source}", .path.display())]
pub struct FileIOError {
	pub path: PathBuf,
	pub action: &'static str,
	#[source]
	pub source: io::Error,
}

impl FileIOError {
	pub fn from_std_io_err(path: impl AsRef<Path>, source: io::Error) -> Self {
		Self {
			path: path.as_ref().to_path_buf(),
			action: "access",
			source,
		}
	}

	/// Names the step that failed, as in "failed to sync '<path>'".
	#[must_use]
	pub const fn during(mut self, action: &'static str) -> Self {
		self.action = action;
		self
	}

	#[must_use]
	pub fn is_not_found(&self) -> bool {
		self.source.kind() == io::ErrorKind::NotFound
	}
}
