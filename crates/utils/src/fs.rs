//! Crash-safe file replacement.
//!
//! Readers either see the previous content or the new one, never a torn file:
//! the bytes go to a sibling temporary file which is synced and then renamed
//! over the target.

use std::path::{Path, PathBuf};

use tokio::{fs, io::AsyncWriteExt};

use crate::error::FileIOError;

fn temp_sibling(path: &Path) -> PathBuf {
	let mut name = path
		.file_name()
		.map(|name| name.to_os_string())
		.unwrap_or_default();
	name.push(".tmp");
	path.with_file_name(name)
}

pub async fn write_atomic(path: impl AsRef<Path>, contents: &[u8]) -> Result<(), FileIOError> {
	let path = path.as_ref();

	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent)
			.await
			.map_err(|e| FileIOError::from_std_io_err(parent, e))?;
	}

	let temp = temp_sibling(path);

	let mut file = fs::File::create(&temp)
		.await
		.map_err(|e| FileIOError::from_std_io_err(&temp, e))?;
	file.write_all(contents)
		.await
		.map_err(|e| FileIOError::from_std_io_err(&temp, e))?;
	file.sync_all()
		.await
		.map_err(|e| FileIOError::from_std_io_err(&temp, e).during("sync"))?;
	drop(file);

	fs::rename(&temp, path)
		.await
		.map_err(|e| FileIOError::from_std_io_err(path, e).during("replace"))
}
