use pos_utils::error::FileIOError;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::AssetError;

/// Name of the manifest inside an asset directory; never listed in itself.
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetFile {
	/// Relative, `/` separated.
	pub path: String,
	/// Hex encoded blake3 of the contents.
	pub hash: String,
	pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetManifest {
	pub version: u64,
	#[serde(default)]
	pub files: Vec<AssetFile>,
}

fn is_safe_path_segment(segment: &str) -> bool {
	!segment.is_empty()
		&& segment != "."
		&& !segment.contains("..")
		&& !segment.contains('\\')
		&& !segment.contains('\0')
		&& !segment.contains(':')
}

/// Accepts only relative paths that stay inside the asset directory.
#[must_use]
pub fn is_safe_asset_path(path: &str) -> bool {
	!path.starts_with('/') && path.split('/').all(is_safe_path_segment)
}

impl AssetManifest {
	pub fn validate(&self) -> Result<(), AssetError> {
		if self.version == 0 {
			return Err(AssetError::Manifest("version must start at 1".into()));
		}

		for file in &self.files {
			if !is_safe_asset_path(&file.path) || file.path == MANIFEST_FILE {
				return Err(AssetError::UnsafePath(file.path.clone()));
			}
		}

		Ok(())
	}

	/// Strong validator sent along with the manifest.
	#[must_use]
	pub fn etag(&self) -> String {
		format!("\"v{}\"", self.version)
	}

	/// Builds the manifest of every file under `root`, sorted by path.
	pub async fn from_dir(root: impl AsRef<Path>, version: u64) -> Result<Self, AssetError> {
		let root = root.as_ref();
		let mut files = Vec::new();
		let mut to_walk = vec![PathBuf::new()];

		while let Some(relative) = to_walk.pop() {
			let dir = root.join(&relative);
			let mut entries = fs::read_dir(&dir)
				.await
				.map_err(|e| FileIOError::from_std_io_err(&dir, e))?;

			while let Some(entry) = entries
				.next_entry()
				.await
				.map_err(|e| FileIOError::from_std_io_err(&dir, e))?
			{
				let name = entry.file_name().to_string_lossy().into_owned();
				let child = relative.join(&name);
				let file_type = entry
					.file_type()
					.await
					.map_err(|e| FileIOError::from_std_io_err(entry.path(), e))?;

				if file_type.is_dir() {
					to_walk.push(child);
					continue;
				}

				let path = child
					.components()
					.map(|component| component.as_os_str().to_string_lossy())
					.collect::<Vec<_>>()
					.join("/");

				if path == MANIFEST_FILE || !file_type.is_file() {
					continue;
				}

				let contents = fs::read(entry.path())
					.await
					.map_err(|e| FileIOError::from_std_io_err(entry.path(), e))?;

				files.push(AssetFile {
					path,
					hash: blake3::hash(&contents).to_hex().to_string(),
					size: contents.len() as u64,
				});
			}
		}

		files.sort_by(|a, b| a.path.cmp(&b.path));

		let manifest = Self { version, files };
		manifest.validate()?;

		Ok(manifest)
	}
}

impl AssetFile {
	#[must_use]
	pub fn matches(&self, contents: &[u8]) -> bool {
		contents.len() as u64 == self.size
			&& blake3::hash(contents).to_hex().as_str() == self.hash
	}
}
