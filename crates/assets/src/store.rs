//! On-disk cache of asset versions.
//!
//! ```text
//! <root>/ACTIVE             version number currently served
//! <root>/staging/<v>/       download in progress, discarded on open
//! <root>/versions/<v>/      complete and verified
//! ```
//!
//! A version only appears under `versions/` once every file passed its
//! integrity check, so a crash mid download never leaves a half installed
//! version behind.

use pos_utils::{error::FileIOError, fs::write_atomic};

use std::{
	io::ErrorKind,
	path::{Path, PathBuf},
};

use tokio::fs;
use tracing::{debug, warn};

use crate::{AssetError, AssetManifest, AssetSource, MANIFEST_FILE};

const ACTIVE_FILE: &str = "ACTIVE";
const STAGING_DIR: &str = "staging";
const VERSIONS_DIR: &str = "versions";

#[derive(Debug, Clone)]
pub struct AssetStore {
	root: PathBuf,
}

async fn remove_dir_if_exists(path: &Path) -> Result<(), FileIOError> {
	match fs::remove_dir_all(path).await {
		Ok(()) => Ok(()),
		Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
		Err(e) => Err(FileIOError::from_std_io_err(path, e)),
	}
}

impl AssetStore {
	pub async fn open(root: impl Into<PathBuf>) -> Result<Self, AssetError> {
		let root = root.into();

		remove_dir_if_exists(&root.join(STAGING_DIR)).await?;

		let versions = root.join(VERSIONS_DIR);
		fs::create_dir_all(&versions)
			.await
			.map_err(|e| FileIOError::from_std_io_err(&versions, e))?;

		Ok(Self { root })
	}

	#[must_use]
	pub fn version_dir(&self, version: u64) -> PathBuf {
		self.root.join(VERSIONS_DIR).join(version.to_string())
	}

	/// Directory of the active version, if any.
	pub async fn active_dir(&self) -> Result<Option<PathBuf>, AssetError> {
		Ok(self
			.active_version()
			.await?
			.map(|version| self.version_dir(version)))
	}

	pub async fn active_version(&self) -> Result<Option<u64>, AssetError> {
		let path = self.root.join(ACTIVE_FILE);

		let raw = match fs::read_to_string(&path).await {
			Ok(raw) => raw,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(FileIOError::from_std_io_err(&path, e).into()),
		};

		let Ok(version) = raw.trim().parse::<u64>() else {
			warn!(?path, "Ignoring unreadable active asset version");
			return Ok(None);
		};

		Ok(fs::try_exists(self.version_dir(version))
			.await
			.unwrap_or(false)
			.then_some(version))
	}

	/// Complete versions on disk, ascending.
	pub async fn installed_versions(&self) -> Result<Vec<u64>, AssetError> {
		let dir = self.root.join(VERSIONS_DIR);
		let mut entries = fs::read_dir(&dir)
			.await
			.map_err(|e| FileIOError::from_std_io_err(&dir, e))?;

		let mut versions = Vec::new();
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| FileIOError::from_std_io_err(&dir, e))?
		{
			if let Some(version) = entry
				.file_name()
				.to_str()
				.and_then(|name| name.parse::<u64>().ok())
			{
				versions.push(version);
			}
		}

		versions.sort_unstable();
		Ok(versions)
	}

	/// Downloads and verifies every file of `manifest`, then publishes the version.
	pub async fn stage(
		&self,
		manifest: &AssetManifest,
		source: &dyn AssetSource,
	) -> Result<PathBuf, AssetError> {
		manifest.validate()?;

		let staging = self
			.root
			.join(STAGING_DIR)
			.join(manifest.version.to_string());
		remove_dir_if_exists(&staging).await?;

		for file in &manifest.files {
			let contents = source.fetch_file(&file.path).await?;
			if !file.matches(&contents) {
				remove_dir_if_exists(&staging).await?;
				return Err(AssetError::IntegrityMismatch {
					path: file.path.clone(),
				});
			}

			write_atomic(staging.join(&file.path), &contents).await?;
			debug!(path = %file.path, size = file.size, "Staged asset file");
		}

		let manifest_bytes = serde_json::to_vec_pretty(manifest)
			.map_err(|e| AssetError::Manifest(e.to_string()))?;
		write_atomic(staging.join(MANIFEST_FILE), &manifest_bytes).await?;

		let target = self.version_dir(manifest.version);
		remove_dir_if_exists(&target).await?;
		fs::rename(&staging, &target)
			.await
			.map_err(|e| FileIOError::from_std_io_err(&target, e))?;

		Ok(target)
	}

	/// Points `ACTIVE` at `version` and drops every other installed version.
	pub async fn activate(&self, version: u64) -> Result<PathBuf, AssetError> {
		let dir = self.version_dir(version);
		if !fs::try_exists(&dir).await.unwrap_or(false) {
			return Err(AssetError::NothingToActivate);
		}

		write_atomic(self.root.join(ACTIVE_FILE), version.to_string().as_bytes()).await?;

		for old in self.installed_versions().await? {
			if old != version {
				if let Err(e) = remove_dir_if_exists(&self.version_dir(old)).await {
					warn!(?e, old, "Failed to remove superseded asset version");
				}
			}
		}

		Ok(dir)
	}
}
