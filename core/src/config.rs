//! Terminal configuration, stored as `terminal.json` in the data directory.

use pos_assets::WorkerConfig;
use pos_queue::QueueConfig;
use pos_sync::Backoff;
use pos_utils::fs::write_atomic;

use std::{
	path::{Path, PathBuf},
	time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::sync::SyncClientConfig;

pub const CONFIG_FILE: &str = "terminal.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalConfig {
	/// Config schema version
	pub version: u32,
	/// Base url of the sync server, e.g. `http://127.0.0.1:8080`
	pub api_url: String,
	/// Shared secret sent as `x-api-key`
	#[serde(default)]
	pub api_key: Option<String>,
	#[serde(default)]
	pub sync: SyncSettings,
	#[serde(default)]
	pub queue: QueueSettings,
	#[serde(default)]
	pub assets: AssetSettings,
	#[serde(default)]
	pub inventory: InventorySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
	pub interval_secs: u64,
	pub request_timeout_ms: u64,
	/// Ask the server whether a retried record already landed before resending it.
	pub check_existence: bool,
	pub rejected_max_attempts: u32,
	pub max_attempts: u32,
	pub backoff_base_ms: u64,
	pub backoff_cap_ms: u64,
	pub backoff_jitter: f64,
}

impl Default for SyncSettings {
	fn default() -> Self {
		let backoff = Backoff::default();

		Self {
			interval_secs: 30,
			request_timeout_ms: 10_000,
			check_existence: true,
			rejected_max_attempts: 3,
			max_attempts: 20,
			backoff_base_ms: duration_ms(backoff.base),
			backoff_cap_ms: duration_ms(backoff.cap),
			backoff_jitter: backoff.jitter,
		}
	}
}

fn duration_ms(duration: Duration) -> u64 {
	u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl From<&SyncSettings> for SyncClientConfig {
	fn from(settings: &SyncSettings) -> Self {
		Self {
			interval: Duration::from_secs(settings.interval_secs.max(1)),
			request_timeout: Duration::from_millis(settings.request_timeout_ms.max(1)),
			check_existence: settings.check_existence,
			rejected_max_attempts: settings.rejected_max_attempts.max(1),
			max_attempts: settings.max_attempts.max(1),
			backoff: Backoff {
				base: Duration::from_millis(settings.backoff_base_ms.max(1)),
				cap: Duration::from_millis(settings.backoff_cap_ms.max(settings.backoff_base_ms)),
				jitter: settings.backoff_jitter.clamp(0.0, 1.0),
			},
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
	/// Records kept on disk, synced ones included, before new sales are refused.
	pub capacity: u64,
	pub page_size: u32,
}

impl Default for QueueSettings {
	fn default() -> Self {
		let defaults = QueueConfig::default();
		Self {
			capacity: defaults.capacity,
			page_size: defaults.page_size,
		}
	}
}

impl From<&QueueSettings> for QueueConfig {
	fn from(settings: &QueueSettings) -> Self {
		Self {
			capacity: settings.capacity,
			page_size: settings.page_size.max(1),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetSettings {
	pub poll_interval_secs: u64,
	pub activation_timeout_secs: u64,
	/// Relative to the data directory
	pub cache_dir: PathBuf,
}

impl Default for AssetSettings {
	fn default() -> Self {
		let defaults = WorkerConfig::default();
		Self {
			poll_interval_secs: defaults.poll_interval.as_secs(),
			activation_timeout_secs: defaults.activation_timeout.as_secs(),
			cache_dir: PathBuf::from("assets"),
		}
	}
}

impl From<&AssetSettings> for WorkerConfig {
	fn from(settings: &AssetSettings) -> Self {
		Self {
			poll_interval: Duration::from_secs(settings.poll_interval_secs.max(1)),
			activation_timeout: Duration::from_secs(settings.activation_timeout_secs),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventorySettings {
	pub enabled: bool,
	/// Upstream collection to load, relative to `api_url`
	pub resource: String,
	pub per_page: u32,
	pub search: Option<String>,
	pub max_pages: u32,
}

impl Default for InventorySettings {
	fn default() -> Self {
		Self {
			enabled: true,
			resource: "inventory".to_string(),
			per_page: 100,
			search: None,
			max_pages: 50,
		}
	}
}

impl TerminalConfig {
	const fn target_version() -> u32 {
		1
	}

	#[must_use]
	pub fn new(api_url: impl Into<String>, api_key: Option<String>) -> Self {
		Self {
			version: Self::target_version(),
			api_url: api_url.into(),
			api_key,
			sync: SyncSettings::default(),
			queue: QueueSettings::default(),
			assets: AssetSettings::default(),
			inventory: InventorySettings::default(),
		}
	}

	#[must_use]
	pub fn path(data_dir: &Path) -> PathBuf {
		data_dir.join(CONFIG_FILE)
	}

	/// Loads `terminal.json` from `data_dir`, creating it from `defaults` if missing.
	pub async fn load_or_create(data_dir: &Path, defaults: impl FnOnce() -> Self) -> Result<Self> {
		let path = Self::path(data_dir);

		match fs::read(&path).await {
			Ok(bytes) => {
				info!(?path, "Loading terminal config");
				let mut config = serde_json::from_slice::<Self>(&bytes)
					.with_context(|| format!("invalid terminal config at {}", path.display()))?;

				if config.version > Self::target_version() {
					warn!(
						found = config.version,
						supported = Self::target_version(),
						"Terminal config was written by a newer version"
					);
				} else if config.version < Self::target_version() {
					config.version = Self::target_version();
					config.save(data_dir).await?;
				}

				Ok(config)
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				warn!(?path, "No terminal config found, creating default");
				let config = defaults();
				config.save(data_dir).await?;
				Ok(config)
			}
			Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
		}
	}

	pub async fn save(&self, data_dir: &Path) -> Result<()> {
		let path = Self::path(data_dir);
		let json = serde_json::to_vec_pretty(self)?;
		write_atomic(&path, &json).await?;
		info!(?path, "Saved terminal config");
		Ok(())
	}
}
