use pos_assets::AssetManifest;

use std::{net::SocketAddr, path::PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use crate::{AppState, Ledger};

const LEDGER_FILE: &str = "ledger.db";

#[derive(Debug, Clone, Parser)]
#[command(name = "pos-server", version, about = "Sync endpoint for offline point of sale terminals")]
pub struct ServerConfig {
	/// Where the ledger database lives
	#[arg(long, env = "POS_DATA_DIR", default_value = "pos_server_data")]
	pub data_dir: PathBuf,

	#[arg(long, env = "POS_PORT", default_value_t = 8080)]
	pub port: u16,

	/// Shared secret terminals send as `x-api-key` or a bearer token
	#[arg(long, env = "POS_API_KEY", hide_env_values = true)]
	pub api_key: String,

	/// Client assets to distribute to terminals
	#[arg(long, env = "POS_ASSETS_DIR")]
	pub assets_dir: Option<PathBuf>,

	/// Version advertised in the asset manifest; bump it on every deploy
	#[arg(long, env = "POS_ASSET_VERSION", default_value_t = 1)]
	pub asset_version: u64,
}

impl ServerConfig {
	#[must_use]
	pub fn listen_addr(&self) -> SocketAddr {
		SocketAddr::from(([0, 0, 0, 0], self.port))
	}

	pub async fn build_state(&self) -> Result<AppState> {
		if self.api_key.trim().is_empty() {
			bail!("an api key is required, set POS_API_KEY");
		}

		tokio::fs::create_dir_all(&self.data_dir)
			.await
			.with_context(|| format!("failed to create {}", self.data_dir.display()))?;

		let ledger = Ledger::open(self.data_dir.join(LEDGER_FILE)).await?;
		let state = AppState::new(ledger, self.api_key.trim());

		let Some(assets_dir) = &self.assets_dir else {
			return Ok(state);
		};

		let manifest = AssetManifest::from_dir(assets_dir, self.asset_version)
			.await
			.with_context(|| format!("failed to index assets in {}", assets_dir.display()))?;

		info!(
			version = manifest.version,
			files = manifest.files.len(),
			"Serving client assets"
		);

		Ok(state.with_assets(assets_dir.clone(), manifest))
	}
}
