//! One-shot catalog load at startup. Nothing in the sync path waits on it.

use pos_cloud_api::{upstream, RequestConfigProvider};
use pos_utils::{error::FileIOError, fs::write_atomic};

use std::{path::Path, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument};

use crate::config::InventorySettings;

pub const INVENTORY_FILE: &str = "inventory.json";

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
	#[error(transparent)]
	Api(#[from] pos_cloud_api::Error),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("failed to serialize inventory snapshot: {0}")]
	Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot<'a> {
	resource: &'a str,
	fetched_at: DateTime<Utc>,
	items: Vec<Value>,
}

/// Fetches every page of the configured collection and writes the snapshot
/// to `<data_dir>/inventory.json`. Returns the number of items.
#[instrument(skip_all, fields(resource = %settings.resource), err)]
pub async fn load(
	config_provider: Arc<impl RequestConfigProvider + Send + Sync>,
	settings: &InventorySettings,
	data_dir: &Path,
) -> Result<usize, InventoryError> {
	let mut items = Vec::new();

	for page in 1..=settings.max_pages.max(1) {
		let fetched = upstream::list(
			config_provider.get_request_config().await,
			&settings.resource,
			&upstream::list::Query {
				page,
				per_page: settings.per_page,
				search: settings.search.as_deref(),
			},
		)
		.await?;

		let received = fetched.data.len();
		items.extend(fetched.data);

		let reached_total = fetched
			.total
			.is_some_and(|total| items.len() as u64 >= total);

		if received < settings.per_page as usize || reached_total {
			break;
		}
	}

	let snapshot = Snapshot {
		resource: &settings.resource,
		fetched_at: Utc::now(),
		items,
	};

	write_atomic(
		data_dir.join(INVENTORY_FILE),
		&serde_json::to_vec(&snapshot)?,
	)
	.await?;

	info!(items = snapshot.items.len(), "Inventory loaded");

	Ok(snapshot.items.len())
}
