use pos_actors::{ActorStatus, Actors};
use pos_assets::{
	run_actor as run_asset_worker, Activation, AssetSource, AssetWorker, HttpAssetSource,
	LifecycleSnapshot, WorkerConfig, WorkerEvent, WorkerHandle,
};
use pos_cloud_api::RequestConfig;
use pos_queue::{Queue, QueueConfig, QueueHealth};
use pos_sync::{Decimal, SyncGate, TransactionId, TransactionRecord, MAX_TOTAL_SCALE};
use pos_utils::error::FileIOError;

use std::{
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use chrono::Utc;
use serde_json::Value;
use tokio::{
	fs,
	sync::{broadcast, Mutex},
	task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
	config::TerminalConfig,
	inventory,
	sync::{
		run_actor as run_sync_client, ApiConfig, HttpTransport, SyncClient, SyncClientConfig,
		SyncEvent, SyncTransport,
	},
	NodeError,
};

const QUEUE_FILE: &str = "queue.db";
const SYNC_CLIENT: &str = "Sync Client";
const ASSET_WORKER: &str = "Asset Worker";

/// A running terminal: the local queue, the Sync Client and the asset worker.
pub struct Node {
	config: Mutex<TerminalConfig>,
	pub data_dir: PathBuf,
	api: Arc<ApiConfig>,
	queue: Arc<Queue>,
	sync: Arc<SyncClient>,
	assets: Arc<AssetWorker>,
	assets_handle: WorkerHandle,
	actors: Actors,
	inventory: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
	pub async fn start(
		data_dir: impl AsRef<Path>,
		config: TerminalConfig,
	) -> Result<Arc<Self>, NodeError> {
		let data_dir = data_dir.as_ref().to_path_buf();
		fs::create_dir_all(&data_dir)
			.await
			.map_err(|e| FileIOError::from_std_io_err(&data_dir, e))?;

		let queue = Arc::new(
			Queue::open(data_dir.join(QUEUE_FILE), QueueConfig::from(&config.queue)).await?,
		);
		queue.recover_interrupted().await?;

		let sync_config = SyncClientConfig::from(&config.sync);
		let api = ApiConfig::new(RequestConfig::new(
			&config.api_url,
			config.api_key.clone(),
			sync_config.request_timeout,
		)?);

		let gate = SyncGate::new();

		let sync = SyncClient::new(
			sync_config,
			Arc::clone(&queue),
			Arc::new(HttpTransport::new(Arc::clone(&api))) as Arc<dyn SyncTransport>,
			gate.clone(),
		);

		// Asset downloads may take longer than a single sync request
		let asset_source = HttpAssetSource::new(
			Arc::clone(&api),
			sync_config.request_timeout.max(Duration::from_secs(60)),
		);
		let assets = AssetWorker::new(
			data_dir.join(&config.assets.cache_dir),
			WorkerConfig::from(&config.assets),
			Arc::new(asset_source) as Arc<dyn AssetSource>,
			gate,
		)
		.await?;
		let assets_handle = assets.handle();

		let inventory_enabled = config.inventory.enabled;
		let api_url = config.api_url.clone();

		let node = Arc::new(Self {
			config: Mutex::new(config),
			data_dir,
			api,
			queue,
			sync,
			assets,
			assets_handle,
			actors: Actors::with_grace_period(Duration::from_secs(15)),
			inventory: Mutex::new(None),
		});

		node.actors
			.declare(
				SYNC_CLIENT,
				{
					let sync = Arc::clone(&node.sync);
					move |stop| run_sync_client(Arc::clone(&sync), stop)
				},
				true,
			)
			.await;

		node.actors
			.declare(
				ASSET_WORKER,
				{
					let assets = Arc::clone(&node.assets);
					move |stop| run_asset_worker(Arc::clone(&assets), stop)
				},
				true,
			)
			.await;

		if inventory_enabled {
			node.spawn_inventory_load().await;
		}

		info!(
			data_dir = %node.data_dir.display(),
			%api_url,
			"Terminal node started"
		);

		Ok(node)
	}

	async fn spawn_inventory_load(&self) {
		let api = Arc::clone(&self.api);
		let settings = self.config.lock().await.inventory.clone();
		let data_dir = self.data_dir.clone();

		*self.inventory.lock().await = Some(tokio::spawn(async move {
			if let Err(e) = inventory::load(api, &settings, &data_dir).await {
				warn!(?e, "Inventory load failed, catalog stays as last loaded");
			}
		}));
	}

	/// Queues a completed sale. Never touches the network.
	pub async fn record_sale(
		&self,
		total: Decimal,
		payload: Value,
	) -> Result<TransactionRecord, NodeError> {
		if total.scale() > MAX_TOTAL_SCALE || total.is_sign_negative() {
			return Err(NodeError::InvalidTotal(total));
		}

		let record = TransactionRecord::new(Utc::now(), total, payload);
		self.queue.enqueue(&record).await?;
		self.sync.notify_new_sale();

		info!(id = %record.id, %total, "Sale recorded");

		Ok(record)
	}

	pub async fn queue_health(&self) -> Result<QueueHealth, NodeError> {
		Ok(self.queue.health().await?)
	}

	pub async fn transaction(
		&self,
		id: &TransactionId,
	) -> Result<Option<TransactionRecord>, NodeError> {
		Ok(self.queue.get(id).await?)
	}

	/// Operator releases a record parked for review.
	pub async fn requeue(&self, id: &TransactionId) -> Result<bool, NodeError> {
		let requeued = self.queue.requeue(id).await?;
		if requeued {
			self.sync.sync_now();
		}
		Ok(requeued)
	}

	pub async fn purge_synced(&self) -> Result<u64, NodeError> {
		Ok(self.queue.purge_synced().await?)
	}

	pub fn sync_now(&self) {
		self.sync.sync_now();
	}

	#[must_use]
	pub fn is_sync_suspended(&self) -> bool {
		self.sync.is_suspended()
	}

	/// Settings the node runs with, including a key replaced at runtime.
	pub async fn config(&self) -> TerminalConfig {
		self.config.lock().await.clone()
	}

	/// Replaces the shared secret for sync, asset and inventory calls, resumes a
	/// suspended sync and saves the key so it survives a restart.
	pub async fn set_api_key(&self, api_key: Option<String>) -> Result<(), NodeError> {
		self.api.set_api_key(api_key.clone()).await;
		self.sync.sync_now();

		let mut config = self.config.lock().await;
		config.api_key = api_key;
		config
			.save(&self.data_dir)
			.await
			.map_err(NodeError::Config)
	}

	pub async fn check_for_update(&self) -> Result<Option<u64>, NodeError> {
		Ok(self.assets_handle.check_now().await?)
	}

	/// Operator confirmation of a waiting asset update.
	pub async fn confirm_update(&self) -> Result<Activation, NodeError> {
		Ok(self.assets_handle.confirm_activation().await?)
	}

	pub async fn asset_status(&self) -> LifecycleSnapshot {
		self.assets.snapshot().await
	}

	#[must_use]
	pub fn subscribe_sync(&self) -> broadcast::Receiver<SyncEvent> {
		self.sync.subscribe()
	}

	#[must_use]
	pub fn subscribe_assets(&self) -> broadcast::Receiver<WorkerEvent> {
		self.assets_handle.subscribe()
	}

	pub async fn actors_state(&self) -> Vec<ActorStatus> {
		self.actors.statuses().await
	}

	/// Stops background work. Safe between any two records: an attempt cut
	/// short stays `IN_FLIGHT` and is recovered on the next start.
	pub async fn shutdown(&self) {
		if let Some(handle) = self.inventory.lock().await.take() {
			handle.abort();
		}

		self.actors.stop_all().await;
		self.queue.close().await;

		info!("Terminal node stopped");
	}
}
