use pos_actors::Stopper;
use pos_sync::SyncGate;

use std::{future::IntoFuture, path::PathBuf, sync::Arc, time::Duration};

use async_channel as chan;
use tokio::{
	sync::{broadcast, oneshot, Mutex},
	time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info, instrument, warn};

use crate::{
	Activation, AssetError, AssetSource, AssetStore, Lifecycle, LifecycleSnapshot, ManifestFetch,
};

const EVENTS_CAPACITY: usize = 16;
const COMMANDS_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
	pub poll_interval: Duration,
	/// How long an activation waits for an in-flight sync attempt.
	pub activation_timeout: Duration,
}

impl Default for WorkerConfig {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_secs(60),
			activation_timeout: Duration::from_secs(30),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
	UpdateAvailable { version: u64 },
	Activated { version: u64, dir: PathBuf },
	/// The running client should reload onto the new version.
	ReloadRequested { version: u64 },
	InstallFailed { version: u64, error: String },
}

enum WorkerCommand {
	CheckNow(oneshot::Sender<Result<Option<u64>, AssetError>>),
	Activate(oneshot::Sender<Result<Activation, AssetError>>),
}

pub struct AssetWorker {
	config: WorkerConfig,
	source: Arc<dyn AssetSource>,
	store: AssetStore,
	gate: SyncGate,
	lifecycle: Mutex<Lifecycle>,
	etag: Mutex<Option<String>>,
	events_tx: broadcast::Sender<WorkerEvent>,
	commands_tx: chan::Sender<WorkerCommand>,
	commands_rx: chan::Receiver<WorkerCommand>,
}

impl AssetWorker {
	/// Opens the cache under `cache_dir` and picks up where the last run left off:
	/// a version staged before a restart is still waiting for activation.
	pub async fn new(
		cache_dir: impl Into<PathBuf>,
		config: WorkerConfig,
		source: Arc<dyn AssetSource>,
		gate: SyncGate,
	) -> Result<Arc<Self>, AssetError> {
		let store = AssetStore::open(cache_dir).await?;
		let active = store.active_version().await?;
		let staged = store.installed_versions().await?.last().copied();

		let lifecycle = Lifecycle::restore(active, staged);
		debug!(snapshot = ?lifecycle.snapshot(), "Restored asset lifecycle");

		let (events_tx, _) = broadcast::channel(EVENTS_CAPACITY);
		let (commands_tx, commands_rx) = chan::bounded(COMMANDS_CAPACITY);

		let worker = Arc::new(Self {
			config,
			source,
			store,
			gate,
			lifecycle: Mutex::new(lifecycle),
			etag: Mutex::new(None),
			events_tx,
			commands_tx,
			commands_rx,
		});

		if active.is_none() && staged.is_some() {
			match worker.activate().await {
				Ok(_) | Err(AssetError::ActivationDeferred(_)) => {}
				Err(e) => return Err(e),
			}
		}

		Ok(worker)
	}

	#[must_use]
	pub fn handle(&self) -> WorkerHandle {
		WorkerHandle {
			commands_tx: self.commands_tx.clone(),
			events_tx: self.events_tx.clone(),
		}
	}

	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
		self.events_tx.subscribe()
	}

	pub async fn snapshot(&self) -> LifecycleSnapshot {
		self.lifecycle.lock().await.snapshot()
	}

	pub async fn active_dir(&self) -> Result<Option<PathBuf>, AssetError> {
		self.store.active_dir().await
	}

	fn emit(&self, event: WorkerEvent) {
		// No subscribers is fine, the lifecycle snapshot carries the same state
		let _ = self.events_tx.send(event);
	}

	/// Polls the manifest once and installs a newer version if there is one.
	///
	/// Returns the version that was installed. The very first version a terminal
	/// installs is activated right away, later ones wait for [`Self::activate`].
	/// A first activation that was deferred is retried before polling, since an
	/// unchanged manifest would otherwise never bring it back.
	#[instrument(skip(self))]
	pub async fn check_for_update(&self) -> Result<Option<u64>, AssetError> {
		let pending_bootstrap = {
			let lifecycle = self.lifecycle.lock().await;
			lifecycle.active().is_none() && lifecycle.waiting().is_some()
		};

		if pending_bootstrap {
			self.activate().await?;
		}

		let known_etag = self.etag.lock().await.clone();

		let (manifest, etag) = match self.source.fetch_manifest(known_etag.as_deref()).await? {
			ManifestFetch::NotModified => return Ok(None),
			ManifestFetch::Fetched { manifest, etag } => (manifest, etag),
		};

		let version = manifest.version;

		let wanted = self.lifecycle.lock().await.begin_install(version).is_ok();

		if !wanted {
			*self.etag.lock().await = etag;
			return Ok(None);
		}

		info!(version, files = manifest.files.len(), "Installing asset version");

		if let Err(e) = self.store.stage(&manifest, self.source.as_ref()).await {
			self.lifecycle.lock().await.abort_install(version);
			error!(?e, version, "Failed to install asset version");
			self.emit(WorkerEvent::InstallFailed {
				version,
				error: e.to_string(),
			});
			return Err(e);
		}

		*self.etag.lock().await = etag;

		let bootstrap = {
			let mut lifecycle = self.lifecycle.lock().await;
			lifecycle.finish_install(version) && lifecycle.active().is_none()
		};

		if bootstrap {
			self.activate().await?;
		} else {
			info!(version, "Asset version installed, waiting for activation");
			self.emit(WorkerEvent::UpdateAvailable { version });
		}

		Ok(Some(version))
	}

	/// Makes the waiting version active.
	///
	/// Waits for an in-flight sync attempt to resolve and holds new ones off
	/// until the swap is done. Gives up after the configured activation
	/// timeout, leaving the version waiting.
	#[instrument(skip(self))]
	pub async fn activate(&self) -> Result<Activation, AssetError> {
		let Some(version) = self.lifecycle.lock().await.waiting() else {
			return Err(AssetError::NothingToActivate);
		};

		let Some(_permit) = self.gate.exclusive(self.config.activation_timeout).await else {
			warn!(version, "Sync attempt still in flight, activation deferred");
			return Err(AssetError::ActivationDeferred(
				self.config.activation_timeout,
			));
		};

		let dir = self.store.activate(version).await?;
		let activation = self.lifecycle.lock().await.activate(version)?;

		info!(version, reload = activation.reload, "Asset version activated");
		self.emit(WorkerEvent::Activated { version, dir });
		if activation.reload {
			self.emit(WorkerEvent::ReloadRequested { version });
		}

		Ok(activation)
	}
}

/// Cheap handle used to talk to a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
	commands_tx: chan::Sender<WorkerCommand>,
	events_tx: broadcast::Sender<WorkerEvent>,
}

impl WorkerHandle {
	async fn request<T>(
		&self,
		command: impl FnOnce(oneshot::Sender<Result<T, AssetError>>) -> WorkerCommand,
	) -> Result<T, AssetError> {
		let (tx, rx) = oneshot::channel();

		self.commands_tx
			.send(command(tx))
			.await
			.map_err(|_| AssetError::WorkerStopped)?;

		rx.await.map_err(|_| AssetError::WorkerStopped)?
	}

	pub async fn check_now(&self) -> Result<Option<u64>, AssetError> {
		self.request(WorkerCommand::CheckNow).await
	}

	/// Operator confirmation of a waiting update.
	pub async fn confirm_activation(&self) -> Result<Activation, AssetError> {
		self.request(WorkerCommand::Activate).await
	}

	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
		self.events_tx.subscribe()
	}
}

pub async fn run_actor(worker: Arc<AssetWorker>, stop: Stopper) {
	enum Race {
		Stop,
		Tick,
		Command(WorkerCommand),
	}

	if let Some(version) = worker.lifecycle.lock().await.waiting() {
		worker.emit(WorkerEvent::UpdateAvailable { version });
	}

	let mut ticker = interval(worker.config.poll_interval);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		let race = tokio::select! {
			() = (&stop).into_future() => Race::Stop,
			_ = ticker.tick() => Race::Tick,
			command = worker.commands_rx.recv() => command.map_or(Race::Stop, Race::Command),
		};

		match race {
			Race::Stop => break,

			Race::Tick => match worker.check_for_update().await {
				Ok(_) => {}
				Err(AssetError::Api(e)) => debug!(?e, "Asset manifest unreachable"),
				Err(e) => warn!(?e, "Asset update check failed"),
			},

			Race::Command(WorkerCommand::CheckNow(reply)) => {
				if reply.send(worker.check_for_update().await).is_err() {
					warn!("Update check requester went away");
				}
			}

			Race::Command(WorkerCommand::Activate(reply)) => {
				if reply.send(worker.activate().await).is_err() {
					warn!("Activation requester went away");
				}
			}
		}
	}

	info!("Asset worker stopped");
}
