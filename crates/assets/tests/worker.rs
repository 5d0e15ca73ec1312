use pos_actors::Actors;
use pos_assets::{
	run_actor, AssetError, AssetFile, AssetManifest, AssetSource, AssetWorker, ManifestFetch,
	WorkerConfig, WorkerEvent, WorkerPhase,
};
use pos_sync::SyncGate;

use std::{collections::HashMap, path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::tempdir;
use tokio::sync::{broadcast, Mutex};
use tracing_test::traced_test;

/// In-memory stand-in for the sync server's asset routes.
#[derive(Default)]
struct FakeSource {
	manifest: Mutex<Option<AssetManifest>>,
	files: Mutex<HashMap<String, Bytes>>,
}

impl FakeSource {
	async fn publish(&self, version: u64, files: &[(&str, &str)]) {
		let mut stored = self.files.lock().await;
		let files = files
			.iter()
			.map(|(path, contents)| {
				stored.insert((*path).to_string(), Bytes::from(contents.to_string()));
				AssetFile {
					path: (*path).to_string(),
					hash: blake3::hash(contents.as_bytes()).to_hex().to_string(),
					size: contents.len() as u64,
				}
			})
			.collect();

		*self.manifest.lock().await = Some(AssetManifest { version, files });
	}

	async fn corrupt(&self, path: &str) {
		self.files
			.lock()
			.await
			.insert(path.to_string(), Bytes::from_static(b"tampered"));
	}
}

#[async_trait]
impl AssetSource for FakeSource {
	async fn fetch_manifest(&self, etag: Option<&str>) -> Result<ManifestFetch, AssetError> {
		let manifest = self
			.manifest
			.lock()
			.await
			.clone()
			.ok_or_else(|| AssetError::Manifest("nothing published".into()))?;

		if etag == Some(manifest.etag().as_str()) {
			return Ok(ManifestFetch::NotModified);
		}

		Ok(ManifestFetch::Fetched {
			etag: Some(manifest.etag()),
			manifest,
		})
	}

	async fn fetch_file(&self, path: &str) -> Result<Bytes, AssetError> {
		self.files
			.lock()
			.await
			.get(path)
			.cloned()
			.ok_or_else(|| AssetError::Manifest(format!("missing {path}")))
	}
}

fn config() -> WorkerConfig {
	WorkerConfig {
		poll_interval: Duration::from_secs(3600),
		activation_timeout: Duration::from_millis(100),
	}
}

async fn worker(dir: &Path, source: &Arc<FakeSource>, gate: &SyncGate) -> Arc<AssetWorker> {
	AssetWorker::new(dir, config(), Arc::clone(source) as Arc<dyn AssetSource>, gate.clone())
		.await
		.unwrap()
}

fn drain(rx: &mut broadcast::Receiver<WorkerEvent>) -> Vec<WorkerEvent> {
	std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

#[tokio::test]
#[traced_test]
async fn first_version_is_activated_without_reload() {
	let dir = tempdir().unwrap();
	let source = Arc::new(FakeSource::default());
	source.publish(1, &[("index.html", "v1")]).await;

	let worker = worker(dir.path(), &source, &SyncGate::new()).await;
	let mut events = worker.subscribe();

	assert_eq!(worker.check_for_update().await.unwrap(), Some(1));

	let snapshot = worker.snapshot().await;
	assert_eq!(snapshot.phase, WorkerPhase::Active);
	assert_eq!(snapshot.active, Some(1));

	let events = drain(&mut events);
	assert!(matches!(events.as_slice(), [WorkerEvent::Activated { version: 1, .. }]));

	let active = worker.active_dir().await.unwrap().unwrap();
	assert_eq!(
		tokio::fs::read_to_string(active.join("index.html")).await.unwrap(),
		"v1"
	);

	// Unchanged manifest is answered with 304
	assert_eq!(worker.check_for_update().await.unwrap(), None);
}

#[tokio::test]
#[traced_test]
async fn update_waits_for_confirmation_and_reloads_once() {
	let dir = tempdir().unwrap();
	let source = Arc::new(FakeSource::default());
	source.publish(1, &[("index.html", "v1")]).await;

	let worker = worker(dir.path(), &source, &SyncGate::new()).await;
	worker.check_for_update().await.unwrap();
	let mut events = worker.subscribe();

	source.publish(2, &[("index.html", "v2"), ("js/app.js", "boot()")]).await;
	assert_eq!(worker.check_for_update().await.unwrap(), Some(2));

	let snapshot = worker.snapshot().await;
	assert_eq!(snapshot.phase, WorkerPhase::InstalledWaiting);
	assert_eq!(snapshot.active, Some(1));
	assert_eq!(drain(&mut events), [WorkerEvent::UpdateAvailable { version: 2 }]);

	let activation = worker.activate().await.unwrap();
	assert_eq!(activation.version, 2);
	assert!(activation.reload);

	let drained = drain(&mut events);
	assert_eq!(drained.len(), 2);
	assert!(matches!(drained[0], WorkerEvent::Activated { version: 2, .. }));
	assert_eq!(drained[1], WorkerEvent::ReloadRequested { version: 2 });

	// A second confirmation has nothing left to do and never reloads again
	assert!(matches!(
		worker.activate().await,
		Err(AssetError::NothingToActivate)
	));
	assert!(drain(&mut events).is_empty());

	// Superseded version is cleaned up
	assert!(!dir.path().join("versions/1").exists());
	assert!(dir.path().join("versions/2/js/app.js").exists());
}

#[tokio::test]
#[traced_test]
async fn activation_is_deferred_while_a_sync_attempt_is_in_flight() {
	let dir = tempdir().unwrap();
	let gate = SyncGate::new();
	let source = Arc::new(FakeSource::default());
	source.publish(1, &[("index.html", "v1")]).await;

	let worker = worker(dir.path(), &source, &gate).await;
	worker.check_for_update().await.unwrap();
	source.publish(2, &[("index.html", "v2")]).await;
	worker.check_for_update().await.unwrap();

	let attempt = gate.begin_attempt().await;
	assert!(matches!(
		worker.activate().await,
		Err(AssetError::ActivationDeferred(_))
	));
	assert_eq!(worker.snapshot().await.phase, WorkerPhase::InstalledWaiting);
	assert_eq!(worker.snapshot().await.active, Some(1));

	// Once the attempt resolves the swap goes through
	let activating = tokio::spawn({
		let worker = Arc::clone(&worker);
		async move { worker.activate().await }
	});
	tokio::time::sleep(Duration::from_millis(20)).await;
	drop(attempt);

	assert_eq!(activating.await.unwrap().unwrap().version, 2);
}

#[tokio::test]
#[traced_test]
async fn corrupt_download_keeps_the_active_version() {
	let dir = tempdir().unwrap();
	let source = Arc::new(FakeSource::default());
	source.publish(1, &[("index.html", "v1")]).await;

	let worker = worker(dir.path(), &source, &SyncGate::new()).await;
	worker.check_for_update().await.unwrap();
	let mut events = worker.subscribe();

	source.publish(2, &[("index.html", "v2")]).await;
	source.corrupt("index.html").await;

	assert!(matches!(
		worker.check_for_update().await,
		Err(AssetError::IntegrityMismatch { .. })
	));
	assert!(matches!(
		drain(&mut events).as_slice(),
		[WorkerEvent::InstallFailed { version: 2, .. }]
	));

	let snapshot = worker.snapshot().await;
	assert_eq!(snapshot.phase, WorkerPhase::Active);
	assert_eq!(snapshot.active, Some(1));
	assert!(!dir.path().join("versions/2").exists());

	// Retried on the next poll once the server serves good bytes
	source.publish(2, &[("index.html", "v2")]).await;
	assert_eq!(worker.check_for_update().await.unwrap(), Some(2));
}

#[tokio::test]
#[traced_test]
async fn failed_newer_download_keeps_the_waiting_version() {
	let dir = tempdir().unwrap();
	let source = Arc::new(FakeSource::default());
	source.publish(1, &[("index.html", "v1")]).await;

	let worker = worker(dir.path(), &source, &SyncGate::new()).await;
	worker.check_for_update().await.unwrap();
	source.publish(2, &[("index.html", "v2")]).await;
	assert_eq!(worker.check_for_update().await.unwrap(), Some(2));

	source.publish(3, &[("index.html", "v3")]).await;
	source.corrupt("index.html").await;
	assert!(matches!(
		worker.check_for_update().await,
		Err(AssetError::IntegrityMismatch { .. })
	));

	let snapshot = worker.snapshot().await;
	assert_eq!(snapshot.phase, WorkerPhase::InstalledWaiting);
	assert_eq!(snapshot.waiting, Some(2));
	assert!(!dir.path().join("versions/3").exists());

	assert_eq!(worker.activate().await.unwrap().version, 2);
	assert_eq!(
		tokio::fs::read_to_string(dir.path().join("versions/2/index.html"))
			.await
			.unwrap(),
		"v2"
	);
}

#[tokio::test]
#[traced_test]
async fn deferred_first_activation_is_retried_on_the_next_poll() {
	let dir = tempdir().unwrap();
	let gate = SyncGate::new();
	let source = Arc::new(FakeSource::default());
	source.publish(1, &[("index.html", "v1")]).await;

	let worker = worker(dir.path(), &source, &gate).await;

	let attempt = gate.begin_attempt().await;
	assert!(matches!(
		worker.check_for_update().await,
		Err(AssetError::ActivationDeferred(_))
	));
	assert_eq!(worker.snapshot().await.phase, WorkerPhase::InstalledWaiting);
	drop(attempt);

	// The manifest is unchanged, only the pending activation is left to do
	assert_eq!(worker.check_for_update().await.unwrap(), None);
	let snapshot = worker.snapshot().await;
	assert_eq!(snapshot.phase, WorkerPhase::Active);
	assert_eq!(snapshot.active, Some(1));
}

#[tokio::test]
#[traced_test]
async fn unsafe_manifest_is_refused() {
	let dir = tempdir().unwrap();
	let source = Arc::new(FakeSource::default());
	source.publish(1, &[("../escape.js", "x")]).await;

	let worker = worker(dir.path(), &source, &SyncGate::new()).await;

	assert!(matches!(
		worker.check_for_update().await,
		Err(AssetError::UnsafePath(_))
	));
	assert_eq!(worker.snapshot().await.phase, WorkerPhase::None);
	assert!(!dir.path().join("escape.js").exists());
}

#[tokio::test]
#[traced_test]
async fn waiting_version_survives_a_restart() {
	let dir = tempdir().unwrap();
	let source = Arc::new(FakeSource::default());
	source.publish(1, &[("index.html", "v1")]).await;

	{
		let worker = worker(dir.path(), &source, &SyncGate::new()).await;
		worker.check_for_update().await.unwrap();
		source.publish(2, &[("index.html", "v2")]).await;
		worker.check_for_update().await.unwrap();
	}

	let worker = worker(dir.path(), &source, &SyncGate::new()).await;
	let snapshot = worker.snapshot().await;
	assert_eq!(snapshot.phase, WorkerPhase::InstalledWaiting);
	assert_eq!(snapshot.active, Some(1));

	// Same version is not downloaded again
	assert_eq!(worker.check_for_update().await.unwrap(), None);
	assert!(worker.activate().await.unwrap().reload);
}

#[tokio::test]
#[traced_test]
async fn running_worker_answers_commands() {
	let dir = tempdir().unwrap();
	let source = Arc::new(FakeSource::default());
	source.publish(1, &[("index.html", "v1")]).await;

	let worker = worker(dir.path(), &source, &SyncGate::new()).await;
	let handle = worker.handle();
	let mut events = handle.subscribe();

	let actors = Actors::with_grace_period(Duration::from_secs(1));
	actors
		.declare(
			"Asset Worker",
			{
				let worker = Arc::clone(&worker);
				move |stop| run_actor(Arc::clone(&worker), stop)
			},
			true,
		)
		.await;

	// Either the first tick or this request installs version 1
	let _ = handle.check_now().await;
	assert_eq!(worker.snapshot().await.active, Some(1));

	source.publish(2, &[("index.html", "v2")]).await;
	let _ = handle.check_now().await;
	assert_eq!(worker.snapshot().await.phase, WorkerPhase::InstalledWaiting);
	assert!(drain(&mut events).contains(&WorkerEvent::UpdateAvailable { version: 2 }));

	assert_eq!(handle.confirm_activation().await.unwrap().version, 2);
	assert_eq!(worker.snapshot().await.active, Some(2));

	actors.stop_all().await;
	assert!(!actors.is_running("Asset Worker").await);
}
