use pos_actors::{Actors, Stopper};
use pos_core::sync::{SyncClient, SyncClientConfig, SyncEvent, SyncTransport};
use pos_queue::{Queue, QueueConfig};
use pos_sync::{
	wire::{Acceptance, SyncRequest},
	Backoff, Decimal, SyncError, SyncGate, SyncState, TransactionId, TransactionRecord,
};

use std::{
	collections::{HashMap, HashSet, VecDeque},
	sync::Arc,
	time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use serde_json::json;
use tokio::{
	sync::{broadcast, Mutex, Notify},
	time::sleep,
};
use tracing_test::traced_test;

enum Script {
	Reply(Result<Acceptance, SyncError>),
	Hang,
	Block(Arc<Notify>),
}

/// Answers from a per id script, accepting anything unscripted.
#[derive(Default)]
struct FakeTransport {
	scripts: Mutex<HashMap<String, VecDeque<Script>>>,
	ledger: Mutex<HashSet<String>>,
	submissions: Mutex<Vec<String>>,
	lookups: Mutex<Vec<String>>,
}

impl FakeTransport {
	async fn script(&self, id: &str, script: Script) {
		self.scripts
			.lock()
			.await
			.entry(id.to_string())
			.or_default()
			.push_back(script);
	}

	async fn submissions(&self) -> Vec<String> {
		self.submissions.lock().await.clone()
	}
}

#[async_trait]
impl SyncTransport for FakeTransport {
	async fn submit(&self, request: &SyncRequest) -> Result<Acceptance, SyncError> {
		let id = request.id.to_string();
		self.submissions.lock().await.push(id.clone());

		let script = self
			.scripts
			.lock()
			.await
			.get_mut(&id)
			.and_then(VecDeque::pop_front);

		match script {
			Some(Script::Reply(reply)) => {
				if reply.is_ok() {
					self.ledger.lock().await.insert(id);
				}
				reply
			}
			Some(Script::Hang) => {
				sleep(Duration::from_secs(5)).await;
				Err(SyncError::ServerTransient("hung".into()))
			}
			Some(Script::Block(release)) => {
				release.notified().await;
				self.ledger.lock().await.insert(id);
				Ok(Acceptance::Accepted {
					synced_at: Utc::now(),
				})
			}
			None => {
				self.ledger.lock().await.insert(id);
				Ok(Acceptance::Accepted {
					synced_at: Utc::now(),
				})
			}
		}
	}

	async fn exists(&self, id: &TransactionId) -> Result<bool, SyncError> {
		self.lookups.lock().await.push(id.to_string());
		Ok(self.ledger.lock().await.contains(id.as_str()))
	}
}

fn config() -> SyncClientConfig {
	SyncClientConfig {
		interval: Duration::from_secs(3600),
		request_timeout: Duration::from_millis(50),
		check_existence: true,
		rejected_max_attempts: 3,
		max_attempts: 20,
		backoff: Backoff {
			base: Duration::from_millis(10),
			cap: Duration::from_secs(1),
			jitter: 0.0,
		},
	}
}

struct Harness {
	queue: Arc<Queue>,
	transport: Arc<FakeTransport>,
	gate: SyncGate,
	client: Arc<SyncClient>,
	events: broadcast::Receiver<SyncEvent>,
}

async fn harness(config: SyncClientConfig) -> Harness {
	let queue = Arc::new(Queue::in_memory(QueueConfig::default()).await.unwrap());
	let transport = Arc::new(FakeTransport::default());
	let gate = SyncGate::new();
	let client = SyncClient::new(
		config,
		Arc::clone(&queue),
		Arc::clone(&transport) as Arc<dyn SyncTransport>,
		gate.clone(),
	);
	let events = client.subscribe();

	Harness {
		queue,
		transport,
		gate,
		client,
		events,
	}
}

impl Harness {
	async fn sale(&self, id: &str, minutes_ago: i64) {
		self.queue
			.enqueue(&TransactionRecord::with_id(
				TransactionId::parse(id).unwrap(),
				Utc::now() - chrono::Duration::minutes(minutes_ago),
				Decimal::new(1250, 2),
				json!({ "lines": [] }),
			))
			.await
			.unwrap();
	}

	async fn record(&self, id: &str) -> TransactionRecord {
		self.queue
			.get(&TransactionId::parse(id).unwrap())
			.await
			.unwrap()
			.unwrap()
	}

	async fn pending(&self) -> Vec<String> {
		self.queue
			.list_pending()
			.map_ok(|record| record.id.to_string())
			.try_collect()
			.await
			.unwrap()
	}

	fn events(&mut self) -> Vec<SyncEvent> {
		std::iter::from_fn(|| self.events.try_recv().ok()).collect()
	}
}

#[tokio::test]
#[traced_test]
async fn sale_made_offline_syncs_once_the_network_is_back() {
	let h = harness(config()).await;
	h.sale("t-1", 0).await;
	assert_eq!(h.pending().await, ["t-1"]);

	h.transport
		.script(
			"t-1",
			Script::Reply(Err(SyncError::NetworkUnavailable("offline".into()))),
		)
		.await;

	let report = h.client.run_cycle(None).await.unwrap();
	assert_eq!(report.failed, 1);
	let record = h.record("t-1").await;
	assert_eq!(record.sync_state, SyncState::Failed);
	assert_eq!(record.attempts, 1);
	assert_eq!(h.pending().await, ["t-1"]);

	// Network restored, backoff elapsed
	sleep(Duration::from_millis(30)).await;
	let report = h.client.run_cycle(None).await.unwrap();
	assert_eq!(report.synced, 1);

	assert_eq!(h.record("t-1").await.sync_state, SyncState::Synced);
	assert!(h.pending().await.is_empty());
	// The retry asked the server first
	assert_eq!(*h.transport.lookups.lock().await, ["t-1"]);
}

#[tokio::test]
#[traced_test]
async fn older_sales_are_submitted_first() {
	let h = harness(config()).await;
	h.sale("b", 1).await;
	h.sale("a", 5).await;
	h.sale("c", 0).await;

	h.client.run_cycle(None).await.unwrap();

	assert_eq!(h.transport.submissions().await, ["a", "b", "c"]);
}

#[tokio::test]
#[traced_test]
async fn repeated_timeouts_keep_the_record_with_growing_delays() {
	let mut h = harness(SyncClientConfig {
		check_existence: false,
		..config()
	})
	.await;
	h.sale("t-1", 0).await;

	for _ in 0..3 {
		h.transport.script("t-1", Script::Hang).await;
		let report = h.client.run_cycle(None).await.unwrap();
		assert_eq!(report.failed, 1);
		sleep(Duration::from_millis(60)).await;
	}

	let record = h.record("t-1").await;
	assert_eq!(record.sync_state, SyncState::Failed);
	assert_eq!(record.attempts, 3);
	assert!(!record.needs_review);
	assert!(record.last_error.unwrap().contains("timed out"));

	let delays = h
		.events()
		.into_iter()
		.filter_map(|event| match event {
			SyncEvent::RetryScheduled { delay, .. } => Some(delay),
			_ => None,
		})
		.collect::<Vec<_>>();
	assert_eq!(delays.len(), 3);
	assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
	assert!(delays.iter().all(|delay| !delay.is_zero()));
}

#[tokio::test]
#[traced_test]
async fn rejected_record_is_parked_without_blocking_later_sales() {
	let mut h = harness(SyncClientConfig {
		rejected_max_attempts: 1,
		..config()
	})
	.await;
	h.sale("t-1", 2).await;
	h.sale("t-2", 1).await;

	h.transport
		.script(
			"t-1",
			Script::Reply(Err(SyncError::ServerRejected("bad total".into()))),
		)
		.await;

	let report = h.client.run_cycle(None).await.unwrap();
	assert_eq!(report.failed, 1);
	assert_eq!(report.synced, 1);

	let parked = h.record("t-1").await;
	assert_eq!(parked.sync_state, SyncState::Failed);
	assert!(parked.needs_review);

	let health = h.queue.health().await.unwrap();
	assert_eq!(health.awaiting_review.len(), 1);
	assert_eq!(health.awaiting_review[0].id.as_str(), "t-1");

	assert!(h.events().iter().any(|event| matches!(
		event,
		SyncEvent::ParkedForReview { id, attempts: 1, .. } if id.as_str() == "t-1"
	)));

	// Parked records are not retried automatically
	let report = h.client.run_cycle(None).await.unwrap();
	assert_eq!(report.skipped, 1);
	assert_eq!(h.transport.submissions().await, ["t-1", "t-2"]);
}

#[tokio::test]
#[traced_test]
async fn retryable_failures_park_at_the_attempt_ceiling() {
	let h = harness(SyncClientConfig {
		max_attempts: 2,
		check_existence: false,
		..config()
	})
	.await;
	h.sale("t-1", 0).await;

	for _ in 0..2 {
		h.transport
			.script("t-1", Script::Reply(Err(SyncError::ServerTransient("503".into()))))
			.await;
		h.client.run_cycle(None).await.unwrap();
		sleep(Duration::from_millis(30)).await;
	}

	assert!(h.record("t-1").await.needs_review);
}

#[tokio::test]
#[traced_test]
async fn being_offline_never_parks_a_record() {
	let h = harness(SyncClientConfig {
		max_attempts: 1,
		check_existence: false,
		..config()
	})
	.await;
	h.sale("t-1", 0).await;

	for _ in 0..3 {
		h.transport
			.script(
				"t-1",
				Script::Reply(Err(SyncError::NetworkUnavailable("offline".into()))),
			)
			.await;
		h.client.run_cycle(None).await.unwrap();
		sleep(Duration::from_millis(60)).await;
	}

	let record = h.record("t-1").await;
	assert_eq!(record.attempts, 3);
	assert!(!record.needs_review);
}

#[tokio::test]
#[traced_test]
async fn conflict_from_the_server_counts_as_synced() {
	let mut h = harness(config()).await;
	h.sale("t-1", 0).await;
	h.transport
		.script("t-1", Script::Reply(Err(SyncError::DuplicateAccepted)))
		.await;

	assert_eq!(h.client.run_cycle(None).await.unwrap().synced, 1);
	assert_eq!(h.record("t-1").await.sync_state, SyncState::Synced);
	assert!(h.events().iter().any(|event| matches!(
		event,
		SyncEvent::Synced { duplicate: true, .. }
	)));
}

#[tokio::test]
#[traced_test]
async fn lost_acknowledgement_is_not_resent() {
	let h = harness(config()).await;
	h.sale("t-1", 0).await;

	// Server commits but the response never makes it back
	h.transport.ledger.lock().await.insert("t-1".to_string());
	h.transport
		.script("t-1", Script::Reply(Err(SyncError::ServerTransient("reset".into()))))
		.await;

	h.client.run_cycle(None).await.unwrap();
	sleep(Duration::from_millis(30)).await;
	h.client.run_cycle(None).await.unwrap();

	assert_eq!(h.record("t-1").await.sync_state, SyncState::Synced);
	assert_eq!(h.transport.submissions().await, ["t-1"]);
}

#[tokio::test]
#[traced_test]
async fn unauthorized_suspends_until_sync_now() {
	let mut h = harness(config()).await;
	h.sale("t-1", 1).await;
	h.sale("t-2", 0).await;
	h.transport
		.script("t-1", Script::Reply(Err(SyncError::Unauthorized("bad key".into()))))
		.await;

	h.client.run_cycle(None).await.unwrap();
	assert!(h.client.is_suspended());
	assert!(h
		.events()
		.iter()
		.any(|event| matches!(event, SyncEvent::Suspended { .. })));

	// Nothing is sent while suspended
	h.client.run_cycle(None).await.unwrap();
	assert_eq!(h.transport.submissions().await, ["t-1"]);

	h.client.sync_now();
	assert!(!h.client.is_suspended());
	let report = h.client.run_cycle(None).await.unwrap();
	assert_eq!(report.synced, 2);
}

#[tokio::test]
#[traced_test]
async fn attempt_holds_the_gate_until_it_resolves() {
	let h = harness(SyncClientConfig {
		request_timeout: Duration::from_secs(5),
		..config()
	})
	.await;
	h.sale("t-1", 0).await;

	let release = Arc::new(Notify::new());
	h.transport
		.script("t-1", Script::Block(Arc::clone(&release)))
		.await;

	let cycle = tokio::spawn({
		let client = Arc::clone(&h.client);
		async move { client.run_cycle(None).await }
	});

	while !h.gate.is_attempt_in_flight() {
		sleep(Duration::from_millis(1)).await;
	}
	assert_eq!(h.record("t-1").await.sync_state, SyncState::InFlight);
	assert!(h.gate.exclusive(Duration::from_millis(10)).await.is_none());

	release.notify_one();
	assert_eq!(cycle.await.unwrap().unwrap().synced, 1);
	assert!(h.gate.exclusive(Duration::from_millis(10)).await.is_some());
}

#[tokio::test]
#[traced_test]
async fn stop_request_ends_the_cycle_between_records() {
	let h = harness(SyncClientConfig {
		request_timeout: Duration::from_secs(5),
		..config()
	})
	.await;
	h.sale("t-1", 3).await;
	h.sale("t-2", 2).await;
	h.sale("t-3", 1).await;

	let release = Arc::new(Notify::new());
	h.transport
		.script("t-1", Script::Block(Arc::clone(&release)))
		.await;

	let report = Arc::new(Mutex::new(None));
	let actors = Arc::new(Actors::with_grace_period(Duration::from_secs(5)));
	actors
		.declare(
			"Sync Client",
			{
				let client = Arc::clone(&h.client);
				let report = Arc::clone(&report);
				move |stop: Stopper| {
					let client = Arc::clone(&client);
					let report = Arc::clone(&report);
					async move {
						*report.lock().await = Some(client.run_cycle(Some(&stop)).await.unwrap());
					}
				}
			},
			true,
		)
		.await;

	while !h.gate.is_attempt_in_flight() {
		sleep(Duration::from_millis(1)).await;
	}

	let stopping = tokio::spawn({
		let actors = Arc::clone(&actors);
		async move { actors.stop("Sync Client").await }
	});
	sleep(Duration::from_millis(20)).await;
	release.notify_one();
	stopping.await.unwrap();

	let report = report.lock().await.take().unwrap();
	assert!(report.stopped);
	assert_eq!(report.synced, 1);

	assert_eq!(h.transport.submissions().await, ["t-1"]);
	for id in ["t-2", "t-3"] {
		let record = h.record(id).await;
		assert_eq!(record.sync_state, SyncState::Pending);
		assert_eq!(record.attempts, 0);
	}
	assert_eq!(h.pending().await, ["t-2", "t-3"]);
}
