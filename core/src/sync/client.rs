use pos_actors::Stopper;
use pos_queue::{Failure, Queue, QueueError};
use pos_sync::{
	wire::{Acceptance, SyncRequest},
	SyncError, SyncGate, TransactionRecord,
};

use std::{
	future::IntoFuture,
	pin::pin,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use futures::TryStreamExt;
use tokio::{
	sync::{broadcast, Notify},
	time::{sleep, timeout},
};
use tracing::{debug, error, info, instrument, warn};

use super::{SyncClientConfig, SyncEvent, SyncTransport};

const EVENTS_CAPACITY: usize = 256;
const MIN_WAIT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
	pub synced: usize,
	pub failed: usize,
	/// Parked records passed over, they wait for an operator.
	pub skipped: usize,
	/// A stop was requested between two records.
	pub stopped: bool,
}

enum Outcome {
	Synced,
	/// Not eligible anymore by the time the lock was taken.
	Skipped,
	Rejected,
	Retry,
	Suspended,
}

pub struct SyncClient {
	config: SyncClientConfig,
	queue: Arc<Queue>,
	transport: Arc<dyn SyncTransport>,
	gate: SyncGate,
	wake: Notify,
	suspended: AtomicBool,
	events_tx: broadcast::Sender<SyncEvent>,
}

impl SyncClient {
	#[must_use]
	pub fn new(
		config: SyncClientConfig,
		queue: Arc<Queue>,
		transport: Arc<dyn SyncTransport>,
		gate: SyncGate,
	) -> Arc<Self> {
		let (events_tx, _) = broadcast::channel(EVENTS_CAPACITY);

		Arc::new(Self {
			config,
			queue,
			transport,
			gate,
			wake: Notify::new(),
			suspended: AtomicBool::new(false),
			events_tx,
		})
	}

	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
		self.events_tx.subscribe()
	}

	#[must_use]
	pub fn is_suspended(&self) -> bool {
		self.suspended.load(Ordering::Acquire)
	}

	/// A sale was just queued.
	pub fn notify_new_sale(&self) {
		self.wake.notify_one();
	}

	/// Explicit request, e.g. connectivity came back or the operator fixed the
	/// api key. Also lifts an `Unauthorized` suspension.
	pub fn sync_now(&self) {
		if self.suspended.swap(false, Ordering::AcqRel) {
			info!("Resuming suspended sync");
		}
		self.wake.notify_one();
	}

	fn emit(&self, event: SyncEvent) {
		// Nobody listening is fine
		let _ = self.events_tx.send(event);
	}

	/// Drains the queue once, oldest sale first.
	///
	/// A record still backing off ends the cycle so later sales are never
	/// posted ahead of it; so does a retryable failure, the server being
	/// unreachable for the rest of the queue too. Rejected records don't hold
	/// back the ones behind them.
	#[instrument(skip_all, err)]
	pub async fn run_cycle(&self, stop: Option<&Stopper>) -> Result<CycleReport, QueueError> {
		let mut report = CycleReport::default();

		self.queue.promote_due(Utc::now()).await?;

		let mut pending = pin!(self.queue.list_pending());

		while let Some(record) = pending.try_next().await? {
			if stop.is_some_and(Stopper::check_stop) {
				report.stopped = true;
				break;
			}

			if self.is_suspended() {
				break;
			}

			if record.needs_review {
				report.skipped += 1;
				continue;
			}

			if !record.is_eligible(Utc::now()) {
				debug!(id = %record.id, "Oldest record still backing off");
				break;
			}

			match self.attempt(&record).await? {
				Outcome::Synced => report.synced += 1,
				Outcome::Skipped => {}
				Outcome::Rejected => report.failed += 1,
				Outcome::Retry => {
					report.failed += 1;
					break;
				}
				Outcome::Suspended => break,
			}
		}

		if report.synced > 0 || report.failed > 0 {
			info!(synced = report.synced, failed = report.failed, "Sync cycle finished");
		}

		self.emit(SyncEvent::CycleFinished {
			synced: report.synced,
			failed: report.failed,
		});

		Ok(report)
	}

	async fn exchange(&self, record: &TransactionRecord) -> Result<Acceptance, SyncError> {
		let request_timeout = self.config.request_timeout;

		// Previously attempted: the server may have committed it without us
		// hearing back
		if self.config.check_existence && record.attempts > 0 {
			let exists = timeout(request_timeout, self.transport.exists(&record.id))
				.await
				.map_err(|_| SyncError::TimedOut(request_timeout))??;

			if exists {
				debug!(id = %record.id, "Server already holds the record, skipping resend");
				return Ok(Acceptance::Duplicate { synced_at: None });
			}
		}

		timeout(
			request_timeout,
			self.transport.submit(&SyncRequest::from(record)),
		)
		.await
		.map_err(|_| SyncError::TimedOut(request_timeout))?
	}

	async fn attempt(&self, record: &TransactionRecord) -> Result<Outcome, QueueError> {
		let _permit = self.gate.begin_attempt().await;

		let now = Utc::now();
		let Some(attempts) = self.queue.mark_in_flight(&record.id, now).await? else {
			return Ok(Outcome::Skipped);
		};

		let id = &record.id;

		let error = match self.exchange(record).await {
			Ok(acceptance) => {
				let duplicate = matches!(acceptance, Acceptance::Duplicate { .. });
				let synced_at = acceptance.synced_at().unwrap_or(now);
				return self.accept(record, synced_at, duplicate).await;
			}
			Err(SyncError::DuplicateAccepted) => {
				return self.accept(record, now, true).await;
			}
			Err(e) => e,
		};

		if let SyncError::Unauthorized(reason) = &error {
			self.queue
				.mark_failed(id, &Failure {
					error: error.to_string(),
					retry_at: None,
					needs_review: false,
				})
				.await?;
			self.suspended.store(true, Ordering::Release);
			error!(%reason, "Sync server refused our credentials, suspending auto sync");
			self.emit(SyncEvent::Suspended {
				reason: reason.clone(),
			});
			return Ok(Outcome::Suspended);
		}

		let ceiling = if error.is_retryable() {
			self.config.max_attempts
		} else {
			self.config.rejected_max_attempts
		};

		if error.counts_toward_ceiling() && attempts >= ceiling {
			self.queue
				.mark_failed(id, &Failure::needs_review(error.to_string()))
				.await?;
			warn!(%id, attempts, %error, "Giving up on automatic sync, record needs review");
			self.emit(SyncEvent::ParkedForReview {
				id: id.clone(),
				attempts,
				error: error.to_string(),
			});
		} else {
			let delay = self.config.backoff.delay(attempts, id);
			let retry_at = TimeDelta::from_std(delay)
				.ok()
				.and_then(|delay| now.checked_add_signed(delay))
				.unwrap_or(now);
			self.queue
				.mark_failed(id, &Failure::retry_at(error.to_string(), retry_at))
				.await?;
			debug!(%id, attempts, ?delay, %error, "Sync attempt failed, retry scheduled");
			self.emit(SyncEvent::RetryScheduled {
				id: id.clone(),
				attempts,
				delay,
				error: error.to_string(),
			});
		}

		Ok(if error.is_retryable() {
			Outcome::Retry
		} else {
			Outcome::Rejected
		})
	}

	async fn accept(
		&self,
		record: &TransactionRecord,
		synced_at: DateTime<Utc>,
		duplicate: bool,
	) -> Result<Outcome, QueueError> {
		self.queue.mark_synced(&record.id, synced_at).await?;
		debug!(id = %record.id, duplicate, "Transaction synced");
		self.emit(SyncEvent::Synced {
			id: record.id.clone(),
			duplicate,
			synced_at,
		});
		Ok(Outcome::Synced)
	}

	/// How long to sleep before the next cycle, at most one interval.
	async fn next_wait(&self) -> Duration {
		if self.is_suspended() {
			return self.config.interval;
		}

		match self.queue.next_retry_at().await {
			Ok(Some(at)) => (at - Utc::now())
				.to_std()
				.unwrap_or(Duration::ZERO)
				.clamp(MIN_WAIT, self.config.interval),
			Ok(None) => self.config.interval,
			Err(e) => {
				error!(?e, "Failed to read the next retry deadline");
				self.config.interval
			}
		}
	}
}

pub async fn run_actor(client: Arc<SyncClient>, stop: Stopper) {
	enum Race {
		Stop,
		Wake,
	}

	loop {
		if !client.is_suspended() {
			match client.run_cycle(Some(&stop)).await {
				Ok(report) if report.stopped => break,
				Ok(_) => {}
				Err(e) => error!(?e, "Sync cycle failed on the local queue"),
			}
		}

		let wait = client.next_wait().await;

		let race = tokio::select! {
			() = (&stop).into_future() => Race::Stop,
			() = client.wake.notified() => Race::Wake,
			() = sleep(wait) => Race::Wake,
		};

		if matches!(race, Race::Stop) {
			break;
		}
	}

	info!("Sync client stopped");
}
