use std::{collections::VecDeque, path::Path, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use futures::{stream, Stream};
use pos_sync::{SyncState, TransactionId, TransactionRecord};
use pos_utils::{error::FileIOError, from_millis, to_millis};
use sqlx::sqlite::{
	SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::{debug, info, instrument, warn};

use crate::{
	health::{QueueHealth, ReviewItem},
	row::{RecordRow, COLUMNS},
	QueueError,
};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS transactions (
	id           TEXT    PRIMARY KEY NOT NULL,
	occurred_at  INTEGER NOT NULL,
	total        TEXT    NOT NULL,
	payload      TEXT    NOT NULL,
	sync_state   TEXT    NOT NULL,
	attempts     INTEGER NOT NULL DEFAULT 0,
	retry_at     INTEGER,
	needs_review INTEGER NOT NULL DEFAULT 0,
	last_error   TEXT,
	synced_at    INTEGER,
	enqueued_at  INTEGER NOT NULL
)";

const CREATE_ORDER_INDEX: &str = "CREATE INDEX IF NOT EXISTS transactions_by_state_and_time
	ON transactions (sync_state, occurred_at, id)";

const INTERRUPTED: &str = "sync attempt interrupted before its outcome was known";

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
	/// Maximum number of stored records, synced ones included.
	pub capacity: u64,
	/// Records fetched per round trip while streaming the pending set.
	pub page_size: u32,
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self {
			capacity: 10_000,
			page_size: 64,
		}
	}
}

/// What went wrong with an attempt and when the record may be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
	pub error: String,
	pub retry_at: Option<DateTime<Utc>>,
	pub needs_review: bool,
}

impl Failure {
	pub fn retry_at(error: impl Into<String>, retry_at: DateTime<Utc>) -> Self {
		Self {
			error: error.into(),
			retry_at: Some(retry_at),
			needs_review: false,
		}
	}

	pub fn needs_review(error: impl Into<String>) -> Self {
		Self {
			error: error.into(),
			retry_at: None,
			needs_review: true,
		}
	}
}

/// SQLite backed store of [`TransactionRecord`]s.
///
/// The foreground sale path only ever inserts; the sync client is the single
/// writer of existing records. `IN_FLIGHT` acts as the per record lock.
#[derive(Debug, Clone)]
pub struct Queue {
	pool: SqlitePool,
	config: QueueConfig,
}

impl Queue {
	pub async fn open(path: impl AsRef<Path>, config: QueueConfig) -> Result<Self, QueueError> {
		let path = path.as_ref();

		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent)
				.await
				.map_err(|e| FileIOError::from_std_io_err(parent, e))?;
		}

		let options = SqliteConnectOptions::new()
			.filename(path)
			.create_if_missing(true)
			.journal_mode(SqliteJournalMode::Wal)
			.synchronous(SqliteSynchronous::Full)
			.busy_timeout(Duration::from_secs(5));

		let pool = SqlitePoolOptions::new()
			.max_connections(4)
			.connect_with(options)
			.await?;

		info!(path = %path.display(), "Opened local transaction queue");

		Self::init(pool, config).await
	}

	/// Volatile queue, for tests and tooling.
	pub async fn in_memory(config: QueueConfig) -> Result<Self, QueueError> {
		// Every connection to `:memory:` is its own database, so keep exactly one alive
		let pool = SqlitePoolOptions::new()
			.min_connections(1)
			.max_connections(1)
			.idle_timeout(None)
			.max_lifetime(None)
			.connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
			.await?;

		Self::init(pool, config).await
	}

	async fn init(pool: SqlitePool, config: QueueConfig) -> Result<Self, QueueError> {
		sqlx::query(CREATE_TABLE).execute(&pool).await?;
		sqlx::query(CREATE_ORDER_INDEX).execute(&pool).await?;

		Ok(Self { pool, config })
	}

	#[must_use]
	pub const fn capacity(&self) -> u64 {
		self.config.capacity
	}

	/// Waits for in-progress statements and closes every connection.
	pub async fn close(&self) {
		self.pool.close().await;
	}

	/// Appends a sale as `PENDING`, whatever sync bookkeeping `record` carries.
	#[instrument(skip_all, fields(id = %record.id), err)]
	pub async fn enqueue(&self, record: &TransactionRecord) -> Result<(), QueueError> {
		let payload = serde_json::to_string(&record.payload).map_err(|e| QueueError::Corrupt {
			id: record.id.to_string(),
			reason: e.to_string(),
		})?;

		// Capacity check and insert in one statement, so concurrent sales can't overshoot
		let inserted = sqlx::query(
			"INSERT INTO transactions
				(id, occurred_at, total, payload, sync_state, attempts, needs_review, enqueued_at)
			SELECT ?, ?, ?, ?, ?, 0, 0, ?
			WHERE (SELECT COUNT(*) FROM transactions) < ?
			ON CONFLICT(id) DO NOTHING",
		)
		.bind(record.id.as_str())
		.bind(to_millis(record.occurred_at))
		.bind(record.total.to_string())
		.bind(payload)
		.bind(SyncState::Pending.as_str())
		.bind(to_millis(Utc::now()))
		.bind(i64::try_from(self.config.capacity).unwrap_or(i64::MAX))
		.execute(&self.pool)
		.await?
		.rows_affected();

		if inserted == 1 {
			debug!("Queued transaction");
			return Ok(());
		}

		if self.get(&record.id).await?.is_some() {
			Err(QueueError::AlreadyQueued(record.id.clone()))
		} else {
			warn!(capacity = self.config.capacity, "Local queue is full");
			Err(QueueError::StorageFull {
				capacity: self.config.capacity,
			})
		}
	}

	/// Lazily streams every `PENDING` or `FAILED` record, oldest sale first.
	///
	/// Pages are fetched on demand with a keyset cursor and no connection is
	/// held between pages, so records may be updated while the stream is being
	/// consumed. Calling it again restarts from the oldest record.
	pub fn list_pending(
		&self,
	) -> impl Stream<Item = Result<TransactionRecord, QueueError>> + Send + '_ {
		struct Cursor {
			after: (i64, String),
			buffer: VecDeque<TransactionRecord>,
			exhausted: bool,
		}

		let start = Cursor {
			after: (i64::MIN, String::new()),
			buffer: VecDeque::new(),
			exhausted: false,
		};

		stream::try_unfold(start, move |mut cursor| async move {
			if cursor.buffer.is_empty() && !cursor.exhausted {
				let page = self.pending_page(&cursor.after).await?;

				cursor.exhausted = page.len() < self.config.page_size as usize;
				if let Some(last) = page.last() {
					cursor.after = (to_millis(last.occurred_at), last.id.to_string());
				}
				cursor.buffer.extend(page);
			}

			Ok::<_, QueueError>(cursor.buffer.pop_front().map(|record| (record, cursor)))
		})
	}

	async fn pending_page(
		&self,
		(after_time, after_id): &(i64, String),
	) -> Result<Vec<TransactionRecord>, QueueError> {
		sqlx::query_as::<_, RecordRow>(&format!(
			"SELECT {COLUMNS} FROM transactions
			WHERE sync_state IN ('PENDING', 'FAILED')
				AND (occurred_at > ? OR (occurred_at = ? AND id > ?))
			ORDER BY occurred_at, id
			LIMIT ?"
		))
		.bind(*after_time)
		.bind(*after_time)
		.bind(after_id.as_str())
		.bind(i64::from(self.config.page_size))
		.fetch_all(&self.pool)
		.await?
		.into_iter()
		.map(TransactionRecord::try_from)
		.collect()
	}

	pub async fn get(&self, id: &TransactionId) -> Result<Option<TransactionRecord>, QueueError> {
		sqlx::query_as::<_, RecordRow>(&format!(
			"SELECT {COLUMNS} FROM transactions WHERE id = ?"
		))
		.bind(id.as_str())
		.fetch_optional(&self.pool)
		.await?
		.map(TransactionRecord::try_from)
		.transpose()
	}

	/// Client side dedup flag: whether this terminal already saw the server accept `id`.
	pub async fn is_synced(&self, id: &TransactionId) -> Result<bool, QueueError> {
		Ok(self
			.get(id)
			.await?
			.is_some_and(|record| record.sync_state == SyncState::Synced))
	}

	/// Takes the per record lock for a sync attempt and counts the attempt.
	///
	/// Returns the new attempt count, or `None` when the record is not eligible
	/// at `now` (already in flight, synced, parked or still backing off).
	#[instrument(skip(self), err)]
	pub async fn mark_in_flight(
		&self,
		id: &TransactionId,
		now: DateTime<Utc>,
	) -> Result<Option<u32>, QueueError> {
		let attempts = sqlx::query_scalar::<_, i64>(
			"UPDATE transactions
			SET sync_state = 'IN_FLIGHT', attempts = attempts + 1, retry_at = NULL
			WHERE id = ? AND (
				sync_state = 'PENDING'
				OR (sync_state = 'FAILED' AND needs_review = 0
					AND (retry_at IS NULL OR retry_at <= ?))
			)
			RETURNING attempts",
		)
		.bind(id.as_str())
		.bind(to_millis(now))
		.fetch_optional(&self.pool)
		.await?;

		attempts
			.map(|attempts| {
				u32::try_from(attempts).map_err(|e| QueueError::Corrupt {
					id: id.to_string(),
					reason: e.to_string(),
				})
			})
			.transpose()
	}

	/// Records the server's acceptance. A second call for the same id is a no-op
	/// and a synced record is never touched again.
	#[instrument(skip(self), err)]
	pub async fn mark_synced(
		&self,
		id: &TransactionId,
		synced_at: DateTime<Utc>,
	) -> Result<bool, QueueError> {
		let updated = sqlx::query(
			"UPDATE transactions
			SET sync_state = 'SYNCED', synced_at = ?, retry_at = NULL, needs_review = 0,
				last_error = NULL
			WHERE id = ? AND sync_state != 'SYNCED'",
		)
		.bind(to_millis(synced_at))
		.bind(id.as_str())
		.execute(&self.pool)
		.await?
		.rows_affected();

		Ok(updated > 0)
	}

	/// Closes an in-flight attempt as failed. No-op unless the record is `IN_FLIGHT`.
	#[instrument(skip(self), err)]
	pub async fn mark_failed(&self, id: &TransactionId, failure: &Failure) -> Result<bool, QueueError> {
		let updated = sqlx::query(
			"UPDATE transactions
			SET sync_state = 'FAILED', retry_at = ?, needs_review = ?, last_error = ?
			WHERE id = ? AND sync_state = 'IN_FLIGHT'",
		)
		.bind(failure.retry_at.map(to_millis))
		.bind(failure.needs_review)
		.bind(failure.error.as_str())
		.bind(id.as_str())
		.execute(&self.pool)
		.await?
		.rows_affected();

		Ok(updated > 0)
	}

	/// `FAILED → PENDING` for every record whose backoff deadline has passed.
	pub async fn promote_due(&self, now: DateTime<Utc>) -> Result<u64, QueueError> {
		let promoted = sqlx::query(
			"UPDATE transactions
			SET sync_state = 'PENDING', retry_at = NULL
			WHERE sync_state = 'FAILED' AND needs_review = 0
				AND (retry_at IS NULL OR retry_at <= ?)",
		)
		.bind(to_millis(now))
		.execute(&self.pool)
		.await?
		.rows_affected();

		if promoted > 0 {
			debug!(promoted, "Failed transactions are due for retry");
		}

		Ok(promoted)
	}

	/// Attempts cut short by a shutdown become immediately retryable; the
	/// server's idempotency absorbs a submission that did reach it.
	pub async fn recover_interrupted(&self) -> Result<u64, QueueError> {
		let recovered = sqlx::query(
			"UPDATE transactions
			SET sync_state = 'FAILED', retry_at = NULL, last_error = ?
			WHERE sync_state = 'IN_FLIGHT'",
		)
		.bind(INTERRUPTED)
		.execute(&self.pool)
		.await?
		.rows_affected();

		if recovered > 0 {
			warn!(recovered, "Recovered interrupted sync attempts");
		}

		Ok(recovered)
	}

	/// Earliest backoff deadline among records waiting to be retried.
	pub async fn next_retry_at(&self) -> Result<Option<DateTime<Utc>>, QueueError> {
		let next = sqlx::query_scalar::<_, Option<i64>>(
			"SELECT MIN(retry_at) FROM transactions
			WHERE sync_state = 'FAILED' AND needs_review = 0",
		)
		.fetch_one(&self.pool)
		.await?;

		Ok(next.map(from_millis))
	}

	/// Operator decision: give a failed record a fresh set of attempts.
	#[instrument(skip(self), err)]
	pub async fn requeue(&self, id: &TransactionId) -> Result<bool, QueueError> {
		let updated = sqlx::query(
			"UPDATE transactions
			SET sync_state = 'PENDING', attempts = 0, needs_review = 0, retry_at = NULL
			WHERE id = ? AND sync_state = 'FAILED'",
		)
		.bind(id.as_str())
		.execute(&self.pool)
		.await?
		.rows_affected();

		Ok(updated > 0)
	}

	/// Operator decision: drop records the server has confirmed, reclaiming capacity.
	#[instrument(skip(self), err)]
	pub async fn purge_synced(&self) -> Result<u64, QueueError> {
		let purged = sqlx::query("DELETE FROM transactions WHERE sync_state = 'SYNCED'")
			.execute(&self.pool)
			.await?
			.rows_affected();

		info!(purged, "Purged synced transactions");

		Ok(purged)
	}

	pub async fn health(&self) -> Result<QueueHealth, QueueError> {
		let mut health = QueueHealth {
			capacity: self.config.capacity,
			..QueueHealth::default()
		};

		let counts = sqlx::query_as::<_, (String, bool, i64)>(
			"SELECT sync_state, needs_review, COUNT(*) FROM transactions
			GROUP BY sync_state, needs_review",
		)
		.fetch_all(&self.pool)
		.await?;

		for (state, needs_review, count) in counts {
			let count = u64::try_from(count).unwrap_or_default();
			match state.parse::<SyncState>() {
				Ok(SyncState::Pending) => health.pending += count,
				Ok(SyncState::InFlight) => health.in_flight += count,
				Ok(SyncState::Synced) => health.synced += count,
				// Parked records are listed one by one below
				Ok(SyncState::Failed) if needs_review => {}
				Ok(SyncState::Failed) => health.retrying += count,
				Err(e) => {
					return Err(QueueError::Corrupt {
						id: String::from("*"),
						reason: e.to_string(),
					})
				}
			}
		}

		health.oldest_unsynced = sqlx::query_scalar::<_, Option<i64>>(
			"SELECT MIN(occurred_at) FROM transactions WHERE sync_state != 'SYNCED'",
		)
		.fetch_one(&self.pool)
		.await?
		.map(from_millis);

		health.awaiting_review = sqlx::query_as::<_, RecordRow>(&format!(
			"SELECT {COLUMNS} FROM transactions
			WHERE sync_state = 'FAILED' AND needs_review = 1
			ORDER BY occurred_at, id"
		))
		.fetch_all(&self.pool)
		.await?
		.into_iter()
		.map(|row| {
			TransactionRecord::try_from(row).map(|record| ReviewItem {
				id: record.id,
				occurred_at: record.occurred_at,
				total: record.total,
				attempts: record.attempts,
				last_error: record.last_error,
			})
		})
		.collect::<Result<_, _>>()?;

		Ok(health)
	}
}

#[cfg(test)]
mod tests {
	use chrono::Duration as ChronoDuration;
	use futures::TryStreamExt;
	use pos_sync::Decimal;
	use serde_json::json;

	use super::*;

	fn sale(id: &str, minutes_ago: i64) -> TransactionRecord {
		TransactionRecord::with_id(
			TransactionId::parse(id).unwrap(),
			Utc::now() - ChronoDuration::minutes(minutes_ago),
			Decimal::new(1250, 2),
			json!({ "lines": [] }),
		)
	}

	#[tokio::test]
	async fn pagination_does_not_skip_or_repeat_under_concurrent_updates() {
		let queue = Queue::in_memory(QueueConfig {
			capacity: 100,
			page_size: 2,
		})
		.await
		.unwrap();

		for i in 0..5 {
			queue.enqueue(&sale(&format!("t-{i}"), 10 - i)).await.unwrap();
		}

		let mut seen = vec![];
		let stream = queue.list_pending();
		futures::pin_mut!(stream);
		while let Some(record) = stream.try_next().await.unwrap() {
			queue.mark_in_flight(&record.id, Utc::now()).await.unwrap();
			queue
				.mark_synced(&record.id, Utc::now())
				.await
				.unwrap();
			seen.push(record.id.to_string());
		}

		assert_eq!(seen, ["t-0", "t-1", "t-2", "t-3", "t-4"]);
	}

	#[tokio::test]
	async fn same_instant_sales_are_ordered_by_id() {
		let queue = Queue::in_memory(QueueConfig::default()).await.unwrap();
		let at = Utc::now();

		for id in ["b", "a", "c"] {
			let mut record = sale(id, 0);
			record.occurred_at = at;
			queue.enqueue(&record).await.unwrap();
		}

		let ids = queue
			.list_pending()
			.map_ok(|record| record.id.to_string())
			.try_collect::<Vec<_>>()
			.await
			.unwrap();

		assert_eq!(ids, ["a", "b", "c"]);
	}
}
