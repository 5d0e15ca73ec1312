//! The canonical transaction ledger. At most one entry per transaction id.

use pos_sync::{wire::SyncRequest, TransactionId};

use std::{path::Path, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use sqlx::{
	sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
	SqlitePool,
};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
	#[error("ledger database error: {0}")]
	Database(#[from] sqlx::Error),
	#[error("ledger entry has an unreadable timestamp: <id='{0}'>")]
	Corrupt(String),
}

/// What committing a submission did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recorded {
	/// Acceptance time of the ledger entry, the original one for a duplicate.
	pub synced_at: DateTime<Utc>,
	pub duplicate: bool,
}

#[derive(Debug, Clone)]
pub struct Ledger {
	pool: SqlitePool,
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS ledger (
	id TEXT PRIMARY KEY NOT NULL,
	occurred_at TEXT NOT NULL,
	total TEXT NOT NULL,
	payload TEXT NOT NULL,
	synced_at INTEGER NOT NULL
)";

impl Ledger {
	pub async fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
		let options = SqliteConnectOptions::new()
			.filename(path.as_ref())
			.create_if_missing(true)
			.journal_mode(SqliteJournalMode::Wal)
			// An acknowledged entry must survive a power cut
			.synchronous(SqliteSynchronous::Full)
			.busy_timeout(Duration::from_secs(5));

		let pool = SqlitePoolOptions::new()
			.max_connections(8)
			.connect_with(options)
			.await?;

		Self::migrate(pool).await
	}

	pub async fn in_memory() -> Result<Self, LedgerError> {
		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.idle_timeout(None)
			.max_lifetime(None)
			.connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
			.await?;

		Self::migrate(pool).await
	}

	async fn migrate(pool: SqlitePool) -> Result<Self, LedgerError> {
		sqlx::query(SCHEMA).execute(&pool).await?;
		Ok(Self { pool })
	}

	/// Commits `request` unless its id is already in the ledger.
	///
	/// Only returns once the entry is durably committed; a repeat submission
	/// gets the original acceptance back instead of a second entry.
	pub async fn record(&self, request: &SyncRequest) -> Result<Recorded, LedgerError> {
		let now = Utc::now();
		let mut tx = self.pool.begin().await?;

		let inserted = sqlx::query(
			"INSERT INTO ledger (id, occurred_at, total, payload, synced_at)
			VALUES (?, ?, ?, ?, ?)
			ON CONFLICT (id) DO NOTHING",
		)
		.bind(request.id.as_str())
		.bind(request.date.to_rfc3339())
		.bind(request.total.to_string())
		.bind(request.payload.to_string())
		.bind(now.timestamp_millis())
		.execute(&mut *tx)
		.await?
		.rows_affected()
			> 0;

		let synced_at = if inserted {
			now
		} else {
			let millis = sqlx::query_scalar::<_, i64>("SELECT synced_at FROM ledger WHERE id = ?")
				.bind(request.id.as_str())
				.fetch_one(&mut *tx)
				.await?;

			DateTime::from_timestamp_millis(millis)
				.ok_or_else(|| LedgerError::Corrupt(request.id.to_string()))?
		};

		tx.commit().await?;

		if inserted {
			info!(id = %request.id, total = %request.total, "Transaction committed");
		} else {
			debug!(id = %request.id, "Duplicate submission");
		}

		Ok(Recorded {
			synced_at,
			duplicate: !inserted,
		})
	}

	pub async fn exists(&self, id: &TransactionId) -> Result<bool, LedgerError> {
		Ok(
			sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM ledger WHERE id = ?")
				.bind(id.as_str())
				.fetch_one(&self.pool)
				.await? > 0,
		)
	}

	pub async fn count(&self) -> Result<u64, LedgerError> {
		let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM ledger")
			.fetch_one(&self.pool)
			.await?;

		Ok(u64::try_from(count).unwrap_or_default())
	}
}
