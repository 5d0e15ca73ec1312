use std::str::FromStr;

use pos_sync::{Decimal, SyncState, TransactionId, TransactionRecord};
use pos_utils::from_millis;

use crate::QueueError;

pub(crate) const COLUMNS: &str = "id, occurred_at, total, payload, sync_state, attempts, \
	retry_at, needs_review, last_error, synced_at";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RecordRow {
	id: String,
	occurred_at: i64,
	total: String,
	payload: String,
	sync_state: String,
	attempts: i64,
	retry_at: Option<i64>,
	needs_review: bool,
	last_error: Option<String>,
	synced_at: Option<i64>,
}

impl TryFrom<RecordRow> for TransactionRecord {
	type Error = QueueError;

	fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
		let corrupt = |reason: String| QueueError::Corrupt {
			id: row.id.clone(),
			reason,
		};

		Ok(Self {
			id: TransactionId::parse(row.id.as_str()).map_err(|e| corrupt(e.to_string()))?,
			occurred_at: from_millis(row.occurred_at),
			total: Decimal::from_str(&row.total).map_err(|e| corrupt(e.to_string()))?,
			payload: serde_json::from_str(&row.payload).map_err(|e| corrupt(e.to_string()))?,
			sync_state: row
				.sync_state
				.parse::<SyncState>()
				.map_err(|e| corrupt(e.to_string()))?,
			attempts: u32::try_from(row.attempts).map_err(|e| corrupt(e.to_string()))?,
			retry_at: row.retry_at.map(from_millis),
			needs_review: row.needs_review,
			last_error: row.last_error.clone(),
			synced_at: row.synced_at.map(from_millis),
		})
	}
}
