use chrono::{DateTime, Utc};
use pos_sync::{Decimal, TransactionId};
use serde::Serialize;

/// Operator facing snapshot of the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueHealth {
	pub pending: u64,
	pub in_flight: u64,
	/// Failed and waiting for their backoff deadline.
	pub retrying: u64,
	pub synced: u64,
	pub capacity: u64,
	pub oldest_unsynced: Option<DateTime<Utc>>,
	/// Records auto retry gave up on.
	pub awaiting_review: Vec<ReviewItem>,
}

impl QueueHealth {
	#[must_use]
	pub fn stored(&self) -> u64 {
		self.pending + self.in_flight + self.retrying + self.synced + self.awaiting_review.len() as u64
	}

	#[must_use]
	pub fn unsynced(&self) -> u64 {
		self.stored() - self.synced
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewItem {
	pub id: TransactionId,
	pub occurred_at: DateTime<Utc>,
	pub total: Decimal,
	pub attempts: u32,
	pub last_error: Option<String>,
}
