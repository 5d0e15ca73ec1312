//! The Sync Client: drains the local queue into the sync server, one record at
//! a time and oldest sale first.

use pos_sync::{Backoff, TransactionId};

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

mod client;
mod transport;

pub use client::{run_actor, CycleReport, SyncClient};
pub use transport::{ApiConfig, HttpTransport, SyncTransport};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncClientConfig {
	/// Upper bound between two cycles when nothing else wakes the client.
	pub interval: Duration,
	/// Bound of a single sync attempt; exceeding it is a retryable failure.
	pub request_timeout: Duration,
	pub check_existence: bool,
	/// Server rejections tolerated before a record is parked for review.
	pub rejected_max_attempts: u32,
	/// Any other failures tolerated before parking, offline attempts excluded.
	pub max_attempts: u32,
	pub backoff: Backoff,
}

impl Default for SyncClientConfig {
	fn default() -> Self {
		Self {
			interval: Duration::from_secs(30),
			request_timeout: Duration::from_secs(10),
			check_existence: true,
			rejected_max_attempts: 3,
			max_attempts: 20,
			backoff: Backoff::default(),
		}
	}
}

/// What the Sync Client did, for the operator's queue health view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
	#[serde(rename_all = "camelCase")]
	Synced {
		id: TransactionId,
		duplicate: bool,
		synced_at: DateTime<Utc>,
	},
	#[serde(rename_all = "camelCase")]
	RetryScheduled {
		id: TransactionId,
		attempts: u32,
		delay: Duration,
		error: String,
	},
	#[serde(rename_all = "camelCase")]
	ParkedForReview {
		id: TransactionId,
		attempts: u32,
		error: String,
	},
	/// Auto sync is paused until an explicit `sync_now`.
	Suspended { reason: String },
	CycleFinished { synced: usize, failed: usize },
}
