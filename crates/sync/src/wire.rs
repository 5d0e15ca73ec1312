//! JSON bodies of `POST /transactions/sync` and `GET /transactions/sync?id=`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{TransactionId, TransactionRecord};

pub const SYNC_PATH: &str = "/transactions/sync";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
	pub id: TransactionId,
	pub date: DateTime<Utc>,
	pub total: Decimal,
	/// Client side flag, informative only. The server ledger is authoritative.
	#[serde(default)]
	pub synced: bool,
	#[serde(default)]
	pub payload: Value,
}

impl From<&TransactionRecord> for SyncRequest {
	fn from(record: &TransactionRecord) -> Self {
		Self {
			id: record.id.clone(),
			date: record.occurred_at,
			total: record.total,
			synced: false,
			payload: record.payload.clone(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAccepted {
	pub success: bool,
	/// Always true for a ledger entry, new or repeated.
	#[serde(default)]
	pub accepted: bool,
	pub id: TransactionId,
	pub synced_at: DateTime<Utc>,
	pub message: String,
	/// Set when this id had already been committed by an earlier submission;
	/// `synced_at` is then the original acceptance time.
	#[serde(default)]
	pub duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
	pub success: bool,
	pub error: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub details: Option<String>,
}

impl SyncFailure {
	pub fn new(error: impl Into<String>, details: Option<String>) -> Self {
		Self {
			success: false,
			error: error.into(),
			details,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistenceResponse {
	pub exists: bool,
	pub transaction_id: String,
}

/// How the server acknowledged a submission; both mean "committed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
	Accepted { synced_at: DateTime<Utc> },
	Duplicate { synced_at: Option<DateTime<Utc>> },
}

impl Acceptance {
	#[must_use]
	pub const fn synced_at(&self) -> Option<DateTime<Utc>> {
		match self {
			Self::Accepted { synced_at } => Some(*synced_at),
			Self::Duplicate { synced_at } => *synced_at,
		}
	}
}

impl From<&SyncAccepted> for Acceptance {
	fn from(body: &SyncAccepted) -> Self {
		if body.duplicate {
			Self::Duplicate {
				synced_at: Some(body.synced_at),
			}
		} else {
			Self::Accepted {
				synced_at: body.synced_at,
			}
		}
	}
}
