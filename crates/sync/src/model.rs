use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Totals are fixed point with at most this many fractional digits.
pub const MAX_TOTAL_SCALE: u32 = 4;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidTransactionId {
	#[error("transaction id is empty")]
	Empty,
	#[error("transaction id is longer than {} characters", TransactionId::MAX_LEN)]
	TooLong,
	#[error("transaction id contains whitespace or control characters")]
	IllegalCharacter,
}

/// Client assigned, immutable identifier of a sale.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionId(String);

impl TransactionId {
	pub const MAX_LEN: usize = 128;

	/// Time ordered, so ids minted on one terminal sort roughly like their sales.
	#[must_use]
	pub fn generate() -> Self {
		Self(Uuid::now_v7().to_string())
	}

	pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidTransactionId> {
		let raw = raw.into();

		if raw.is_empty() {
			return Err(InvalidTransactionId::Empty);
		}

		if raw.chars().count() > Self::MAX_LEN {
			return Err(InvalidTransactionId::TooLong);
		}

		if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
			return Err(InvalidTransactionId::IllegalCharacter);
		}

		Ok(Self(raw))
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Stable per id, used to spread retries of different records apart.
	#[must_use]
	pub fn jitter_seed(&self) -> u64 {
		let hash = blake3::hash(self.0.as_bytes());
		let mut seed = [0; 8];
		seed.copy_from_slice(&hash.as_bytes()[..8]);
		u64::from_le_bytes(seed)
	}
}

impl fmt::Debug for TransactionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "TransactionId({})", self.0)
	}
}

impl fmt::Display for TransactionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for TransactionId {
	type Err = InvalidTransactionId;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl TryFrom<String> for TransactionId {
	type Error = InvalidTransactionId;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::parse(value)
	}
}

impl From<TransactionId> for String {
	fn from(id: TransactionId) -> Self {
		id.0
	}
}

/// Where a record stands from the terminal's point of view.
///
/// Only `Synced` is terminal. `Failed` records go back to `Pending` once their
/// backoff deadline passes, unless they were parked for operator review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
	Pending,
	InFlight,
	Synced,
	Failed,
}

impl SyncState {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "PENDING",
			Self::InFlight => "IN_FLIGHT",
			Self::Synced => "SYNCED",
			Self::Failed => "FAILED",
		}
	}
}

impl fmt::Display for SyncState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Error)]
#[error("unknown sync state: {0}")]
pub struct UnknownSyncState(String);

impl FromStr for SyncState {
	type Err = UnknownSyncState;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"PENDING" => Ok(Self::Pending),
			"IN_FLIGHT" => Ok(Self::InFlight),
			"SYNCED" => Ok(Self::Synced),
			"FAILED" => Ok(Self::Failed),
			other => Err(UnknownSyncState(other.to_string())),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
	pub id: TransactionId,
	pub occurred_at: DateTime<Utc>,
	pub total: Decimal,
	/// Line items and payment detail, opaque to the sync machinery.
	pub payload: Value,
	pub sync_state: SyncState,
	pub attempts: u32,
	/// Backoff deadline of a `Failed` record.
	pub retry_at: Option<DateTime<Utc>>,
	/// Parked: auto retry gave up and an operator has to decide.
	pub needs_review: bool,
	pub last_error: Option<String>,
	pub synced_at: Option<DateTime<Utc>>,
}

impl TransactionRecord {
	#[must_use]
	pub fn new(occurred_at: DateTime<Utc>, total: Decimal, payload: Value) -> Self {
		Self::with_id(TransactionId::generate(), occurred_at, total, payload)
	}

	#[must_use]
	pub fn with_id(
		id: TransactionId,
		occurred_at: DateTime<Utc>,
		total: Decimal,
		payload: Value,
	) -> Self {
		Self {
			id,
			occurred_at,
			total,
			payload,
			sync_state: SyncState::Pending,
			attempts: 0,
			retry_at: None,
			needs_review: false,
			last_error: None,
			synced_at: None,
		}
	}

	/// Whether the sync client may pick this record up at `now`.
	#[must_use]
	pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
		match self.sync_state {
			SyncState::Pending => true,
			SyncState::Failed => !self.needs_review && self.retry_at.map_or(true, |at| at <= now),
			SyncState::InFlight | SyncState::Synced => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use chrono::Duration;
	use serde_json::json;

	use super::*;

	#[test]
	fn ids_reject_empty_blank_and_oversized_values() {
		assert_eq!(TransactionId::parse(""), Err(InvalidTransactionId::Empty));
		assert_eq!(
			TransactionId::parse("t 1"),
			Err(InvalidTransactionId::IllegalCharacter)
		);
		assert_eq!(
			TransactionId::parse("x".repeat(TransactionId::MAX_LEN + 1)),
			Err(InvalidTransactionId::TooLong)
		);
		assert_eq!(TransactionId::parse("t-1").unwrap().as_str(), "t-1");
	}

	#[test]
	fn generated_ids_are_unique_and_valid() {
		let a = TransactionId::generate();
		let b = TransactionId::generate();

		assert_ne!(a, b);
		assert!(TransactionId::parse(a.as_str()).is_ok());
	}

	#[test]
	fn id_deserialization_validates() {
		assert!(serde_json::from_value::<TransactionId>(json!("")).is_err());
		assert_eq!(
			serde_json::from_value::<TransactionId>(json!("t-9")).unwrap(),
			TransactionId::parse("t-9").unwrap()
		);
	}

	#[test]
	fn sync_state_round_trips_through_its_storage_name() {
		for state in [
			SyncState::Pending,
			SyncState::InFlight,
			SyncState::Synced,
			SyncState::Failed,
		] {
			assert_eq!(state.as_str().parse::<SyncState>().unwrap(), state);
		}
		assert!("DONE".parse::<SyncState>().is_err());
	}

	#[test]
	fn eligibility_follows_state_backoff_and_review() {
		let now = Utc::now();
		let mut record = TransactionRecord::new(now, Decimal::new(1250, 2), json!({}));
		assert!(record.is_eligible(now));

		record.sync_state = SyncState::Failed;
		record.retry_at = Some(now + Duration::seconds(5));
		assert!(!record.is_eligible(now));
		assert!(record.is_eligible(now + Duration::seconds(5)));

		record.needs_review = true;
		assert!(!record.is_eligible(now + Duration::hours(1)));

		record.sync_state = SyncState::Synced;
		record.needs_review = false;
		assert!(!record.is_eligible(now));
	}
}
