use std::time::Duration;

use thiserror::Error;

/// Outcome of a failed exchange with the sync server.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
	#[error("network unavailable: {0}")]
	NetworkUnavailable(String),
	#[error("server failed transiently: {0}")]
	ServerTransient(String),
	#[error("sync request timed out after {0:?}")]
	TimedOut(Duration),
	#[error("server rejected the record: {0}")]
	ServerRejected(String),
	/// The server already holds this id; as good as an acceptance.
	#[error("record was already accepted by the server")]
	DuplicateAccepted,
	#[error("unauthorized: {0}")]
	Unauthorized(String),
}

impl SyncError {
	/// Absorbed by retrying after a backoff delay.
	#[must_use]
	pub const fn is_retryable(&self) -> bool {
		matches!(
			self,
			Self::NetworkUnavailable(_) | Self::ServerTransient(_) | Self::TimedOut(_)
		)
	}

	/// Whether a failure of this kind spends one of the record's attempts
	/// against the retry ceiling. Being offline never exhausts a record.
	#[must_use]
	pub const fn counts_toward_ceiling(&self) -> bool {
		!matches!(self, Self::NetworkUnavailable(_) | Self::DuplicateAccepted)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn only_transient_kinds_are_retryable() {
		assert!(SyncError::NetworkUnavailable("down".into()).is_retryable());
		assert!(SyncError::ServerTransient("503".into()).is_retryable());
		assert!(SyncError::TimedOut(Duration::from_secs(10)).is_retryable());

		assert!(!SyncError::ServerRejected("bad total".into()).is_retryable());
		assert!(!SyncError::Unauthorized("bad key".into()).is_retryable());
		assert!(!SyncError::DuplicateAccepted.is_retryable());
	}

	#[test]
	fn offline_failures_do_not_count_toward_the_ceiling() {
		assert!(!SyncError::NetworkUnavailable("down".into()).counts_toward_ceiling());
		assert!(SyncError::TimedOut(Duration::from_secs(1)).counts_toward_ceiling());
		assert!(SyncError::ServerRejected("bad".into()).counts_toward_ceiling());
	}
}
