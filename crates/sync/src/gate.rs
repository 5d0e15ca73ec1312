use std::{sync::Arc, time::Duration};

use tokio::{
	sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock},
	time::timeout,
};

/// Serializes code swaps against sync attempts.
///
/// Every sync attempt holds an [`AttemptPermit`] for its whole duration. An
/// asset activation takes the [`ExclusivePermit`], which waits until in-flight
/// attempts resolve and keeps new ones from starting until the swap is done.
#[derive(Debug, Clone, Default)]
pub struct SyncGate(Arc<RwLock<()>>);

#[derive(Debug)]
pub struct AttemptPermit(OwnedRwLockReadGuard<()>);

#[derive(Debug)]
pub struct ExclusivePermit(OwnedRwLockWriteGuard<()>);

impl SyncGate {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn begin_attempt(&self) -> AttemptPermit {
		AttemptPermit(Arc::clone(&self.0).read_owned().await)
	}

	/// Waits at most `wait` for in-flight attempts to finish.
	pub async fn exclusive(&self, wait: Duration) -> Option<ExclusivePermit> {
		timeout(wait, Arc::clone(&self.0).write_owned())
			.await
			.ok()
			.map(ExclusivePermit)
	}

	#[must_use]
	pub fn is_attempt_in_flight(&self) -> bool {
		self.0.try_write().is_err()
	}
}
