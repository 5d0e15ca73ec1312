use pos_sync::TransactionId;
use pos_utils::error::FileIOError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
	#[error("local queue is full ({capacity} records); purge synced records to make room")]
	StorageFull { capacity: u64 },
	#[error("transaction <id='{0}'> is already queued")]
	AlreadyQueued(TransactionId),
	#[error("corrupted queue row <id='{id}'>: {reason}")]
	Corrupt { id: String, reason: String },

	#[error("queue database error: {0}")]
	Database(#[from] sqlx::Error),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
}
