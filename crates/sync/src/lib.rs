//! Types shared by the terminal and the sync server.
//!
//! A [`TransactionRecord`] is created on the terminal when a sale completes and
//! its [`TransactionId`] is the idempotency key of the whole protocol: the
//! server commits at most one ledger entry per id, however many times it is
//! submitted.

mod backoff;
mod error;
mod gate;
mod model;
pub mod wire;

pub use backoff::Backoff;
pub use error::SyncError;
pub use gate::{AttemptPermit, ExclusivePermit, SyncGate};
pub use model::{
	InvalidTransactionId, SyncState, TransactionId, TransactionRecord, UnknownSyncState,
	MAX_TOTAL_SCALE,
};

pub use rust_decimal::Decimal;
