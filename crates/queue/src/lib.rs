//! Terminal-local, durable queue of sales waiting to reach the server.
//!
//! Records are never dropped to make room: a full queue refuses new sales with
//! [`QueueError::StorageFull`] until an operator purges the synced backlog.

mod error;
mod health;
mod row;
mod store;

pub use error::QueueError;
pub use health::{QueueHealth, ReviewItem};
pub use store::{Failure, Queue, QueueConfig};
