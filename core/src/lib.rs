//! Terminal side of the offline sales sync: a [`Node`] owns the local queue,
//! the Sync Client draining it and the asset worker keeping the client current.

pub mod config;
pub mod inventory;
pub mod logging;
pub mod sync;

mod node;

pub use config::TerminalConfig;
pub use node::Node;

use pos_sync::Decimal;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
	#[error("sale total must be non-negative with at most 4 decimals: {0}")]
	InvalidTotal(Decimal),

	#[error("failed to save terminal config: {0:#}")]
	Config(anyhow::Error),
	#[error(transparent)]
	Queue(#[from] pos_queue::QueueError),
	#[error(transparent)]
	Asset(#[from] pos_assets::AssetError),
	#[error(transparent)]
	Api(#[from] pos_cloud_api::Error),
	#[error(transparent)]
	FileIO(#[from] pos_utils::error::FileIOError),
}
