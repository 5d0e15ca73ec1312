use pos_utils::error::FileIOError;

use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum AssetError {
	#[error("manifest lists an unsafe asset path: <path='{0}'>")]
	UnsafePath(String),
	#[error("invalid manifest: {0}")]
	Manifest(String),
	#[error("asset failed its integrity check: <path='{path}'>")]
	IntegrityMismatch { path: String },
	#[error("asset version {candidate} is not newer than {current}")]
	NotNewer { candidate: u64, current: u64 },
	#[error("no asset version is waiting for activation")]
	NothingToActivate,
	#[error("activation deferred, a sync attempt was still in flight after {0:?}")]
	ActivationDeferred(Duration),
	#[error("asset worker is not running")]
	WorkerStopped,

	#[error(transparent)]
	Api(#[from] pos_cloud_api::Error),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
}
