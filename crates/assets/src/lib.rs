//! Keeps the terminal's cached client assets current.
//!
//! A new [`AssetManifest`] version is downloaded and verified in the
//! background, then waits as `INSTALLED_WAITING` until an operator confirms
//! the update. Activation takes the [`pos_sync::SyncGate`] exclusively, so code
//! is never swapped under an in-flight sync attempt, and a reload is requested
//! exactly once per activated version.

mod error;
mod lifecycle;
mod manifest;
mod source;
mod store;
mod worker;

pub use error::AssetError;
pub use lifecycle::{Activation, AssetVersion, InstallState, Lifecycle, LifecycleSnapshot, WorkerPhase};
pub use manifest::{is_safe_asset_path, AssetFile, AssetManifest, MANIFEST_FILE};
pub use source::{AssetSource, HttpAssetSource, ManifestFetch};
pub use store::AssetStore;
pub use worker::{run_actor, AssetWorker, WorkerConfig, WorkerEvent, WorkerHandle};
