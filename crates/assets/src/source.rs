use pos_cloud_api::{assets, RequestConfig, RequestConfigProvider};

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{AssetError, AssetManifest};

#[derive(Debug)]
pub enum ManifestFetch {
	NotModified,
	Fetched {
		manifest: AssetManifest,
		etag: Option<String>,
	},
}

/// Where new asset versions come from.
#[async_trait]
pub trait AssetSource: Send + Sync + 'static {
	async fn fetch_manifest(&self, etag: Option<&str>) -> Result<ManifestFetch, AssetError>;

	async fn fetch_file(&self, path: &str) -> Result<Bytes, AssetError>;
}

/// Reads the connection settings on every call, so a replaced api key is
/// picked up by the next poll.
pub struct HttpAssetSource<P> {
	config_provider: Arc<P>,
	timeout: Duration,
}

impl<P: RequestConfigProvider> HttpAssetSource<P> {
	/// `timeout` replaces the provider's per request bound, downloads being
	/// larger than sync calls.
	pub const fn new(config_provider: Arc<P>, timeout: Duration) -> Self {
		Self {
			config_provider,
			timeout,
		}
	}

	async fn request_config(&self) -> RequestConfig {
		let mut config = self.config_provider.get_request_config().await;
		config.timeout = self.timeout;
		config
	}
}

#[async_trait]
impl<P: RequestConfigProvider + Send + Sync + 'static> AssetSource for HttpAssetSource<P> {
	async fn fetch_manifest(&self, etag: Option<&str>) -> Result<ManifestFetch, AssetError> {
		Ok(
			match assets::manifest::<AssetManifest>(self.request_config().await, etag).await? {
				assets::manifest::Response::NotModified => ManifestFetch::NotModified,
				assets::manifest::Response::Fetched { manifest, etag } => {
					ManifestFetch::Fetched { manifest, etag }
				}
			},
		)
	}

	async fn fetch_file(&self, path: &str) -> Result<Bytes, AssetError> {
		assets::file(self.request_config().await, path)
			.await
			.map_err(Into::into)
	}
}
