use pos_cloud_api::{transactions, RequestConfig, RequestConfigProvider};
use pos_sync::{
	wire::{Acceptance, SyncRequest},
	SyncError, TransactionId,
};

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

/// The two calls the Sync Client makes against the server.
#[async_trait]
pub trait SyncTransport: Send + Sync + 'static {
	async fn submit(&self, request: &SyncRequest) -> Result<Acceptance, SyncError>;

	/// Dedup Oracle: does the server ledger already hold `id`?
	async fn exists(&self, id: &TransactionId) -> Result<bool, SyncError>;
}

/// Current connection settings of the terminal; the api key can be replaced
/// at runtime after the server answered `Unauthorized`.
pub struct ApiConfig {
	config: RwLock<RequestConfig>,
}

impl ApiConfig {
	#[must_use]
	pub fn new(config: RequestConfig) -> Arc<Self> {
		Arc::new(Self {
			config: RwLock::new(config),
		})
	}

	pub async fn set_api_key(&self, api_key: Option<String>) {
		self.config.write().await.api_key = api_key;
	}
}

impl RequestConfigProvider for ApiConfig {
	async fn get_request_config(self: &Arc<Self>) -> RequestConfig {
		self.config.read().await.clone()
	}
}

pub struct HttpTransport<P> {
	config_provider: Arc<P>,
}

impl<P> HttpTransport<P> {
	pub const fn new(config_provider: Arc<P>) -> Self {
		Self { config_provider }
	}
}

#[async_trait]
impl<P: RequestConfigProvider + Send + Sync + 'static> SyncTransport for HttpTransport<P> {
	async fn submit(&self, request: &SyncRequest) -> Result<Acceptance, SyncError> {
		transactions::sync(self.config_provider.get_request_config().await, request).await
	}

	async fn exists(&self, id: &TransactionId) -> Result<bool, SyncError> {
		transactions::exists(self.config_provider.get_request_config().await, id).await
	}
}
