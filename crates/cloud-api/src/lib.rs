//! HTTP calls a terminal makes: the sync server and the upstream inventory API.
//!
//! Each endpoint lives in its own module exposing an `exec` function, taking a
//! [`RequestConfig`] by value so callers can fetch a fresh one per call.

use std::{future::Future, sync::Arc, time::Duration};

use pos_sync::SyncError;
use reqwest::{header::HeaderValue, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct RequestConfig {
	pub client: reqwest::Client,
	pub api_url: String,
	pub api_key: Option<String>,
	/// Bound applied to every request made with this config.
	pub timeout: Duration,
}

impl RequestConfig {
	/// `timeout` bounds each whole request and, for the life of the client,
	/// connection setup. Callers may raise [`RequestConfig::timeout`] on a copy
	/// for slower calls such as asset downloads.
	pub fn new(
		api_url: impl Into<String>,
		api_key: Option<String>,
		timeout: Duration,
	) -> Result<Self, Error> {
		let client = reqwest::Client::builder()
			.connect_timeout(timeout)
			.build()
			.map_err(Error::Client)?;

		Ok(Self {
			client,
			api_url: api_url.into().trim_end_matches('/').to_string(),
			api_key,
			timeout,
		})
	}

	fn url(&self, path: &str) -> String {
		format!("{}{path}", self.api_url)
	}
}

pub trait RequestConfigProvider {
	fn get_request_config(self: &Arc<Self>) -> impl Future<Output = RequestConfig> + Send;
}

/// Failures of the non-sync endpoints (assets, upstream).
#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("failed to build http client: {0}")]
	Client(#[source] reqwest::Error),
	#[error(transparent)]
	Sync(#[from] SyncError),
	#[error("undecodable response body: {0}")]
	Decode(String),
}

trait WithAuth {
	fn with_auth(self, api_key: Option<&str>) -> Self;
}

impl WithAuth for reqwest::RequestBuilder {
	fn with_auth(self, api_key: Option<&str>) -> Self {
		match api_key {
			Some(key) => self.header(API_KEY_HEADER, key),
			None => self,
		}
	}
}

/// Error body the sync server sends along with a failure status.
#[derive(Deserialize, Default)]
struct FailureBody {
	#[serde(default)]
	error: String,
	#[serde(default)]
	details: Option<String>,
}

/// Only a failure to reach the server is `NetworkUnavailable`, which retries
/// forever. Anything else, such as a malformed `api_url` or a redirect loop,
/// is transient so it eventually parks the record for review.
fn classify_transport(e: &reqwest::Error, timeout: Duration) -> SyncError {
	if e.is_timeout() {
		SyncError::TimedOut(timeout)
	} else if e.is_connect() || e.is_request() {
		SyncError::NetworkUnavailable(e.to_string())
	} else {
		if e.is_builder() || e.is_redirect() {
			warn!(?e, "Request to the server is misconfigured, check api_url");
		}
		SyncError::ServerTransient(e.to_string())
	}
}

async fn classify_status(response: reqwest::Response) -> SyncError {
	let status = response.status();
	let body = response.json::<FailureBody>().await.unwrap_or_default();
	let message = match (body.error.is_empty(), body.details) {
		(true, _) => status.to_string(),
		(false, None) => body.error,
		(false, Some(details)) => format!("{}: {details}", body.error),
	};

	debug!(%status, %message, "Server answered with a failure status");

	match status {
		StatusCode::CONFLICT => SyncError::DuplicateAccepted,
		StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::Unauthorized(message),
		StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
			SyncError::ServerTransient(message)
		}
		status if status.is_server_error() => SyncError::ServerTransient(message),
		_ => SyncError::ServerRejected(message),
	}
}

async fn send(config: &RequestConfig, req: reqwest::RequestBuilder) -> Result<reqwest::Response, SyncError> {
	let response = req
		.timeout(config.timeout)
		.with_auth(config.api_key.as_deref())
		.send()
		.await
		.map_err(|e| {
			let error = classify_transport(&e, config.timeout);
			debug!(%error, "Request failed without a response");
			error
		})?;

	if response.status().is_success() || response.status() == StatusCode::NOT_MODIFIED {
		Ok(response)
	} else {
		Err(classify_status(response).await)
	}
}

pub mod transactions {
	use super::*;

	use pos_sync::{
		wire::{Acceptance, ExistenceResponse, SyncAccepted, SyncRequest, SYNC_PATH},
		TransactionId,
	};

	pub use sync::exec as sync;
	pub mod sync {
		use super::*;

		/// Submits one record. Both a fresh acceptance and a duplicate come back as `Ok`.
		pub async fn exec(config: RequestConfig, request: &SyncRequest) -> Result<Acceptance, SyncError> {
			let response = send(&config, config.client.post(config.url(SYNC_PATH)).json(request)).await?;

			response
				.json::<SyncAccepted>()
				.await
				.map(|body| Acceptance::from(&body))
				.map_err(|e| classify_transport(&e, config.timeout))
		}
	}

	pub use exists::exec as exists;
	pub mod exists {
		use super::*;

		/// Side effect free lookup of `id` in the server ledger.
		pub async fn exec(config: RequestConfig, id: &TransactionId) -> Result<bool, SyncError> {
			let response = send(
				&config,
				config
					.client
					.get(config.url(SYNC_PATH))
					.query(&[("id", id.as_str())]),
			)
			.await?;

			response
				.json::<ExistenceResponse>()
				.await
				.map(|body| body.exists)
				.map_err(|e| classify_transport(&e, config.timeout))
		}
	}
}

pub mod assets {
	use super::*;

	use reqwest::header::{ETAG, IF_NONE_MATCH};
	use serde::de::DeserializeOwned;

	pub const MANIFEST_PATH: &str = "/assets/manifest.json";

	pub use manifest::exec as manifest;
	pub mod manifest {
		use super::*;

		#[derive(Debug)]
		pub enum Response<T> {
			NotModified,
			Fetched { manifest: T, etag: Option<String> },
		}

		/// Conditional GET of the asset manifest.
		pub async fn exec<T: DeserializeOwned>(
			config: RequestConfig,
			etag: Option<&str>,
		) -> Result<Response<T>, Error> {
			let mut req = config.client.get(config.url(MANIFEST_PATH));
			if let Some(etag) = etag.and_then(|etag| HeaderValue::from_str(etag).ok()) {
				req = req.header(IF_NONE_MATCH, etag);
			}

			let response = send(&config, req).await?;

			if response.status() == StatusCode::NOT_MODIFIED {
				return Ok(Response::NotModified);
			}

			let etag = response
				.headers()
				.get(ETAG)
				.and_then(|value| value.to_str().ok())
				.map(str::to_string);

			let bytes = response
				.bytes()
				.await
				.map_err(|e| classify_transport(&e, config.timeout))?;

			serde_json::from_slice(&bytes)
				.map(|manifest| Response::Fetched { manifest, etag })
				.map_err(|e| Error::Decode(e.to_string()))
		}
	}

	pub use file::exec as file;
	pub mod file {
		use super::*;

		/// Downloads one asset, `path` being relative to `/assets/`.
		pub async fn exec(config: RequestConfig, path: &str) -> Result<bytes::Bytes, Error> {
			let response = send(
				&config,
				config
					.client
					.get(config.url(&format!("/assets/{}", path.trim_start_matches('/')))),
			)
			.await?;

			response
				.bytes()
				.await
				.map_err(|e| Error::Sync(classify_transport(&e, config.timeout)))
		}
	}
}

pub mod upstream {
	use super::*;

	use serde_json::Value;

	pub use list::exec as list;
	pub mod list {
		use super::*;

		#[derive(Debug, Clone)]
		pub struct Query<'a> {
			pub page: u32,
			pub per_page: u32,
			pub search: Option<&'a str>,
		}

		#[derive(Debug, Deserialize)]
		pub struct Page {
			#[serde(default)]
			pub data: Vec<Value>,
			#[serde(default)]
			pub total: Option<u64>,
		}

		/// One page of an upstream collection such as `inventory` or `customers`.
		pub async fn exec(config: RequestConfig, resource: &str, query: &Query<'_>) -> Result<Page, Error> {
			let mut params = vec![
				("page", query.page.to_string()),
				("perPage", query.per_page.to_string()),
			];
			if let Some(search) = query.search {
				params.push(("search", search.to_string()));
			}

			let response = send(
				&config,
				config
					.client
					.get(config.url(&format!("/{}", resource.trim_start_matches('/'))))
					.query(&params),
			)
			.await?;

			let bytes = response
				.bytes()
				.await
				.map_err(|e| classify_transport(&e, config.timeout))?;

			serde_json::from_slice(&bytes).map_err(|e| Error::Decode(e.to_string()))
		}
	}
}
