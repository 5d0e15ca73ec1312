//! Sync server: the idempotent `POST /transactions/sync` endpoint, its side
//! effect free existence lookup and the asset files terminals keep cached.

pub mod config;
pub mod ledger;

mod auth;
mod error;
mod routes;

pub use auth::API_KEY_HEADER;
pub use config::ServerConfig;
pub use error::ApiError;
pub use ledger::{Ledger, LedgerError, Recorded};

use pos_assets::AssetManifest;
use pos_sync::wire::SYNC_PATH;

use std::{path::PathBuf, sync::Arc};

use axum::{http::Method, middleware, routing::get, Router};
use secstr::SecUtf8;
use tower_http::{
	cors::{Any, CorsLayer},
	trace::TraceLayer,
};

#[derive(Clone)]
pub struct AppState {
	pub ledger: Ledger,
	pub api_key: Arc<SecUtf8>,
	/// Absent when the server has no assets to distribute.
	pub manifest: Option<Arc<AssetManifest>>,
	pub assets_dir: Option<Arc<PathBuf>>,
}

impl AppState {
	#[must_use]
	pub fn new(ledger: Ledger, api_key: &str) -> Self {
		Self {
			ledger,
			api_key: Arc::new(SecUtf8::from(api_key)),
			manifest: None,
			assets_dir: None,
		}
	}

	#[must_use]
	pub fn with_assets(mut self, dir: PathBuf, manifest: AssetManifest) -> Self {
		self.assets_dir = Some(Arc::new(dir));
		self.manifest = Some(Arc::new(manifest));
		self
	}
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route(SYNC_PATH, get(routes::exists).post(routes::submit))
		.route("/assets/*path", get(routes::asset))
		.route_layer(middleware::from_fn_with_state(
			Arc::clone(&state.api_key),
			auth::require_api_key,
		))
		.route("/health", get(|| async { "OK" }))
		.fallback(|| async { ApiError::NotFound })
		.layer(
			CorsLayer::new()
				.allow_origin(Any)
				.allow_methods([Method::GET, Method::POST])
				.allow_headers(Any),
		)
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}
