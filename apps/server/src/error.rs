use pos_sync::wire::SyncFailure;

use axum::{
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};
use tracing::error;

use crate::ledger::LedgerError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
	#[error("validation failed: {0}")]
	Validation(String),
	#[error("unauthorized")]
	Unauthorized,
	#[error("not found")]
	NotFound,
	#[error(transparent)]
	Ledger(#[from] LedgerError),
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let (status, failure) = match self {
			Self::Validation(details) => (
				StatusCode::BAD_REQUEST,
				SyncFailure::new("validation failed", Some(details)),
			),
			Self::Unauthorized => (
				StatusCode::UNAUTHORIZED,
				SyncFailure::new("unauthorized", Some("missing or invalid api key".into())),
			),
			Self::NotFound => (StatusCode::NOT_FOUND, SyncFailure::new("not found", None)),
			Self::Ledger(e) => {
				error!(?e, "Failed to commit to the ledger");
				// Nothing was acknowledged, the client keeps the record and retries
				(
					StatusCode::INTERNAL_SERVER_ERROR,
					SyncFailure::new("storage failure", Some(e.to_string())),
				)
			}
		};

		(status, Json(failure)).into_response()
	}
}
