//! Shared secret guard in front of every external route.

use axum::{
	extract::{Request, State},
	http::header::AUTHORIZATION,
	middleware::Next,
	response::Response,
};
use secstr::SecUtf8;
use std::sync::Arc;
use tracing::warn;

use crate::error::ApiError;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Accepts the key either as `x-api-key` or as an `Authorization: Bearer` token.
pub async fn require_api_key(
	State(api_key): State<Arc<SecUtf8>>,
	request: Request,
	next: Next,
) -> Result<Response, ApiError> {
	let headers = request.headers();

	let provided = headers
		.get(API_KEY_HEADER)
		.and_then(|value| value.to_str().ok())
		.or_else(|| {
			headers
				.get(AUTHORIZATION)
				.and_then(|value| value.to_str().ok())
				.and_then(|value| value.strip_prefix("Bearer "))
		})
		.map(|key| SecUtf8::from(key.trim()));

	match provided {
		// SecUtf8 compares in constant time
		Some(key) if key == *api_key => Ok(next.run(request).await),
		_ => {
			warn!(path = %request.uri().path(), "Rejected request without a valid api key");
			Err(ApiError::Unauthorized)
		}
	}
}
