use pos_assets::{is_safe_asset_path, MANIFEST_FILE};
use pos_sync::{
	wire::{ExistenceResponse, SyncAccepted, SyncRequest},
	TransactionId, MAX_TOTAL_SCALE,
};

use std::{collections::HashMap, io::ErrorKind};

use axum::{
	extract::{rejection::JsonRejection, Path, Query, State},
	http::{
		header::{CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH},
		HeaderMap, HeaderValue, StatusCode,
	},
	response::{IntoResponse, Response},
	Json,
};
use tokio::fs;
use tracing::error;

use crate::{error::ApiError, AppState};

pub async fn submit(
	State(state): State<AppState>,
	body: Result<Json<SyncRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SyncAccepted>), ApiError> {
	let Json(request) = body.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;

	if request.total.scale() > MAX_TOTAL_SCALE {
		return Err(ApiError::Validation(format!(
			"total {} has more than {MAX_TOTAL_SCALE} decimal places",
			request.total
		)));
	}

	if request.total.is_sign_negative() {
		return Err(ApiError::Validation(format!(
			"total {} is negative",
			request.total
		)));
	}

	let recorded = state.ledger.record(&request).await?;

	let (status, message) = if recorded.duplicate {
		(StatusCode::OK, "Transaction already synced")
	} else {
		(StatusCode::CREATED, "Transaction synced")
	};

	Ok((
		status,
		Json(SyncAccepted {
			success: true,
			accepted: true,
			id: request.id,
			synced_at: recorded.synced_at,
			message: message.to_string(),
			duplicate: recorded.duplicate,
		}),
	))
}

pub async fn exists(
	State(state): State<AppState>,
	Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ExistenceResponse>, ApiError> {
	let raw = params
		.get("id")
		.ok_or_else(|| ApiError::Validation("missing id query parameter".into()))?;

	let id = TransactionId::parse(raw.as_str())
		.map_err(|e| ApiError::Validation(e.to_string()))?;

	Ok(Json(ExistenceResponse {
		exists: state.ledger.exists(&id).await?,
		transaction_id: id.to_string(),
	}))
}

/// Conditional GET: the manifest's etag changes with its version only.
pub async fn manifest(State(state): State<AppState>, headers: HeaderMap) -> Response {
	let Some(manifest) = state.manifest.as_deref() else {
		return ApiError::NotFound.into_response();
	};

	let etag = manifest.etag();
	let mut response_headers = HeaderMap::new();
	if let Ok(value) = etag.parse() {
		response_headers.insert(ETAG, value);
	}
	response_headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

	let matches = headers
		.get(IF_NONE_MATCH)
		.and_then(|value| value.to_str().ok())
		.is_some_and(|candidates| {
			candidates
				.split(',')
				.any(|candidate| candidate.trim() == etag || candidate.trim() == "*")
		});

	if matches {
		return (StatusCode::NOT_MODIFIED, response_headers).into_response();
	}

	(response_headers, Json(manifest)).into_response()
}

/// Files of the current asset version, `manifest.json` included.
pub async fn asset(
	State(state): State<AppState>,
	Path(path): Path<String>,
	headers: HeaderMap,
) -> Response {
	if path == MANIFEST_FILE {
		return manifest(State(state), headers).await;
	}

	let Some(dir) = state.assets_dir.as_deref() else {
		return ApiError::NotFound.into_response();
	};

	if !is_safe_asset_path(&path) {
		return ApiError::Validation(format!("invalid asset path: {path}")).into_response();
	}

	match fs::read(dir.join(&path)).await {
		Ok(contents) => ([(CONTENT_TYPE, content_type(&path))], contents).into_response(),
		Err(e) if e.kind() == ErrorKind::NotFound => ApiError::NotFound.into_response(),
		Err(e) => {
			error!(?e, %path, "Failed to read asset file");
			StatusCode::INTERNAL_SERVER_ERROR.into_response()
		}
	}
}

fn content_type(path: &str) -> &'static str {
	match path.rsplit('.').next() {
		Some("html") => "text/html; charset=utf-8",
		Some("js" | "mjs") => "text/javascript",
		Some("css") => "text/css",
		Some("json" | "webmanifest") => "application/json",
		Some("svg") => "image/svg+xml",
		Some("png") => "image/png",
		Some("webp") => "image/webp",
		Some("ico") => "image/x-icon",
		Some("woff2") => "font/woff2",
		_ => "application/octet-stream",
	}
}
