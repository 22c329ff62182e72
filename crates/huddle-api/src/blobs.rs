use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

use huddle_types::api::UploadResponse;

use crate::auth::AppState;
use crate::middleware::Claims;

/// 50 MB upload limit for blobs
pub const MAX_BLOB_SIZE: usize = 50 * 1024 * 1024;

/// Keys become file names under the blob directory, so anything that could
/// escape it is refused.
pub fn is_valid_blob_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 255
        && !key.contains('/')
        && !key.contains('\\')
        && !key.contains("..")
        && !key.chars().any(char::is_control)
}

pub fn download_url(public_url: &str, key: &str) -> String {
    format!("{}/blobs/{}", public_url.trim_end_matches('/'), key)
}

/// PUT /blobs/{key}: accepts raw bytes (application/octet-stream), saves to
/// {blob_dir}/{key}, records the owner, returns { key, size, url }.
pub async fn upload_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Extension(claims): Extension<Claims>,
    bytes: Bytes,
) -> Result<impl IntoResponse, StatusCode> {
    if !is_valid_blob_key(&key) || bytes.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    if bytes.len() > MAX_BLOB_SIZE {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    tokio::fs::create_dir_all(&state.blob_dir).await.map_err(|e| {
        error!("Failed to create blob directory {}: {}", state.blob_dir.display(), e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let file_path = state.blob_dir.join(&key);
    let mut file = tokio::fs::File::create(&file_path).await.map_err(|e| {
        error!("Failed to create blob {}: {}", file_path.display(), e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    file.write_all(&bytes).await.map_err(|e| {
        error!("Failed to write blob {}: {}", file_path.display(), e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    file.flush().await.map_err(|e| {
        error!("Failed to flush blob {}: {}", file_path.display(), e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let size = bytes.len() as i64;
    let db = state.db.clone();
    let k = key.clone();
    let owner = claims.sub.to_string();
    tokio::task::spawn_blocking(move || db.upsert_blob(&k, &owner, size))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("DB upsert_blob error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    info!("Blob {} uploaded by {} ({} bytes)", key, claims.sub, size);

    let url = download_url(&state.public_url, &key);
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            key,
            size: size as u64,
            url,
        }),
    ))
}

/// GET /blobs/{key}: the public download URL of an uploaded blob.
pub async fn download_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    if !is_valid_blob_key(&key) {
        return Err(StatusCode::BAD_REQUEST);
    }

    // Verify blob exists in DB
    let db = state.db.clone();
    let k = key.clone();
    let row = tokio::task::spawn_blocking(move || db.get_blob(&k))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("DB get_blob error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    if row.is_none() {
        return Err(StatusCode::NOT_FOUND);
    }

    let file_path = state.blob_dir.join(&key);
    let bytes = tokio::fs::read(&file_path).await.map_err(|e| {
        error!("Failed to read blob {}: {}", file_path.display(), e);
        StatusCode::NOT_FOUND
    })?;

    Ok((
        [(axum::http::header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    ))
}
