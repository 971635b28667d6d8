//! HTTP handlers for file and folder operations.
//!
//! Thin glue over the service layer: handlers accept and return key strings
//! unmodified, sanitize only the uploaded filename, and never see
//! backend-internal retry or fallback state.

use crate::{
    errors::AppError,
    models::object::{ObjectRecord, UploadResult},
    services::{AppState, keys},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

/// GET `/api/files/{*path}` — return an object's bytes with its content type.
pub async fn get_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, AppError> {
    let (data, record) = state.store.get(&path).await?;

    let mut response = Response::new(Body::from(data));
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &record);
    Ok(response)
}

/// GET `/api/metadata/{*path}` — the object record without its bytes.
pub async fn get_metadata(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<ObjectRecord>, AppError> {
    Ok(Json(state.store.head(&path).await?))
}

/// DELETE `/api/files/{*path}` — idempotent delete, 204 either way.
pub async fn delete_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.store.delete(&path).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/api/folders` — deduplicated first-level folder names.
pub async fn list_root_folders(
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.folders.list_root_folders().await?))
}

/// GET `/api/folders/{*rest}` where `rest` ends in `/files` or
/// `/subfolders`.
///
/// The folder path itself may contain slashes, so the trailing verb is
/// split off here rather than in the route table.
pub async fn folder_listing(
    State(state): State<AppState>,
    Path(rest): Path<String>,
) -> Result<Json<Vec<String>>, AppError> {
    if let Some(dir) = rest.strip_suffix("/files") {
        return Ok(Json(state.folders.list_files(dir).await?));
    }
    if let Some(dir) = rest.strip_suffix("/subfolders") {
        return Ok(Json(state.folders.list_subfolders(dir).await?));
    }
    Err(AppError::not_found(
        "expected /api/folders/{path}/files or /api/folders/{path}/subfolders",
    ))
}

/// POST `/api/promote` — relocate an object, typically out of the pending
/// area into its permanent key.
///
/// Copy-then-delete; not atomic. A failed run can be repeated safely.
pub async fn promote_file(
    State(state): State<AppState>,
    Json(request): Json<PromoteRequest>,
) -> Result<Json<ObjectRecord>, AppError> {
    let record = state.store.move_object(&request.from, &request.to).await?;
    Ok(Json(record))
}

#[derive(Deserialize)]
pub struct PromoteRequest {
    pub from: String,
    pub to: String,
}

#[derive(Deserialize, Default)]
pub struct UploadQuery {
    /// `timestamped` (default) keeps a sanitized filename; `opaque`
    /// replaces it with a UUID.
    #[serde(default)]
    pub naming: keys::Naming,
}

/// POST `/api/upload/{*path}` — store one multipart file under `path`.
///
/// The original filename is sanitized by the key naming policy; the
/// destination directory is made enumerable before the write.
pub async fn upload_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<UploadResult>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid multipart body: {err}")))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(format!("could not read upload: {err}")))?;

        state.folders.ensure_directory_exists(&path).await?;
        let result = state
            .store
            .upload(&path, &filename, data, content_type, query.naming)
            .await?;
        return Ok(Json(result));
    }
    Err(AppError::bad_request("multipart body contains no file field"))
}

fn set_object_headers(headers: &mut HeaderMap, record: &ObjectRecord) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&record.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&record.size.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    if let Some(etag) = record.etag.as_ref() {
        let quoted = format!("\"{}\"", etag);
        if let Ok(value) = HeaderValue::from_str(&quoted) {
            headers.insert(header::ETAG, value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(&record.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
