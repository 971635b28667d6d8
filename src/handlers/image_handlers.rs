//! HTTP handlers for the image pipeline.
//!
//! Validation accepts raw bytes and never touches storage; the derivative
//! endpoints operate on an already-stored source object addressed by key.

use crate::{
    errors::AppError,
    models::{
        image::{DerivativeSpec, FitMode, OutputFormat, ProcessOptions, ValidationResult},
        object::UploadResult,
    },
    services::{AppState, images},
};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
};
use serde::Deserialize;
use std::collections::HashMap;

/// POST `/api/images/validate` — check a candidate image without storing it.
///
/// Expected failures (too small, wrong extension, oversized) come back in
/// the result body, not as an error status.
pub async fn validate_image(
    mut multipart: Multipart,
) -> Result<Json<ValidationResult>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid multipart body: {err}")))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let data = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(format!("could not read upload: {err}")))?;
        return Ok(Json(images::validate(&data, &filename)));
    }
    Err(AppError::bad_request("multipart body contains no file field"))
}

/// POST `/api/images/thumbnails/{*path}` — built-in thumbnail ladder.
pub async fn generate_thumbnails(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<HashMap<String, String>>, AppError> {
    Ok(Json(state.images.generate_thumbnails(&path).await?))
}

/// POST `/api/images/responsive/{*path}` — caller-supplied derivative specs.
///
/// Returns `name -> url` for the specs that succeeded; a missing name means
/// that derivative was not generated.
pub async fn create_responsive_images(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Json(specs): Json<Vec<DerivativeSpec>>,
) -> Result<Json<HashMap<String, String>>, AppError> {
    Ok(Json(
        state.images.create_responsive_images(&path, &specs).await?,
    ))
}

#[derive(Deserialize, Default)]
pub struct OptimizeQuery {
    pub format: Option<OutputFormat>,
    pub quality: Option<u8>,
}

/// POST `/api/images/optimize/{*path}` — single recompressed derivative.
pub async fn optimize_image(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<OptimizeQuery>,
) -> Result<Json<UploadResult>, AppError> {
    Ok(Json(
        state
            .images
            .optimize_image(&path, query.format, query.quality)
            .await?,
    ))
}

#[derive(Deserialize)]
pub struct ResizeQuery {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub fit: FitMode,
    pub format: Option<OutputFormat>,
    pub quality: Option<u8>,
}

/// POST `/api/images/resize/{*path}` — custom-dimension derivative.
pub async fn resize_image(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<ResizeQuery>,
) -> Result<Json<UploadResult>, AppError> {
    let opts = ProcessOptions {
        fit: query.fit,
        format: query.format,
        quality: query.quality,
        ..Default::default()
    };
    Ok(Json(
        state
            .images
            .resize_image(&path, query.width, query.height, &opts)
            .await?,
    ))
}
