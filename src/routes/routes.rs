//! Defines routes for the file, folder, and image API.
//!
//! ## Structure
//! - **File endpoints**
//!   - `GET    /api/files/{*path}` — an object's bytes
//!   - `GET    /api/metadata/{*path}` — the object record only
//!   - `DELETE /api/files/{*path}` — delete an object (idempotent)
//!   - `POST   /api/upload/{*path}` — multipart upload into a folder
//!   - `POST   /api/promote` — move an object between keys
//!
//! - **Folder endpoints**
//!   - `GET /api/folders` — deduplicated root folder names
//!   - `GET /api/folders/{path}/files` — direct child files
//!   - `GET /api/folders/{path}/subfolders` — direct subfolder names
//!
//! - **Image endpoints**
//!   - `POST /api/images/validate` — check a candidate without storing it
//!   - `POST /api/images/thumbnails/{*path}` — built-in thumbnail ladder
//!   - `POST /api/images/responsive/{*path}` — caller-supplied specs
//!   - `POST /api/images/optimize/{*path}` — single recompressed copy
//!   - `POST /api/images/resize/{*path}` — custom-dimension derivative
//!
//! The wildcard `{*path}` allows nested keys like `public/products/img.jpg`.
//! Folder paths may themselves contain slashes, so the two folder listings
//! share one wildcard route and split the trailing verb in the handler.

use crate::{
    handlers::{
        file_handlers::{
            delete_file, folder_listing, get_file, get_metadata, list_root_folders,
            promote_file, upload_file,
        },
        health_handlers::{healthz, readyz},
        image_handlers::{
            create_responsive_images, generate_thumbnails, optimize_image, resize_image,
            validate_image,
        },
    },
    services::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Upload bodies may carry a full-size source image plus multipart framing.
const MAX_UPLOAD_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Build and return the router for all file, folder, image, and health
/// routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // file-level routes
        .route("/api/files/{*path}", get(get_file).delete(delete_file))
        .route("/api/metadata/{*path}", get(get_metadata))
        .route(
            "/api/upload/{*path}",
            post(upload_file).layer(DefaultBodyLimit::max(MAX_UPLOAD_BODY_BYTES)),
        )
        .route("/api/promote", post(promote_file))
        // folder-level routes
        .route("/api/folders", get(list_root_folders))
        .route("/api/folders/{*rest}", get(folder_listing))
        // image pipeline routes
        .route(
            "/api/images/validate",
            post(validate_image).layer(DefaultBodyLimit::max(MAX_UPLOAD_BODY_BYTES)),
        )
        .route("/api/images/thumbnails/{*path}", post(generate_thumbnails))
        .route(
            "/api/images/responsive/{*path}",
            post(create_responsive_images),
        )
        .route("/api/images/optimize/{*path}", post(optimize_image))
        .route("/api/images/resize/{*path}", post(resize_image))
}
