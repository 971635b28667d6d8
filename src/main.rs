use anyhow::Result;
use axum::Router;
use std::{io::ErrorKind, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod backend;
mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use backend::{LocalBackend, ObjectBackend, S3Backend, s3::S3Settings};
use services::{AppState, store::{ObjectStore, RetryPolicy}};

/// Standard subfolders seeded under each namespace root at startup so the
/// conventional layout is enumerable before the first upload.
const NAMESPACE_ROOTS: [&str; 2] = ["public", "private"];
const STANDARD_FOLDERS: [&str; 7] = [
    "products",
    "categories",
    "suppliers",
    "catalogs",
    "temp/pending",
    "thumbnails",
    "optimized",
];

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = config::AppConfig::from_env_and_args()?;
    tracing::info!(
        "Starting media-store on {} (bucket: {}, local root: {})",
        cfg.addr(),
        cfg.s3_bucket.as_deref().unwrap_or("<none>"),
        cfg.local_root
    );

    // --- Build backends ---
    let local = Arc::new(LocalBackend::new(&cfg.local_root)?);
    let remote: Option<Arc<dyn ObjectBackend>> = match &cfg.s3_bucket {
        Some(bucket) => {
            let backend = S3Backend::new(S3Settings {
                bucket: bucket.clone(),
                region: cfg.s3_region.clone(),
                endpoint: cfg.s3_endpoint.clone(),
                access_key: cfg.s3_access_key.clone(),
                secret_key: cfg.s3_secret_key.clone(),
            })
            .await;
            Some(Arc::new(backend))
        }
        None => None,
    };

    // --- Initialize core store (verifies remote access or falls back) ---
    let store = Arc::new(ObjectStore::new(
        remote,
        local,
        RetryPolicy {
            attempts: cfg.retry_attempts,
            base_delay: Duration::from_millis(cfg.retry_base_delay_ms),
        },
    ));
    store.initialize().await;
    tracing::info!("storage backend: {}", store.backend_name().await);

    let state = AppState::new(store);
    seed_standard_folders(&state).await;

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Write the directory markers for the conventional namespace.
///
/// Best-effort: a failure here is logged and does not prevent startup,
/// since every folder also becomes enumerable on its first upload.
async fn seed_standard_folders(state: &AppState) {
    for root in NAMESPACE_ROOTS {
        for folder in STANDARD_FOLDERS {
            let path = format!("{root}/{folder}");
            if let Err(err) = state.folders.ensure_directory_exists(&path).await {
                tracing::warn!("could not seed folder {path}: {err}");
            }
        }
    }
}
