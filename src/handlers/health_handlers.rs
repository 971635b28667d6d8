//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that round-trips a probe object through the
//!   active storage backend

use crate::services::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// `GET /healthz`
///
/// Very small liveness probe — always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that performs a best-effort write/read/delete against
/// the active backend (remote or local fallback) under the pending prefix.
///
/// Returns JSON describing the check and which backend is serving requests.
/// HTTP 200 when the probe passes, HTTP 503 when it fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let backend = state.store.backend_name().await;
    let fallback = state.store.in_fallback_mode().await;
    let probe_key = format!("private/temp/pending/.readyz-{}", Uuid::new_v4());

    let storage_check = async {
        state
            .store
            .put(
                &probe_key,
                Bytes::from_static(b"readyz"),
                "text/plain",
                &Default::default(),
            )
            .await?;
        let (data, _) = state.store.get(&probe_key).await?;
        let result = if data.as_ref() == b"readyz" {
            Ok(())
        } else {
            Err(crate::backend::BackendError::Permanent(
                "probe content mismatch".into(),
            ))
        };
        // Best-effort cleanup either way.
        let _ = state.store.delete(&probe_key).await;
        result
    };

    let (ok, error) = match storage_check.await {
        Ok(()) => (true, None),
        Err(err) => (false, Some(err.to_string())),
    };

    let mut checks = HashMap::new();
    checks.insert("storage", CheckStatus { ok, error });

    let body = ReadyResponse {
        status: if ok { "ok".into() } else { "error".into() },
        backend: backend.into(),
        fallback,
        checks,
    };

    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    backend: String,
    /// True when the process settled on the local mirror at startup.
    fallback: bool,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
