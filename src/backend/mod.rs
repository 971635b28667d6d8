//! Backend adapter over a flat key/value blob store.
//!
//! One fixed trait, implemented once per concrete store: [`S3Backend`] for
//! the remote service and [`LocalBackend`] for the on-disk mirror used as a
//! startup fallback. Callers above this layer never touch an SDK type.

pub mod local;
pub mod s3;

pub use local::LocalBackend;
pub use s3::S3Backend;

use crate::models::object::ObjectRecord;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use thiserror::Error;

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Failure taxonomy for backend calls.
///
/// `Transient` failures are the only ones the resilient wrapper retries;
/// everything else propagates immediately.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Requested key absent on get/head. Never retried.
    #[error("object `{0}` not found")]
    NotFound(String),

    /// Malformed or unsafe key. Never retried.
    #[error("invalid object key `{key}`: {reason}")]
    InvalidKey { key: String, reason: String },

    /// Network failure or 5xx-class response. Retried with backoff.
    #[error("transient backend failure: {0}")]
    Transient(String),

    /// Auth/config failure. Never retried; triggers local fallback only
    /// during the one-time startup verification.
    #[error("permanent backend failure: {0}")]
    Permanent(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Thin interface over a remote (or local) key/value blob client.
///
/// Keys are case-sensitive, `/`-delimited strings with no leading or
/// trailing slash. `delete` of an absent key is success so cleanup stays
/// idempotent.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Store `data` under `key`, overwriting any previous object.
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> BackendResult<ObjectRecord>;

    /// Fetch the object bytes and its record.
    async fn get(&self, key: &str) -> BackendResult<(Bytes, ObjectRecord)>;

    /// Fetch only the object record.
    async fn head(&self, key: &str) -> BackendResult<ObjectRecord>;

    /// Remove the object. Absent keys are success.
    async fn delete(&self, key: &str) -> BackendResult<()>;

    async fn exists(&self, key: &str) -> BackendResult<bool>;

    /// List keys under `prefix`, lexicographically ordered, truncated to
    /// `limit` when given. An empty prefix lists the whole namespace.
    async fn list(&self, prefix: &str, limit: Option<usize>) -> BackendResult<Vec<String>>;

    /// Stable URL under which the object can be retrieved.
    fn url_for(&self, key: &str) -> String;

    /// Short backend name for logs and readiness reporting.
    fn name(&self) -> &'static str;
}

/// Basic key validation to avoid trivial path traversal vectors.
///
/// Rejects empty keys, keys with a leading or trailing `/`, `..` segments,
/// and control characters.
pub fn ensure_key_safe(key: &str) -> BackendResult<()> {
    let invalid = |reason: &str| BackendError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    if key.is_empty() {
        return Err(invalid("key is empty"));
    }
    if key.len() > MAX_OBJECT_KEY_LEN {
        return Err(invalid("key exceeds maximum length"));
    }
    if key.starts_with('/') || key.ends_with('/') {
        return Err(invalid("key cannot begin or end with a slash"));
    }
    if key.split('/').any(|segment| segment == "..") {
        return Err(invalid("key cannot contain `..` segments"));
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(invalid("key contains control characters"));
    }
    Ok(())
}

/// Infer a MIME type for a key from magic bytes, then file extension.
///
/// Used when a caller omits the content type and by the local backend,
/// which does not persist metadata.
pub fn content_type_for(key: &str, data: Option<&[u8]>) -> String {
    if let Some(data) = data {
        if data.starts_with(b"\x89PNG\r\n\x1a\n") {
            return "image/png".into();
        }
        if data.starts_with(b"\xff\xd8") {
            return "image/jpeg".into();
        }
        if data.starts_with(b"GIF8") {
            return "image/gif".into();
        }
        if data.starts_with(b"RIFF") && data.len() > 12 && &data[8..12] == b"WEBP" {
            return "image/webp".into();
        }
        if data.starts_with(b"%PDF") {
            return "application/pdf".into();
        }
    }
    let ext = key
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg".into(),
        Some("png") => "image/png".into(),
        Some("gif") => "image/gif".into(),
        Some("webp") => "image/webp".into(),
        Some("avif") => "image/avif".into(),
        Some("svg") => "image/svg+xml".into(),
        Some("pdf") => "application/pdf".into(),
        Some("txt") => "text/plain".into(),
        Some("json") => "application/json".into(),
        _ => "application/octet-stream".into(),
    }
}
