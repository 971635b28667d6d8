//! Represents an object (blob) stored under a flat key namespace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata for a single stored object, addressed by its key.
///
/// The record describes the object, not the content bytes. Identity is the
/// key; there is no secondary index. A put to an existing key overwrites the
/// previous record.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ObjectRecord {
    /// Object key (path-like identifier, `/`-delimited, no leading slash).
    pub key: String,

    /// Content type (MIME type).
    pub content_type: String,

    /// Size in bytes.
    pub size: u64,

    /// MD5 checksum for integrity verification, when known.
    pub etag: Option<String>,

    /// Timestamp when the object was last written.
    pub last_modified: DateTime<Utc>,

    /// User-defined metadata entries attached to the object.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// The value returned to callers after a successful upload.
///
/// Callers never see backend-internal state (retry counts, fallback mode);
/// this is the whole public result of a put.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UploadResult {
    /// Physical key the object was stored under.
    pub key: String,

    /// Stable URL for retrieving the object.
    pub url: String,

    /// Size in bytes.
    pub size: u64,

    /// Content type the object was stored with.
    pub content_type: String,

    /// User-defined metadata stored alongside the object.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}
