//! Local-filesystem backend.
//!
//! Mirrors the flat key namespace as a directory hierarchy beneath a root
//! path. Used directly in development and as the sticky fallback when the
//! remote backend fails its startup verification. Content types are derived
//! from the key, and etags are computed on read; no sidecar metadata is
//! kept on disk.

use super::{BackendError, BackendResult, ObjectBackend, content_type_for};
use crate::models::object::ObjectRecord;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const TMP_PREFIX: &str = ".tmp-";

pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a backend rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in key.split('/') {
            path.push(segment);
        }
        path
    }

    fn record_for(&self, key: &str, size: u64, modified: DateTime<Utc>, etag: Option<String>) -> ObjectRecord {
        ObjectRecord {
            key: key.to_string(),
            content_type: content_type_for(key, None),
            size,
            etag,
            last_modified: modified,
            metadata: HashMap::new(),
        }
    }

    /// Recursively remove empty parent directories up to the root.
    ///
    /// Stops at the first non-empty or missing directory.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.root) && current != self.root {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

fn io_failure(err: std::io::Error) -> BackendError {
    // Disk errors are treated as retryable; a second attempt is harmless.
    BackendError::Transient(format!("local disk error: {err}"))
}

#[async_trait]
impl ObjectBackend for LocalBackend {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> BackendResult<ObjectRecord> {
        let file_path = self.object_path(key);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| BackendError::Permanent("object path missing parent directory".into()))?;
        fs::create_dir_all(&parent).await.map_err(io_failure)?;

        // Write to a temp file and rename so a failed put never leaves a
        // partial object at the final key.
        let tmp_path = parent.join(format!("{TMP_PREFIX}{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await.map_err(io_failure)?;
        let write = async {
            file.write_all(&data).await?;
            file.flush().await?;
            file.sync_all().await
        };
        if let Err(err) = write.await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(io_failure(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(io_failure(err));
        }

        let etag = format!("{:x}", md5::compute(&data));
        let content_type = if content_type.is_empty() {
            content_type_for(key, Some(data.as_ref()))
        } else {
            content_type.to_string()
        };
        Ok(ObjectRecord {
            key: key.to_string(),
            content_type,
            size: data.len() as u64,
            etag: Some(etag),
            last_modified: Utc::now(),
            metadata: metadata.clone(),
        })
    }

    async fn get(&self, key: &str) -> BackendResult<(Bytes, ObjectRecord)> {
        let path = self.object_path(key);
        let data = fs::read(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BackendError::NotFound(key.to_string())
            } else {
                io_failure(err)
            }
        })?;
        let etag = format!("{:x}", md5::compute(&data));
        let modified = fs::metadata(&path)
            .await
            .ok()
            .and_then(|meta| meta.modified().ok())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(Utc::now);
        let record = self.record_for(key, data.len() as u64, modified, Some(etag));
        Ok((Bytes::from(data), record))
    }

    async fn head(&self, key: &str) -> BackendResult<ObjectRecord> {
        let path = self.object_path(key);
        let meta = fs::metadata(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BackendError::NotFound(key.to_string())
            } else {
                io_failure(err)
            }
        })?;
        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(self.record_for(key, meta.len(), modified, None))
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        let path = self.object_path(key);
        match fs::remove_file(&path).await {
            Ok(_) => {
                if let Some(parent) = path.parent() {
                    self.prune_empty_dirs(parent).await;
                }
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("delete of absent key {key} treated as success");
                Ok(())
            }
            Err(err) => Err(io_failure(err)),
        }
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        match fs::metadata(self.object_path(key)).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_failure(err)),
        }
    }

    async fn list(&self, prefix: &str, limit: Option<usize>) -> BackendResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(io_failure(err)),
            };
            while let Some(entry) = entries.next_entry().await.map_err(io_failure)? {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(io_failure)?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                let name = entry.file_name();
                if name.to_string_lossy().starts_with(TMP_PREFIX) {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        if let Some(limit) = limit {
            keys.truncate(limit);
        }
        Ok(keys)
    }

    fn url_for(&self, key: &str) -> String {
        format!("/api/files/{key}")
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend() -> (TempDir, LocalBackend) {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path()).unwrap();
        (dir, backend)
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let (_dir, backend) = backend();
        let data = Bytes::from_static(b"hello world");
        let record = backend
            .put("public/products/a.txt", data.clone(), "text/plain", &HashMap::new())
            .await
            .unwrap();
        assert_eq!(record.size, 11);

        let (fetched, record) = backend.get("public/products/a.txt").await.unwrap();
        assert_eq!(fetched, data);
        assert_eq!(record.etag, Some(format!("{:x}", md5::compute(&data))));
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let (_dir, backend) = backend();
        let err = backend.get("nope.bin").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, backend) = backend();
        backend
            .put("a/b.txt", Bytes::from_static(b"x"), "", &HashMap::new())
            .await
            .unwrap();
        backend.delete("a/b.txt").await.unwrap();
        backend.delete("a/b.txt").await.unwrap();
        assert!(!backend.exists("a/b.txt").await.unwrap());
    }

    #[tokio::test]
    async fn list_returns_sorted_keys_under_prefix() {
        let (_dir, backend) = backend();
        for key in ["a/b.jpg", "a/c/d.jpg", "x/y"] {
            backend
                .put(key, Bytes::from_static(b"1"), "", &HashMap::new())
                .await
                .unwrap();
        }
        let keys = backend.list("a/", None).await.unwrap();
        assert_eq!(keys, vec!["a/b.jpg", "a/c/d.jpg"]);
        let all = backend.list("", Some(2)).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn delete_prunes_empty_directories() {
        let (dir, backend) = backend();
        backend
            .put("deep/nested/file.bin", Bytes::from_static(b"1"), "", &HashMap::new())
            .await
            .unwrap();
        backend.delete("deep/nested/file.bin").await.unwrap();
        assert!(!dir.path().join("deep").exists());
    }
}
