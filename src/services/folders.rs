//! Directory emulation over the flat key namespace.
//!
//! Folders are not a first-class structure: they are derived on demand from
//! `/`-delimited key prefixes, and an otherwise-empty folder is kept
//! enumerable by a marker object. Every listing is O(n) over the keys
//! matching the prefix; there is no secondary index. That is an accepted
//! scaling limit for the data volumes in scope. Keeping the emulation
//! behind this one service means a backend with native hierarchical
//! listing could replace it without touching callers.

use crate::{backend::BackendResult, services::store::ObjectStore};
use bytes::Bytes;
use std::{collections::BTreeSet, sync::Arc};
use tracing::debug;

/// Reserved basename that makes an empty directory enumerable.
///
/// Marker objects are never returned by file listings.
pub const DIR_MARKER: &str = ".dir";

/// True when `key` is a marker object.
pub fn is_marker(key: &str) -> bool {
    key.rsplit('/').next() == Some(DIR_MARKER)
}

#[derive(Clone)]
pub struct FolderService {
    store: Arc<ObjectStore>,
}

impl FolderService {
    pub fn new(store: Arc<ObjectStore>) -> Self {
        Self { store }
    }

    /// Deduplicated set of first-level path segments across the namespace.
    ///
    /// A key with no `/` is a file at the root, not a folder; a marker at
    /// `a/.dir` still makes `a` appear even when the folder is empty.
    pub async fn list_root_folders(&self) -> BackendResult<Vec<String>> {
        let keys = self.store.list("", None).await?;
        let mut folders = BTreeSet::new();
        for key in keys {
            if let Some((first, _)) = key.split_once('/') {
                folders.insert(first.to_string());
            }
        }
        Ok(folders.into_iter().collect())
    }

    /// Deduplicated direct subfolder names of `dir`.
    pub async fn list_subfolders(&self, dir: &str) -> BackendResult<Vec<String>> {
        let prefix = format!("{}/", dir.trim_matches('/'));
        let keys = self.store.list(&prefix, None).await?;
        let mut folders = BTreeSet::new();
        for key in keys {
            let remainder = &key[prefix.len()..];
            if let Some((segment, _)) = remainder.split_once('/') {
                folders.insert(segment.to_string());
            }
        }
        Ok(folders.into_iter().collect())
    }

    /// Direct child file names of `dir`, excluding marker objects.
    pub async fn list_files(&self, dir: &str) -> BackendResult<Vec<String>> {
        let prefix = format!("{}/", dir.trim_matches('/'));
        let keys = self.store.list(&prefix, None).await?;
        let mut files = Vec::new();
        for key in keys {
            let remainder = &key[prefix.len()..];
            if !remainder.contains('/') && !is_marker(remainder) {
                files.push(remainder.to_string());
            }
        }
        Ok(files)
    }

    /// Write the marker object for `path` if it is absent.
    ///
    /// Check-then-write: two concurrent callers may both see "absent" and
    /// both write the marker, which is benign because the content is
    /// identical.
    pub async fn ensure_directory_exists(&self, path: &str) -> BackendResult<()> {
        let marker = format!("{}/{DIR_MARKER}", path.trim_matches('/'));
        if self.store.exists(&marker).await? {
            return Ok(());
        }
        debug!("creating directory marker {marker}");
        self.store
            .put(&marker, Bytes::new(), "application/octet-stream", &Default::default())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::LocalBackend, services::store::RetryPolicy};
    use std::collections::HashMap;
    use tempfile::TempDir;

    async fn seeded(keys: &[&str]) -> (TempDir, FolderService) {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(LocalBackend::new(dir.path()).unwrap());
        let store = Arc::new(ObjectStore::new(None, backend, RetryPolicy::default()));
        for key in keys {
            store
                .put(key, Bytes::from_static(b"x"), "", &HashMap::new())
                .await
                .unwrap();
        }
        (dir, FolderService::new(store))
    }

    #[tokio::test]
    async fn listing_matches_directory_semantics() {
        let (_dir, folders) = seeded(&["a/b.jpg", "a/c/d.jpg", "a/.dir", "x/y"]).await;

        assert_eq!(folders.list_files("a").await.unwrap(), vec!["b.jpg"]);
        assert_eq!(folders.list_subfolders("a").await.unwrap(), vec!["c"]);
        assert_eq!(folders.list_root_folders().await.unwrap(), vec!["a", "x"]);
    }

    #[tokio::test]
    async fn empty_directory_is_visible_through_its_marker() {
        let (_dir, folders) = seeded(&[]).await;
        folders.ensure_directory_exists("public/thumbnails").await.unwrap();

        assert_eq!(folders.list_root_folders().await.unwrap(), vec!["public"]);
        assert_eq!(
            folders.list_subfolders("public").await.unwrap(),
            vec!["thumbnails"]
        );
        assert!(folders.list_files("public/thumbnails").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ensure_directory_is_idempotent() {
        let (_dir, folders) = seeded(&[]).await;
        folders.ensure_directory_exists("public/products").await.unwrap();
        folders.ensure_directory_exists("public/products").await.unwrap();
        assert_eq!(
            folders.list_subfolders("public").await.unwrap(),
            vec!["products"]
        );
    }

    #[tokio::test]
    async fn markers_never_appear_in_file_listings() {
        let (_dir, folders) = seeded(&["p/.dir", "p/img.png"]).await;
        assert_eq!(folders.list_files("p").await.unwrap(), vec!["img.png"]);
    }

    #[tokio::test]
    async fn root_files_are_not_folders() {
        let (_dir, folders) = seeded(&["readme.txt", "a/b.txt"]).await;
        assert_eq!(folders.list_root_folders().await.unwrap(), vec!["a"]);
    }
}
