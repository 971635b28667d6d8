//! Resilient operation wrapper around a backend adapter.
//!
//! Every storage call runs through a bounded retry loop that only retries
//! transient failures. Backend selection is binary and sticky: the first
//! caller verifies remote access with a one-item list, and on failure the
//! store switches to the local-disk mirror for the lifetime of the process.
//! No reconnection is attempted later; recovery is restart-to-recover.

use crate::{
    backend::{BackendResult, ObjectBackend, content_type_for, ensure_key_safe},
    models::object::{ObjectRecord, UploadResult},
    services::keys,
};
use bytes::Bytes;
use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Bounded retry with exponential backoff for transient failures.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

pub struct ObjectStore {
    remote: Option<Arc<dyn ObjectBackend>>,
    fallback: Arc<dyn ObjectBackend>,
    active: OnceCell<Arc<dyn ObjectBackend>>,
    retry: RetryPolicy,
}

impl ObjectStore {
    /// Build a store over an optional remote backend and a local fallback.
    ///
    /// When `remote` is `None` the store runs against the fallback from the
    /// start (development mode).
    pub fn new(
        remote: Option<Arc<dyn ObjectBackend>>,
        fallback: Arc<dyn ObjectBackend>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            remote,
            fallback,
            active: OnceCell::new(),
            retry,
        }
    }

    /// Resolve the active backend, verifying remote access exactly once.
    ///
    /// Concurrent early callers share the one in-flight verification rather
    /// than racing. The remote-or-local decision is made here and never
    /// revisited.
    pub async fn initialize(&self) -> &Arc<dyn ObjectBackend> {
        self.active
            .get_or_init(|| async {
                let Some(remote) = &self.remote else {
                    info!("no remote backend configured, using {}", self.fallback.name());
                    return self.fallback.clone();
                };
                match remote.list("", Some(1)).await {
                    Ok(_) => {
                        info!("verified access to {} backend", remote.name());
                        remote.clone()
                    }
                    Err(err) => {
                        warn!(
                            "remote backend verification failed ({err}), \
                             switching to {} fallback for process lifetime",
                            self.fallback.name()
                        );
                        self.fallback.clone()
                    }
                }
            })
            .await
    }

    /// True once the store has settled on the local fallback.
    pub async fn in_fallback_mode(&self) -> bool {
        let active = self.initialize().await;
        match &self.remote {
            Some(remote) => !Arc::ptr_eq(active, remote),
            None => true,
        }
    }

    /// Name of the backend serving requests, for health reporting.
    pub async fn backend_name(&self) -> &'static str {
        self.initialize().await.name()
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, key: &str, mut call: F) -> BackendResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        let mut attempt = 1u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.retry.attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "{operation} `{key}` failed transiently (attempt {attempt}/{}), \
                         retrying in {delay:?}: {err}",
                        self.retry.attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> BackendResult<ObjectRecord> {
        ensure_key_safe(key)?;
        let backend = self.initialize().await;
        self.with_retry("put", key, || {
            backend.put(key, data.clone(), content_type, metadata)
        })
        .await
    }

    pub async fn get(&self, key: &str) -> BackendResult<(Bytes, ObjectRecord)> {
        ensure_key_safe(key)?;
        let backend = self.initialize().await;
        self.with_retry("get", key, || backend.get(key)).await
    }

    pub async fn head(&self, key: &str) -> BackendResult<ObjectRecord> {
        ensure_key_safe(key)?;
        let backend = self.initialize().await;
        self.with_retry("head", key, || backend.head(key)).await
    }

    /// Idempotent delete: removing an absent key is success.
    pub async fn delete(&self, key: &str) -> BackendResult<()> {
        ensure_key_safe(key)?;
        let backend = self.initialize().await;
        self.with_retry("delete", key, || backend.delete(key)).await
    }

    pub async fn exists(&self, key: &str) -> BackendResult<bool> {
        ensure_key_safe(key)?;
        let backend = self.initialize().await;
        self.with_retry("exists", key, || backend.exists(key)).await
    }

    pub async fn list(&self, prefix: &str, limit: Option<usize>) -> BackendResult<Vec<String>> {
        let backend = self.initialize().await;
        self.with_retry("list", prefix, || backend.list(prefix, limit))
            .await
    }

    pub async fn url_for(&self, key: &str) -> String {
        self.initialize().await.url_for(key)
    }

    /// Store a caller-supplied buffer under a freshly generated key inside
    /// `folder`, returning the stable result callers see.
    pub async fn upload(
        &self,
        folder: &str,
        original_filename: &str,
        data: Bytes,
        content_type: Option<String>,
        naming: keys::Naming,
    ) -> BackendResult<UploadResult> {
        let key = keys::physical_key(naming, folder, original_filename);
        let content_type =
            content_type.unwrap_or_else(|| content_type_for(&key, Some(data.as_ref())));
        let record = self
            .put(&key, data, &content_type, &HashMap::new())
            .await?;
        let url = self.url_for(&record.key).await;
        Ok(UploadResult {
            key: record.key,
            url,
            size: record.size,
            content_type: record.content_type,
            metadata: record.metadata,
        })
    }

    /// Promote an object from a temporary key to its permanent key.
    ///
    /// Copy-then-delete across two backend calls; a crash between them
    /// leaves the object at both keys. Re-running the promotion simply
    /// overwrites `dst` and retries the delete, so the compensating action
    /// is an idempotent re-run (or a sweep of the temp prefix).
    pub async fn move_object(&self, src: &str, dst: &str) -> BackendResult<ObjectRecord> {
        let (data, record) = self.get(src).await?;
        let moved = self
            .put(dst, data, &record.content_type, &record.metadata)
            .await?;
        self.delete(src).await?;
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, LocalBackend};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn local_store(dir: &TempDir) -> ObjectStore {
        let backend = Arc::new(LocalBackend::new(dir.path()).unwrap());
        ObjectStore::new(None, backend, RetryPolicy::default())
    }

    /// Backend that always fails its calls, used to force fallback and to
    /// count verification attempts.
    struct FailingBackend {
        calls: AtomicU32,
    }

    impl FailingBackend {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
            }
        }

        fn fail<T>(&self) -> BackendResult<T> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::Transient("connection refused".into()))
        }
    }

    #[async_trait]
    impl ObjectBackend for FailingBackend {
        async fn put(
            &self,
            _key: &str,
            _data: Bytes,
            _content_type: &str,
            _metadata: &HashMap<String, String>,
        ) -> BackendResult<ObjectRecord> {
            self.fail()
        }
        async fn get(&self, _key: &str) -> BackendResult<(Bytes, ObjectRecord)> {
            self.fail()
        }
        async fn head(&self, _key: &str) -> BackendResult<ObjectRecord> {
            self.fail()
        }
        async fn delete(&self, _key: &str) -> BackendResult<()> {
            self.fail()
        }
        async fn exists(&self, _key: &str) -> BackendResult<bool> {
            self.fail()
        }
        async fn list(&self, _prefix: &str, _limit: Option<usize>) -> BackendResult<Vec<String>> {
            self.fail()
        }
        fn url_for(&self, key: &str) -> String {
            format!("https://unreachable.example/{key}")
        }
        fn name(&self) -> &'static str {
            "failing"
        }
    }

    /// Backend wrapper that fails the first N calls with a transient error,
    /// then delegates to a local backend.
    struct FlakyBackend {
        inner: LocalBackend,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl ObjectBackend for FlakyBackend {
        async fn put(
            &self,
            key: &str,
            data: Bytes,
            content_type: &str,
            metadata: &HashMap<String, String>,
        ) -> BackendResult<ObjectRecord> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(BackendError::Transient("flaky".into()));
            }
            self.inner.put(key, data, content_type, metadata).await
        }
        async fn get(&self, key: &str) -> BackendResult<(Bytes, ObjectRecord)> {
            self.inner.get(key).await
        }
        async fn head(&self, key: &str) -> BackendResult<ObjectRecord> {
            self.inner.head(key).await
        }
        async fn delete(&self, key: &str) -> BackendResult<()> {
            self.inner.delete(key).await
        }
        async fn exists(&self, key: &str) -> BackendResult<bool> {
            self.inner.exists(key).await
        }
        async fn list(&self, prefix: &str, limit: Option<usize>) -> BackendResult<Vec<String>> {
            self.inner.list(prefix, limit).await
        }
        fn url_for(&self, key: &str) -> String {
            self.inner.url_for(key)
        }
        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn round_trip_various_sizes() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir);
        for size in [0usize, 1, 5 * 1024 * 1024 - 1] {
            let data = Bytes::from(vec![0xA5u8; size]);
            let key = format!("public/temp/pending/blob-{size}.bin");
            store
                .put(&key, data.clone(), "application/octet-stream", &HashMap::new())
                .await
                .unwrap();
            let (fetched, record) = store.get(&key).await.unwrap();
            assert_eq!(fetched, data);
            assert_eq!(record.size, size as u64);
        }
    }

    #[tokio::test]
    async fn delete_absent_key_succeeds_twice() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir);
        store.delete("public/products/ghost.jpg").await.unwrap();
        store.delete("public/products/ghost.jpg").await.unwrap();
    }

    #[tokio::test]
    async fn move_object_relocates_bytes_and_content_type() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir);
        let data = Bytes::from_static(b"\xff\xd8fake jpeg");
        store
            .put("public/temp/pending/draft.jpg", data.clone(), "image/jpeg", &HashMap::new())
            .await
            .unwrap();

        let moved = store
            .move_object("public/temp/pending/draft.jpg", "public/products/42/draft.jpg")
            .await
            .unwrap();
        assert_eq!(moved.content_type, "image/jpeg");

        let (fetched, record) = store.get("public/products/42/draft.jpg").await.unwrap();
        assert_eq!(fetched, data);
        assert_eq!(record.content_type, "image/jpeg");
        assert!(!store.exists("public/temp/pending/draft.jpg").await.unwrap());
    }

    #[tokio::test]
    async fn failed_verification_switches_to_fallback() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(FailingBackend::new());
        let fallback = Arc::new(LocalBackend::new(dir.path()).unwrap());
        let store = ObjectStore::new(Some(remote.clone()), fallback, RetryPolicy::default());

        let data = Bytes::from_static(b"fallback bytes");
        store
            .put("public/products/f.bin", data.clone(), "application/octet-stream", &HashMap::new())
            .await
            .unwrap();
        let (fetched, _) = store.get("public/products/f.bin").await.unwrap();
        assert_eq!(fetched, data);
        store.delete("public/products/f.bin").await.unwrap();

        assert!(store.in_fallback_mode().await);
        // Only the single verification call ever reached the remote.
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_initialization_shares_one_verification() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(FailingBackend::new());
        let fallback = Arc::new(LocalBackend::new(dir.path()).unwrap());
        let store = Arc::new(ObjectStore::new(
            Some(remote.clone()),
            fallback,
            RetryPolicy::default(),
        ));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.initialize().await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let dir = TempDir::new().unwrap();
        let flaky = Arc::new(FlakyBackend {
            inner: LocalBackend::new(dir.path()).unwrap(),
            failures_left: AtomicU32::new(2),
        });
        let store = ObjectStore::new(
            None,
            flaky,
            RetryPolicy {
                attempts: 3,
                base_delay: Duration::from_millis(1),
            },
        );

        store
            .put("a/b.bin", Bytes::from_static(b"x"), "", &HashMap::new())
            .await
            .unwrap();
        assert!(store.exists("a/b.bin").await.unwrap());
    }

    #[tokio::test]
    async fn retry_budget_exhaustion_surfaces_one_error() {
        let dir = TempDir::new().unwrap();
        let flaky = Arc::new(FlakyBackend {
            inner: LocalBackend::new(dir.path()).unwrap(),
            failures_left: AtomicU32::new(10),
        });
        let store = ObjectStore::new(
            None,
            flaky,
            RetryPolicy {
                attempts: 2,
                base_delay: Duration::from_millis(1),
            },
        );

        let err = store
            .put("a/b.bin", Bytes::from_static(b"x"), "", &HashMap::new())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        // A failed put never leaves partial state behind.
        assert!(!store.exists("a/b.bin").await.unwrap());
    }

    #[tokio::test]
    async fn invalid_keys_are_rejected_without_retry() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir);
        let err = store.get("../escape").await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn upload_returns_stable_result() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir);
        let result = store
            .upload(
                "public/temp/pending",
                "My Photo.jpg",
                Bytes::from_static(b"\xff\xd8jpeg-ish"),
                None,
                keys::Naming::Timestamped,
            )
            .await
            .unwrap();
        assert!(result.key.starts_with("public/temp/pending/"));
        assert!(result.key.ends_with("-My-Photo.jpg"));
        assert_eq!(result.content_type, "image/jpeg");
        assert_eq!(result.url, format!("/api/files/{}", result.key));
    }

    #[tokio::test]
    async fn opaque_upload_hides_the_original_name() {
        let dir = TempDir::new().unwrap();
        let store = local_store(&dir);
        let result = store
            .upload(
                "private/catalogs",
                "Q3 Price List.pdf",
                Bytes::from_static(b"%PDF-1.7"),
                None,
                keys::Naming::Opaque,
            )
            .await
            .unwrap();
        let basename = result.key.rsplit('/').next().unwrap();
        assert!(!basename.contains("Price"));
        assert!(basename.ends_with(".pdf"));
        assert_eq!(result.content_type, "application/pdf");
    }
}
