//! Remote backend over the AWS S3 API.
//!
//! One fixed adapter against the official SDK; there is no runtime
//! capability probing. SDK failures are folded into the [`BackendError`]
//! taxonomy so the retry layer can classify them without seeing SDK types.

use super::{BackendError, BackendResult, ObjectBackend};
use crate::models::object::ObjectRecord;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client,
    config::{Credentials, Region},
    error::{ProvideErrorMetadata, SdkError},
    primitives::ByteStream,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Connection settings for the remote store.
#[derive(Clone, Debug)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible stores (MinIO and friends).
    /// Forces path-style addressing when set.
    pub endpoint: Option<String>,
    /// Static credentials; falls back to the ambient AWS credential chain
    /// when absent.
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

pub struct S3Backend {
    client: Client,
    bucket: String,
    region: String,
    endpoint: Option<String>,
}

impl S3Backend {
    pub async fn new(settings: S3Settings) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()));
        if let (Some(access_key), Some(secret_key)) =
            (settings.access_key.as_deref(), settings.secret_key.as_deref())
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "media-store",
            ));
        }
        if let Some(endpoint) = settings.endpoint.as_deref() {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if settings.endpoint.is_some() {
            builder = builder.force_path_style(true);
        }
        let client = Client::from_conf(builder.build());

        Self {
            client,
            bucket: settings.bucket,
            region: settings.region,
            endpoint: settings.endpoint,
        }
    }
}

/// Map an SDK error onto the backend taxonomy.
///
/// Connection-level failures and 5xx responses are transient; 404 is
/// not-found; everything else (auth, signature, bad request) is permanent.
fn classify<E>(err: &SdkError<E>, key: &str) -> BackendError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
{
    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_) => {
            BackendError::Transient(format!("s3 request failed: {err:?}"))
        }
        SdkError::ServiceError(ctx) => {
            let status = ctx.raw().status().as_u16();
            let code = ctx.err().code().unwrap_or("unknown");
            let message = ctx.err().message().unwrap_or("no message");
            if status == 404 || code == "NoSuchKey" || code == "NotFound" {
                BackendError::NotFound(key.to_string())
            } else if (500..600).contains(&status) {
                BackendError::Transient(format!("s3 {status} {code}: {message}"))
            } else {
                BackendError::Permanent(format!("s3 {status} {code}: {message}"))
            }
        }
        other => BackendError::Permanent(format!("s3 request failed: {other:?}")),
    }
}

fn to_chrono(dt: Option<&aws_sdk_s3::primitives::DateTime>) -> DateTime<Utc> {
    dt.and_then(|dt| DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos()))
        .unwrap_or_else(Utc::now)
}

fn strip_quotes(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> BackendResult<ObjectRecord> {
        let size = data.len() as u64;
        let resp = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .set_metadata(if metadata.is_empty() {
                None
            } else {
                Some(metadata.clone())
            })
            .send()
            .await
            .map_err(|err| classify(&err, key))?;

        Ok(ObjectRecord {
            key: key.to_string(),
            content_type: content_type.to_string(),
            size,
            etag: resp.e_tag().map(strip_quotes),
            last_modified: Utc::now(),
            metadata: metadata.clone(),
        })
    }

    async fn get(&self, key: &str) -> BackendResult<(Bytes, ObjectRecord)> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| classify(&err, key))?;

        let record = ObjectRecord {
            key: key.to_string(),
            content_type: resp
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string(),
            size: resp.content_length().unwrap_or(0).max(0) as u64,
            etag: resp.e_tag().map(strip_quotes),
            last_modified: to_chrono(resp.last_modified()),
            metadata: resp.metadata().cloned().unwrap_or_default(),
        };
        let data = resp
            .body
            .collect()
            .await
            .map_err(|err| BackendError::Transient(format!("s3 body read failed: {err}")))?
            .into_bytes();
        Ok((data, record))
    }

    async fn head(&self, key: &str) -> BackendResult<ObjectRecord> {
        let resp = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| classify(&err, key))?;

        Ok(ObjectRecord {
            key: key.to_string(),
            content_type: resp
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string(),
            size: resp.content_length().unwrap_or(0).max(0) as u64,
            etag: resp.e_tag().map(strip_quotes),
            last_modified: to_chrono(resp.last_modified()),
            metadata: resp.metadata().cloned().unwrap_or_default(),
        })
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        // S3 DeleteObject already succeeds for absent keys, which matches
        // the idempotent-delete contract.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| classify(&err, key))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn list(&self, prefix: &str, limit: Option<usize>) -> BackendResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(limit) = limit {
                req = req.max_keys(limit.min(1000) as i32);
            }
            if let Some(token) = &token {
                req = req.continuation_token(token);
            }
            let resp = req.send().await.map_err(|err| classify(&err, prefix))?;
            for object in resp.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }
            if let Some(limit) = limit {
                if keys.len() >= limit {
                    keys.truncate(limit);
                    break;
                }
            }
            match resp.next_continuation_token() {
                Some(next) => token = Some(next.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }

    fn url_for(&self, key: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key),
            None => format!("https://{}.s3.{}.amazonaws.com/{}", self.bucket, self.region, key),
        }
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}
