//! The reqwest-backed object store and its read handle.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, HeaderMap, HeaderName, LAST_MODIFIED};
use reqwest::{Client, Method, Response, StatusCode, Url};
use s3proxy_auth::canonical::encode_uri_path;
use s3proxy_auth::{SigningParams, sign_request};
use s3proxy_core::{ObjectHandle, ObjectMetadata, ObjectStore, StorageError};
use tracing::{debug, trace};

use crate::config::S3ClientConfig;

const SERVICE: &str = "s3";

/// Shared request machinery for a store and the handles it opens.
struct Backend {
    client: Client,
    base_url: String,
    host: String,
    config: S3ClientConfig,
}

impl Backend {
    fn object_path(&self, key: &str) -> String {
        encode_uri_path(&format!("/{}/{key}", self.config.bucket))
    }

    async fn send(
        &self,
        method: Method,
        key: &str,
        headers: &[(&str, &str)],
    ) -> Result<Response, StorageError> {
        let path = self.object_path(key);
        let url = format!("{}{path}", self.base_url);

        let mut request = self.client.request(method.clone(), &url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        if let Some(credentials) = &self.config.credentials {
            let params = SigningParams {
                credentials,
                region: &self.config.region,
                service: SERVICE,
                timestamp: Utc::now(),
            };
            let signed = sign_request(method.as_str(), &self.host, &path, headers, &params);
            for (name, value) in signed.pairs() {
                request = request.header(name, value);
            }
        }

        trace!(%method, %url, "sending backend request");
        request
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("{method} {url} failed: {e}")))
    }

    fn status_error(&self, status: StatusCode, key: &str) -> StorageError {
        match status {
            StatusCode::NOT_FOUND => StorageError::NotFound {
                bucket: self.config.bucket.clone(),
                key: key.to_owned(),
            },
            StatusCode::PRECONDITION_FAILED => {
                StorageError::Backend("object changed while streaming".to_owned())
            }
            status => StorageError::Backend(format!(
                "unexpected status {status} for {}/{key}",
                self.config.bucket
            )),
        }
    }

    async fn head(&self, key: &str) -> Result<ObjectMetadata, StorageError> {
        let response = self.send(Method::HEAD, key, &[]).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.status_error(status, key));
        }
        metadata_from_headers(response.headers())
    }
}

/// Object store talking to an S3-compatible endpoint.
pub struct S3ObjectStore {
    backend: Arc<Backend>,
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("base_url", &self.backend.base_url)
            .field("bucket", &self.backend.config.bucket)
            .field("region", &self.backend.config.region)
            .field("signed", &self.backend.config.credentials.is_some())
            .finish()
    }
}

impl S3ObjectStore {
    /// Build the HTTP client and resolve the `Host` value used for signing.
    pub fn new(config: S3ClientConfig) -> Result<Self, StorageError> {
        let base_url = config.base_url();
        let host = signing_host(&base_url)?;
        let client = Client::builder().build().map_err(|e| {
            StorageError::Internal(anyhow::anyhow!("failed to build HTTP client: {e}"))
        })?;
        debug!(%base_url, bucket = %config.bucket, "configured S3 backend");
        Ok(Self {
            backend: Arc::new(Backend {
                client,
                base_url,
                host,
                config,
            }),
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.backend.config.bucket
    }

    async fn stat(&self, key: &str) -> Result<ObjectMetadata, StorageError> {
        self.backend.head(key).await
    }

    async fn open(&self, key: &str) -> Result<Box<dyn ObjectHandle>, StorageError> {
        let metadata = self.backend.head(key).await?;
        self.open_with_metadata(key, &metadata).await
    }

    async fn open_with_metadata(
        &self,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> Result<Box<dyn ObjectHandle>, StorageError> {
        Ok(Box::new(S3ObjectHandle {
            backend: Arc::clone(&self.backend),
            key: key.to_owned(),
            size: metadata.size,
            etag: metadata.etag.clone(),
            body: None,
            closed: false,
        }))
    }
}

/// An in-flight `GET` body positioned somewhere inside the object.
struct OpenBody {
    /// Absolute offset of the first byte of `pending`.
    position: u64,
    pending: Bytes,
    chunks: BoxStream<'static, reqwest::Result<Bytes>>,
}

impl OpenBody {
    /// Make sure `pending` is non-empty. Returns `false` once the body ends.
    async fn fill(&mut self) -> reqwest::Result<bool> {
        while self.pending.is_empty() {
            match self.chunks.next().await {
                Some(chunk) => self.pending = chunk?,
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    fn take(&mut self, n: usize) -> Bytes {
        let n = n.min(self.pending.len());
        self.position += n as u64;
        self.pending.split_to(n)
    }
}

/// Read handle over one S3 object, pinned to the ETag seen at open.
///
/// Sequential reads share one open-ended ranged `GET`; a read at any other
/// offset drops it and starts a new one there.
pub struct S3ObjectHandle {
    backend: Arc<Backend>,
    key: String,
    size: u64,
    etag: Option<String>,
    body: Option<OpenBody>,
    closed: bool,
}

impl std::fmt::Debug for S3ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectHandle")
            .field("key", &self.key)
            .field("size", &self.size)
            .field("etag", &self.etag)
            .field("position", &self.body.as_ref().map(|b| b.position))
            .field("closed", &self.closed)
            .finish()
    }
}

impl S3ObjectHandle {
    /// Size of the object when the handle was opened.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Start a `GET` covering `offset..size`, or `None` when the backend
    /// says the range is not satisfiable.
    async fn request_from(&mut self, offset: u64) -> Result<Option<OpenBody>, StorageError> {
        let range = format!("bytes={offset}-{}", self.size - 1);
        let mut headers = vec![("range", range.as_str())];
        if let Some(etag) = &self.etag {
            headers.push(("if-match", etag.as_str()));
        }

        let response = self.backend.send(Method::GET, &self.key, &headers).await?;
        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(None);
        }
        if status != StatusCode::PARTIAL_CONTENT && status != StatusCode::OK {
            return Err(self.backend.status_error(status, &self.key));
        }
        debug!(key = %self.key, offset, %status, "opened backend body");

        let mut body = OpenBody {
            // A 200 means the range was ignored and the whole object follows.
            position: if status == StatusCode::OK { 0 } else { offset },
            pending: Bytes::new(),
            chunks: response.bytes_stream().boxed(),
        };
        while body.position < offset {
            if !body.fill().await.map_err(|e| self.body_error(&e))? {
                return Ok(None);
            }
            let skip = usize::try_from(offset - body.position).unwrap_or(usize::MAX);
            body.take(skip);
        }
        Ok(Some(body))
    }

    fn body_error(&self, e: &reqwest::Error) -> StorageError {
        StorageError::Backend(format!("reading {} failed: {e}", self.key))
    }
}

#[async_trait]
impl ObjectHandle for S3ObjectHandle {
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, StorageError> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        if offset >= self.size || buf.is_empty() {
            return Ok(0);
        }

        let mut body = match self.body.take() {
            Some(body) if body.position == offset => body,
            _ => match self.request_from(offset).await? {
                Some(body) => body,
                None => return Ok(0),
            },
        };
        if !body.fill().await.map_err(|e| self.body_error(&e))? {
            return Err(StorageError::Backend(format!(
                "backend body for {} ended at {} of {} bytes",
                self.key, body.position, self.size
            )));
        }

        let chunk = body.take(buf.len());
        buf[..chunk.len()].copy_from_slice(&chunk);
        trace!(key = %self.key, offset, len = chunk.len(), "read from backend body");
        self.body = Some(body);
        Ok(chunk.len())
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        self.body = None;
        self.closed = true;
        Ok(())
    }
}

/// `Host` header value reqwest will send for `base_url`: the host, plus the
/// port only when it is not the scheme's default.
fn signing_host(base_url: &str) -> Result<String, StorageError> {
    let url = Url::parse(base_url)
        .map_err(|e| StorageError::Backend(format!("invalid backend endpoint {base_url}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| StorageError::Backend(format!("backend endpoint {base_url} has no host")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    })
}

fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn metadata_from_headers(headers: &HeaderMap) -> Result<ObjectMetadata, StorageError> {
    let size = header_str(headers, CONTENT_LENGTH)
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| StorageError::Backend("missing or invalid Content-Length".to_owned()))?;
    Ok(ObjectMetadata {
        size,
        etag: header_str(headers, ETAG).map(str::to_owned),
        content_type: header_str(headers, CONTENT_TYPE).map(str::to_owned),
        last_modified: header_str(headers, LAST_MODIFIED)
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|d| d.with_timezone(&Utc)),
    })
}
