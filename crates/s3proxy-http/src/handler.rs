//! Per-request orchestration: stat, open, range, headers, body.
//!
//! A `GET` walks the full sequence:
//!
//! 1. stat the object (failure: 500)
//! 2. open a read handle (failure: 500)
//! 3. parse the `Range` header against the size (failure: 400, handle released)
//! 4. build the response head
//! 5. stream the object, or the requested window of it, as the body
//!
//! A `HEAD` skips the handle and the body but answers with the same status
//! and headers.

use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use futures::stream;
use http::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG,
    HeaderMap, HeaderName, HeaderValue, LAST_MODIFIED,
};
use http::{Response, StatusCode};
use s3proxy_core::{
    BoundedRangeReader, ByteRange, HandleReader, ObjectHandle, ObjectMetadata, ObjectStore,
    RangeParser, SequentialRead, StorageError,
};
use tracing::{debug, error, warn};

use crate::body::ProxyBody;

/// Media type used when the backend does not report one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const ERROR_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// The inputs of one object request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// Percent-decoded URL path, including the leading `/`.
    pub path: String,
    /// Raw `Range` header, empty when absent.
    pub range_header: String,
}

impl StreamRequest {
    /// Create a request for `path` with an optional `Range` header.
    pub fn new(path: impl Into<String>, range_header: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            range_header: range_header.into(),
        }
    }

    /// Object key: the path without its leading `/`.
    #[must_use]
    pub fn key(&self) -> &str {
        self.path.strip_prefix('/').unwrap_or(&self.path)
    }

    /// File name offered in `Content-Disposition`: the last path segment.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }
}

/// Serves objects from one [`ObjectStore`].
pub struct StreamHandler {
    store: Arc<dyn ObjectStore>,
    parser: RangeParser,
    read_buffer_size: usize,
}

impl std::fmt::Debug for StreamHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandler")
            .field("bucket", &self.store.bucket())
            .field("read_buffer_size", &self.read_buffer_size)
            .finish_non_exhaustive()
    }
}

impl StreamHandler {
    /// Create a handler reading `read_buffer_size` bytes per backend call.
    ///
    /// A zero buffer size is bumped to one byte.
    pub fn new(store: Arc<dyn ObjectStore>, read_buffer_size: usize) -> Self {
        Self {
            store,
            parser: RangeParser::new(),
            read_buffer_size: read_buffer_size.max(1),
        }
    }

    /// Bucket served by this handler.
    #[must_use]
    pub fn bucket(&self) -> &str {
        self.store.bucket()
    }

    /// Serve a `GET`: headers plus the (partial) object body.
    pub async fn get(&self, request: &StreamRequest, request_id: &str) -> Response<ProxyBody> {
        let bucket = self.store.bucket();
        let key = request.key();

        let metadata = match self.store.stat(key).await {
            Ok(metadata) => metadata,
            Err(e) => {
                return self.storage_failure(
                    request,
                    request_id,
                    "Error occurred getting info on path",
                    &e,
                );
            }
        };

        let mut handle = match self.store.open_with_metadata(key, &metadata).await {
            Ok(handle) => handle,
            Err(e) => {
                return self.storage_failure(
                    request,
                    request_id,
                    "Error occurred getting download handle for file on path",
                    &e,
                );
            }
        };

        let range = match self.parser.parse(&request.range_header, metadata.size) {
            Ok(range) => range,
            Err(e) => {
                if let Err(close_err) = handle.close().await {
                    warn!(path = %request.path, bucket, request_id, error = %close_err, "failed to release read handle");
                }
                return range_failure(request, request_id, &e);
            }
        };

        let ctx = StreamContext {
            path: request.path.clone(),
            bucket: bucket.to_owned(),
            request_id: request_id.to_owned(),
            chunk_size: self.read_buffer_size,
        };
        let (status, length) = status_and_length(&metadata, range);
        let body = match range {
            Some(range) => {
                debug!(path = %request.path, start = range.start, end = range.end, request_id, "serving partial content");
                ProxyBody::streaming(reader_stream(BoundedRangeReader::new(handle, range), ctx), length)
            }
            None => ProxyBody::streaming(reader_stream(HandleReader::new(handle), ctx), length),
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        object_headers(response.headers_mut(), request, &metadata, range, length);
        response
    }

    /// Serve a `HEAD`: the same status and headers as `GET`, without a body.
    pub async fn head(&self, request: &StreamRequest, request_id: &str) -> Response<ProxyBody> {
        let metadata = match self.store.stat(request.key()).await {
            Ok(metadata) => metadata,
            Err(e) => {
                return self.storage_failure(
                    request,
                    request_id,
                    "Error occurred getting info on path",
                    &e,
                );
            }
        };

        let range = match self.parser.parse(&request.range_header, metadata.size) {
            Ok(range) => range,
            Err(e) => return range_failure(request, request_id, &e),
        };

        let (status, length) = status_and_length(&metadata, range);
        let mut response = Response::new(ProxyBody::empty());
        *response.status_mut() = status;
        object_headers(response.headers_mut(), request, &metadata, range, length);
        response
    }

    fn storage_failure(
        &self,
        request: &StreamRequest,
        request_id: &str,
        what: &str,
        err: &StorageError,
    ) -> Response<ProxyBody> {
        let bucket = self.store.bucket();
        error!(path = %request.path, bucket, request_id, error = %err, "{what}");
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{what} {} on bucket {bucket}: {err}", request.path),
        )
    }
}

fn range_failure(
    request: &StreamRequest,
    request_id: &str,
    err: &s3proxy_core::RangeError,
) -> Response<ProxyBody> {
    debug!(path = %request.path, request_id, error = %err, "rejected range header");
    error_response(
        StatusCode::BAD_REQUEST,
        format!("Error occurred while retrieving range information: {err}"),
    )
}

fn status_and_length(metadata: &ObjectMetadata, range: Option<ByteRange>) -> (StatusCode, u64) {
    match range {
        Some(range) => (StatusCode::PARTIAL_CONTENT, range.len()),
        None => (StatusCode::OK, metadata.size),
    }
}

fn object_headers(
    headers: &mut HeaderMap,
    request: &StreamRequest,
    metadata: &ObjectMetadata,
    range: Option<ByteRange>,
    length: u64,
) {
    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    insert_header(
        headers,
        CONTENT_DISPOSITION,
        &format!("attachment; filename={}", request.file_name()),
    );
    insert_header(
        headers,
        CONTENT_TYPE,
        metadata
            .content_type
            .as_deref()
            .unwrap_or(DEFAULT_CONTENT_TYPE),
    );
    if let Some(range) = range {
        insert_header(headers, CONTENT_RANGE, &range.content_range(metadata.size));
    }
    if let Some(etag) = &metadata.etag {
        insert_header(headers, ETAG, etag);
    }
    if let Some(last_modified) = metadata.last_modified {
        insert_header(
            headers,
            LAST_MODIFIED,
            &last_modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        );
    }
}

/// Insert a header, dropping values that are not valid header text.
fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => warn!(header = %name, value, "dropping invalid response header value"),
    }
}

/// Build a plain-text error response.
pub(crate) fn error_response(status: StatusCode, message: String) -> Response<ProxyBody> {
    let mut response = Response::new(ProxyBody::from_string(message));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static(ERROR_CONTENT_TYPE),
    );
    response
}

// ---------------------------------------------------------------------------
// Body streaming
// ---------------------------------------------------------------------------

struct StreamContext {
    path: String,
    bucket: String,
    request_id: String,
    chunk_size: usize,
}

/// Turn a reader into a chunk stream that closes the reader when it ends.
///
/// If the client goes away the stream is dropped mid-way, which drops the
/// reader and with it the handle.
fn reader_stream<R>(
    reader: R,
    ctx: StreamContext,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static
where
    R: SequentialRead + 'static,
{
    stream::unfold(Some((reader, ctx)), |state| async move {
        let (mut reader, ctx) = state?;
        let mut buf = vec![0u8; ctx.chunk_size];
        match reader.read(&mut buf).await {
            Ok(0) => {
                release(&mut reader, &ctx).await;
                None
            }
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), Some((reader, ctx))))
            }
            Err(e) => {
                error!(
                    path = %ctx.path,
                    bucket = %ctx.bucket,
                    request_id = %ctx.request_id,
                    error = %e,
                    "Error occurred downloading file"
                );
                release(&mut reader, &ctx).await;
                Some((Err(std::io::Error::other(e)), None))
            }
        }
    })
}

async fn release<R: SequentialRead>(reader: &mut R, ctx: &StreamContext) {
    if let Err(e) = reader.close().await {
        warn!(path = %ctx.path, request_id = %ctx.request_id, error = %e, "failed to release read handle");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use http_body_util::BodyExt;
    use s3proxy_core::InMemoryObjectStore;

    use super::*;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 256) as u8).collect()
    }

    fn handler_with(store: InMemoryObjectStore, chunk: usize) -> StreamHandler {
        StreamHandler::new(Arc::new(store), chunk)
    }

    fn handler() -> (StreamHandler, Vec<u8>) {
        let store = InMemoryObjectStore::new("media");
        let data = payload(1000);
        store.put("videos/clip.bin", data.clone());
        (handler_with(store, 64), data)
    }

    async fn body_bytes(response: Response<ProxyBody>) -> Bytes {
        response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes()
    }

    fn header<'a>(response: &'a Response<ProxyBody>, name: HeaderName) -> &'a str {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    #[test]
    fn test_should_derive_key_and_file_name() {
        let request = StreamRequest::new("/a/b/c.txt", "");
        assert_eq!(request.key(), "a/b/c.txt");
        assert_eq!(request.file_name(), "c.txt");
        assert_eq!(StreamRequest::new("/dir/", "").file_name(), "");
    }

    #[tokio::test]
    async fn test_should_serve_full_object() {
        let (handler, data) = handler();
        let response = handler
            .get(&StreamRequest::new("/videos/clip.bin", ""), "req-1")
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, CONTENT_LENGTH), "1000");
        assert_eq!(header(&response, ACCEPT_RANGES), "bytes");
        assert_eq!(
            header(&response, CONTENT_DISPOSITION),
            "attachment; filename=clip.bin"
        );
        assert_eq!(header(&response, CONTENT_TYPE), DEFAULT_CONTENT_TYPE);
        assert!(response.headers().get(CONTENT_RANGE).is_none());
        assert_eq!(body_bytes(response).await.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn test_should_serve_partial_content() {
        let (handler, data) = handler();
        let response = handler
            .get(&StreamRequest::new("/videos/clip.bin", "bytes=100-199"), "req-2")
            .await;

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(header(&response, CONTENT_LENGTH), "100");
        assert_eq!(header(&response, CONTENT_RANGE), "bytes 100-199/1000");
        assert_eq!(body_bytes(response).await.as_ref(), &data[100..200]);
    }

    #[tokio::test]
    async fn test_should_reject_bad_ranges_with_400() {
        let (handler, _) = handler();
        let response = handler
            .get(&StreamRequest::new("/videos/clip.bin", "bytes=0-999999"), "req-3")
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(header(&response, CONTENT_TYPE), ERROR_CONTENT_TYPE);
        let text = body_bytes(response).await;
        assert!(
            String::from_utf8_lossy(&text)
                .starts_with("Error occurred while retrieving range information: Range header")
        );
    }

    #[tokio::test]
    async fn test_should_report_missing_objects_as_500() {
        let (handler, _) = handler();
        let response = handler
            .get(&StreamRequest::new("/nope.txt", ""), "req-4")
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let text = String::from_utf8_lossy(&body_bytes(response).await).into_owned();
        assert!(text.starts_with("Error occurred getting info on path /nope.txt on bucket media:"));
    }

    #[tokio::test]
    async fn test_should_answer_head_without_body() {
        let (handler, _) = handler();
        let response = handler
            .head(&StreamRequest::new("/videos/clip.bin", "bytes=10-19"), "req-5")
            .await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(header(&response, CONTENT_LENGTH), "10");
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_should_forward_backend_metadata() {
        let store = InMemoryObjectStore::new("media");
        store.put_with_content_type("page.html", "<p>hi</p>", "text/html");
        let handler = handler_with(store, 4);
        let response = handler
            .head(&StreamRequest::new("/page.html", ""), "req-6")
            .await;
        assert_eq!(header(&response, CONTENT_TYPE), "text/html");
        assert!(header(&response, LAST_MODIFIED).ends_with(" GMT"));
    }

    /// Store whose handles count how often they are closed, and optionally
    /// fail every read after the first `good_reads`.
    struct CountingStore {
        inner: InMemoryObjectStore,
        closes: Arc<AtomicUsize>,
        good_reads: Option<usize>,
    }

    struct CountingHandle {
        inner: Box<dyn ObjectHandle>,
        closes: Arc<AtomicUsize>,
        good_reads: Option<usize>,
    }

    #[async_trait]
    impl ObjectStore for CountingStore {
        fn bucket(&self) -> &str {
            self.inner.bucket()
        }

        async fn stat(&self, key: &str) -> Result<ObjectMetadata, StorageError> {
            self.inner.stat(key).await
        }

        async fn open(&self, key: &str) -> Result<Box<dyn ObjectHandle>, StorageError> {
            Ok(Box::new(CountingHandle {
                inner: self.inner.open(key).await?,
                closes: Arc::clone(&self.closes),
                good_reads: self.good_reads,
            }))
        }
    }

    #[async_trait]
    impl ObjectHandle for CountingHandle {
        async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, StorageError> {
            match &mut self.good_reads {
                Some(0) => Err(StorageError::Backend("connection reset".into())),
                Some(left) => {
                    *left -= 1;
                    self.inner.read_at(buf, offset).await
                }
                None => self.inner.read_at(buf, offset).await,
            }
        }

        async fn close(&mut self) -> Result<(), StorageError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.inner.close().await
        }
    }

    fn counting_handler() -> (StreamHandler, Arc<AtomicUsize>) {
        failing_handler(None)
    }

    fn failing_handler(good_reads: Option<usize>) -> (StreamHandler, Arc<AtomicUsize>) {
        let inner = InMemoryObjectStore::new("media");
        inner.put("k", payload(100));
        let closes = Arc::new(AtomicUsize::new(0));
        let store = CountingStore {
            inner,
            closes: Arc::clone(&closes),
            good_reads,
        };
        (StreamHandler::new(Arc::new(store), 16), closes)
    }

    #[tokio::test]
    async fn test_should_release_handle_after_streaming() {
        let (handler, closes) = counting_handler();
        let response = handler.get(&StreamRequest::new("/k", ""), "req-7").await;
        assert_eq!(closes.load(Ordering::SeqCst), 0);
        assert_eq!(body_bytes(response).await.len(), 100);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_should_release_handle_on_range_error() {
        let (handler, closes) = counting_handler();
        let response = handler
            .get(&StreamRequest::new("/k", "bytes=9-1"), "req-8")
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_should_fail_body_and_release_handle_on_read_error() {
        let (handler, closes) = failing_handler(Some(1));
        let response = handler.get(&StreamRequest::new("/k", ""), "req-9").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, CONTENT_LENGTH), "100");

        let mut body = response.into_body();
        let first = body
            .frame()
            .await
            .expect("first frame")
            .expect("first chunk")
            .into_data()
            .expect("data frame");
        assert_eq!(first.len(), 16);

        let err = body
            .frame()
            .await
            .expect("error frame")
            .expect_err("second read fails");
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(body.frame().await.is_none());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
