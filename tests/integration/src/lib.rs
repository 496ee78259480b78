//! End-to-end tests for the s3proxy gateway.
//!
//! Most tests start an in-process server on `127.0.0.1:0` backed by the
//! in-memory store. Tests against a real S3 backend are marked `#[ignore]`;
//! run them with:
//!
//! ```text
//! S3_ENDPOINT=localhost:9000 S3_BUCKET=test cargo test -p s3proxy-integration -- --ignored
//! ```

use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use s3proxy_auth::BasicAuthAccounts;
use s3proxy_core::{InMemoryObjectStore, ObjectHandle, ObjectMetadata, ObjectStore, StorageError};
use s3proxy_http::{ProxyService, Server, ServerConfig, ServerHandle, StreamHandler};

#[cfg(test)]
mod test_auth;
#[cfg(test)]
mod test_live;
#[cfg(test)]
mod test_shutdown;
#[cfg(test)]
mod test_stream;

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// Deterministic object contents of `len` bytes.
#[must_use]
pub fn sample_object(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// An in-process gateway listening on a random local port.
#[derive(Debug)]
pub struct TestServer {
    /// Handle of the running server.
    pub handle: ServerHandle,
    /// `http://127.0.0.1:<port>`.
    pub base_url: String,
}

impl TestServer {
    /// URL of an object path on this server.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// Options for [`start_server`].
#[derive(Debug, Clone)]
pub struct TestServerOptions {
    /// Bytes read from the store per chunk.
    pub read_buffer_size: usize,
    /// Drain deadline for shutdown.
    pub drain_timeout: Duration,
    /// Basic auth accounts, if any.
    pub accounts: Option<BasicAuthAccounts>,
}

impl Default for TestServerOptions {
    fn default() -> Self {
        Self {
            read_buffer_size: 64 * 1024,
            drain_timeout: Duration::from_secs(10),
            accounts: None,
        }
    }
}

/// Start a gateway in front of `store`.
pub async fn start_server(store: Arc<dyn ObjectStore>, options: TestServerOptions) -> TestServer {
    init_tracing();

    let mut service = ProxyService::new(StreamHandler::new(store, options.read_buffer_size));
    if let Some(accounts) = options.accounts {
        service = service.with_basic_auth(accounts);
    }
    let config = ServerConfig::new("127.0.0.1", 0).with_drain_timeout(options.drain_timeout);
    let handle = Server::new(config, service)
        .start()
        .await
        .expect("server should start");
    let base_url = format!("http://{}", handle.local_addr());
    TestServer { handle, base_url }
}

/// An in-memory store holding the standard test objects.
#[must_use]
pub fn memory_store() -> InMemoryObjectStore {
    let store = InMemoryObjectStore::new("media");
    store.put("videos/clip.bin", sample_object(1000));
    store.put_with_content_type("docs/readme.txt", "hello world", "text/plain");
    store.put("empty.bin", Bytes::new());
    store
}

/// Store wrapper whose handles pause before every read.
#[derive(Debug)]
pub struct SlowStore {
    inner: InMemoryObjectStore,
    delay: Duration,
}

impl SlowStore {
    /// Wrap `inner`, sleeping `delay` before each read.
    #[must_use]
    pub fn new(inner: InMemoryObjectStore, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

struct SlowHandle {
    inner: Box<dyn ObjectHandle>,
    delay: Duration,
}

#[async_trait]
impl ObjectStore for SlowStore {
    fn bucket(&self) -> &str {
        self.inner.bucket()
    }

    async fn stat(&self, key: &str) -> Result<ObjectMetadata, StorageError> {
        self.inner.stat(key).await
    }

    async fn open(&self, key: &str) -> Result<Box<dyn ObjectHandle>, StorageError> {
        Ok(Box::new(SlowHandle {
            inner: self.inner.open(key).await?,
            delay: self.delay,
        }))
    }
}

#[async_trait]
impl ObjectHandle for SlowHandle {
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, StorageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.read_at(buf, offset).await
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        self.inner.close().await
    }
}
