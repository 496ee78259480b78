//! Storage capability traits and the in-memory backend.
//!
//! The gateway only ever needs three things from a backend: the size (and a
//! few descriptive headers) of an object, a handle to it, and positional
//! reads through that handle. [`ObjectStore`] and [`ObjectHandle`] capture
//! exactly that, so the HTTP layer never knows which backend it is talking
//! to.
//!
//! [`InMemoryObjectStore`] keeps objects as [`Bytes`] in a [`DashMap`]. It
//! backs the test suites and `memory://` local runs.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, trace};

use crate::error::StorageError;

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Descriptive metadata for one object, as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Object size in bytes.
    pub size: u64,
    /// Entity tag, quoted as the backend returned it.
    pub etag: Option<String>,
    /// Media type recorded for the object.
    pub content_type: Option<String>,
    /// Last modification time.
    pub last_modified: Option<DateTime<Utc>>,
}

impl ObjectMetadata {
    /// Metadata carrying only a size.
    #[must_use]
    pub fn with_size(size: u64) -> Self {
        Self {
            size,
            etag: None,
            content_type: None,
            last_modified: None,
        }
    }
}

/// A bucket of objects that can be inspected and opened.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Name of the bucket this store serves.
    fn bucket(&self) -> &str;

    /// Fetch metadata for `key`.
    async fn stat(&self, key: &str) -> Result<ObjectMetadata, StorageError>;

    /// Acquire a random-access read handle for `key`.
    async fn open(&self, key: &str) -> Result<Box<dyn ObjectHandle>, StorageError>;

    /// Acquire a handle for `key` when `metadata` was just returned by
    /// [`stat`](ObjectStore::stat).
    ///
    /// Backends that need the size or ETag to open a handle override this to
    /// skip a second round trip.
    async fn open_with_metadata(
        &self,
        key: &str,
        _metadata: &ObjectMetadata,
    ) -> Result<Box<dyn ObjectHandle>, StorageError> {
        self.open(key).await
    }
}

/// A random-access read handle for one object.
///
/// A handle is used by one request at a time and is released with
/// [`close`](ObjectHandle::close). Dropping a handle without closing it must
/// still release whatever it holds.
#[async_trait]
pub trait ObjectHandle: Send {
    /// Read up to `buf.len()` bytes starting at absolute `offset`.
    ///
    /// Returns `Ok(0)` at or beyond the end of the object.
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, StorageError>;

    /// Release the handle.
    async fn close(&mut self) -> Result<(), StorageError>;
}

#[async_trait]
impl<H: ObjectHandle + ?Sized> ObjectHandle for Box<H> {
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, StorageError> {
        (**self).read_at(buf, offset).await
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        (**self).close().await
    }
}

#[async_trait]
impl<S: ObjectStore + ?Sized> ObjectStore for Arc<S> {
    fn bucket(&self) -> &str {
        (**self).bucket()
    }

    async fn stat(&self, key: &str) -> Result<ObjectMetadata, StorageError> {
        (**self).stat(key).await
    }

    async fn open(&self, key: &str) -> Result<Box<dyn ObjectHandle>, StorageError> {
        (**self).open(key).await
    }

    async fn open_with_metadata(
        &self,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> Result<Box<dyn ObjectHandle>, StorageError> {
        (**self).open_with_metadata(key, metadata).await
    }
}

// ---------------------------------------------------------------------------
// InMemoryObjectStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    last_modified: DateTime<Utc>,
}

/// Thread-safe in-memory object store.
///
/// # Examples
///
/// ```
/// use s3proxy_core::storage::InMemoryObjectStore;
///
/// let store = InMemoryObjectStore::new("demo");
/// store.put("hello.txt", "hello world");
/// assert_eq!(store.len(), 1);
/// ```
pub struct InMemoryObjectStore {
    bucket: String,
    objects: DashMap<String, StoredObject>,
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("bucket", &self.bucket)
            .field("object_count", &self.objects.len())
            .finish()
    }
}

impl InMemoryObjectStore {
    /// Create an empty store serving `bucket`.
    #[must_use]
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: DashMap::new(),
        }
    }

    /// Store `data` under `key`, replacing any previous object.
    pub fn put(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.insert(key.into(), data.into(), None);
    }

    /// Store `data` under `key` with an explicit media type.
    pub fn put_with_content_type(
        &self,
        key: impl Into<String>,
        data: impl Into<Bytes>,
        content_type: impl Into<String>,
    ) {
        self.insert(key.into(), data.into(), Some(content_type.into()));
    }

    /// Remove `key`, returning its data if it existed.
    pub fn remove(&self, key: &str) -> Option<Bytes> {
        self.objects.remove(key).map(|(_, object)| object.data)
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn insert(&self, key: String, data: Bytes, content_type: Option<String>) {
        debug!(bucket = %self.bucket, key = %key, size = data.len(), "storing object");
        self.objects.insert(
            key,
            StoredObject {
                data,
                content_type,
                last_modified: Utc::now(),
            },
        );
    }

    fn get(&self, key: &str) -> Result<StoredObject, StorageError> {
        self.objects
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound {
                bucket: self.bucket.clone(),
                key: key.to_owned(),
            })
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn stat(&self, key: &str) -> Result<ObjectMetadata, StorageError> {
        let object = self.get(key)?;
        Ok(ObjectMetadata {
            size: object.data.len() as u64,
            etag: None,
            content_type: object.content_type,
            last_modified: Some(object.last_modified),
        })
    }

    async fn open(&self, key: &str) -> Result<Box<dyn ObjectHandle>, StorageError> {
        let object = self.get(key)?;
        trace!(bucket = %self.bucket, key, "opened in-memory handle");
        Ok(Box::new(InMemoryHandle {
            data: object.data,
            closed: false,
        }))
    }
}

/// Handle over a snapshot of one in-memory object.
#[derive(Debug)]
pub struct InMemoryHandle {
    data: Bytes,
    closed: bool,
}

impl InMemoryHandle {
    /// Wrap `data` in a handle.
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            closed: false,
        }
    }

    /// Whether [`close`](ObjectHandle::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl ObjectHandle for InMemoryHandle {
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, StorageError> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_should_stat_stored_object() {
        let store = InMemoryObjectStore::new("bucket");
        store.put_with_content_type("a/b.txt", "hello", "text/plain");

        let meta = store.stat("a/b.txt").await.expect("stat");
        assert_eq!(meta.size, 5);
        assert_eq!(meta.content_type.as_deref(), Some("text/plain"));
        assert!(meta.last_modified.is_some());
    }

    #[tokio::test]
    async fn test_should_report_missing_object() {
        let store = InMemoryObjectStore::new("bucket");
        let err = store.stat("missing").await.expect_err("not found");
        assert!(matches!(
            err,
            StorageError::NotFound { ref bucket, ref key } if bucket == "bucket" && key == "missing"
        ));
        assert!(store.open("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_should_open_with_stat_metadata() {
        let store = Arc::new(InMemoryObjectStore::new("bucket"));
        store.put("k", "0123456789");

        let meta = store.stat("k").await.expect("stat");
        let mut handle = store.open_with_metadata("k", &meta).await.expect("open");
        let mut buf = [0u8; 4];
        assert_eq!(handle.read_at(&mut buf, 6).await.expect("read"), 4);
        assert_eq!(&buf, b"6789");
    }

    #[tokio::test]
    async fn test_should_read_at_offsets() {
        let store = InMemoryObjectStore::new("bucket");
        store.put("k", "0123456789");
        let mut handle = store.open("k").await.expect("open");

        let mut buf = [0u8; 4];
        assert_eq!(handle.read_at(&mut buf, 3).await.expect("read"), 4);
        assert_eq!(&buf, b"3456");

        assert_eq!(handle.read_at(&mut buf, 8).await.expect("read"), 2);
        assert_eq!(&buf[..2], b"89");

        assert_eq!(handle.read_at(&mut buf, 10).await.expect("read"), 0);
        assert_eq!(handle.read_at(&mut buf, u64::MAX).await.expect("read"), 0);
    }

    #[tokio::test]
    async fn test_should_reject_reads_after_close() {
        let mut handle = InMemoryHandle::new("abc");
        handle.close().await.expect("close");
        assert!(handle.is_closed());
        let mut buf = [0u8; 1];
        assert!(matches!(
            handle.read_at(&mut buf, 0).await,
            Err(StorageError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_should_keep_open_handle_after_remove() {
        let store = InMemoryObjectStore::new("bucket");
        store.put("k", "data");
        let mut handle = store.open("k").await.expect("open");
        assert_eq!(store.remove("k"), Some(Bytes::from_static(b"data")));
        assert!(store.is_empty());

        let mut buf = [0u8; 8];
        assert_eq!(handle.read_at(&mut buf, 0).await.expect("read"), 4);
    }

    #[tokio::test]
    async fn test_should_delegate_through_arc() {
        let store = Arc::new(InMemoryObjectStore::new("shared"));
        store.put("x", "y");
        assert_eq!(ObjectStore::bucket(&store), "shared");
        assert_eq!(ObjectStore::stat(&store, "x").await.expect("stat").size, 1);
    }
}
