//! Sequential readers over random-access object handles.
//!
//! [`BoundedRangeReader`] serves partial-content responses: it walks the
//! handle from `range.start` and stops exactly after `range.end`.
//! [`HandleReader`] serves whole objects and stops when the handle reports
//! end of object.
//!
//! Both own their handle. `close` is idempotent, and a reader dropped before
//! it was closed drops (and thereby releases) the handle.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::range::ByteRange;
use crate::storage::ObjectHandle;

/// A byte source read front to back.
#[async_trait]
pub trait SequentialRead: Send {
    /// Fill `buf` with the next bytes. `Ok(0)` means end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Release the underlying handle. Calling it again is a no-op.
    async fn close(&mut self) -> Result<(), StorageError>;
}

/// Closes `handle` once; later calls find `None` and return `Ok`.
async fn close_once<H: ObjectHandle>(handle: &mut Option<H>) -> Result<(), StorageError> {
    match handle.take() {
        Some(mut handle) => handle.close().await,
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// BoundedRangeReader
// ---------------------------------------------------------------------------

/// Reads the inclusive `[start, end]` window of an object.
///
/// # Examples
///
/// ```
/// # tokio_test::block_on(async {
/// use s3proxy_core::range::ByteRange;
/// use s3proxy_core::reader::{BoundedRangeReader, SequentialRead};
/// use s3proxy_core::storage::InMemoryHandle;
///
/// let handle = InMemoryHandle::new("0123456789");
/// let mut reader = BoundedRangeReader::new(handle, ByteRange { start: 2, end: 4 });
/// let mut buf = [0u8; 16];
/// assert_eq!(reader.read(&mut buf).await.unwrap(), 3);
/// assert_eq!(&buf[..3], b"234");
/// assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
/// # });
/// ```
#[derive(Debug)]
pub struct BoundedRangeReader<H> {
    handle: Option<H>,
    range: ByteRange,
    index: Option<u64>,
}

impl<H: ObjectHandle> BoundedRangeReader<H> {
    /// Wrap `handle`, clipping reads to `range`.
    pub fn new(handle: H, range: ByteRange) -> Self {
        Self {
            handle: Some(handle),
            range,
            index: None,
        }
    }
}

#[async_trait]
impl<H: ObjectHandle> SequentialRead for BoundedRangeReader<H> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, StorageError> {
        let index = *self.index.get_or_insert(self.range.start);
        if index > self.range.end {
            return Ok(0);
        }
        let handle = self.handle.as_mut().ok_or(StorageError::Closed)?;

        let remaining = self.range.end - index + 1;
        let want = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
        if want == 0 {
            return Ok(0);
        }

        let n = handle.read_at(&mut buf[..want], index).await?;
        // A short object ends the stream early; the caller sees fewer bytes than announced.
        if n == 0 {
            self.index = Some(self.range.end + 1);
            return Ok(0);
        }
        self.index = Some(index + n as u64);
        Ok(n)
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        close_once(&mut self.handle).await
    }
}

// ---------------------------------------------------------------------------
// HandleReader
// ---------------------------------------------------------------------------

/// Reads an object from offset 0 until the handle reports end of object.
#[derive(Debug)]
pub struct HandleReader<H> {
    handle: Option<H>,
    offset: u64,
    finished: bool,
}

impl<H: ObjectHandle> HandleReader<H> {
    /// Wrap `handle` for a full-object read.
    pub fn new(handle: H) -> Self {
        Self {
            handle: Some(handle),
            offset: 0,
            finished: false,
        }
    }
}

#[async_trait]
impl<H: ObjectHandle> SequentialRead for HandleReader<H> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, StorageError> {
        if self.finished || buf.is_empty() {
            return Ok(0);
        }
        let handle = self.handle.as_mut().ok_or(StorageError::Closed)?;
        let n = handle.read_at(buf, self.offset).await?;
        if n == 0 {
            self.finished = true;
        }
        self.offset += n as u64;
        Ok(n)
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        close_once(&mut self.handle).await
    }
}
