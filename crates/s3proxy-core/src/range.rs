//! Single-range `Range` header parsing.
//!
//! Only the `bytes=<start>-<end>` form is accepted. An empty start defaults
//! to the beginning of the object and an empty end to its last byte; suffix
//! ranges (`bytes=-N` meaning "the last N bytes") are not supported and
//! multi-range headers are rejected as malformed.

use regex::Regex;

use crate::error::RangeError;

/// An inclusive byte range inside an object.
///
/// Values produced by [`RangeParser::parse`] always satisfy
/// `start <= end < size` for the size they were checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte offset (inclusive).
    pub start: u64,
    /// Last byte offset (inclusive).
    pub end: u64,
}

#[allow(clippy::len_without_is_empty)]
impl ByteRange {
    /// Number of bytes covered by the range.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Render as a `Content-Range` header value for an object of `size` bytes.
    #[must_use]
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{size}", self.start, self.end)
    }
}

const RANGE_PATTERN: &str = r"^bytes=([0-9]*)-([0-9]*)$";

/// Parser for `Range` request headers.
///
/// Holds the compiled header pattern; build it once and share it.
///
/// # Examples
///
/// ```
/// use s3proxy_core::range::{ByteRange, RangeParser};
///
/// let parser = RangeParser::new();
/// assert_eq!(parser.parse("", 1000), Ok(None));
/// assert_eq!(
///     parser.parse("bytes=100-199", 1000),
///     Ok(Some(ByteRange { start: 100, end: 199 }))
/// );
/// ```
#[derive(Debug, Clone)]
pub struct RangeParser {
    pattern: Regex,
}

impl Default for RangeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RangeParser {
    /// Compile the header pattern.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(RANGE_PATTERN).expect("static range pattern should compile"),
        }
    }

    /// Validate `header` against an object of `size` bytes.
    ///
    /// Returns `Ok(None)` for an empty header, meaning the whole object is
    /// served.
    pub fn parse(&self, header: &str, size: u64) -> Result<Option<ByteRange>, RangeError> {
        if header.is_empty() {
            return Ok(None);
        }

        let captures = self
            .pattern
            .captures(header)
            .ok_or_else(|| RangeError::Format {
                header: header.to_owned(),
            })?;
        let start = captures.get(1).map_or("", |m| m.as_str());
        let end = captures.get(2).map_or("", |m| m.as_str());

        if start.is_empty() && end.is_empty() {
            return Err(RangeError::Format {
                header: header.to_owned(),
            });
        }

        let out_of_bounds = || RangeError::OutOfBounds {
            header: header.to_owned(),
            size,
        };

        if size == 0 {
            return Err(out_of_bounds());
        }

        // The captures are ASCII digits, so a parse failure can only be overflow.
        let start = if start.is_empty() {
            0
        } else {
            start.parse::<u64>().map_err(|_| out_of_bounds())?
        };
        let end = if end.is_empty() {
            size - 1
        } else {
            end.parse::<u64>().map_err(|_| out_of_bounds())?
        };

        if start >= size || end >= size {
            return Err(out_of_bounds());
        }
        if start > end {
            return Err(RangeError::Order {
                header: header.to_owned(),
            });
        }

        Ok(Some(ByteRange { start, end }))
    }
}
