//! Core building blocks for the s3proxy gateway.
//!
//! This crate holds everything the gateway needs that does not speak HTTP:
//!
//! - [`range`]: parsing of single-range `Range` headers against an object size
//! - [`reader`]: sequential readers over random-access object handles
//! - [`storage`]: the storage capability traits and an in-memory backend
//! - [`config`]: gateway configuration from a YAML file and the environment
//! - [`error`]: error types shared across the workspace

pub mod config;
pub mod error;
pub mod range;
pub mod reader;
pub mod storage;

pub use config::ProxyConfig;
pub use error::{ConfigError, RangeError, StorageError};
pub use range::{ByteRange, RangeParser};
pub use reader::{BoundedRangeReader, HandleReader, SequentialRead};
pub use storage::{InMemoryObjectStore, ObjectHandle, ObjectMetadata, ObjectStore};
