//! S3-compatible storage backend for s3proxy.
//!
//! [`S3ObjectStore`] implements [`ObjectStore`](s3proxy_core::ObjectStore)
//! over plain HTTP using path-style addressing
//! (`{scheme}://{endpoint}/{bucket}/{key}`). Requests are SigV4-signed when
//! credentials are configured and sent anonymously otherwise.
//!
//! A handle keeps one open-ended ranged `GET` body and serves sequential
//! reads from it, starting a new request only when the read offset jumps.
//! Every `GET` carries `If-Match` with the ETag seen by `stat`, so an object
//! replaced mid-stream fails the read instead of splicing two versions
//! together.

pub mod config;
pub mod store;

pub use config::S3ClientConfig;
pub use store::{S3ObjectHandle, S3ObjectStore};
