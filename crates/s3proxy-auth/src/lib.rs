//! Authentication for s3proxy.
//!
//! Two unrelated directions live here:
//!
//! - **Outgoing**: [`sigv4`] signs the requests the gateway sends to its S3
//!   backend, using the static [`Credentials`] from configuration.
//! - **Incoming**: [`basic`] checks HTTP Basic credentials presented by
//!   clients against an accounts file.

pub mod basic;
pub mod canonical;
pub mod credentials;
pub mod error;
pub mod sigv4;

pub use basic::BasicAuthAccounts;
pub use credentials::Credentials;
pub use error::AuthError;
pub use sigv4::{SignedHeaders, SigningParams, sign_request};
