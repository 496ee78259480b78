//! HTTP layer of the s3proxy gateway.
//!
//! - **Handler** ([`handler`]): stat, open, range and stream one object.
//! - **Service** ([`service`]): the [`ProxyService`] implementing hyper's
//!   `Service` trait, with basic auth and method filtering.
//! - **Body** ([`body`]): the [`ProxyBody`] type supporting buffered,
//!   streaming and empty responses.
//! - **Server** ([`server`]): bind, accept, TLS and graceful drain.
//!
//! # Architecture
//!
//! ```text
//! TCP / TLS connection
//!   -> Server (accept loop, graceful shutdown)
//!     -> ProxyService (hyper Service)
//!       -> Basic auth (optional)
//!       -> GET / HEAD filter
//!       -> StreamHandler (stat -> open -> range -> headers)
//!   <- ProxyBody streamed chunk by chunk from the backend
//! ```

pub mod body;
pub mod error;
pub mod handler;
pub mod server;
pub mod service;
pub mod tls;

pub use body::ProxyBody;
pub use error::ServerError;
pub use handler::{StreamHandler, StreamRequest};
pub use server::{Server, ServerConfig, ServerHandle, ServerState, ShutdownTrigger};
pub use service::ProxyService;
pub use tls::TlsFiles;
