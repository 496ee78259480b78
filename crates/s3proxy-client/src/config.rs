//! Backend client configuration.

use s3proxy_auth::Credentials;
use s3proxy_core::ProxyConfig;
use typed_builder::TypedBuilder;

/// Connection settings for an S3-compatible backend.
///
/// # Examples
///
/// ```
/// use s3proxy_client::S3ClientConfig;
///
/// let config = S3ClientConfig::builder()
///     .endpoint("minio:9000".into())
///     .bucket("media".into())
///     .build();
/// assert_eq!(config.base_url(), "http://minio:9000");
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct S3ClientConfig {
    /// Backend `host[:port]`.
    #[builder(default = String::from("localhost:9000"))]
    pub endpoint: String,

    /// Signing region.
    #[builder(default = String::from("us-east-1"))]
    pub region: String,

    /// Bucket to read from.
    pub bucket: String,

    /// Use https instead of http.
    #[builder(default = false)]
    pub tls: bool,

    /// Signing credentials; `None` sends anonymous requests.
    #[builder(default)]
    pub credentials: Option<Credentials>,
}

impl S3ClientConfig {
    /// Derive backend settings from the gateway configuration.
    #[must_use]
    pub fn from_proxy_config(config: &ProxyConfig) -> Self {
        Self {
            endpoint: config.s3_endpoint.clone(),
            region: config.s3_region.clone(),
            bucket: config.s3_bucket.clone(),
            tls: config.s3_tls,
            credentials: Credentials::from_parts(
                config.s3_access_key.clone(),
                config.s3_secret_key.clone(),
            ),
        }
    }

    /// `scheme://endpoint` without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}", self.endpoint.trim_end_matches('/'))
    }
}
