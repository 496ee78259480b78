//! Gateway configuration.
//!
//! Provides [`ProxyConfig`], loaded from an optional YAML file with
//! environment variables layered on top, and checked with
//! [`ProxyConfig::validate`] before anything is started.
//!
//! The file uses the nested layout below. Every key is optional and unknown
//! keys are ignored.
//!
//! ```yaml
//! s3:
//!   endpoint: minio:9000
//!   region: us-east-1
//!   bucket: media
//!   tls: false
//!   access_key: AKID
//!   secret_key: secret
//! server:
//!   address: 0.0.0.0
//!   port: 8080
//!   basic_auth: /etc/s3proxy/users.yml
//!   debug_mode: false
//!   log_level: info
//!   read_buffer_size: 262144
//!   tls:
//!     certificate: /etc/s3proxy/cert.pem
//!     key: /etc/s3proxy/key.pem
//! ```

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;
use typed_builder::TypedBuilder;

use crate::error::ConfigError;

/// Variable naming the YAML configuration file.
pub const CONFIG_FILE_VAR: &str = "S3_HTTP_PROXY_CONFIG_FILE";

/// File read when [`CONFIG_FILE_VAR`] is unset, if it exists.
pub const DEFAULT_CONFIG_FILE: &str = "config.yml";

/// Endpoint value that selects the in-memory backend instead of S3.
pub const MEMORY_ENDPOINT: &str = "memory://";

/// Default number of bytes requested from the backend per read (256 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 262_144;

/// s3proxy configuration.
///
/// # Examples
///
/// ```
/// use s3proxy_core::config::ProxyConfig;
///
/// let config = ProxyConfig::builder().s3_bucket("media".into()).build();
/// assert_eq!(config.server_port, 8080);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    /// Backend `host[:port]`, or `memory://` for the in-memory backend.
    #[builder(default = String::from("localhost:9000"))]
    pub s3_endpoint: String,

    /// Region used when signing backend requests.
    #[builder(default = String::from("us-east-1"))]
    pub s3_region: String,

    /// Bucket whose objects are served.
    #[builder(default)]
    pub s3_bucket: String,

    /// Whether the backend is reached over https.
    #[builder(default = false)]
    pub s3_tls: bool,

    /// Backend access key. Requests are unsigned when no keys are set.
    #[builder(default)]
    pub s3_access_key: Option<String>,

    /// Backend secret key.
    #[builder(default)]
    pub s3_secret_key: Option<String>,

    /// Address the listener binds to.
    #[builder(default = String::from("0.0.0.0"))]
    pub server_address: String,

    /// Port the listener binds to.
    #[builder(default = 8080)]
    pub server_port: u16,

    /// YAML (or JSON) file mapping user names to passwords for basic auth.
    #[builder(default)]
    pub basic_auth_file: Option<String>,

    /// PEM certificate chain for the listener.
    #[builder(default)]
    pub tls_certificate: Option<String>,

    /// PEM private key for the listener.
    #[builder(default)]
    pub tls_key: Option<String>,

    /// Bytes requested from the backend per read.
    #[builder(default = DEFAULT_READ_BUFFER_SIZE)]
    pub read_buffer_size: usize,

    /// Forces debug-level logging.
    #[builder(default = false)]
    pub debug_mode: bool,

    /// Log filter string (e.g. `"info"`, `"s3proxy_http=debug"`).
    #[builder(default = String::from("info"))]
    pub log_level: String,
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("s3_endpoint", &self.s3_endpoint)
            .field("s3_region", &self.s3_region)
            .field("s3_bucket", &self.s3_bucket)
            .field("s3_tls", &self.s3_tls)
            .field("s3_access_key", &self.s3_access_key)
            .field(
                "s3_secret_key",
                &self.s3_secret_key.as_ref().map(|_| "<redacted>"),
            )
            .field("server_address", &self.server_address)
            .field("server_port", &self.server_port)
            .field("basic_auth_file", &self.basic_auth_file)
            .field("tls_certificate", &self.tls_certificate)
            .field("tls_key", &self.tls_key)
            .field("read_buffer_size", &self.read_buffer_size)
            .field("debug_mode", &self.debug_mode)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ProxyConfig {
    /// Load the configuration file, then apply environment overrides.
    ///
    /// The file is named by `S3_HTTP_PROXY_CONFIG_FILE`. When that is unset,
    /// `config.yml` in the working directory is used if present, and the
    /// defaults otherwise. A file named explicitly must exist.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|name| std::env::var(name).ok())
    }

    /// [`load`](Self::load) through an arbitrary variable lookup.
    pub fn load_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_FILE_VAR).filter(|v| !v.is_empty()) {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(DEFAULT_CONFIG_FILE)?
            }
            None => {
                debug!(path = DEFAULT_CONFIG_FILE, "no configuration file, using defaults");
                Self::default()
            }
        };
        config.apply_lookup(lookup)?;
        Ok(config)
    }

    /// Load configuration from environment variables only.
    ///
    /// Reads the following environment variables (falling back to defaults):
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `S3_ENDPOINT` | `localhost:9000` |
    /// | `S3_REGION` | `us-east-1` |
    /// | `S3_BUCKET` | *(empty)* |
    /// | `S3_TLS` | `false` |
    /// | `S3_ACCESS_KEY` / `AWS_ACCESS_KEY_ID` | *(unset)* |
    /// | `S3_SECRET_KEY` / `AWS_SECRET_ACCESS_KEY` | *(unset)* |
    /// | `SERVER_ADDRESS` | `0.0.0.0` |
    /// | `SERVER_PORT` | `8080` |
    /// | `BASIC_AUTH_FILE` | *(unset)* |
    /// | `TLS_CERTIFICATE` | *(unset)* |
    /// | `TLS_KEY` | *(unset)* |
    /// | `READ_BUFFER_SIZE` | `262144` |
    /// | `DEBUG_MODE` | `false` |
    /// | `LOG_LEVEL` | `info` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply_lookup(lookup)?;
        Ok(config)
    }

    /// Load configuration from a YAML file, with defaults for missing keys.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file_error = |reason: String| ConfigError::File {
            path: path.display().to_string(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        let file: FileConfig = if text.trim().is_empty() {
            FileConfig::default()
        } else {
            serde_yaml::from_str(&text).map_err(|e| file_error(e.to_string()))?
        };
        debug!(path = %path.display(), "loaded configuration file");

        let mut config = Self::default();
        file.apply(&mut config);
        Ok(config)
    }

    /// Override settings with the variables `lookup` knows about.
    fn apply_lookup<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(v) = var("S3_ENDPOINT") {
            self.s3_endpoint = v;
        }
        if let Some(v) = var("S3_REGION") {
            self.s3_region = v;
        }
        if let Some(v) = var("S3_BUCKET") {
            self.s3_bucket = v;
        }
        if let Some(v) = var("S3_TLS") {
            self.s3_tls = parse_bool(&v);
        }
        if let Some(v) = var("S3_ACCESS_KEY").or_else(|| var("AWS_ACCESS_KEY_ID")) {
            self.s3_access_key = Some(v);
        }
        if let Some(v) = var("S3_SECRET_KEY").or_else(|| var("AWS_SECRET_ACCESS_KEY")) {
            self.s3_secret_key = Some(v);
        }
        if let Some(v) = var("SERVER_ADDRESS") {
            self.server_address = v;
        }
        if let Some(v) = var("SERVER_PORT") {
            self.server_port = parse_number("SERVER_PORT", &v)?;
        }
        if let Some(v) = var("BASIC_AUTH_FILE") {
            self.basic_auth_file = Some(v);
        }
        if let Some(v) = var("TLS_CERTIFICATE") {
            self.tls_certificate = Some(v);
        }
        if let Some(v) = var("TLS_KEY") {
            self.tls_key = Some(v);
        }
        if let Some(v) = var("READ_BUFFER_SIZE") {
            self.read_buffer_size = parse_number("READ_BUFFER_SIZE", &v)?;
        }
        if let Some(v) = var("DEBUG_MODE") {
            self.debug_mode = parse_bool(&v);
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(())
    }

    /// Check the settings that cannot be defaulted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.s3_bucket.is_empty() {
            return Err(ConfigError::Missing("S3_BUCKET"));
        }
        check_pair(
            self.tls_certificate.as_ref(),
            "TLS_CERTIFICATE",
            self.tls_key.as_ref(),
            "TLS_KEY",
        )?;
        check_pair(
            self.s3_access_key.as_ref(),
            "S3_ACCESS_KEY",
            self.s3_secret_key.as_ref(),
            "S3_SECRET_KEY",
        )?;
        if self.read_buffer_size == 0 {
            return Err(ConfigError::Invalid {
                name: "READ_BUFFER_SIZE",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Whether the in-memory backend was selected.
    #[must_use]
    pub fn uses_memory_backend(&self) -> bool {
        self.s3_endpoint == MEMORY_ENDPOINT
    }

    /// Log filter to install when `RUST_LOG` is not set.
    #[must_use]
    pub fn effective_log_level(&self) -> &str {
        if self.debug_mode {
            "debug"
        } else {
            &self.log_level
        }
    }
}

/// On-disk layout of the YAML configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    s3: FileS3,
    server: FileServer,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileS3 {
    endpoint: Option<String>,
    region: Option<String>,
    bucket: Option<String>,
    tls: Option<bool>,
    access_key: Option<String>,
    secret_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileServer {
    address: Option<String>,
    port: Option<u16>,
    basic_auth: Option<String>,
    debug_mode: Option<bool>,
    log_level: Option<String>,
    read_buffer_size: Option<usize>,
    tls: FileTls,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileTls {
    certificate: Option<String>,
    key: Option<String>,
}

impl FileConfig {
    /// Copy every non-empty setting onto `config`.
    fn apply(self, config: &mut ProxyConfig) {
        fn set(target: &mut String, value: Option<String>) {
            if let Some(v) = non_empty(value) {
                *target = v;
            }
        }
        fn set_opt(target: &mut Option<String>, value: Option<String>) {
            if let Some(v) = non_empty(value) {
                *target = Some(v);
            }
        }

        let Self { s3, server } = self;
        set(&mut config.s3_endpoint, s3.endpoint);
        set(&mut config.s3_region, s3.region);
        set(&mut config.s3_bucket, s3.bucket);
        if let Some(tls) = s3.tls {
            config.s3_tls = tls;
        }
        set_opt(&mut config.s3_access_key, s3.access_key);
        set_opt(&mut config.s3_secret_key, s3.secret_key);

        set(&mut config.server_address, server.address);
        if let Some(port) = server.port.filter(|p| *p != 0) {
            config.server_port = port;
        }
        set_opt(&mut config.basic_auth_file, server.basic_auth);
        if let Some(debug_mode) = server.debug_mode {
            config.debug_mode = debug_mode;
        }
        set(&mut config.log_level, server.log_level);
        if let Some(size) = server.read_buffer_size {
            config.read_buffer_size = size;
        }
        set_opt(&mut config.tls_certificate, server.tls.certificate);
        set_opt(&mut config.tls_key, server.tls.key);
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn check_pair<T>(
    a: Option<&T>,
    a_name: &'static str,
    b: Option<&T>,
    b_name: &'static str,
) -> Result<(), ConfigError> {
    match (a, b) {
        (Some(_), None) => Err(ConfigError::Unpaired {
            given: a_name,
            missing: b_name,
        }),
        (None, Some(_)) => Err(ConfigError::Unpaired {
            given: b_name,
            missing: a_name,
        }),
        _ => Ok(()),
    }
}

fn parse_number<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e| ConfigError::Invalid {
        name,
        reason: format!("{value:?} is not a valid number: {e}"),
    })
}

/// Parse a string as a boolean, accepting `"1"` and `"true"` (case-insensitive).
fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}
