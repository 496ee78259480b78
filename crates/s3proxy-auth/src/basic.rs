//! HTTP Basic authentication against a static accounts file.
//!
//! The accounts file is a YAML map of user names to passwords:
//!
//! ```yaml
//! alice: wonderland
//! bob: builder
//! ```
//!
//! JSON objects are valid YAML, so `{"alice": "wonderland"}` works too. An
//! empty file or empty map disables authentication.

use std::collections::HashMap;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::error::AuthError;

/// Realm advertised in `WWW-Authenticate` challenges.
pub const REALM: &str = "Authorization Required";

/// User name to password map for basic auth.
///
/// # Examples
///
/// ```
/// use s3proxy_auth::basic::BasicAuthAccounts;
///
/// let accounts = BasicAuthAccounts::new([("alice".to_owned(), "secret".to_owned())]);
/// // "alice:secret"
/// assert_eq!(accounts.verify(Some("Basic YWxpY2U6c2VjcmV0")).unwrap(), "alice");
/// assert!(accounts.verify(None).is_err());
/// ```
#[derive(Clone, Default)]
pub struct BasicAuthAccounts {
    accounts: HashMap<String, String>,
}

impl std::fmt::Debug for BasicAuthAccounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthAccounts")
            .field("user_count", &self.accounts.len())
            .finish()
    }
}

impl BasicAuthAccounts {
    /// Create an account set from `(user, password)` pairs.
    pub fn new(accounts: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            accounts: accounts.into_iter().collect(),
        }
    }

    /// Load accounts from a YAML (or JSON) file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| AuthError::AccountsFileRead {
            path: path.to_owned(),
            source,
        })?;
        let accounts: HashMap<String, String> = if raw.trim().is_empty() {
            HashMap::new()
        } else {
            serde_yaml::from_str(&raw).map_err(|source| AuthError::AccountsFileParse {
                path: path.to_owned(),
                source,
            })?
        };
        debug!(path = %path.display(), users = accounts.len(), "loaded basic auth accounts");
        Ok(Self { accounts })
    }

    /// Whether no accounts are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Number of configured accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Check an `Authorization` header value, returning the user name.
    pub fn verify(&self, header: Option<&str>) -> Result<&str, AuthError> {
        let header = header.ok_or(AuthError::MissingAuthHeader)?;
        let (scheme, encoded) = header
            .trim()
            .split_once(' ')
            .ok_or(AuthError::InvalidAuthHeader)?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return Err(AuthError::InvalidAuthHeader);
        }

        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| AuthError::InvalidAuthHeader)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthError::InvalidAuthHeader)?;
        let (user, password) = decoded
            .split_once(':')
            .ok_or(AuthError::InvalidAuthHeader)?;

        let (name, expected) = self
            .accounts
            .get_key_value(user)
            .ok_or(AuthError::InvalidCredentials)?;
        if bool::from(password.as_bytes().ct_eq(expected.as_bytes())) {
            Ok(name.as_str())
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }

    /// `WWW-Authenticate` value to send with a 401.
    #[must_use]
    pub fn challenge() -> String {
        format!("Basic realm=\"{REALM}\"")
    }
}
