//! Static backend credentials.

/// An access key / secret key pair used to sign backend requests.
///
/// # Examples
///
/// ```
/// use s3proxy_auth::credentials::Credentials;
///
/// let creds = Credentials::from_parts(Some("AKID".into()), Some("secret".into()));
/// assert_eq!(creds.unwrap().access_key(), "AKID");
/// assert!(Credentials::from_parts(None, None).is_none());
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_key: String,
    secret_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Create credentials from a key pair.
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Build credentials only when both halves are present.
    ///
    /// A half-configured pair is rejected earlier by configuration
    /// validation, so here it is simply treated as anonymous access.
    #[must_use]
    pub fn from_parts(access_key: Option<String>, secret_key: Option<String>) -> Option<Self> {
        match (access_key, secret_key) {
            (Some(access_key), Some(secret_key)) => Some(Self::new(access_key, secret_key)),
            _ => None,
        }
    }

    /// The access key ID.
    #[must_use]
    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    /// The secret access key.
    #[must_use]
    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}
