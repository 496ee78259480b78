//! Error types for authentication.

use std::path::PathBuf;

/// Errors raised while loading accounts or checking client credentials.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The request carried no `Authorization` header.
    #[error("Missing Authorization header")]
    MissingAuthHeader,

    /// The `Authorization` header is not a well-formed Basic credential.
    #[error("Invalid Authorization header format")]
    InvalidAuthHeader,

    /// The user is unknown or the password does not match.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The accounts file could not be read.
    #[error("failed to read accounts file {path}: {source}")]
    AccountsFileRead {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The accounts file is not a YAML map of user names to passwords.
    #[error("failed to parse accounts file {path}: {source}")]
    AccountsFileParse {
        /// Path that was parsed.
        path: PathBuf,
        /// Underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },
}
