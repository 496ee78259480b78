//! Error types for the s3proxy core.

/// Failure to turn a `Range` header into a [`ByteRange`](crate::ByteRange).
///
/// Every variant carries the offending header text so the message can be
/// returned to the client verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    /// The header does not match the single-range `bytes=<start>-<end>` form.
    #[error(r#"Range header "{header}" is incompatible with expected format of "bytes=(\d*)-(\d*)""#)]
    Format {
        /// The raw header value.
        header: String,
    },

    /// The start or end position is not inside the object.
    #[error(
        r#"Range header "{header}" falls outside what is permissible by a file with a size of {size}"#
    )]
    OutOfBounds {
        /// The raw header value.
        header: String,
        /// Size of the object the range was checked against.
        size: u64,
    },

    /// The start position comes after the end position.
    #[error(r#"Range header "{header}" has start position after the end position"#)]
    Order {
        /// The raw header value.
        header: String,
    },
}

/// Failure reported by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested object does not exist.
    #[error("object {key} not found in bucket {bucket}")]
    NotFound {
        /// Bucket that was searched.
        bucket: String,
        /// Key that was not found.
        key: String,
    },

    /// The backend answered, but not with what was asked for.
    #[error("backend error: {0}")]
    Backend(String),

    /// Reading from a handle that was already closed.
    #[error("object handle is closed")]
    Closed,

    /// Internal error with context.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Invalid gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required setting is missing.
    #[error("{0} must be set")]
    Missing(&'static str),

    /// Two settings must be given together but only one was.
    #[error("{given} is set but {missing} is not")]
    Unpaired {
        /// The setting that was provided.
        given: &'static str,
        /// The setting it requires.
        missing: &'static str,
    },

    /// The configuration file could not be read or parsed.
    #[error("failed to load configuration file {path}: {reason}")]
    File {
        /// Path of the file.
        path: String,
        /// Read or parse failure.
        reason: String,
    },

    /// A setting has a value outside its allowed domain.
    #[error("invalid value for {name}: {reason}")]
    Invalid {
        /// Name of the setting.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}
