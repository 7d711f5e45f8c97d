use thiserror::Error;

/// Geranos error types
#[derive(Error, Debug)]
pub enum GeranosError {
    /// Manifest is structurally invalid: wrong layer media type, missing
    /// annotation, unparseable range, or layer/diffID count mismatch
    #[error("malformed manifest: {0}")]
    MalformedManifest(String),

    /// An expected data file or sidecar is absent
    #[error("missing file: {path}")]
    MissingFile { path: String },

    /// Recomputed digest disagrees with the manifest
    #[error("integrity failure: expected {expected}, got {actual}")]
    IntegrityFailure { expected: String, actual: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error classified as retryable (connection reset, broken pipe)
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    /// Operation was cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// Reference string failed strict validation
    #[error("invalid reference '{reference}': {message}")]
    InvalidReference { reference: String, message: String },

    /// Operation not supported by this layer (e.g. body access on a
    /// placeholder layer)
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Segment bounds check failed at construction time
    #[error("bad range: {0}")]
    BadRange(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Registry-side error reported by the registry client
    #[error("registry error: {0}")]
    Registry(String),
}

impl From<serde_json::Error> for GeranosError {
    fn from(err: serde_json::Error) -> Self {
        GeranosError::Serialization(err.to_string())
    }
}

impl GeranosError {
    /// True if this error should be retried at the segment-write level.
    ///
    /// Matches ECONNRESET and EPIPE, whether they arrive as raw I/O errors
    /// or were already classified by the registry client.
    pub fn is_transient(&self) -> bool {
        match self {
            GeranosError::TransientNetwork(_) => true,
            GeranosError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Result type alias for geranos operations
pub type Result<T> = std::result::Result<T, GeranosError>;
