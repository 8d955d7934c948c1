use thiserror::Error;

pub type Result<T> = std::result::Result<T, NodeError>;

/// Error kinds surfaced by the fabric. Local handler failures are logged and
/// folded into an `error` field on the reply; only startup errors abort the
/// process.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Routing is impossible because required metadata is missing.
    #[error("hash error: {0}")]
    Hash(String),

    /// The network topology cannot satisfy a placement request.
    #[error("partition error: {0}")]
    Partition(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The local block store refused an operation.
    #[error("filesystem error: {0}")]
    Filesystem(String),

    /// A malformed event or snapshot.
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("timed out: {0}")]
    Timeout(String),

    /// Unknown filesystem or request id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad client input.
    #[error("validation error: {0}")]
    Validation(String),
}
