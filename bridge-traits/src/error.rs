use thiserror::Error;

/// Errors surfaced by host bridge implementations.
///
/// Network-facing variants are kept distinct so that callers (the sync
/// engine and the image cache) can tell a retryable failure apart from a
/// permanent one without inspecting message strings.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether the failure is transport-level and worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::Timeout(_) | BridgeError::Connection(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
