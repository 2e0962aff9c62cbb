use crate::types::ErrorKind;
use bridge_traits::error::BridgeError;
use core_auth::AuthError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Missing, expired or rejected credential. Never retried.
    #[error("Credential rejected for {provider}: {message}")]
    Credential {
        provider: String,
        /// HTTP status when the provider rejected the token.
        status: Option<u16>,
        message: String,
    },

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Malformed response from {provider}: {message}")]
    MalformedResponse { provider: String, message: String },

    #[error("Too soon since last successful sync, retry in {}s", retry_in.as_secs())]
    TooSoon { retry_in: Duration },

    #[error("Sync already in progress for {scope}")]
    SyncInProgress { scope: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Sync timeout after {0} seconds")]
    Timeout(u64),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Invalid job ID: {0}")]
    InvalidJobId(String),

    #[error("Invalid sync phase: {0}")]
    InvalidPhase(String),

    #[error("Invalid data type: {0}")]
    InvalidDataType(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Whether the retry loop may try the same request again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::TransientNetwork(_) | SyncError::RateLimited { .. }
        )
    }

    /// Outcome classification reported to the host.
    ///
    /// `Cancelled` has no kind: it is reported as its own status.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Credential { .. } => ErrorKind::Credential,
            SyncError::TransientNetwork(_) | SyncError::Timeout(_) => ErrorKind::TransientNetwork,
            SyncError::RateLimited { .. } => ErrorKind::RateLimited,
            SyncError::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            SyncError::TooSoon { .. } => ErrorKind::TooSoon,
            SyncError::SyncInProgress { .. } => ErrorKind::AlreadyRunning,
            SyncError::Storage(_) => ErrorKind::Storage,
            SyncError::Cancelled
            | SyncError::InvalidJobId(_)
            | SyncError::InvalidPhase(_)
            | SyncError::InvalidDataType(_)
            | SyncError::InvalidStateTransition { .. }
            | SyncError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<AuthError> for SyncError {
    fn from(err: AuthError) -> Self {
        match &err {
            AuthError::NotAuthenticated { provider, .. }
            | AuthError::CredentialExpired { provider, .. }
            | AuthError::CredentialCorrupted { provider, .. } => SyncError::Credential {
                provider: provider.clone(),
                status: None,
                message: err.to_string(),
            },
            // The keychain being locked says nothing about the credential itself.
            AuthError::SecureStorageUnavailable(_) | AuthError::Serialization(_) => {
                SyncError::Storage(err.to_string())
            }
        }
    }
}

impl From<BridgeError> for SyncError {
    fn from(err: BridgeError) -> Self {
        if err.is_transient() {
            return SyncError::TransientNetwork(err.to_string());
        }
        match err {
            BridgeError::Io(e) => SyncError::Storage(e.to_string()),
            other => SyncError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
