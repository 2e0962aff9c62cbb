use thiserror::Error;

use crate::types::AccountId;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No credential stored for {provider} account {account_id}")]
    NotAuthenticated {
        provider: String,
        account_id: AccountId,
    },

    #[error("Credential for {provider} account {account_id} expired")]
    CredentialExpired {
        provider: String,
        account_id: AccountId,
    },

    #[error("Stored credential for {provider} account {account_id} is corrupted: {reason}")]
    CredentialCorrupted {
        provider: String,
        account_id: AccountId,
        reason: String,
    },

    #[error("Secure storage unavailable: {0}")]
    SecureStorageUnavailable(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl AuthError {
    /// Whether the host must re-run sign-on before the account can sync again.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            AuthError::NotAuthenticated { .. }
                | AuthError::CredentialExpired { .. }
                | AuthError::CredentialCorrupted { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
