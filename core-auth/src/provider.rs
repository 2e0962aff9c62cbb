//! Credential provider seam consumed by sync runs.

use crate::error::{AuthError, Result};
use crate::token_store::TokenStore;
use crate::types::{AccessToken, AccountId};
use async_trait::async_trait;
use bridge_traits::time::{Clock, SystemClock};
use chrono::Duration;
use std::sync::Arc;
use tracing::{info, instrument};

/// Tokens closer than this to expiry are treated as expired.
const EXPIRY_BUFFER_SECS: i64 = 60;

/// Supplies the bearer credential for an account.
///
/// Sync runs call [`access_token`](Self::access_token) once while
/// validating and [`invalidate`](Self::invalidate) when the provider
/// rejects the credential with 401/403.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn access_token(&self, provider: &str, account_id: AccountId) -> Result<AccessToken>;

    async fn invalidate(&self, provider: &str, account_id: AccountId) -> Result<()>;
}

/// [`CredentialProvider`] backed by a [`TokenStore`].
pub struct StoredCredentialProvider {
    store: TokenStore,
    clock: Arc<dyn Clock>,
}

impl StoredCredentialProvider {
    pub fn new(store: TokenStore) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: TokenStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait]
impl CredentialProvider for StoredCredentialProvider {
    #[instrument(skip(self), fields(account_id = %account_id))]
    async fn access_token(&self, provider: &str, account_id: AccountId) -> Result<AccessToken> {
        let token = self
            .store
            .retrieve(provider, account_id)
            .await?
            .ok_or_else(|| AuthError::NotAuthenticated {
                provider: provider.to_string(),
                account_id,
            })?;

        if token.is_expired_at(self.clock.now(), Duration::seconds(EXPIRY_BUFFER_SECS)) {
            return Err(AuthError::CredentialExpired {
                provider: provider.to_string(),
                account_id,
            });
        }

        Ok(token)
    }

    /// Drops the stored credential so the next run fails fast in validation
    /// until the host signs the account in again.
    async fn invalidate(&self, provider: &str, account_id: AccountId) -> Result<()> {
        info!(provider, account_id = %account_id, "Invalidating rejected credential");
        self.store.delete(provider, account_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::storage::SecureStore;
    use bridge_traits::time::ManualClock;
    use chrono::Utc;
    use mockall::mock;

    mock! {
        Secrets {}

        #[async_trait]
        impl SecureStore for Secrets {
            async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()>;
            async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>>;
            async fn delete_secret(&self, key: &str) -> BridgeResult<()>;
            async fn list_keys(&self) -> BridgeResult<Vec<String>>;
        }
    }

    fn stored_json(expires_at: Option<i64>) -> Vec<u8> {
        serde_json::json!({ "access_token": "abc", "expires_at": expires_at })
            .to_string()
            .into_bytes()
    }

    #[tokio::test]
    async fn test_valid_token_is_returned() {
        let mut secrets = MockSecrets::new();
        secrets
            .expect_get_secret()
            .withf(|key| key.to_string() == "credentials:vk:42")
            .times(1)
            .returning(|_| Ok(Some(stored_json(None))));

        let provider = StoredCredentialProvider::new(TokenStore::new(Arc::new(secrets)));
        let token = provider.access_token("vk", AccountId::new(42)).await.unwrap();
        assert_eq!(token.secret(), "abc");
    }

    #[tokio::test]
    async fn test_missing_token_is_not_authenticated() {
        let mut secrets = MockSecrets::new();
        secrets.expect_get_secret().returning(|_| Ok(None));

        let provider = StoredCredentialProvider::new(TokenStore::new(Arc::new(secrets)));
        let err = provider.access_token("vk", AccountId::new(42)).await.unwrap_err();
        assert!(matches!(err, AuthError::NotAuthenticated { .. }));
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let now = Utc::now();
        let expires = now.timestamp() + 30;

        let mut secrets = MockSecrets::new();
        secrets
            .expect_get_secret()
            .returning(move |_| Ok(Some(stored_json(Some(expires)))));

        let clock = Arc::new(ManualClock::new(now));
        let provider =
            StoredCredentialProvider::with_clock(TokenStore::new(Arc::new(secrets)), clock);
        let err = provider.access_token("vk", AccountId::new(42)).await.unwrap_err();
        assert!(matches!(err, AuthError::CredentialExpired { .. }));
    }

    #[tokio::test]
    async fn test_invalidate_deletes_entry() {
        let mut secrets = MockSecrets::new();
        secrets
            .expect_delete_secret()
            .withf(|key| key.to_string() == "credentials:vk:42")
            .times(1)
            .returning(|_| Ok(()));

        let provider = StoredCredentialProvider::new(TokenStore::new(Arc::new(secrets)));
        provider.invalidate("vk", AccountId::new(42)).await.unwrap();
    }
}
