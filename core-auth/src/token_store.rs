//! Secure Token Storage
//!
//! Persists one [`AccessToken`] per `(provider, account)` pair in the host
//! [`SecureStore`]. Entries are JSON under the key
//! `credentials:<provider>:<account_id>`.
//!
//! Token values are never logged. An entry that fails to deserialize is
//! deleted and reported as [`AuthError::CredentialCorrupted`], so the host
//! re-runs sign-on instead of hitting the same bad entry forever.

use crate::error::{AuthError, Result};
use crate::types::{AccessToken, AccountId};
use bridge_traits::storage::SecureStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const KEY_PREFIX: &str = "credentials";

#[derive(Clone)]
pub struct TokenStore {
    secure_store: Arc<dyn SecureStore>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    expires_at: Option<i64>,
}

impl TokenStore {
    pub fn new(secure_store: Arc<dyn SecureStore>) -> Self {
        Self { secure_store }
    }

    fn storage_key(provider: &str, account_id: AccountId) -> String {
        format!("{}:{}:{}", KEY_PREFIX, provider, account_id)
    }

    pub async fn store(
        &self,
        provider: &str,
        account_id: AccountId,
        token: &AccessToken,
    ) -> Result<()> {
        let stored = StoredToken {
            access_token: token.secret().to_string(),
            expires_at: token.expires_at().map(|at| at.timestamp()),
        };

        let json = serde_json::to_vec(&stored)
            .map_err(|e| AuthError::Serialization(format!("token serialization: {}", e)))?;

        self.secure_store
            .set_secret(&Self::storage_key(provider, account_id), &json)
            .await
            .map_err(|e| {
                warn!(provider, account_id = %account_id, error = %e, "Failed to store credential");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        info!(
            provider,
            account_id = %account_id,
            expires = stored.expires_at.is_some(),
            "Credential stored"
        );
        Ok(())
    }

    /// `Ok(None)` when nothing is stored for the account.
    pub async fn retrieve(
        &self,
        provider: &str,
        account_id: AccountId,
    ) -> Result<Option<AccessToken>> {
        let key = Self::storage_key(provider, account_id);

        let data = self.secure_store.get_secret(&key).await.map_err(|e| {
            warn!(provider, account_id = %account_id, error = %e, "Failed to read credential");
            AuthError::SecureStorageUnavailable(e.to_string())
        })?;

        let Some(data) = data else {
            debug!(provider, account_id = %account_id, "No credential stored");
            return Ok(None);
        };

        let stored: StoredToken = match serde_json::from_slice(&data) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(
                    provider,
                    account_id = %account_id,
                    error = %e,
                    "Stored credential is corrupted, deleting it"
                );
                if let Err(delete_err) = self.secure_store.delete_secret(&key).await {
                    warn!(error = %delete_err, "Failed to delete corrupted credential");
                }
                return Err(AuthError::CredentialCorrupted {
                    provider: provider.to_string(),
                    account_id,
                    reason: e.to_string(),
                });
            }
        };

        let expires_at = match stored.expires_at {
            Some(ts) => Some(DateTime::<Utc>::from_timestamp(ts, 0).ok_or_else(|| {
                AuthError::CredentialCorrupted {
                    provider: provider.to_string(),
                    account_id,
                    reason: format!("expiry timestamp {} out of range", ts),
                }
            })?),
            None => None,
        };

        Ok(Some(AccessToken::new(stored.access_token, expires_at)))
    }

    /// Idempotent.
    pub async fn delete(&self, provider: &str, account_id: AccountId) -> Result<()> {
        self.secure_store
            .delete_secret(&Self::storage_key(provider, account_id))
            .await
            .map_err(|e| AuthError::SecureStorageUnavailable(e.to_string()))?;

        info!(provider, account_id = %account_id, "Credential deleted");
        Ok(())
    }

    /// Accounts with a stored credential for `provider`.
    pub async fn list_accounts(&self, provider: &str) -> Result<Vec<AccountId>> {
        let keys = self
            .secure_store
            .list_keys()
            .await
            .map_err(|e| AuthError::SecureStorageUnavailable(e.to_string()))?;

        let prefix = format!("{}:{}:", KEY_PREFIX, provider);
        let mut accounts: Vec<AccountId> = keys
            .iter()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter_map(|id| id.parse().ok())
            .collect();
        accounts.sort();
        Ok(accounts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use chrono::Duration;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MemorySecureStore {
        data: Mutex<HashMap<String, Vec<u8>>>,
        unavailable: bool,
    }

    #[async_trait]
    impl SecureStore for MemorySecureStore {
        async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
            if self.unavailable {
                return Err(BridgeError::NotAvailable("locked".into()));
            }
            self.data.lock().await.insert(key.to_string(), value.to_vec());
            Ok(())
        }

        async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
            if self.unavailable {
                return Err(BridgeError::NotAvailable("locked".into()));
            }
            Ok(self.data.lock().await.get(key).cloned())
        }

        async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
            self.data.lock().await.remove(key);
            Ok(())
        }

        async fn list_keys(&self) -> BridgeResult<Vec<String>> {
            Ok(self.data.lock().await.keys().cloned().collect())
        }
    }

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let secure = Arc::new(MemorySecureStore::default());
        let store = TokenStore::new(secure.clone());
        let expires = DateTime::<Utc>::from_timestamp(Utc::now().timestamp(), 0).unwrap()
            + Duration::hours(1);

        store
            .store("vk", AccountId::new(42), &AccessToken::new("abc", Some(expires)))
            .await
            .unwrap();

        let token = store.retrieve("vk", AccountId::new(42)).await.unwrap().unwrap();
        assert_eq!(token.secret(), "abc");
        assert_eq!(token.expires_at(), Some(expires));

        assert!(secure.data.lock().await.contains_key("credentials:vk:42"));
    }

    #[tokio::test]
    async fn test_retrieve_missing_is_none() {
        let store = TokenStore::new(Arc::new(MemorySecureStore::default()));
        assert!(store.retrieve("vk", AccountId::new(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupted_entry_is_deleted() {
        let secure = Arc::new(MemorySecureStore::default());
        secure
            .data
            .lock()
            .await
            .insert("credentials:vk:5".to_string(), b"not json".to_vec());

        let store = TokenStore::new(secure.clone());
        let err = store.retrieve("vk", AccountId::new(5)).await.unwrap_err();
        assert!(matches!(err, AuthError::CredentialCorrupted { .. }));
        assert!(err.requires_reauth());
        assert!(secure.data.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_maps_error() {
        let store = TokenStore::new(Arc::new(MemorySecureStore {
            unavailable: true,
            ..Default::default()
        }));
        let err = store.retrieve("vk", AccountId::new(1)).await.unwrap_err();
        assert!(matches!(err, AuthError::SecureStorageUnavailable(_)));
        assert!(!err.requires_reauth());
    }

    #[tokio::test]
    async fn test_list_accounts_filters_by_provider() {
        let store = TokenStore::new(Arc::new(MemorySecureStore::default()));
        for (provider, id) in [("vk", 3), ("vk", 1), ("facebook", 2)] {
            store
                .store(provider, AccountId::new(id), &AccessToken::non_expiring("t"))
                .await
                .unwrap();
        }

        let accounts = store.list_accounts("vk").await.unwrap();
        assert_eq!(accounts, vec![AccountId::new(1), AccountId::new(3)]);

        store.delete("vk", AccountId::new(1)).await.unwrap();
        assert_eq!(store.list_accounts("vk").await.unwrap(), vec![AccountId::new(3)]);
    }
}
