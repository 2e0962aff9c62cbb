//! Secure Credential Storage using OS Keychain

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SecureStore,
};
use keyring::Entry;
use std::collections::BTreeSet;
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Entry holding the JSON list of keys written through this store.
const INDEX_KEY: &str = "__key_index";

/// Keyring-based secure storage implementation
///
/// The OS keychain cannot enumerate entries, so the store keeps its own
/// key index in a dedicated entry. Values are base64 encoded because the
/// keyring API only accepts strings.
pub struct KeyringSecureStore {
    service_name: String,
    index_lock: Mutex<()>,
}

impl KeyringSecureStore {
    pub fn new() -> Self {
        Self::with_service_name("social-sync")
    }

    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            index_lock: Mutex::new(()),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service_name, key).map_err(Self::map_keyring_error)
    }

    fn map_keyring_error(e: keyring::Error) -> BridgeError {
        match e {
            keyring::Error::NoStorageAccess(inner) => {
                BridgeError::NotAvailable(format!("Keyring storage: {}", inner))
            }
            keyring::Error::PlatformFailure(inner) => {
                BridgeError::NotAvailable(format!("Keyring platform: {}", inner))
            }
            other => BridgeError::OperationFailed(format!("Keyring error: {}", other)),
        }
    }

    fn read_raw(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Self::map_keyring_error(e)),
        }
    }

    fn read_index(&self) -> Result<BTreeSet<String>> {
        match self.read_raw(INDEX_KEY)? {
            Some(json) => serde_json::from_str(&json).map_err(|e| {
                error!(error = %e, "Keyring key index is corrupted");
                BridgeError::OperationFailed(format!("Corrupted key index: {}", e))
            }),
            None => Ok(BTreeSet::new()),
        }
    }

    fn write_index(&self, index: &BTreeSet<String>) -> Result<()> {
        let json = serde_json::to_string(index)
            .map_err(|e| BridgeError::OperationFailed(format!("Key index: {}", e)))?;
        self.entry(INDEX_KEY)?
            .set_password(&json)
            .map_err(Self::map_keyring_error)
    }
}

impl Default for KeyringSecureStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecureStore for KeyringSecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        let _guard = self.index_lock.lock().await;

        self.entry(key)?
            .set_password(&STANDARD.encode(value))
            .map_err(Self::map_keyring_error)?;

        let mut index = self.read_index()?;
        if index.insert(key.to_string()) {
            self.write_index(&index)?;
        }

        debug!(key = key, "Stored secret in keyring");
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(encoded) = self.read_raw(key)? else {
            debug!(key = key, "Secret not found in keyring");
            return Ok(None);
        };

        let decoded = STANDARD.decode(encoded.as_bytes()).map_err(|e| {
            error!(key = key, error = %e, "Failed to decode secret");
            BridgeError::OperationFailed(format!("Failed to decode secret: {}", e))
        })?;
        Ok(Some(decoded))
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        let _guard = self.index_lock.lock().await;

        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {}
            Err(e) => return Err(Self::map_keyring_error(e)),
        }

        let mut index = self.read_index()?;
        if index.remove(key) {
            self.write_index(&index)?;
        }

        debug!(key = key, "Deleted secret from keyring");
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.read_index()?.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_service_name() {
        let store = KeyringSecureStore::new();
        assert_eq!(store.service_name, "social-sync");
    }

    #[tokio::test]
    async fn test_round_trip_when_keyring_available() {
        // Headless CI hosts usually have no secret service; skip there.
        let store = KeyringSecureStore::with_service_name("social-sync-test");
        let key = "credentials:vk:990001";

        let _ = store.delete_secret(key).await;

        if let Err(e) = store.set_secret(key, b"token-value").await {
            println!("Keyring not available ({}), skipping test", e);
            return;
        }

        if let Ok(Some(value)) = store.get_secret(key).await {
            assert_eq!(value, b"token-value".to_vec());
            if let Ok(keys) = store.list_keys().await {
                assert!(keys.contains(&key.to_string()));
            }
        }

        let _ = store.delete_secret(key).await;
    }
}
