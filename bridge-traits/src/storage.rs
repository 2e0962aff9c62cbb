//! Storage and File System Abstractions
//!
//! File access for the image cache and secure credential storage for
//! account tokens.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// File system access trait
///
/// The image cache writes every payload through this trait, so hosts with a
/// sandboxed filesystem only need to provide the operations below.
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Application cache directory. Contents may be purged by the OS.
    async fn get_cache_directory(&self) -> Result<PathBuf>;

    /// Application data directory for persistent state.
    async fn get_data_directory(&self) -> Result<PathBuf>;

    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Create a directory and all parent directories if they don't exist
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Write data to a file, creating parent directories as needed
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Atomically move `from` over `to`
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// Delete a directory and all its contents
    async fn delete_dir_all(&self, path: &Path) -> Result<()>;

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;
}

/// Secure credential storage trait
///
/// Backed by the OS keychain on desktop. Implementations must never log
/// secret values.
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Store a secret value, replacing any previous one
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Retrieve a secret value. Returns `Ok(None)` if the key doesn't exist.
    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn delete_secret(&self, key: &str) -> Result<()>;

    async fn has_secret(&self, key: &str) -> Result<bool> {
        Ok(self.get_secret(key).await?.is_some())
    }

    /// List all secret keys (without values)
    async fn list_keys(&self) -> Result<Vec<String>>;
}
