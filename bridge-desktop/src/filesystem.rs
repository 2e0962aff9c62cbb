//! File System Access Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::FileSystemAccess,
};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const APP_DIR_NAME: &str = "social-sync";

/// Tokio-based file system implementation
///
/// Cache and data roots default to the platform directories reported by
/// `dirs`, each with a `social-sync` subdirectory.
pub struct TokioFileSystem {
    cache_dir: PathBuf,
    data_dir: PathBuf,
}

impl TokioFileSystem {
    pub fn new() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR_NAME);

        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".local")
                    .join("share")
            })
            .join(APP_DIR_NAME);

        Self {
            cache_dir,
            data_dir,
        }
    }

    pub fn with_directories(cache_dir: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            data_dir,
        }
    }

    async fn ensure_dir(path: &Path) -> Result<()> {
        if !fs::try_exists(path).await.map_err(BridgeError::Io)? {
            fs::create_dir_all(path).await.map_err(BridgeError::Io)?;
            debug!(path = ?path, "Created directory");
        }
        Ok(())
    }
}

impl Default for TokioFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn get_cache_directory(&self) -> Result<PathBuf> {
        Self::ensure_dir(&self.cache_dir).await?;
        Ok(self.cache_dir.clone())
    }

    async fn get_data_directory(&self) -> Result<PathBuf> {
        Self::ensure_dir(&self.data_dir).await?;
        Ok(self.data_dir.clone())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        fs::try_exists(path).await.map_err(BridgeError::Io)
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).await.map_err(BridgeError::Io)
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        let data = fs::read(path).await.map_err(BridgeError::Io)?;
        debug!(path = ?path, size = data.len(), "Read file");
        Ok(Bytes::from(data))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(BridgeError::Io)?;
        }

        fs::write(path, data.as_ref())
            .await
            .map_err(BridgeError::Io)?;
        debug!(path = ?path, size = data.len(), "Wrote file");
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await.map_err(BridgeError::Io)?;
        }
        fs::rename(from, to).await.map_err(BridgeError::Io)
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = ?path, "Deleted file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }

    async fn delete_dir_all(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path).await {
            Ok(()) => {
                debug!(path = ?path, "Deleted directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(path).await.map_err(BridgeError::Io)?;

        while let Some(entry) = read_dir.next_entry().await.map_err(BridgeError::Io)? {
            entries.push(entry.path());
        }

        Ok(entries)
    }
}
