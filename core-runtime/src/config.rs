//! # Core Configuration Module
//!
//! Builder-based configuration for the sync core.
//!
//! ## Required Dependencies
//!
//! - `HttpClient` - provider page fetches and image downloads
//! - `FileSystemAccess` - image cache writes
//! - `SecureStore` - account credentials
//!
//! With the `desktop-shims` feature enabled, missing bridges are filled in
//! from `bridge-desktop`. Without it, `build()` fails with
//! [`Error::CapabilityMissing`] naming the bridge to inject.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, SyncSettings};
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/sync.db")
//!     .cache_dir("/path/to/cache")
//!     .sync_settings(SyncSettings::default().with_min_resync_interval(Duration::from_secs(600)))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{FileSystemAccess, HttpClient, SecureStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for `max_retry_attempts`.
pub const MAX_RETRY_ATTEMPTS_LIMIT: u32 = 10;

/// Upper bound for `page_size`.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Tuning for sync runs and image fetches.
///
/// Defaults: 3 attempts, 1 s base backoff doubling up to 60 s, provider
/// `Retry-After` hints honored up to 15 minutes, 15 minute minimum resync
/// interval, 100 records per page, 30 s per request and a one hour ceiling
/// for a whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Attempts per page fetch, including the first one
    pub max_retry_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Longest provider `Retry-After` hint worth waiting for; longer hints
    /// fail the page as rate limited
    pub max_retry_after: Duration,
    /// Runs starting sooner than this after the last success are rejected
    pub min_resync_interval: Duration,
    pub page_size: u32,
    pub request_timeout: Duration,
    pub run_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            max_retry_after: Duration::from_secs(15 * 60),
            min_resync_interval: Duration::from_secs(15 * 60),
            page_size: 100,
            request_timeout: Duration::from_secs(30),
            run_timeout: Duration::from_secs(60 * 60),
        }
    }
}

impl SyncSettings {
    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self
    }

    pub fn with_max_retry_after(mut self, ceiling: Duration) -> Self {
        self.max_retry_after = ceiling;
        self
    }

    pub fn with_min_resync_interval(mut self, interval: Duration) -> Self {
        self.min_resync_interval = interval;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_retry_attempts == 0 || self.max_retry_attempts > MAX_RETRY_ATTEMPTS_LIMIT {
            return Err(Error::Config(format!(
                "max_retry_attempts must be between 1 and {} (got {})",
                MAX_RETRY_ATTEMPTS_LIMIT, self.max_retry_attempts
            )));
        }

        if self.base_backoff.is_zero() {
            return Err(Error::Config(
                "base_backoff must be greater than zero".to_string(),
            ));
        }

        if self.max_backoff < self.base_backoff {
            return Err(Error::Config(format!(
                "max_backoff ({:?}) must not be shorter than base_backoff ({:?})",
                self.max_backoff, self.base_backoff
            )));
        }

        if self.max_retry_after.is_zero() {
            return Err(Error::Config(
                "max_retry_after must be greater than zero".to_string(),
            ));
        }

        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::Config(format!(
                "page_size must be between 1 and {} (got {})",
                MAX_PAGE_SIZE, self.page_size
            )));
        }

        if self.request_timeout.is_zero() {
            return Err(Error::Config(
                "request_timeout must be greater than zero".to_string(),
            ));
        }

        if self.run_timeout < self.request_timeout {
            return Err(Error::Config(
                "run_timeout must be at least as long as request_timeout".to_string(),
            ));
        }

        Ok(())
    }
}

/// Core configuration. Construct with [`CoreConfig::builder`].
#[derive(Clone)]
pub struct CoreConfig {
    /// SQLite database holding synced records and run history
    pub database_path: PathBuf,

    /// Root directory of the image download cache
    pub cache_dir: PathBuf,

    pub http_client: Arc<dyn HttpClient>,
    pub file_system: Arc<dyn FileSystemAccess>,
    pub secure_store: Arc<dyn SecureStore>,

    pub sync_settings: SyncSettings,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("cache_dir", &self.cache_dir)
            .field("http_client", &"<dyn HttpClient>")
            .field("file_system", &"<dyn FileSystemAccess>")
            .field("secure_store", &"<dyn SecureStore>")
            .field("sync_settings", &self.sync_settings)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("Cache directory cannot be empty".to_string()));
        }

        self.sync_settings.validate()
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client(timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    let client = bridge_desktop::ReqwestHttpClient::with_timeout(timeout)
        .map_err(|e| Error::BridgeInit {
            bridge: "ReqwestHttpClient",
            message: e.to_string(),
        })?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client(_timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "An HttpClient is required for provider requests and image downloads. \
                 Desktop: enable the 'desktop-shims' feature to use ReqwestHttpClient. \
                 Mobile: inject the platform networking adapter."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system(cache_dir: &std::path::Path) -> Result<Arc<dyn FileSystemAccess>> {
    let data_dir = cache_dir
        .parent()
        .map(|parent| parent.join("data"))
        .unwrap_or_else(|| cache_dir.join("data"));
    Ok(Arc::new(bridge_desktop::TokioFileSystem::with_directories(
        cache_dir.to_path_buf(),
        data_dir,
    )))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system(
    _cache_dir: &std::path::Path,
) -> Result<Arc<dyn FileSystemAccess>> {
    Err(Error::CapabilityMissing {
        capability: "FileSystemAccess".to_string(),
        message: "FileSystemAccess is required for the image cache. \
                 Desktop: enable the 'desktop-shims' feature to use TokioFileSystem. \
                 Mobile: inject a sandboxed file system adapter."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Ok(Arc::new(bridge_desktop::KeyringSecureStore::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Err(Error::CapabilityMissing {
        capability: "SecureStore".to_string(),
        message: "SecureStore is required to read account credentials. \
                 Desktop: enable the 'desktop-shims' feature to use KeyringSecureStore. \
                 Mobile: inject Keychain/Keystore backed storage."
            .to_string(),
    })
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    sync_settings: Option<SyncSettings>,
}

impl CoreConfigBuilder {
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    pub fn sync_settings(mut self, settings: SyncSettings) -> Self {
        self.sync_settings = Some(settings);
        self
    }

    /// Validate and build the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when a path is missing or a setting is out of range
    /// - [`Error::CapabilityMissing`] when a bridge is missing and no desktop
    ///   default is available
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let cache_dir = self.cache_dir.ok_or_else(|| {
            Error::Config("Cache directory is required. Use .cache_dir() to set it.".to_string())
        })?;

        let sync_settings = self.sync_settings.unwrap_or_default();
        sync_settings.validate()?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client(sync_settings.request_timeout)?,
        };

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system(&cache_dir)?,
        };

        let secure_store = match self.secure_store {
            Some(store) => store,
            None => provide_default_secure_store()?,
        };

        let config = CoreConfig {
            database_path,
            cache_dir,
            http_client,
            file_system,
            secure_store,
            sync_settings,
        };

        config.validate()?;
        Ok(config)
    }
}
