//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, filesystem,
//! secure storage) into the sync engine, the shared image cache and the
//! registered provider plugins. Desktop apps typically enable the
//! `desktop-shims` feature (which depends on `bridge-desktop`) and call
//! [`bootstrap_desktop`]; other hosts build a [`CoreConfig`] with their own
//! bridges and call [`bootstrap`].

pub mod error;
pub mod plugin;
pub mod service;
#[cfg(feature = "vk")]
pub mod vk;

pub use error::{CoreError, Result};
pub use plugin::{
    plugin_identifier, AdaptorPlugin, PluginConstructor, PluginDependencies, PluginRegistry,
    SyncPlugin,
};
pub use service::SyncService;
#[cfg(feature = "vk")]
pub use vk::VkContactsPlugin;

pub use core_runtime::config::{CoreConfig, CoreConfigBuilder};

use bridge_traits::time::SystemClock;
use core_auth::{StoredCredentialProvider, TokenStore};
use core_images::ImageDownloadCache;
use core_runtime::events::EventBus;
use core_sync::db::{create_pool, DatabaseConfig};
use core_sync::{SqliteLocalStore, SqliteSyncStateRepository};
use std::sync::Arc;
use tracing::info;

/// Open storage, build the shared cache and return a service with every
/// built-in plugin registered.
///
/// # Errors
///
/// Fails if the configuration is invalid or the database cannot be opened.
pub async fn bootstrap(config: CoreConfig) -> Result<SyncService> {
    config.validate()?;
    info!(
        database = %config.database_path.display(),
        cache_dir = %config.cache_dir.display(),
        "Bootstrapping sync service"
    );

    let pool = create_pool(DatabaseConfig::new(config.database_path.clone())).await?;
    let event_bus = EventBus::default();

    let image_cache = ImageDownloadCache::new(
        Arc::clone(&config.http_client),
        Arc::clone(&config.file_system),
        config.cache_dir.clone(),
    )
    .with_request_timeout(config.sync_settings.request_timeout)
    .with_event_bus(event_bus.clone());

    let credentials = StoredCredentialProvider::new(TokenStore::new(Arc::clone(
        &config.secure_store,
    )));

    let deps = PluginDependencies {
        http_client: Arc::clone(&config.http_client),
        store: Arc::new(SqliteLocalStore::new(pool.clone())),
        credentials: Arc::new(credentials),
        state: Arc::new(SqliteSyncStateRepository::new(pool)),
        settings: config.sync_settings.clone(),
        event_bus,
        clock: Arc::new(SystemClock),
        image_cache,
    };

    Ok(SyncService::new(PluginRegistry::with_builtin(), deps))
}

/// Convenience bootstrapper for desktop hosts.
///
/// Bridges left unset on `builder` are filled from `bridge-desktop`.
///
/// ```no_run
/// # async fn example() -> anyhow::Result<()> {
/// use core_service::{bootstrap_desktop, CoreConfig};
///
/// let service = bootstrap_desktop(
///     CoreConfig::builder()
///         .database_path("/home/me/.local/share/social-sync/sync.db")
///         .cache_dir("/home/me/.cache/social-sync/images"),
/// )
/// .await?;
/// assert!(service.identifiers().contains(&"vk-contacts".to_string()));
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop(builder: CoreConfigBuilder) -> anyhow::Result<SyncService> {
    use anyhow::Context;

    let config = builder
        .build()
        .context("Failed to build desktop configuration")?;
    let service = bootstrap(config)
        .await
        .context("Failed to bootstrap sync service")?;
    Ok(service)
}
