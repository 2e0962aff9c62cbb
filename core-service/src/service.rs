use crate::error::Result;
use crate::plugin::{PluginDependencies, PluginRegistry, SyncPlugin};
use core_images::ImageDownloadCache;
use core_runtime::events::EventStream;
use core_sync::{SyncHandle, SyncRequest};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Primary façade exposed to host applications.
///
/// Plugins are constructed on first use and kept for the lifetime of the
/// service, so concurrent requests for one scope meet the same active-run
/// guard.
#[derive(Clone)]
pub struct SyncService {
    registry: Arc<PluginRegistry>,
    deps: PluginDependencies,
    plugins: Arc<Mutex<HashMap<String, Arc<dyn SyncPlugin>>>>,
}

impl SyncService {
    pub fn new(registry: PluginRegistry, deps: PluginDependencies) -> Self {
        info!(plugins = ?registry.identifiers(), "Sync service ready");
        Self {
            registry: Arc::new(registry),
            deps,
            plugins: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Instance for `identifier`, created on first call.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownPlugin`](crate::CoreError::UnknownPlugin) if nothing
    /// is registered under `identifier`.
    pub fn plugin(&self, identifier: &str) -> Result<Arc<dyn SyncPlugin>> {
        let mut plugins = self.plugins.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(plugin) = plugins.get(identifier) {
            return Ok(Arc::clone(plugin));
        }

        let plugin = self.registry.create(identifier, &self.deps)?;
        debug!(identifier, "Constructed sync plugin");
        plugins.insert(identifier.to_string(), Arc::clone(&plugin));
        Ok(plugin)
    }

    pub async fn start(&self, identifier: &str, request: SyncRequest) -> Result<SyncHandle> {
        let plugin = self.plugin(identifier)?;
        plugin.start_sync(request).await
    }

    pub fn cancel(&self, identifier: &str, handle: &SyncHandle) -> Result<()> {
        self.plugin(identifier)?.cancel(handle);
        Ok(())
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.registry.identifiers()
    }

    pub fn image_cache(&self) -> &ImageDownloadCache {
        &self.deps.image_cache
    }

    pub fn dependencies(&self) -> &PluginDependencies {
        &self.deps
    }

    /// Stream of sync, auth and image events from now on.
    pub fn events(&self) -> EventStream {
        EventStream::new(self.deps.event_bus.subscribe())
    }
}
