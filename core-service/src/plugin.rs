//! Sync plugins and the registry that constructs them.
//!
//! A plugin is one `(provider, data type)` pair, identified as
//! `"<provider>-<data type>"`, e.g. `vk-contacts`. The registry maps those
//! identifiers to constructors so hosts can ask for plugins by name without
//! linking provider crates themselves.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use bridge_traits::http::HttpClient;
use bridge_traits::time::Clock;
use core_auth::CredentialProvider;
use core_images::ImageDownloadCache;
use core_runtime::config::SyncSettings;
use core_runtime::events::EventBus;
use core_sync::{
    CommitHook, DataType, LocalStore, PageSource, SyncAdaptorCore, SyncHandle, SyncRequest,
    SyncStateRepository,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Everything a plugin constructor may draw on.
#[derive(Clone)]
pub struct PluginDependencies {
    pub http_client: Arc<dyn HttpClient>,
    pub store: Arc<dyn LocalStore>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub state: Arc<dyn SyncStateRepository>,
    pub settings: SyncSettings,
    pub event_bus: EventBus,
    pub clock: Arc<dyn Clock>,
    /// Shared by every plugin of the process.
    pub image_cache: ImageDownloadCache,
}

#[async_trait]
pub trait SyncPlugin: Send + Sync {
    fn identifier(&self) -> &str;

    /// Start a run. The handle yields exactly one outcome.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PluginMismatch`] when the request targets a
    /// different provider or data type.
    async fn start_sync(&self, request: SyncRequest) -> Result<SyncHandle>;

    fn cancel(&self, handle: &SyncHandle);
}

/// `"<provider>-<data type>"`
pub fn plugin_identifier(provider: &str, data_type: DataType) -> String {
    format!("{}-{}", provider, data_type.as_str())
}

/// Plugin backed directly by a [`SyncAdaptorCore`].
pub struct AdaptorPlugin {
    identifier: String,
    core: SyncAdaptorCore,
}

impl AdaptorPlugin {
    pub fn new(source: Arc<dyn PageSource>, deps: &PluginDependencies) -> Self {
        let identifier = plugin_identifier(source.provider(), source.data_type());
        let core = SyncAdaptorCore::new(
            source,
            Arc::clone(&deps.store),
            Arc::clone(&deps.credentials),
            Arc::clone(&deps.state),
            deps.settings.clone(),
            deps.event_bus.clone(),
            Arc::clone(&deps.clock),
        );
        Self { identifier, core }
    }

    /// Attach work to every page this plugin's runs commit.
    pub fn with_commit_hook(mut self, hook: Arc<dyn CommitHook>) -> Self {
        self.core = self.core.with_commit_hook(hook);
        self
    }

    pub fn core(&self) -> &SyncAdaptorCore {
        &self.core
    }
}

#[async_trait]
impl SyncPlugin for AdaptorPlugin {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn start_sync(&self, request: SyncRequest) -> Result<SyncHandle> {
        if request.provider != self.core.provider() || request.data_type != self.core.data_type() {
            return Err(CoreError::PluginMismatch {
                plugin: self.identifier.clone(),
                provider: request.provider,
                data_type: request.data_type.as_str().to_string(),
            });
        }
        Ok(self.core.start_sync(request))
    }

    fn cancel(&self, handle: &SyncHandle) {
        self.core.cancel(handle);
    }
}

pub type PluginConstructor =
    Arc<dyn Fn(&PluginDependencies) -> Result<Arc<dyn SyncPlugin>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct PluginRegistry {
    constructors: HashMap<String, PluginConstructor>,
}

impl PluginRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every plugin compiled into this build.
    pub fn with_builtin() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(feature = "vk")]
        registry.constructors.insert(
            crate::vk::IDENTIFIER.to_string(),
            Arc::new(|deps: &PluginDependencies| {
                Ok(Arc::new(crate::vk::VkContactsPlugin::new(deps)) as Arc<dyn SyncPlugin>)
            }),
        );

        registry
    }

    /// # Errors
    ///
    /// Returns [`CoreError::DuplicatePlugin`] if `identifier` is taken.
    pub fn register<F>(&mut self, identifier: impl Into<String>, constructor: F) -> Result<()>
    where
        F: Fn(&PluginDependencies) -> Result<Arc<dyn SyncPlugin>> + Send + Sync + 'static,
    {
        let identifier = identifier.into();
        if self.constructors.contains_key(&identifier) {
            return Err(CoreError::DuplicatePlugin(identifier));
        }
        self.constructors.insert(identifier, Arc::new(constructor));
        Ok(())
    }

    pub fn create(&self, identifier: &str, deps: &PluginDependencies) -> Result<Arc<dyn SyncPlugin>> {
        let constructor = self
            .constructors
            .get(identifier)
            .ok_or_else(|| CoreError::UnknownPlugin(identifier.to_string()))?;
        constructor(deps)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.constructors.contains_key(identifier)
    }

    /// Registered identifiers, sorted.
    pub fn identifiers(&self) -> Vec<String> {
        let mut identifiers: Vec<String> = self.constructors.keys().cloned().collect();
        identifiers.sort();
        identifiers
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("identifiers", &self.identifiers())
            .finish()
    }
}
