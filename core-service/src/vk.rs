//! VK contacts plugin.

use crate::error::Result;
use crate::plugin::{AdaptorPlugin, PluginDependencies, SyncPlugin};
use async_trait::async_trait;
use core_sync::{SyncHandle, SyncRequest};
use provider_vk::{VkContactImageDownloader, VkContactsSource};
use std::sync::Arc;

pub const IDENTIFIER: &str = "vk-contacts";

/// Contacts sync for VK. Avatars of each committed page are downloaded
/// through the shared cache before the run completes.
pub struct VkContactsPlugin {
    inner: AdaptorPlugin,
    avatars: VkContactImageDownloader,
}

impl VkContactsPlugin {
    pub fn new(deps: &PluginDependencies) -> Self {
        let source = Arc::new(VkContactsSource::new(Arc::clone(&deps.http_client)));
        let avatars = VkContactImageDownloader::new(deps.image_cache.clone());
        Self {
            inner: AdaptorPlugin::new(source, deps).with_commit_hook(Arc::new(avatars.clone())),
            avatars,
        }
    }

    pub fn avatars(&self) -> &VkContactImageDownloader {
        &self.avatars
    }
}

#[async_trait]
impl SyncPlugin for VkContactsPlugin {
    fn identifier(&self) -> &str {
        self.inner.identifier()
    }

    async fn start_sync(&self, request: SyncRequest) -> Result<SyncHandle> {
        self.inner.start_sync(request).await
    }

    fn cancel(&self, handle: &SyncHandle) {
        self.inner.cancel(handle);
    }
}
