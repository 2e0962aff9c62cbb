//! Contact avatars through the shared image cache.

use core_images::{ImageDownloadCache, ImageFetchKey};
use core_sync::{CommitHook, DataType, FollowUp, Record, RecordChange, SyncScope};
use futures::future::join_all;
use std::path::PathBuf;
use tracing::debug;

use crate::types::ContactRecord;
use crate::PROVIDER;

/// Result of one avatar download, keyed by contact id.
#[derive(Debug)]
pub struct AvatarDownload {
    pub remote_id: String,
    pub result: core_images::Result<PathBuf>,
}

/// Resolves VK contact avatars to local files.
///
/// Keys are `vk/Contacts/<friend id>`, so a friend who changes their photo
/// keeps the same local path.
#[derive(Clone)]
pub struct VkContactImageDownloader {
    cache: ImageDownloadCache,
}

impl VkContactImageDownloader {
    pub fn new(cache: ImageDownloadCache) -> Self {
        Self { cache }
    }

    pub fn key_for(&self, friend_id: &str, avatar_url: &str) -> ImageFetchKey {
        ImageFetchKey::new(PROVIDER, DataType::Contacts, friend_id, avatar_url)
    }

    pub async fn fetch_avatar(
        &self,
        friend_id: &str,
        avatar_url: &str,
    ) -> core_images::Result<PathBuf> {
        let key = self.key_for(friend_id, avatar_url);
        self.cache.request_image(&key, avatar_url).await
    }

    /// Download avatars for every upserted contact in `records` that has one.
    ///
    /// Records that are not contact payloads are skipped.
    pub async fn fetch_for_records(&self, records: &[Record]) -> Vec<AvatarDownload> {
        let contacts: Vec<ContactRecord> = records.iter().filter_map(contact_with_avatar).collect();

        let downloads = contacts.iter().filter_map(|contact| {
            contact.avatar_url.as_deref().map(|url| async move {
                AvatarDownload {
                    remote_id: contact.remote_id.clone(),
                    result: self.fetch_avatar(&contact.remote_id, url).await,
                }
            })
        });

        let results = join_all(downloads).await;
        debug!(requested = results.len(), "Fetched contact avatars");
        results
    }
}

/// Live contact payload carrying an avatar URL.
fn contact_with_avatar(record: &Record) -> Option<ContactRecord> {
    let RecordChange::Upsert(payload) = &record.change else {
        return None;
    };
    serde_json::from_value::<ContactRecord>(payload.clone())
        .ok()
        .filter(|contact| !contact.deleted && contact.avatar_url.is_some())
}

/// Queues avatar downloads for every committed contacts page. The sync run
/// owns the downloads, so cancelling it releases only its own waiters.
impl CommitHook for VkContactImageDownloader {
    fn after_commit(&self, scope: &SyncScope, records: &[Record]) -> Option<FollowUp> {
        let wanted: Vec<Record> = records
            .iter()
            .filter(|record| contact_with_avatar(record).is_some())
            .cloned()
            .collect();
        if wanted.is_empty() {
            return None;
        }

        let downloader = self.clone();
        let scope = scope.to_string();
        Some(Box::pin(async move {
            let downloads = downloader.fetch_for_records(&wanted).await;
            let failed = downloads.iter().filter(|d| d.result.is_err()).count();
            debug!(
                scope = %scope,
                fetched = downloads.len() - failed,
                failed,
                "Avatars for committed page"
            );
        }))
    }
}
