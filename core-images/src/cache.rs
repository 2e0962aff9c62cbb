//! # Image Download Cache
//!
//! Shared, single-flight cache for provider images (avatars, thumbnails).
//!
//! - One fetch per key at a time; concurrent requesters attach to it
//! - Fetches run in spawned tasks, outside the entry lock
//! - Semaphore-based throttling of concurrent downloads
//! - Completed files land on a path derived from
//!   `(provider, data_type, identifier)`, never from the URL
//! - 404/410 failures are sticky, everything else is retried on the next
//!   request
//!
//! ## Waiter accounting
//!
//! Every caller awaiting a fetch holds a waiter slot on the entry. Dropping
//! the `request_image` future releases the slot; when the last slot goes,
//! the fetch task is aborted and the entry removed, so a later request
//! starts from scratch. A sync run that is cancelled therefore never kills
//! a download another run is still waiting on.

use crate::error::{ImageCacheError, Result};
use crate::key::{ImageFetchKey, IMAGE_EXTENSION};
use bridge_traits::http::{HttpClient, HttpRequest};
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::BridgeError;
use core_runtime::events::{CoreEvent, EventBus, ImageEvent};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::AbortHandle;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 4;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Diagnostic view of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FetchState {
    /// Waiting for a download slot.
    Pending,
    InFlight,
    Complete,
    Failed { status: Option<u16>, sticky: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub state: FetchState,
    pub waiters: usize,
}

type FetchResult = Result<PathBuf>;
type Entries = Arc<Mutex<HashMap<ImageFetchKey, Slot>>>;

enum Slot {
    Fetching(Flight),
    Complete(PathBuf),
    Failed(ImageCacheError),
}

struct Flight {
    /// Distinguishes this fetch from a later one for the same key.
    generation: u64,
    receiver: watch::Receiver<Option<FetchResult>>,
    waiters: usize,
    started: Arc<AtomicBool>,
    task: AbortHandle,
}

fn lock(entries: &Mutex<HashMap<ImageFetchKey, Slot>>) -> MutexGuard<'_, HashMap<ImageFetchKey, Slot>> {
    entries.lock().unwrap_or_else(|e| e.into_inner())
}

fn storage_error(err: BridgeError) -> ImageCacheError {
    ImageCacheError::Storage(err.to_string())
}

/// Process-wide image cache shared by all sync adaptors.
///
/// Cheap to clone; clones share the same entries.
#[derive(Clone)]
pub struct ImageDownloadCache {
    http_client: Arc<dyn HttpClient>,
    fs: Arc<dyn FileSystemAccess>,
    cache_root: PathBuf,
    request_timeout: Duration,
    event_bus: Option<EventBus>,
    fetch_semaphore: Arc<Semaphore>,
    entries: Entries,
    next_generation: Arc<AtomicU64>,
}

impl ImageDownloadCache {
    /// Create a cache writing below `cache_root`.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use core_images::{ImageDownloadCache, ImageFetchKey};
    /// use core_sync::DataType;
    ///
    /// let cache = ImageDownloadCache::new(http_client, file_system, "/var/cache/social-sync/images")
    ///     .with_max_concurrent_fetches(8);
    ///
    /// let url = "https://sun9-1.userapi.com/avatar.jpg";
    /// let key = ImageFetchKey::new("vk", DataType::Contacts, "42", url);
    /// let path = cache.request_image(&key, url).await?;
    /// ```
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        fs: Arc<dyn FileSystemAccess>,
        cache_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            http_client,
            fs,
            cache_root: cache_root.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            event_bus: None,
            fetch_semaphore: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_FETCHES)),
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn with_max_concurrent_fetches(mut self, max: usize) -> Self {
        self.fetch_semaphore = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Set event bus for download events.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Where the image for `key` lives once complete.
    pub fn output_path(&self, key: &ImageFetchKey) -> PathBuf {
        key.output_path(&self.cache_root)
    }

    /// Resolve `key` to a local file, fetching `source_url` if needed.
    ///
    /// Complete entries resolve immediately. Running fetches are joined
    /// rather than duplicated. Sticky failures are returned as stored;
    /// any other failure triggers a new fetch.
    ///
    /// # Errors
    ///
    /// Returns the fetch error shared by every waiter of the same fetch, or
    /// [`ImageCacheError::Aborted`] if the fetch was torn down by
    /// [`clear`](Self::clear) or [`evict`](Self::evict).
    #[instrument(skip(self, source_url), fields(key = %key))]
    pub async fn request_image(&self, key: &ImageFetchKey, source_url: &str) -> Result<PathBuf> {
        let (generation, mut receiver) = {
            let mut entries = lock(&self.entries);
            match entries.get_mut(key) {
                Some(Slot::Complete(path)) => return Ok(path.clone()),
                Some(Slot::Failed(error)) if error.is_sticky() => {
                    debug!(status = ?error.status(), "Returning sticky failure");
                    return Err(error.clone());
                }
                Some(Slot::Fetching(flight)) => {
                    flight.waiters += 1;
                    debug!(waiters = flight.waiters, "Attached to running fetch");
                    (flight.generation, flight.receiver.clone())
                }
                _ => {
                    let flight = self.spawn_fetch(key.clone(), source_url.to_string());
                    let attached = (flight.generation, flight.receiver.clone());
                    entries.insert(key.clone(), Slot::Fetching(flight));
                    attached
                }
            }
        };

        let guard = WaiterGuard {
            entries: Arc::clone(&self.entries),
            key: key.clone(),
            generation,
        };

        let published = match receiver.wait_for(Option::is_some).await {
            Ok(result) => result.clone(),
            Err(_) => None,
        };
        drop(guard);

        match published {
            Some(result) => result,
            None => {
                // Sender gone without a result: the task was aborted or
                // panicked.
                self.discard_flight(key, generation);
                Err(ImageCacheError::Aborted)
            }
        }
    }

    /// Current entry for `key`, if any.
    pub fn entry(&self, key: &ImageFetchKey) -> Option<CacheEntry> {
        let entries = lock(&self.entries);
        entries.get(key).map(|slot| {
            let (state, waiters) = match slot {
                Slot::Fetching(flight) if flight.started.load(Ordering::Acquire) => {
                    (FetchState::InFlight, flight.waiters)
                }
                Slot::Fetching(flight) => (FetchState::Pending, flight.waiters),
                Slot::Complete(_) => (FetchState::Complete, 0),
                Slot::Failed(error) => (
                    FetchState::Failed {
                        status: error.status(),
                        sticky: error.is_sticky(),
                    },
                    0,
                ),
            };
            CacheEntry {
                path: self.output_path(key),
                state,
                waiters,
            }
        })
    }

    pub fn state(&self, key: &ImageFetchKey) -> Option<FetchState> {
        self.entry(key).map(|entry| entry.state)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry sharing `key`'s output path and delete the file.
    ///
    /// Returns whether any entry was removed.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn evict(&self, key: &ImageFetchKey) -> Result<bool> {
        let removed = {
            let mut entries = lock(&self.entries);
            let before = entries.len();
            entries.retain(|existing, slot| {
                let same_target = existing.provider == key.provider
                    && existing.data_type == key.data_type
                    && existing.identifier == key.identifier;
                if same_target {
                    if let Slot::Fetching(flight) = slot {
                        flight.task.abort();
                    }
                }
                !same_target
            });
            before - entries.len()
        };

        let path = self.output_path(key);
        if self.fs.exists(&path).await.map_err(storage_error)? {
            self.fs.delete_file(&path).await.map_err(storage_error)?;
        }

        debug!(removed, "Evicted image");
        Ok(removed > 0)
    }

    /// Remove all entries, abort running fetches and delete the cache root.
    ///
    /// Returns the number of entries that were dropped.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<usize> {
        let cleared = {
            let mut entries = lock(&self.entries);
            for slot in entries.values() {
                if let Slot::Fetching(flight) = slot {
                    flight.task.abort();
                }
            }
            let count = entries.len();
            entries.clear();
            count
        };

        if self.fs.exists(&self.cache_root).await.map_err(storage_error)? {
            self.fs
                .delete_dir_all(&self.cache_root)
                .await
                .map_err(storage_error)?;
        }

        info!(cleared, "Cleared image cache");
        Ok(cleared)
    }

    fn spawn_fetch(&self, key: ImageFetchKey, source_url: String) -> Flight {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = watch::channel(None);
        let started = Arc::new(AtomicBool::new(false));

        let cache = self.clone();
        let task_started = Arc::clone(&started);
        let handle = tokio::spawn(async move {
            cache
                .run_fetch(key, source_url, generation, task_started, sender)
                .await;
        });

        Flight {
            generation,
            receiver,
            waiters: 1,
            started,
            task: handle.abort_handle(),
        }
    }

    async fn run_fetch(
        self,
        key: ImageFetchKey,
        source_url: String,
        generation: u64,
        started: Arc<AtomicBool>,
        sender: watch::Sender<Option<FetchResult>>,
    ) {
        let result = match self.fetch_semaphore.acquire().await {
            Ok(_permit) => {
                started.store(true, Ordering::Release);
                self.download(&key, &source_url, generation).await
            }
            Err(_) => Err(ImageCacheError::Aborted),
        };

        // Settle the entry before waking waiters so they observe the final
        // state.
        {
            let mut entries = lock(&self.entries);
            let current = matches!(
                entries.get(&key),
                Some(Slot::Fetching(flight)) if flight.generation == generation
            );
            if current {
                let slot = match &result {
                    Ok((path, _)) => Slot::Complete(path.clone()),
                    Err(error) => Slot::Failed(error.clone()),
                };
                entries.insert(key.clone(), slot);
            }
        }

        match &result {
            Ok((path, bytes)) => {
                info!(key = %key, path = %path.display(), bytes, "Image downloaded");
                self.emit(ImageEvent::Downloaded {
                    provider: key.provider.clone(),
                    identifier: key.identifier.clone(),
                    bytes: *bytes,
                });
            }
            Err(error) => {
                warn!(key = %key, error = %error, sticky = error.is_sticky(), "Image download failed");
                self.emit(ImageEvent::Failed {
                    provider: key.provider.clone(),
                    identifier: key.identifier.clone(),
                    status: error.status(),
                    sticky: error.is_sticky(),
                });
            }
        }

        sender.send_replace(Some(result.map(|(path, _)| path)));
    }

    async fn download(
        &self,
        key: &ImageFetchKey,
        source_url: &str,
        generation: u64,
    ) -> Result<(PathBuf, u64)> {
        debug!(key = %key, "Fetching image");

        let request = HttpRequest::get(source_url).timeout(self.request_timeout);
        let response = match timeout(self.request_timeout, self.http_client.execute(request)).await
        {
            Ok(response) => response.map_err(|e| ImageCacheError::Network(e.to_string()))?,
            Err(_) => {
                return Err(ImageCacheError::Network(format!(
                    "request timed out after {}s",
                    self.request_timeout.as_secs()
                )))
            }
        };

        if !response.is_success() {
            return Err(ImageCacheError::from_status(response.status));
        }

        let path = self.output_path(key);
        if let Some(parent) = path.parent() {
            self.fs.create_dir_all(parent).await.map_err(storage_error)?;
        }

        // Write next to the target and rename, so readers never see a
        // truncated image.
        let partial = PartialFile {
            fs: Arc::clone(&self.fs),
            path: path.with_extension(format!("{}.part-{}", IMAGE_EXTENSION, generation)),
            armed: true,
        };
        let bytes = response.body.len() as u64;
        self.fs
            .write_file(&partial.path, response.body)
            .await
            .map_err(storage_error)?;
        self.fs
            .rename(&partial.path, &path)
            .await
            .map_err(storage_error)?;
        partial.keep();

        Ok((path, bytes))
    }

    fn discard_flight(&self, key: &ImageFetchKey, generation: u64) {
        let mut entries = lock(&self.entries);
        let stale = matches!(
            entries.get(key),
            Some(Slot::Fetching(flight)) if flight.generation == generation
        );
        if stale {
            entries.remove(key);
        }
    }

    fn emit(&self, event: ImageEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Image(event)).ok();
        }
    }
}

/// Temporary download file, removed unless [`keep`](Self::keep) is called.
///
/// The fetch task can be aborted at any await point, so cleanup lives in
/// `Drop` and is handed to the runtime.
struct PartialFile {
    fs: Arc<dyn FileSystemAccess>,
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    /// The file was renamed into place; nothing left to clean up.
    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let fs = Arc::clone(&self.fs);
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    match fs.delete_file(&path).await {
                        Ok(()) => debug!(path = %path.display(), "Removed partial image"),
                        Err(e) => {
                            debug!(path = %path.display(), error = %e, "Partial image not removed")
                        }
                    }
                });
            }
            Err(_) => warn!(path = %path.display(), "No runtime to remove partial image"),
        }
    }
}

/// Releases a waiter slot when the awaiting future completes or is dropped.
struct WaiterGuard {
    entries: Entries,
    key: ImageFetchKey,
    generation: u64,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        let mut entries = lock(&self.entries);
        let abandoned = match entries.get_mut(&self.key) {
            Some(Slot::Fetching(flight)) if flight.generation == self.generation => {
                flight.waiters = flight.waiters.saturating_sub(1);
                flight.waiters == 0
            }
            _ => false,
        };

        if abandoned {
            if let Some(Slot::Fetching(flight)) = entries.remove(&self.key) {
                flight.task.abort();
                debug!(key = %self.key, "Last waiter gone, fetch aborted");
            }
        }
    }
}
