//! Concurrency and failure-handling tests for the shared image cache.

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::BridgeError;
use bytes::Bytes;
use core_images::{FetchState, ImageCacheError, ImageDownloadCache, ImageFetchKey};
use core_sync::DataType;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

const AVATAR_URL: &str = "https://sun9-1.userapi.com/c42/avatar.jpg";

// ============================================================================
// Fakes
// ============================================================================

/// Image host whose responses are held back until the gate opens.
///
/// Each call pops the next scripted status (200 once the script runs out)
/// and echoes the URL back as the body.
struct FakeImageHost {
    calls: AtomicUsize,
    gate: Semaphore,
    statuses: Mutex<VecDeque<u16>>,
}

impl FakeImageHost {
    fn open() -> Arc<Self> {
        let host = Self::closed();
        host.release();
        host
    }

    fn closed() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(0),
            statuses: Mutex::new(VecDeque::new()),
        })
    }

    fn script(self: Arc<Self>, statuses: &[u16]) -> Arc<Self> {
        self.statuses.lock().unwrap().extend(statuses.iter().copied());
        self
    }

    fn release(&self) {
        self.gate.add_permits(1_000);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for FakeImageHost {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| BridgeError::Connection("gate closed".into()))?;

        let status = self.statuses.lock().unwrap().pop_front().unwrap_or(200);
        Ok(HttpResponse::new(status, Bytes::from(request.url.into_bytes())))
    }
}

#[derive(Default)]
struct MemoryFileSystem {
    files: Mutex<HashMap<PathBuf, Bytes>>,
    /// Renames never finish, leaving the written temp file in place.
    stall_renames: AtomicBool,
}

impl MemoryFileSystem {
    fn stall_renames(&self) {
        self.stall_renames.store(true, Ordering::SeqCst);
    }

    fn content(&self, path: &Path) -> Option<Bytes> {
        self.files.lock().unwrap().get(path).cloned()
    }

    fn file_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }
}

#[async_trait]
impl FileSystemAccess for MemoryFileSystem {
    async fn get_cache_directory(&self) -> BridgeResult<PathBuf> {
        Ok(PathBuf::from("/cache"))
    }

    async fn get_data_directory(&self) -> BridgeResult<PathBuf> {
        Ok(PathBuf::from("/data"))
    }

    async fn exists(&self, path: &Path) -> BridgeResult<bool> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .keys()
            .any(|file| file.starts_with(path)))
    }

    async fn create_dir_all(&self, _path: &Path) -> BridgeResult<()> {
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> BridgeResult<Bytes> {
        self.content(path)
            .ok_or_else(|| BridgeError::OperationFailed(format!("{} missing", path.display())))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> BridgeResult<()> {
        self.files.lock().unwrap().insert(path.to_path_buf(), data);
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> BridgeResult<()> {
        if self.stall_renames.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let mut files = self.files.lock().unwrap();
        let data = files
            .remove(from)
            .ok_or_else(|| BridgeError::OperationFailed(format!("{} missing", from.display())))?;
        files.insert(to.to_path_buf(), data);
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> BridgeResult<()> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }

    async fn delete_dir_all(&self, path: &Path) -> BridgeResult<()> {
        self.files
            .lock()
            .unwrap()
            .retain(|file, _| !file.starts_with(path));
        Ok(())
    }

    async fn list_directory(&self, _path: &Path) -> BridgeResult<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn setup(host: Arc<FakeImageHost>) -> (ImageDownloadCache, Arc<MemoryFileSystem>) {
    let fs = Arc::new(MemoryFileSystem::default());
    let cache = ImageDownloadCache::new(host, fs.clone(), "/cache/images");
    (cache, fs)
}

fn contact_key(identifier: &str, url: &str) -> ImageFetchKey {
    ImageFetchKey::new("vk", DataType::Contacts, identifier, url)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

// ============================================================================
// Single flight
// ============================================================================

#[tokio::test]
async fn test_concurrent_requests_share_one_fetch() {
    let host = FakeImageHost::closed();
    let (cache, _fs) = setup(host.clone());
    let key = contact_key("42", AVATAR_URL);

    let opener = async {
        wait_until(|| cache.entry(&key).map(|entry| entry.waiters) == Some(5)).await;
        host.release();
    };

    let (_, a, b, c, d, e) = tokio::join!(
        opener,
        cache.request_image(&key, AVATAR_URL),
        cache.request_image(&key, AVATAR_URL),
        cache.request_image(&key, AVATAR_URL),
        cache.request_image(&key, AVATAR_URL),
        cache.request_image(&key, AVATAR_URL),
    );

    let path = a.unwrap();
    for other in [b, c, d, e] {
        assert_eq!(other.unwrap(), path);
    }
    assert_eq!(host.calls(), 1);
    assert_eq!(cache.state(&key), Some(FetchState::Complete));
}

#[tokio::test]
async fn test_vk_contact_example() {
    let host = FakeImageHost::open();
    let (cache, fs) = setup(host.clone());
    let key = contact_key("42", AVATAR_URL);

    let (first, second) = tokio::join!(
        cache.request_image(&key, AVATAR_URL),
        cache.request_image(&key, AVATAR_URL),
    );
    let first = first.unwrap();

    assert_eq!(first, second.unwrap());
    assert_eq!(host.calls(), 1);
    assert!(first.starts_with("/cache/images/vk/Contacts"));
    assert_eq!(first, key.output_path(Path::new("/cache/images")));
    assert_eq!(fs.content(&first), Some(Bytes::from(AVATAR_URL)));
}

#[tokio::test]
async fn test_output_path_independent_of_url() {
    let host = FakeImageHost::open();
    let (cache, fs) = setup(host.clone());
    let old_url = "https://sun9-1.userapi.com/old.jpg";
    let new_url = "https://sun9-2.userapi.com/new.jpg";

    let old_path = cache
        .request_image(&contact_key("42", old_url), old_url)
        .await
        .unwrap();
    let new_path = cache
        .request_image(&contact_key("42", new_url), new_url)
        .await
        .unwrap();

    assert_eq!(old_path, new_path);
    assert_eq!(host.calls(), 2);
    assert_eq!(fs.file_count(), 1);
    assert_eq!(fs.content(&new_path), Some(Bytes::from(new_url)));
}

#[tokio::test]
async fn test_throttled_fetch_reports_pending() {
    let host = FakeImageHost::closed();
    let fs = Arc::new(MemoryFileSystem::default());
    let cache =
        ImageDownloadCache::new(host.clone(), fs, "/cache/images").with_max_concurrent_fetches(1);
    let first = contact_key("1", "https://img/1.jpg");
    let second = contact_key("2", "https://img/2.jpg");

    let waiter_one = tokio::spawn({
        let (cache, key) = (cache.clone(), first.clone());
        async move { cache.request_image(&key, "https://img/1.jpg").await }
    });
    let waiter_two = tokio::spawn({
        let (cache, key) = (cache.clone(), second.clone());
        async move { cache.request_image(&key, "https://img/2.jpg").await }
    });

    wait_until(|| host.calls() == 1 && cache.len() == 2).await;
    assert_eq!(cache.state(&first), Some(FetchState::InFlight));
    assert_eq!(cache.state(&second), Some(FetchState::Pending));

    host.release();
    assert!(waiter_one.await.unwrap().is_ok());
    assert!(waiter_two.await.unwrap().is_ok());
    assert_eq!(host.calls(), 2);
}

// ============================================================================
// Failure stickiness
// ============================================================================

#[tokio::test]
async fn test_not_found_is_sticky() {
    let host = FakeImageHost::open().script(&[404]);
    let (cache, _fs) = setup(host.clone());
    let key = contact_key("42", AVATAR_URL);

    let first = cache.request_image(&key, AVATAR_URL).await.unwrap_err();
    let second = cache.request_image(&key, AVATAR_URL).await.unwrap_err();

    assert_eq!(first, ImageCacheError::NotFound { status: 404 });
    assert_eq!(second, first);
    assert_eq!(host.calls(), 1);
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let host = FakeImageHost::open().script(&[503]);
    let (cache, _fs) = setup(host.clone());
    let key = contact_key("42", AVATAR_URL);

    let err = cache.request_image(&key, AVATAR_URL).await.unwrap_err();
    assert_eq!(err, ImageCacheError::Http { status: 503 });
    assert_eq!(
        cache.state(&key),
        Some(FetchState::Failed {
            status: Some(503),
            sticky: false
        })
    );

    assert!(cache.request_image(&key, AVATAR_URL).await.is_ok());
    assert_eq!(host.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_retried() {
    let host = FakeImageHost::closed();
    let fs = Arc::new(MemoryFileSystem::default());
    let cache = ImageDownloadCache::new(host.clone(), fs, "/cache/images")
        .with_request_timeout(Duration::from_millis(50));
    let key = contact_key("42", AVATAR_URL);

    let err = cache.request_image(&key, AVATAR_URL).await.unwrap_err();
    assert!(matches!(err, ImageCacheError::Network(_)));
    assert!(!err.is_sticky());

    host.release();
    assert!(cache.request_image(&key, AVATAR_URL).await.is_ok());
    assert_eq!(host.calls(), 2);
}

// ============================================================================
// Waiter accounting
// ============================================================================

#[tokio::test]
async fn test_last_waiter_drop_aborts_fetch() {
    let host = FakeImageHost::closed();
    let (cache, fs) = setup(host.clone());
    let key = contact_key("42", AVATAR_URL);

    let waiter = tokio::spawn({
        let (cache, key) = (cache.clone(), key.clone());
        async move { cache.request_image(&key, AVATAR_URL).await }
    });
    wait_until(|| host.calls() == 1).await;
    assert_eq!(cache.state(&key), Some(FetchState::InFlight));

    waiter.abort();
    assert!(waiter.await.unwrap_err().is_cancelled());
    assert!(cache.state(&key).is_none());

    host.release();
    let path = cache.request_image(&key, AVATAR_URL).await.unwrap();
    assert_eq!(host.calls(), 2);
    assert_eq!(fs.file_count(), 1);
    assert!(fs.content(&path).is_some());
}

#[tokio::test]
async fn test_remaining_waiter_keeps_fetch_alive() {
    let host = FakeImageHost::closed();
    let (cache, _fs) = setup(host.clone());
    let key = contact_key("42", AVATAR_URL);

    let spawn_waiter = || {
        let (cache, key) = (cache.clone(), key.clone());
        tokio::spawn(async move { cache.request_image(&key, AVATAR_URL).await })
    };
    let cancelled = spawn_waiter();
    let kept = spawn_waiter();
    wait_until(|| cache.entry(&key).map(|entry| entry.waiters) == Some(2)).await;

    cancelled.abort();
    let _ = cancelled.await;
    assert_eq!(cache.entry(&key).map(|entry| entry.waiters), Some(1));

    host.release();
    assert!(kept.await.unwrap().is_ok());
    assert_eq!(host.calls(), 1);
}

#[tokio::test]
async fn test_aborted_fetch_removes_partial_file() {
    let host = FakeImageHost::open();
    let (cache, fs) = setup(host.clone());
    fs.stall_renames();
    let key = contact_key("42", AVATAR_URL);

    let waiter = tokio::spawn({
        let (cache, key) = (cache.clone(), key.clone());
        async move { cache.request_image(&key, AVATAR_URL).await }
    });
    wait_until(|| fs.file_count() == 1).await;
    assert!(fs.content(&cache.output_path(&key)).is_none());

    waiter.abort();
    let _ = waiter.await;

    wait_until(|| fs.file_count() == 0).await;
    assert!(cache.state(&key).is_none());
}

#[tokio::test]
async fn test_evict_during_write_removes_partial_file() {
    let host = FakeImageHost::open();
    let (cache, fs) = setup(host.clone());
    fs.stall_renames();
    let key = contact_key("42", AVATAR_URL);

    let waiter = tokio::spawn({
        let (cache, key) = (cache.clone(), key.clone());
        async move { cache.request_image(&key, AVATAR_URL).await }
    });
    wait_until(|| fs.file_count() == 1).await;

    assert!(cache.evict(&key).await.unwrap());
    assert_eq!(waiter.await.unwrap(), Err(ImageCacheError::Aborted));

    wait_until(|| fs.file_count() == 0).await;
    assert!(cache.is_empty());
}

// ============================================================================
// Clear
// ============================================================================

#[tokio::test]
async fn test_clear_removes_entries_and_files() {
    let host = FakeImageHost::open();
    let (cache, fs) = setup(host.clone());
    let first = contact_key("1", "https://img/1.jpg");
    let second = contact_key("2", "https://img/2.jpg");

    cache.request_image(&first, "https://img/1.jpg").await.unwrap();
    cache.request_image(&second, "https://img/2.jpg").await.unwrap();
    assert_eq!(fs.file_count(), 2);

    assert_eq!(cache.clear().await.unwrap(), 2);
    assert!(cache.is_empty());
    assert_eq!(fs.file_count(), 0);

    cache.request_image(&first, "https://img/1.jpg").await.unwrap();
    assert_eq!(host.calls(), 3);
}

#[tokio::test]
async fn test_clear_aborts_running_fetch() {
    let host = FakeImageHost::closed();
    let (cache, _fs) = setup(host.clone());
    let key = contact_key("42", AVATAR_URL);

    let waiter = tokio::spawn({
        let (cache, key) = (cache.clone(), key.clone());
        async move { cache.request_image(&key, AVATAR_URL).await }
    });
    wait_until(|| host.calls() == 1).await;

    cache.clear().await.unwrap();

    assert_eq!(waiter.await.unwrap(), Err(ImageCacheError::Aborted));
    assert!(cache.is_empty());
}
