//! Service façade wired with in-process bridges.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::storage::{FileSystemAccess, SecureStore};
use bridge_traits::time::ManualClock;
use bytes::Bytes;
use chrono::Utc;
use core_auth::{AccessToken, AccountId, TokenStore};
use core_images::{FetchState, ImageDownloadCache};
use core_runtime::config::SyncSettings;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_service::{
    bootstrap, AdaptorPlugin, CoreConfig, CoreError, PluginDependencies, PluginRegistry,
    SyncPlugin, SyncService, VkContactsPlugin,
};
use core_sync::{
    DataType, InMemoryStore, InMemorySyncStateRepository, LocalStore, OutcomeStatus, Page,
    PageRequest, PageSource, Record, SyncRequest,
};
use mockall::mock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

// ============================================================================
// Fakes
// ============================================================================

mock! {
    HttpClient {}

    #[async_trait]
    impl HttpClient for HttpClient {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
    }
}

mock! {
    Credentials {}

    #[async_trait]
    impl core_auth::CredentialProvider for Credentials {
        async fn access_token(
            &self,
            provider: &str,
            account_id: AccountId,
        ) -> core_auth::Result<AccessToken>;

        async fn invalidate(&self, provider: &str, account_id: AccountId) -> core_auth::Result<()>;
    }
}

#[derive(Default)]
struct MemorySecureStore {
    secrets: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl SecureStore for MemorySecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
        self.secrets
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
        Ok(self.secrets.lock().unwrap().get(key).cloned())
    }

    async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
        self.secrets.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> BridgeResult<Vec<String>> {
        Ok(self.secrets.lock().unwrap().keys().cloned().collect())
    }
}

#[derive(Default)]
struct MemoryFileSystem {
    files: Mutex<HashMap<PathBuf, Bytes>>,
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
        Ok(self.files.lock().unwrap().keys().any(|f| f.starts_with(path)))
    }

    async fn create_dir_all(&self, _path: &Path) -> BridgeResult<()> {
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> BridgeResult<Bytes> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| BridgeError::OperationFailed("missing".into()))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> BridgeResult<()> {
        self.files.lock().unwrap().insert(path.to_path_buf(), data);
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> BridgeResult<()> {
        let mut files = self.files.lock().unwrap();
        let data = files
            .remove(from)
            .ok_or_else(|| BridgeError::OperationFailed("missing".into()))?;
        files.insert(to.to_path_buf(), data);
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> BridgeResult<()> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }

    async fn delete_dir_all(&self, path: &Path) -> BridgeResult<()> {
        self.files.lock().unwrap().retain(|f, _| !f.starts_with(path));
        Ok(())
    }

    async fn list_directory(&self, _path: &Path) -> BridgeResult<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}

/// Serves one page of two VK friends and their avatars.
fn vk_http() -> MockHttpClient {
    let mut http = MockHttpClient::new();
    http.expect_execute().returning(|req| {
        if req.url.ends_with("/friends.get") {
            Ok(HttpResponse::new(
                200,
                Bytes::from_static(
                    br#"{"response": {"count": 2, "items": [
                        {"id": 42, "first_name": "Ivan", "last_name": "Petrov",
                         "photo_max": "https://sun9-1.userapi.com/42.jpg"},
                        {"id": 43, "first_name": "Olga", "last_name": "Ivanova"}
                    ]}}"#,
                ),
            ))
        } else {
            Ok(HttpResponse::new(200, Bytes::from_static(b"jpeg")))
        }
    });
    http
}

/// VK host whose avatar downloads block until [`release`](Self::release).
struct GatedVkHost {
    gate: Semaphore,
    avatar_calls: AtomicUsize,
}

impl GatedVkHost {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            avatar_calls: AtomicUsize::new(0),
        })
    }

    fn release(&self) {
        self.gate.add_permits(1);
    }

    fn avatar_calls(&self) -> usize {
        self.avatar_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for GatedVkHost {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        if request.url.ends_with("/friends.get") {
            return Ok(HttpResponse::new(
                200,
                Bytes::from_static(
                    br#"{"response": {"count": 1, "items": [
                        {"id": 42, "first_name": "Ivan", "last_name": "Petrov",
                         "photo_max": "https://sun9-1.userapi.com/42.jpg"}
                    ]}}"#,
                ),
            ));
        }

        self.avatar_calls.fetch_add(1, Ordering::SeqCst);
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| BridgeError::OperationFailed(e.to_string()))?;
        Ok(HttpResponse::new(200, Bytes::from_static(b"jpeg")))
    }
}

fn in_memory_deps(http: MockHttpClient) -> PluginDependencies {
    deps_with(Arc::new(http), Arc::new(MemoryFileSystem::default()))
}

fn deps_with(http: Arc<dyn HttpClient>, fs: Arc<dyn FileSystemAccess>) -> PluginDependencies {
    let mut credentials = MockCredentials::new();
    credentials
        .expect_access_token()
        .returning(|_, _| Ok(AccessToken::non_expiring("vk1.token")));

    let event_bus = EventBus::new(32);
    PluginDependencies {
        http_client: Arc::clone(&http),
        store: Arc::new(InMemoryStore::new()),
        credentials: Arc::new(credentials),
        state: Arc::new(InMemorySyncStateRepository::new()),
        settings: SyncSettings::default(),
        event_bus: event_bus.clone(),
        clock: Arc::new(ManualClock::new(Utc::now())),
        image_cache: ImageDownloadCache::new(http, fs, "/cache/images").with_event_bus(event_bus),
    }
}

fn contacts_request() -> SyncRequest {
    SyncRequest::new("vk", DataType::Contacts, AccountId::new(42))
}

// ============================================================================
// Registry and façade
// ============================================================================

#[tokio::test]
async fn test_unknown_plugin_rejected() {
    let service = SyncService::new(PluginRegistry::with_builtin(), in_memory_deps(vk_http()));

    let err = service
        .start("vk-calendars", contacts_request())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::UnknownPlugin(id) if id == "vk-calendars"));
}

#[tokio::test]
async fn test_plugin_instances_are_reused() {
    let service = SyncService::new(PluginRegistry::with_builtin(), in_memory_deps(vk_http()));

    let first = service.plugin("vk-contacts").unwrap();
    let second = service.plugin("vk-contacts").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.identifier(), "vk-contacts");
}

#[tokio::test]
async fn test_request_for_other_data_type_rejected() {
    let service = SyncService::new(PluginRegistry::with_builtin(), in_memory_deps(vk_http()));
    let request = SyncRequest::new("vk", DataType::Posts, AccountId::new(42));

    let err = service.start("vk-contacts", request).await.unwrap_err();

    assert!(matches!(err, CoreError::PluginMismatch { .. }));
}

#[tokio::test]
async fn test_vk_contacts_through_service() {
    let service = SyncService::new(PluginRegistry::with_builtin(), in_memory_deps(vk_http()));
    let mut events = service.events();

    let outcome = service
        .start("vk-contacts", contacts_request())
        .await
        .unwrap()
        .outcome()
        .await;

    assert_eq!(outcome.status, OutcomeStatus::Success);
    assert_eq!(outcome.items_changed, 2);

    let mut completed = false;
    while let Some(Ok(event)) = events.try_recv() {
        if let CoreEvent::Sync(SyncEvent::Completed { items_changed, .. }) = event {
            assert_eq!(items_changed, 2);
            completed = true;
        }
    }
    assert!(completed);
}

#[tokio::test]
async fn test_vk_run_downloads_avatars() {
    let deps = in_memory_deps(vk_http());
    let plugin = VkContactsPlugin::new(&deps);
    let key = plugin
        .avatars()
        .key_for("42", "https://sun9-1.userapi.com/42.jpg");

    let outcome = plugin
        .start_sync(contacts_request())
        .await
        .unwrap()
        .outcome()
        .await;
    assert!(outcome.is_success());

    // Downloaded by the run itself, before it reported success.
    assert_eq!(deps.image_cache.state(&key), Some(FetchState::Complete));

    let records: Vec<Record> = deps
        .store
        .snapshot(&contacts_request().scope())
        .await
        .unwrap()
        .into_iter()
        .map(|(id, payload)| Record::upsert(id, payload))
        .collect();
    let downloads = plugin.avatars().fetch_for_records(&records).await;

    assert_eq!(downloads.len(), 1);
    assert_eq!(downloads[0].remote_id, "42");
    assert_eq!(
        downloads[0].result.as_ref().unwrap(),
        &deps.image_cache.output_path(&key)
    );
}

async fn wait_for_waiters(cache: &ImageDownloadCache, key: &core_images::ImageFetchKey, n: usize) {
    for _ in 0..200 {
        if cache.entry(key).map(|entry| entry.waiters) == Some(n) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {} waiters on {}, found {:?}", n, key, cache.entry(key));
}

#[tokio::test]
async fn test_cancelled_run_leaves_shared_avatar_to_other_run() {
    let host = GatedVkHost::new();
    let fs = Arc::new(MemoryFileSystem::default());
    let deps = deps_with(host.clone(), fs.clone());
    let service = SyncService::new(PluginRegistry::with_builtin(), deps);
    let plugin = VkContactsPlugin::new(service.dependencies());
    let key = plugin
        .avatars()
        .key_for("42", "https://sun9-1.userapi.com/42.jpg");
    let cache = service.image_cache().clone();

    let first = service
        .start("vk-contacts", SyncRequest::new("vk", DataType::Contacts, AccountId::new(1)))
        .await
        .unwrap();
    let second = service
        .start("vk-contacts", SyncRequest::new("vk", DataType::Contacts, AccountId::new(2)))
        .await
        .unwrap();

    wait_for_waiters(&cache, &key, 2).await;

    service.cancel("vk-contacts", &first).unwrap();
    let cancelled = first.outcome().await;
    assert_eq!(cancelled.status, OutcomeStatus::Cancelled);
    assert_eq!(cache.entry(&key).unwrap().waiters, 1);

    host.release();
    let completed = second.outcome().await;

    assert_eq!(completed.status, OutcomeStatus::Success);
    assert_eq!(host.avatar_calls(), 1);
    assert_eq!(cache.state(&key), Some(FetchState::Complete));
    assert!(fs.exists(&cache.output_path(&key)).await.unwrap());
}

struct EmptySource;

#[async_trait]
impl PageSource for EmptySource {
    fn provider(&self) -> &str {
        "demo"
    }

    fn data_type(&self) -> DataType {
        DataType::Notifications
    }

    async fn fetch_page(&self, _request: PageRequest<'_>) -> core_sync::Result<Page> {
        Ok(Page::last(Vec::new()))
    }
}

#[tokio::test]
async fn test_custom_plugin_registration() {
    let mut registry = PluginRegistry::new();
    registry
        .register("demo-notifications", |deps: &PluginDependencies| {
            Ok(Arc::new(AdaptorPlugin::new(Arc::new(EmptySource), deps)) as Arc<dyn SyncPlugin>)
        })
        .unwrap();
    let service = SyncService::new(registry, in_memory_deps(MockHttpClient::new()));

    assert_eq!(service.identifiers(), vec!["demo-notifications".to_string()]);

    let request = SyncRequest::new("demo", DataType::Notifications, AccountId::new(1));
    let outcome = service
        .start("demo-notifications", request)
        .await
        .unwrap()
        .outcome()
        .await;

    assert_eq!(outcome.status, OutcomeStatus::Success);
    assert_eq!(outcome.items_changed, 0);
}

// ============================================================================
// Bootstrap
// ============================================================================

#[tokio::test]
async fn test_bootstrap_with_sqlite_storage() {
    let database_path = std::env::temp_dir().join(format!(
        "social-sync-service-test-{}.db",
        std::process::id()
    ));
    let _ = std::fs::remove_file(&database_path);

    let secure_store: Arc<dyn SecureStore> = Arc::new(MemorySecureStore::default());
    TokenStore::new(Arc::clone(&secure_store))
        .store("vk", AccountId::new(42), &AccessToken::non_expiring("vk1.token"))
        .await
        .unwrap();

    let config = CoreConfig::builder()
        .database_path(&database_path)
        .cache_dir("/cache/images")
        .http_client(Arc::new(vk_http()))
        .file_system(Arc::new(MemoryFileSystem::default()))
        .secure_store(secure_store)
        .build()
        .unwrap();

    let service = bootstrap(config).await.unwrap();
    assert!(service.identifiers().contains(&"vk-contacts".to_string()));

    let outcome = service
        .start("vk-contacts", contacts_request())
        .await
        .unwrap()
        .outcome()
        .await;
    assert_eq!(outcome.status, OutcomeStatus::Success);

    let stored = service
        .dependencies()
        .store
        .snapshot(&contacts_request().scope())
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored["42"]["display_name"], "Ivan Petrov");

    let _ = std::fs::remove_file(&database_path);
}
