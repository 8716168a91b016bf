//! Provider cache: one entry per artifact, at most one fetch in flight.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{CacheError, CacheResult};
use crate::provider::{validate_component, CachedArtifact, DownloadInfo, EntryState, ProviderKey};
use crate::registry::RegistryClient;

/// Metadata written next to every cached archive.
const METADATA_FILE: &str = "download.json";

/// Upper bound on one fetch, covering metadata, download and verification.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15 * 60);

struct CacheEntry {
    state: watch::Sender<EntryState>,
}

/// Shared handle to the provider cache. Cloning is cheap.
#[derive(Clone)]
pub struct ProviderCacheService {
    cache_dir: PathBuf,
    user_plugin_dir: Option<PathBuf>,
    fetch_timeout: Duration,
    client: Arc<dyn RegistryClient>,
    entries: Arc<Mutex<HashMap<ProviderKey, Arc<CacheEntry>>>>,
    versions: Cache<String, serde_json::Value>,
}

impl ProviderCacheService {
    pub fn new(cache_dir: impl Into<PathBuf>, client: Arc<dyn RegistryClient>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            user_plugin_dir: None,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            client,
            entries: Arc::new(Mutex::new(HashMap::new())),
            versions: Cache::builder().max_capacity(1_000).build(),
        }
    }

    /// Also look for archives in a pre-populated plugin cache directory
    /// using the same layout.
    pub fn with_user_plugin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_plugin_dir = Some(dir.into());
        self
    }

    /// Give up on a fetch that has not finished after `timeout`.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Current state of `key` without triggering anything.
    pub fn state(&self, key: &ProviderKey) -> EntryState {
        self.entries
            .lock()
            .get(key)
            .map(|e| e.state.borrow().clone())
            .unwrap_or_default()
    }

    /// Start fetching `key` unless it is ready or already downloading.
    ///
    /// The returned receiver observes the entry. The fetch runs in its own
    /// task, so dropping the receiver never cancels it.
    pub fn request_artifact(&self, key: &ProviderKey) -> watch::Receiver<EntryState> {
        let (entry, start) = {
            let mut entries = self.entries.lock();
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| {
                    let (state, _) = watch::channel(EntryState::NotRequested);
                    Arc::new(CacheEntry { state })
                })
                .clone();
            let start = matches!(
                *entry.state.borrow(),
                EntryState::NotRequested | EntryState::Failed(_)
            );
            if start {
                entry.state.send_replace(EntryState::Downloading);
            }
            (entry, start)
        };

        let receiver = entry.state.subscribe();
        if start {
            let service = self.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let state = match service.guarded_fetch(&key).await {
                    Ok(artifact) => {
                        info!(provider = %key, path = ?artifact.path, "Provider cached");
                        EntryState::Ready(artifact)
                    }
                    Err(e) => {
                        warn!(provider = %key, error = %e, "Provider download failed");
                        EntryState::Failed(e.to_string())
                    }
                };
                entry.state.send_replace(state);
            });
        } else {
            debug!(provider = %key, "Joining existing cache entry");
        }
        receiver
    }

    /// Request `key` and wait for the outcome.
    pub async fn request_and_wait(&self, key: &ProviderKey) -> CacheResult<CachedArtifact> {
        let mut rx = self.request_artifact(key);
        let state = rx
            .wait_for(|s| s.is_terminal())
            .await
            .map(|s| s.clone())
            .map_err(|_| CacheError::Download(format!("{} was abandoned", key)))?;
        match state {
            EntryState::Ready(artifact) => Ok(artifact),
            EntryState::Failed(message) => Err(CacheError::Download(message)),
            _ => Err(CacheError::Download(format!("{} did not finish", key))),
        }
    }

    /// Wait until every entry whose key starts with `prefix` (all entries
    /// when `None`) is ready or failed.
    pub async fn wait_for_cache_ready(&self, prefix: Option<&str>) {
        let receivers: Vec<watch::Receiver<EntryState>> = self
            .entries
            .lock()
            .iter()
            .filter(|(key, _)| prefix.map_or(true, |p| key.prefix().starts_with(p)))
            .map(|(_, entry)| entry.state.subscribe())
            .collect();

        for mut rx in receivers {
            let _ = rx.wait_for(|s| s.is_terminal()).await;
        }
    }

    /// Upstream versions document, fetched once per provider.
    pub async fn versions(
        &self,
        registry: &str,
        namespace: &str,
        name: &str,
    ) -> CacheResult<serde_json::Value> {
        let client = self.client.clone();
        let (registry, namespace, name) = (
            registry.to_lowercase(),
            namespace.to_lowercase(),
            name.to_lowercase(),
        );
        let cache_key = format!("{}/{}/{}", registry, namespace, name);
        self.versions
            .try_get_with(cache_key, async move {
                client.versions(&registry, &namespace, &name).await
            })
            .await
            .map_err(|e| CacheError::Registry(e.to_string()))
    }

    /// Locate `filename` for `key` if it is ready.
    pub fn ready_file(&self, key: &ProviderKey, filename: &str) -> Option<PathBuf> {
        self.state(key)
            .artifact()
            .filter(|a| a.info.filename == filename)
            .map(|a| a.path.clone())
    }

    /// [`Self::fetch`] in its own task under the fetch deadline. A panic or
    /// timeout becomes an error so the entry always leaves `Downloading`.
    async fn guarded_fetch(&self, key: &ProviderKey) -> CacheResult<CachedArtifact> {
        let service = self.clone();
        let task_key = key.clone();
        let timeout = self.fetch_timeout;
        let task = tokio::spawn(async move {
            tokio::time::timeout(timeout, service.fetch(&task_key)).await
        });
        match task.await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CacheError::Download(format!(
                "{} did not finish within {:?}",
                key, timeout
            ))),
            Err(e) => Err(CacheError::Download(format!("{} fetch task failed: {}", key, e))),
        }
    }

    async fn fetch(&self, key: &ProviderKey) -> CacheResult<CachedArtifact> {
        let dir = self.cache_dir.join(key.relative_dir());
        if let Some(artifact) = load_cached(&dir).await {
            debug!(provider = %key, "Reusing archive from a previous run");
            return Ok(artifact);
        }

        let info = self.client.download_info(key).await?;
        validate_component(&info.filename)?;
        tokio::fs::create_dir_all(&dir).await?;

        let dest = dir.join(&info.filename);
        let tmp = dir.join(format!("{}.tmp", info.filename));

        let local = self
            .user_plugin_dir
            .as_ref()
            .map(|d| d.join(key.relative_dir()).join(&info.filename))
            .filter(|p| p.is_file());
        match local {
            Some(source) => {
                debug!(provider = %key, source = ?source, "Copying from user plugin cache");
                tokio::fs::copy(&source, &tmp).await?;
            }
            None => {
                info!(provider = %key, url = %info.download_url, "Downloading provider");
                if let Err(e) = self.client.download(&info.download_url, &tmp).await {
                    let _ = tokio::fs::remove_file(&tmp).await;
                    return Err(e);
                }
            }
        }

        if let Err(e) = verify_checksum(&tmp, &info).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        tokio::fs::rename(&tmp, &dest).await?;
        tokio::fs::write(dir.join(METADATA_FILE), serde_json::to_vec_pretty(&info)?).await?;

        Ok(CachedArtifact { path: dest, info })
    }
}

/// An archive completed by an earlier run: metadata present and the file it
/// names exists.
async fn load_cached(dir: &Path) -> Option<CachedArtifact> {
    let raw = tokio::fs::read(dir.join(METADATA_FILE)).await.ok()?;
    let info: DownloadInfo = serde_json::from_slice(&raw).ok()?;
    validate_component(&info.filename).ok()?;
    let path = dir.join(&info.filename);
    tokio::fs::metadata(&path)
        .await
        .ok()
        .filter(|m| m.is_file())
        .map(|_| CachedArtifact { path, info })
}

async fn verify_checksum(path: &Path, info: &DownloadInfo) -> CacheResult<()> {
    if info.shasum.is_empty() {
        return Ok(());
    }
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    let actual = hex::encode(hasher.finalize());
    if !actual.eq_ignore_ascii_case(&info.shasum) {
        return Err(CacheError::ChecksumMismatch {
            file: info.filename.clone(),
            expected: info.shasum.clone(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MockRegistryClient;
    use mockall::predicate::eq;
    use tempfile::TempDir;

    const ARCHIVE: &[u8] = b"provider archive";

    fn key() -> ProviderKey {
        ProviderKey::new("registry.terraform.io", "hashicorp", "null", "3.2.2", "linux", "amd64")
            .unwrap()
    }

    fn info(shasum: String) -> DownloadInfo {
        DownloadInfo {
            download_url: "https://releases.example/null.zip".to_string(),
            filename: "terraform-provider-null_3.2.2_linux_amd64.zip".to_string(),
            shasum,
            ..Default::default()
        }
    }

    fn archive_sha() -> String {
        hex::encode(Sha256::digest(ARCHIVE))
    }

    fn writes_archive(mock: &mut MockRegistryClient, times: usize) {
        mock.expect_download().times(times).returning(|_, dest| {
            std::fs::write(dest, ARCHIVE)?;
            Ok(())
        });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_download_once() {
        let dir = TempDir::new().unwrap();
        let mut mock = MockRegistryClient::new();
        mock.expect_download_info()
            .with(eq(key()))
            .times(1)
            .returning(|_| Ok(info(archive_sha())));
        writes_archive(&mut mock, 1);
        let service = ProviderCacheService::new(dir.path(), Arc::new(mock));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            handles.push(tokio::spawn(async move { service.request_and_wait(&key()).await }));
        }

        let mut paths = Vec::new();
        for handle in handles {
            paths.push(handle.await.unwrap().unwrap().path);
        }
        paths.dedup();
        assert_eq!(paths.len(), 1);
        assert_eq!(std::fs::read(&paths[0]).unwrap(), ARCHIVE);
        assert!(!paths[0].with_extension("zip.tmp").exists());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_fails_and_retries() {
        let dir = TempDir::new().unwrap();
        let mut mock = MockRegistryClient::new();
        let mut calls = 0;
        mock.expect_download_info().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(info("00".repeat(32)))
            } else {
                Ok(info(archive_sha()))
            }
        });
        writes_archive(&mut mock, 2);
        let service = ProviderCacheService::new(dir.path(), Arc::new(mock));

        let err = service.request_and_wait(&key()).await.unwrap_err();
        assert!(err.to_string().contains("Checksum mismatch"));
        assert!(matches!(service.state(&key()), EntryState::Failed(_)));

        let artifact = service.request_and_wait(&key()).await.unwrap();
        assert!(artifact.path.is_file());
    }

    #[tokio::test]
    async fn test_previous_run_is_reused_without_network() {
        let dir = TempDir::new().unwrap();
        {
            let mut mock = MockRegistryClient::new();
            mock.expect_download_info()
                .times(1)
                .returning(|_| Ok(info(archive_sha())));
            writes_archive(&mut mock, 1);
            let service = ProviderCacheService::new(dir.path(), Arc::new(mock));
            service.request_and_wait(&key()).await.unwrap();
        }

        let mut offline = MockRegistryClient::new();
        offline.expect_download_info().never();
        offline.expect_download().never();
        let service = ProviderCacheService::new(dir.path(), Arc::new(offline));

        let artifact = service.request_and_wait(&key()).await.unwrap();
        assert_eq!(artifact.info.filename, "terraform-provider-null_3.2.2_linux_amd64.zip");
    }

    #[tokio::test]
    async fn test_user_plugin_dir_is_copied() {
        let dir = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        let user_file = user
            .path()
            .join(key().relative_dir())
            .join("terraform-provider-null_3.2.2_linux_amd64.zip");
        std::fs::create_dir_all(user_file.parent().unwrap()).unwrap();
        std::fs::write(&user_file, ARCHIVE).unwrap();

        let mut mock = MockRegistryClient::new();
        mock.expect_download_info()
            .times(1)
            .returning(|_| Ok(info(archive_sha())));
        mock.expect_download().never();
        let service =
            ProviderCacheService::new(dir.path(), Arc::new(mock)).with_user_plugin_dir(user.path());

        let artifact = service.request_and_wait(&key()).await.unwrap();
        assert!(artifact.path.starts_with(dir.path()));
    }

    #[tokio::test]
    async fn test_versions_fetched_once() {
        let dir = TempDir::new().unwrap();
        let mut mock = MockRegistryClient::new();
        mock.expect_versions()
            .times(1)
            .returning(|_, _, _| Ok(serde_json::json!({"versions": [{"version": "3.2.2"}]})));
        let service = ProviderCacheService::new(dir.path(), Arc::new(mock));

        let first = service.versions("registry.terraform.io", "hashicorp", "null").await.unwrap();
        let second = service.versions("registry.terraform.io", "HashiCorp", "null").await.unwrap();
        assert_eq!(first, second);
    }

    /// Registry that never answers.
    struct StalledRegistry;

    #[async_trait::async_trait]
    impl RegistryClient for StalledRegistry {
        async fn versions(
            &self,
            _registry: &str,
            _namespace: &str,
            _name: &str,
        ) -> CacheResult<serde_json::Value> {
            futures::future::pending().await
        }

        async fn download_info(&self, _key: &ProviderKey) -> CacheResult<DownloadInfo> {
            futures::future::pending().await
        }

        async fn download(&self, _url: &str, _dest: &Path) -> CacheResult<()> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stalled_fetch_times_out_as_failed() {
        let dir = TempDir::new().unwrap();
        let service = ProviderCacheService::new(dir.path(), Arc::new(StalledRegistry))
            .with_fetch_timeout(Duration::from_millis(50));

        let err = service.request_and_wait(&key()).await.unwrap_err();
        assert!(err.to_string().contains("did not finish"));
        assert!(matches!(service.state(&key()), EntryState::Failed(_)));

        // Waiters are released rather than hanging.
        tokio::time::timeout(Duration::from_secs(5), service.wait_for_cache_ready(None))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_panicking_fetch_is_reported_failed() {
        let dir = TempDir::new().unwrap();
        let mut mock = MockRegistryClient::new();
        mock.expect_download_info()
            .times(1)
            .returning(|_| panic!("registry client bug"));
        let service = ProviderCacheService::new(dir.path(), Arc::new(mock));

        let err = service.request_and_wait(&key()).await.unwrap_err();
        assert!(err.to_string().contains("fetch task failed"));
        tokio::time::timeout(Duration::from_secs(5), service.wait_for_cache_ready(None))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_cache_ready_filters_by_prefix() {
        let dir = TempDir::new().unwrap();
        let mut mock = MockRegistryClient::new();
        mock.expect_download_info()
            .returning(|_| Ok(info(archive_sha())));
        writes_archive(&mut mock, 1);
        let service = ProviderCacheService::new(dir.path(), Arc::new(mock));

        assert_eq!(service.state(&key()), EntryState::NotRequested);
        drop(service.request_artifact(&key()));
        service
            .wait_for_cache_ready(Some("registry.terraform.io/hashicorp/null"))
            .await;
        assert!(service.state(&key()).artifact().is_some());

        // No matching entries returns immediately.
        service.wait_for_cache_ready(Some("registry.opentofu.org")).await;
    }
}
