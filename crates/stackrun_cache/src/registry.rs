//! Client for the upstream provider registry protocol.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use moka::future::Cache;
use reqwest::Url;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{CacheError, CacheResult};
use crate::provider::{DownloadInfo, ProviderKey};

/// Service discovery document path.
pub const DISCOVERY_PATH: &str = "/.well-known/terraform.json";

/// Deadline for discovery, versions and download-metadata requests.
const API_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest gap between two reads of a response body.
const READ_TIMEOUT: Duration = Duration::from_secs(60);
/// Deadline for a whole archive download.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Upstream registry operations the cache depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Raw versions document for a provider.
    async fn versions(
        &self,
        registry: &str,
        namespace: &str,
        name: &str,
    ) -> CacheResult<serde_json::Value>;

    /// Download metadata for one platform build.
    async fn download_info(&self, key: &ProviderKey) -> CacheResult<DownloadInfo>;

    /// Fetch `url` into `dest`.
    async fn download(&self, url: &str, dest: &Path) -> CacheResult<()>;
}

/// [`RegistryClient`] speaking HTTP to real registries.
pub struct HttpRegistryClient {
    client: reqwest::Client,
    scheme: String,
    /// registry host -> providers.v1 base URL
    discovered: Cache<String, Url>,
}

impl Default for HttpRegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRegistryClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .read_timeout(READ_TIMEOUT)
            .timeout(DOWNLOAD_TIMEOUT)
            .user_agent(concat!("stackrun/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            scheme: "https".to_string(),
            discovered: Cache::builder().max_capacity(64).build(),
        }
    }

    /// Talk plain HTTP to registries (local mirrors, tests).
    pub fn insecure(mut self) -> Self {
        self.scheme = "http".to_string();
        self
    }

    async fn providers_base(&self, registry: &str) -> CacheResult<Url> {
        let scheme = self.scheme.clone();
        let client = self.client.clone();
        let host = registry.to_string();
        self.discovered
            .try_get_with(registry.to_string(), async move {
                let root = Url::parse(&format!("{}://{}/", scheme, host))
                    .map_err(|e| CacheError::Registry(e.to_string()))?;
                let doc: serde_json::Value = client
                    .get(join(&root, DISCOVERY_PATH)?)
                    .timeout(API_TIMEOUT)
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                let path = doc
                    .get("providers.v1")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        CacheError::Registry(format!("{} does not advertise providers.v1", host))
                    })?;
                let path = if path.ends_with('/') {
                    path.to_string()
                } else {
                    format!("{}/", path)
                };
                debug!(registry = %host, base = %path, "Discovered providers API");
                join(&root, &path)
            })
            .await
            .map_err(|e| CacheError::Registry(e.to_string()))
    }
}

fn join(base: &Url, path: &str) -> CacheResult<Url> {
    base.join(path)
        .map_err(|e| CacheError::Registry(format!("bad URL '{}': {}", path, e)))
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn versions(
        &self,
        registry: &str,
        namespace: &str,
        name: &str,
    ) -> CacheResult<serde_json::Value> {
        let base = self.providers_base(registry).await?;
        let url = join(&base, &format!("{}/{}/versions", namespace, name))?;
        let doc = self
            .client
            .get(url)
            .timeout(API_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(doc)
    }

    async fn download_info(&self, key: &ProviderKey) -> CacheResult<DownloadInfo> {
        let base = self.providers_base(&key.registry).await?;
        let url = join(
            &base,
            &format!(
                "{}/{}/{}/download/{}/{}",
                key.namespace, key.name, key.version, key.os, key.arch
            ),
        )?;
        let mut info: DownloadInfo = self
            .client
            .get(url.clone())
            .timeout(API_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        // Resolve relative download URLs against the endpoint.
        info.download_url = join(&url, &info.download_url)?.to_string();
        Ok(info)
    }

    async fn download(&self, url: &str, dest: &Path) -> CacheResult<()> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }
}
