//! Provider artifact identity and cache entry state.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Identifies one downloadable provider archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderKey {
    /// Registry hostname, e.g. `registry.terraform.io`
    pub registry: String,
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub os: String,
    pub arch: String,
}

impl ProviderKey {
    /// Build a key, rejecting components that could escape the cache
    /// directory.
    pub fn new(
        registry: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        os: impl Into<String>,
        arch: impl Into<String>,
    ) -> CacheResult<Self> {
        let key = Self {
            registry: registry.into().to_lowercase(),
            namespace: namespace.into().to_lowercase(),
            name: name.into().to_lowercase(),
            version: version.into(),
            os: os.into(),
            arch: arch.into(),
        };
        for part in key.parts() {
            validate_component(part)?;
        }
        Ok(key)
    }

    fn parts(&self) -> [&str; 6] {
        [
            &self.registry,
            &self.namespace,
            &self.name,
            &self.version,
            &self.os,
            &self.arch,
        ]
    }

    /// `<os>_<arch>`
    pub fn platform(&self) -> String {
        format!("{}_{}", self.os, self.arch)
    }

    /// `<registry>/<namespace>/<name>/<version>/<os>_<arch>`, the string
    /// that [`crate::ProviderCacheService::wait_for_cache_ready`] filters on.
    pub fn prefix(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.registry,
            self.namespace,
            self.name,
            self.version,
            self.platform()
        )
    }

    /// Directory of this artifact relative to a cache root.
    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(&self.registry)
            .join(&self.namespace)
            .join(&self.name)
            .join(&self.version)
            .join(self.platform())
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// Reject empty components, separators and parent references.
pub(crate) fn validate_component(part: &str) -> CacheResult<()> {
    if part.is_empty()
        || part == "."
        || part == ".."
        || part.contains('/')
        || part.contains('\\')
    {
        return Err(CacheError::InvalidKey(format!("invalid path component '{}'", part)));
    }
    Ok(())
}

/// Upstream download metadata for one artifact.
///
/// Fields other than the three the cache needs are kept verbatim so the
/// local download endpoint can return the upstream document (signing keys,
/// shasum URLs) with only `download_url` replaced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadInfo {
    pub download_url: String,
    pub filename: String,
    #[serde(default)]
    pub shasum: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A provider archive present in the local cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedArtifact {
    pub path: PathBuf,
    pub info: DownloadInfo,
}

/// Lifecycle of one cache entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EntryState {
    #[default]
    NotRequested,
    Downloading,
    Ready(CachedArtifact),
    Failed(String),
}

impl EntryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready(_) | Self::Failed(_))
    }

    pub fn artifact(&self) -> Option<&CachedArtifact> {
        match self {
            Self::Ready(artifact) => Some(artifact),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aws() -> ProviderKey {
        ProviderKey::new("registry.terraform.io", "HashiCorp", "aws", "5.31.0", "linux", "amd64")
            .unwrap()
    }

    #[test]
    fn test_key_layout() {
        let key = aws();
        assert_eq!(key.namespace, "hashicorp");
        assert_eq!(key.prefix(), "registry.terraform.io/hashicorp/aws/5.31.0/linux_amd64");
        assert_eq!(
            key.relative_dir(),
            PathBuf::from("registry.terraform.io/hashicorp/aws/5.31.0/linux_amd64")
        );
    }

    #[test]
    fn test_key_rejects_traversal() {
        assert!(ProviderKey::new("registry.terraform.io", "..", "aws", "1.0.0", "linux", "amd64").is_err());
        assert!(ProviderKey::new("registry.terraform.io", "a/b", "aws", "1.0.0", "linux", "amd64").is_err());
        assert!(ProviderKey::new("", "hashicorp", "aws", "1.0.0", "linux", "amd64").is_err());
    }

    #[test]
    fn test_download_info_keeps_unknown_fields() {
        let info: DownloadInfo = serde_json::from_str(
            r#"{"download_url":"https://x/a.zip","filename":"a.zip","shasum":"ab","protocols":["5.0"]}"#,
        )
        .unwrap();
        assert_eq!(info.filename, "a.zip");
        assert_eq!(info.extra["protocols"][0], "5.0");
    }
}
