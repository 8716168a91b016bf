//! # stackrun_cache
//!
//! Provider plugin cache for stackrun.
//!
//! A local HTTP server that speaks the provider registry protocol. The
//! wrapped tool is pointed at it during `init`; each provider archive is
//! fetched from the real registry at most once, stored on disk and served
//! locally to every module that asks for it.
//!
//! # Features
//!
//! - **Deduplication**: concurrent requests for one archive share a single fetch
//! - **Persistence**: write-then-rename with SHA-256 verification, reused across runs
//! - **Registry protocol**: discovery, versions and download endpoints, 423 while caching
//! - **Auth**: per-session bearer token
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stackrun_cache::{CacheServer, HttpRegistryClient, ProviderCacheService, SessionToken};
//! use tokio_util::sync::CancellationToken;
//!
//! let service = ProviderCacheService::new("/tmp/providers", Arc::new(HttpRegistryClient::new()));
//! let server = CacheServer::bind("127.0.0.1:0".parse()?, service, SessionToken::generate()).await?;
//! println!("cache at {}", server.base_url());
//!
//! let shutdown = CancellationToken::new();
//! tokio::spawn(server.serve(shutdown.clone()));
//! ```

pub mod auth;
pub mod cli_config;
pub mod error;
pub mod handlers;
pub mod provider;
pub mod registry;
pub mod server;
pub mod service;

pub use auth::SessionToken;
pub use cli_config::{render_cli_config, server_host, token_env_var, write_cli_config, CLI_CONFIG_ENV};
pub use error::{CacheError, CacheResult};
pub use provider::{CachedArtifact, DownloadInfo, EntryState, ProviderKey};
pub use registry::{HttpRegistryClient, RegistryClient, DISCOVERY_PATH};
pub use server::{router, CacheServer, CacheState};
pub use service::{ProviderCacheService, DEFAULT_FETCH_TIMEOUT};
