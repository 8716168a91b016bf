//! Provider cache wiring for run-all.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use stackrun_cache::{
    server_host, token_env_var, write_cli_config, CacheResult, CacheServer, HttpRegistryClient,
    ProviderCacheService, SessionToken, CLI_CONFIG_ENV,
};
use stackrun_core::{
    CoreError, CoreResult, Module, ModuleExecutor, ModuleRun, ProviderCacheSettings,
};
use stackrun_runner::RunnerError;

/// File name of the generated wrapped-tool CLI configuration.
const CLI_CONFIG_FILE: &str = "stackrun.tfrc";

/// Pre-populated plugin cache the wrapped tool may already use.
const USER_PLUGIN_DIR_ENV: &str = "TF_PLUGIN_CACHE_DIR";

/// A cache server running in the background for one session.
pub struct RunningCache {
    pub base_url: String,
    pub token: SessionToken,
    pub service: ProviderCacheService,
    pub cli_config: PathBuf,
    shutdown: CancellationToken,
    handle: JoinHandle<CacheResult<()>>,
}

impl RunningCache {
    /// Bind, write the CLI configuration and start serving.
    pub async fn start(
        settings: &ProviderCacheSettings,
        default_dir: &Path,
        token: SessionToken,
    ) -> Result<Self> {
        let dir = settings.dir.clone().unwrap_or_else(|| default_dir.to_path_buf());
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create provider cache dir {}", dir.display()))?;

        let mut service = ProviderCacheService::new(&dir, Arc::new(HttpRegistryClient::new()));
        if let Ok(user_dir) = std::env::var(USER_PLUGIN_DIR_ENV) {
            service = service.with_user_plugin_dir(user_dir);
        }

        let addr: SocketAddr = format!("{}:{}", settings.host, settings.port)
            .parse()
            .with_context(|| format!("Invalid provider cache address {}:{}", settings.host, settings.port))?;
        let server = CacheServer::bind(addr, service.clone(), token.clone())
            .await
            .context("Failed to start provider cache server")?;
        let base_url = server.base_url().to_string();

        let cli_config = dir.join(CLI_CONFIG_FILE);
        write_cli_config(&cli_config, &base_url, token.as_str(), &settings.registries)?;

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.serve(shutdown.clone()));
        info!("Provider cache at {} ({})", base_url, dir.display());

        Ok(Self {
            base_url,
            token,
            service,
            cli_config,
            shutdown,
            handle,
        })
    }

    /// Environment every module invocation needs to use the cache.
    pub fn env(&self) -> HashMap<String, String> {
        HashMap::from([
            (
                CLI_CONFIG_ENV.to_string(),
                self.cli_config.display().to_string(),
            ),
            (
                token_env_var(server_host(&self.base_url)),
                self.token.as_str().to_string(),
            ),
        ])
    }

    /// Stop the server and wait for it to finish.
    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        self.handle
            .await
            .context("Provider cache server task failed")??;
        Ok(())
    }
}

/// Re-runs a module once after the cache settles when the wrapped tool gave
/// up on a locked provider download.
pub struct ProviderCacheExecutor {
    inner: Arc<dyn ModuleExecutor>,
    service: ProviderCacheService,
}

impl ProviderCacheExecutor {
    pub fn new(inner: Arc<dyn ModuleExecutor>, service: ProviderCacheService) -> Self {
        Self { inner, service }
    }
}

/// Status line the cache server answers with while a provider is fetched.
const LOCKED_SIGNATURE: &str = "423 Locked";

fn hit_locked_provider(output: &str) -> bool {
    output.contains(LOCKED_SIGNATURE)
}

#[async_trait]
impl ModuleExecutor for ProviderCacheExecutor {
    async fn execute(&self, module: &Module) -> CoreResult<ModuleRun> {
        // Retrying inside the runner may give up on a locked provider before
        // the cache finishes; both outcomes get one more run here.
        let attempts = match self.inner.execute(module).await {
            Ok(run) if !run.is_success() && hit_locked_provider(&run.output) => run.attempts,
            Err(CoreError::Runner(RunnerError::MaxRetriesExceeded {
                attempts, output, ..
            })) if hit_locked_provider(&output) => attempts,
            other => return other,
        };

        warn!("{:?} hit a provider still being cached, waiting", module.path);
        self.service.wait_for_cache_ready(None).await;
        let mut retried = self.inner.execute(module).await?;
        retried.attempts += attempts;
        Ok(retried)
    }
}
