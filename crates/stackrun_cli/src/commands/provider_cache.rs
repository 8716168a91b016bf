//! Provider-cache command - run the cache server standalone.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};

use stackrun_cache::SessionToken;
use stackrun_core::ProviderCacheSettings;

use crate::cache::RunningCache;

#[derive(Subcommand, Debug)]
pub enum ProviderCacheCommand {
    /// Serve the provider cache until interrupted
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Cache directory
    #[arg(long, env = "STACKRUN_PROVIDER_CACHE_DIR")]
    pub dir: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on (0 picks a free port)
    #[arg(long, default_value_t = 0)]
    pub port: u16,

    /// Registries to intercept
    #[arg(long = "registry", value_delimiter = ',')]
    pub registries: Vec<String>,

    /// Session token; generated when omitted
    #[arg(long, env = "STACKRUN_PROVIDER_CACHE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

impl ServeArgs {
    fn settings(&self) -> ProviderCacheSettings {
        let mut settings = ProviderCacheSettings {
            enabled: true,
            dir: self.dir.clone(),
            host: self.host.clone(),
            port: self.port,
            ..Default::default()
        };
        if !self.registries.is_empty() {
            settings.registries = self.registries.clone();
        }
        settings
    }
}

pub async fn execute(command: ProviderCacheCommand) -> Result<()> {
    match command {
        ProviderCacheCommand::Serve(args) => serve(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let token = args
        .token
        .clone()
        .map(SessionToken::from_value)
        .unwrap_or_else(SessionToken::generate);
    let default_dir = std::env::current_dir()?.join(".stackrun-cache").join("providers");
    let cache = RunningCache::start(&args.settings(), &default_dir, token).await?;

    println!("🗄️  Provider cache listening at {}", cache.base_url);
    for (key, value) in cache.env() {
        println!("   export {}={}", key, value);
    }

    tokio::signal::ctrl_c().await?;
    println!("Shutting down provider cache...");
    cache.stop().await
}
