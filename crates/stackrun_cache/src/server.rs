//! HTTP server emulating a provider registry in front of the cache.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::auth::{require_bearer_token, SessionToken};
use crate::error::CacheResult;
use crate::handlers;
use crate::registry::DISCOVERY_PATH;
use crate::service::ProviderCacheService;

/// State shared by every handler.
#[derive(Clone)]
pub struct CacheState {
    pub service: ProviderCacheService,
    pub token: SessionToken,
    /// Externally reachable root, used to build `download_url`s
    pub base_url: String,
    /// Default long-poll for download requests; `None` answers 423 at once
    pub download_wait: Option<Duration>,
}

impl CacheState {
    pub fn new(
        service: ProviderCacheService,
        token: SessionToken,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            service,
            token,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            download_wait: None,
        }
    }

    pub fn with_download_wait(mut self, wait: Duration) -> Self {
        self.download_wait = Some(wait);
        self
    }
}

/// Build the registry router.
///
/// Discovery and archive downloads are open; the providers API requires the
/// session token.
pub fn router(state: CacheState) -> Router {
    let providers = Router::new()
        .route("/{registry}/{namespace}/{name}/versions", get(handlers::versions))
        .route(
            "/{registry}/{namespace}/{name}/{version}/download/{os}/{arch}",
            get(handlers::download),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer_token,
        ));

    Router::new()
        .route(DISCOVERY_PATH, get(handlers::discovery))
        .nest("/v1/providers", providers)
        .route(
            "/downloads/{registry}/{namespace}/{name}/{version}/{platform}/{filename}",
            get(handlers::archive),
        )
        .with_state(state)
}

/// A bound provider cache server.
pub struct CacheServer {
    listener: TcpListener,
    addr: SocketAddr,
    state: CacheState,
}

impl CacheServer {
    /// Bind `addr`; port 0 picks a free port.
    pub async fn bind(
        addr: SocketAddr,
        service: ProviderCacheService,
        token: SessionToken,
    ) -> CacheResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let state = CacheState::new(service, token, format!("http://{}", addr));
        Ok(Self {
            listener,
            addr,
            state,
        })
    }

    pub fn with_download_wait(mut self, wait: Duration) -> Self {
        self.state = self.state.with_download_wait(wait);
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.state.base_url
    }

    pub fn token(&self) -> &SessionToken {
        &self.state.token
    }

    pub fn service(&self) -> &ProviderCacheService {
        &self.state.service
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn serve(self, shutdown: CancellationToken) -> CacheResult<()> {
        info!(addr = %self.addr, "Provider cache server listening");
        let app = router(self.state);
        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        info!("Provider cache server stopped");
        Ok(())
    }
}
