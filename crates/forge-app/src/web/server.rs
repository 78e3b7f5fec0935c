use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::web::registry::SessionRegistry;
use crate::web::routes::{self, AppState};

/// Web server configuration
#[derive(Debug, Clone)]
pub struct WebServerConfig {
    pub bind_addr: SocketAddr,
    /// Client bundle served for every path the API does not claim
    pub web_dir: Option<PathBuf>,
}

/// Web server instance
pub struct WebServer {
    config: WebServerConfig,
    registry: Arc<SessionRegistry>,
}

impl WebServer {
    pub fn new(config: WebServerConfig, registry: Arc<SessionRegistry>) -> Self {
        Self { config, registry }
    }

    /// Build the full router with CORS, request tracing and static files
    pub fn router(&self) -> Router {
        let mut app = routes::create_router(AppState {
            registry: Arc::clone(&self.registry),
        });

        if let Some(web_dir) = &self.config.web_dir {
            if web_dir.is_dir() {
                tracing::info!(dir = %web_dir.display(), "serving static files");
                app = app.fallback_service(ServeDir::new(web_dir));
            } else {
                tracing::warn!(dir = %web_dir.display(), "web directory not found, static files disabled");
            }
        }

        // Permissive CORS for development
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        app.layer(TraceLayer::new_for_http()).layer(cors)
    }

    /// Bind the configured address and serve until `shutdown` is cancelled
    pub async fn start(self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.config.bind_addr))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener; all sessions are closed on shutdown
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(%addr, "terminal gateway listening");

        let app = self.router();
        let registry = Arc::clone(&self.registry);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                registry.shutdown().await;
            })
            .await
            .context("web server failed")?;

        Ok(())
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }
}
