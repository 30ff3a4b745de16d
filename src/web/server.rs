//! Web server for the transfer API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::storage::StorageRoot;
use crate::upload::UploadStore;
use crate::{NimbusError, Result};

use super::handlers::AppState;
use super::router::{create_health_router, create_router};

/// Minimum interval between session TTL sweeps.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Multipart framing headroom on top of one chunk per request.
const BODY_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Web server for the transfer API.
pub struct WebServer {
    /// Server address.
    addr: SocketAddr,
    /// Application state.
    app_state: Arc<AppState>,
    /// Allowed CORS origins.
    cors_origins: Vec<String>,
}

impl WebServer {
    /// Create a new web server from the full configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let addr = format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .map_err(|_| {
                NimbusError::Config(format!(
                    "invalid server address {}:{}",
                    config.server.host, config.server.port
                ))
            })?;

        let storage = StorageRoot::new(&config.storage.root)?;
        std::fs::create_dir_all(&config.storage.staging)?;
        let uploads = Arc::new(UploadStore::new(
            &config.storage.staging,
            config.transfer.session_ttl(),
        ));
        let max_body_bytes =
            config.transfer.chunk_size_bytes() as usize + BODY_OVERHEAD_BYTES;

        Ok(Self {
            addr,
            app_state: Arc::new(AppState::new(storage, uploads, max_body_bytes)),
            cors_origins: config.server.cors_origins.clone(),
        })
    }

    /// Get the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Start the session TTL sweep background task.
    ///
    /// Removes upload sessions idle past the TTL along with their staging
    /// files. The sweep interval is a quarter of the TTL, floored so a
    /// short test TTL cannot busy-loop.
    fn start_session_sweep_task(store: Arc<UploadStore>) {
        tokio::spawn(async move {
            let period = (store.ttl() / 4).max(MIN_SWEEP_INTERVAL);
            let mut interval = tokio::time::interval(period);

            // Skip the first immediate tick
            interval.tick().await;

            loop {
                interval.tick().await;
                let swept = store.sweep_expired().await;
                if swept > 0 {
                    tracing::info!(swept, "Swept expired upload sessions");
                } else {
                    tracing::debug!("No expired upload sessions to sweep");
                }
            }
        });
    }

    /// Remove staging files orphaned by an unclean shutdown, then start the
    /// periodic sweep.
    async fn start_maintenance(store: Arc<UploadStore>) {
        match store.clean_orphaned_staging().await {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, "Removed orphaned staging files"),
            Err(e) => tracing::warn!(error = %e, "Failed to clean staging directory"),
        }
        Self::start_session_sweep_task(store);
    }

    /// Run the web server.
    pub async fn run(self) -> std::result::Result<(), std::io::Error> {
        let uploads = Arc::clone(&self.app_state.uploads);
        let router =
            create_router(self.app_state, &self.cors_origins).merge(create_health_router());

        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;

        Self::start_maintenance(uploads).await;
        tracing::info!("Transfer API listening on http://{}", local_addr);

        axum::serve(listener, router).await
    }

    /// Run the server and return the actual bound address.
    ///
    /// This is useful for testing when binding to port 0.
    pub async fn run_with_addr(self) -> std::result::Result<SocketAddr, std::io::Error> {
        let uploads = Arc::clone(&self.app_state.uploads);
        let router =
            create_router(self.app_state, &self.cors_origins).merge(create_health_router());

        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;

        Self::start_maintenance(uploads).await;
        tracing::info!("Transfer API listening on http://{}", local_addr);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!("Web server error: {}", e);
            }
        });

        Ok(local_addr)
    }
}
