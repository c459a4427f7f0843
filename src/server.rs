use std::sync::Arc;

use axum::Router;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::api::{router, ApiState};
use crate::config::AppConfig;
use crate::scheduler::Scheduler;

/// Wires the scheduler to the HTTP API.
pub struct Server {
    pub config: AppConfig,
    pub scheduler: Arc<RwLock<Scheduler>>,
}

impl Server {
    pub fn new(config: AppConfig) -> Self {
        let scheduler = Scheduler::new(config.scheduler.clone());
        Self::with_scheduler(config, scheduler)
    }

    pub fn with_scheduler(config: AppConfig, scheduler: Scheduler) -> Self {
        Self {
            config,
            scheduler: Arc::new(RwLock::new(scheduler)),
        }
    }

    pub fn router(&self) -> Router {
        let state = ApiState {
            scheduler: self.scheduler.clone(),
        };
        router(state, &self.config.server)
    }

    /// Serve the API until `shutdown` is cancelled, then drain in-flight
    /// requests and return.
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address cannot be bound or the server
    /// fails while running.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), Box<dyn std::error::Error>> {
        let addr = self.config.server.listen_addr;
        let app = self.router();

        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(addr = %addr, error = %e, "Failed to bind API server");
            e
        })?;

        tracing::info!(
            addr = %addr,
            api_prefix = %self.config.server.api_prefix,
            resource_checks = self.config.scheduler.resource_checks,
            "Scheduler API listening"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        tracing::info!("Scheduler API stopped");
        Ok(())
    }
}
