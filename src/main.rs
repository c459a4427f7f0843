use std::net::{IpAddr, SocketAddr};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use lanesim::config::{AppConfig, SchedulerConfig, ServerConfig};
use lanesim::server::Server;
use lanesim::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "lanesim")]
#[command(version)]
#[command(about = "Simulated cluster job scheduler with lane-based best-fit placement")]
struct Args {
    /// Address to bind the HTTP API to
    #[arg(long, env = "LANESIM_HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port for the HTTP API
    #[arg(long, env = "LANESIM_PORT", default_value = "8080")]
    port: u16,

    /// Prefix for the jobs and nodes routes
    #[arg(long, env = "LANESIM_API_PREFIX", default_value = "/api/v1")]
    api_prefix: String,

    /// Allowed CORS origins (comma-separated). Empty allows any origin.
    #[arg(long, env = "LANESIM_CORS_ORIGINS", default_value = "http://localhost:3000")]
    cors_origins: String,

    /// Skip the vCPU/memory feasibility check when placing jobs
    #[arg(long, env = "LANESIM_DISABLE_RESOURCE_CHECKS")]
    disable_resource_checks: bool,

    /// Maximum threads used by a status refresh pass
    #[arg(long, env = "LANESIM_REFRESH_WORKERS", default_value = "4")]
    refresh_workers: usize,

    /// Number of jobs/nodes before a refresh pass goes parallel
    #[arg(long, env = "LANESIM_PARALLEL_THRESHOLD", default_value = "1024")]
    parallel_threshold: usize,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "LANESIM_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> AppConfig {
        let server = ServerConfig::new(SocketAddr::new(self.host, self.port))
            .with_api_prefix(self.api_prefix)
            .with_cors_origins(&self.cors_origins);

        let mut scheduler = SchedulerConfig::default()
            .with_refresh_workers(self.refresh_workers, self.parallel_threshold);
        if self.disable_resource_checks {
            scheduler = scheduler.without_resource_checks();
        }

        AppConfig { server, scheduler }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let config = args.into_config();
    tracing::info!(
        listen_addr = %config.server.listen_addr,
        resource_checks = config.scheduler.resource_checks,
        refresh_workers = config.scheduler.refresh_workers,
        "Starting lanesim"
    );

    let shutdown = install_shutdown_handler();
    Server::new(config).run(shutdown).await
}
