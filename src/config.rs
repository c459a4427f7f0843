use std::net::SocketAddr;

/// Tuning for the scheduling engine.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Run the vCPU/memory feasibility check on every placement.
    /// When false every candidate lane is treated as feasible.
    pub resource_checks: bool,
    /// Upper bound on scoped threads used by a refresh pass.
    pub refresh_workers: usize,
    /// Minimum number of keys before a refresh pass fans out.
    /// Smaller passes run inline on the calling thread.
    pub parallel_threshold: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            resource_checks: true,
            refresh_workers: 4,
            parallel_threshold: 1024,
        }
    }
}

impl SchedulerConfig {
    pub fn without_resource_checks(mut self) -> Self {
        self.resource_checks = false;
        self
    }

    pub fn with_refresh_workers(mut self, workers: usize, parallel_threshold: usize) -> Self {
        self.refresh_workers = workers.max(1);
        self.parallel_threshold = parallel_threshold;
        self
    }
}

/// HTTP boundary settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Prefix for the jobs and nodes routes, e.g. "/api/v1"
    pub api_prefix: String,
    /// Origins allowed by the CORS layer. Empty means any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "0.0.0.0:8080"
                .parse()
                .expect("default listen address is valid"),
            api_prefix: "/api/v1".to_string(),
            cors_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_prefix = normalize_prefix(&prefix.into());
        self
    }

    pub fn with_cors_origins(mut self, origins: &str) -> Self {
        self.cors_origins = parse_origins(origins);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
}

/// Split a comma-separated origin list, dropping blanks.
pub fn parse_origins(origins: &str) -> Vec<String> {
    origins
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
