pub mod error;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub use error::ApiError;

use crate::config::ServerConfig;
use crate::scheduler::{ClusterState, Job, JobSpec, Node, NodeSpec, Scheduler};

#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Arc<RwLock<Scheduler>>,
}

impl ApiState {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub total_run_time: u64,
    pub vcpu_units: u32,
    pub memory: u32,
    pub node_id: Option<Uuid>,
    pub node_thread_id: Option<usize>,
    pub expected_to_start_at: Option<DateTime<Utc>>,
    pub expected_to_finish_at: Option<DateTime<Utc>>,
    pub status: String,
}

impl From<&Job> for JobResponse {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            total_run_time: job.total_run_time,
            vcpu_units: job.vcpu_units,
            memory: job.memory,
            node_id: job.node_id,
            node_thread_id: job.thread_id,
            expected_to_start_at: job.expected_start,
            expected_to_finish_at: job.expected_finish,
            status: job.status.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NodeResponse {
    pub id: Uuid,
    pub max_concurrent_jobs: usize,
    pub max_total_jobs: usize,
    pub vcpu_units: u32,
    pub memory: u32,
    pub jobs: Vec<JobResponse>,
}

impl NodeResponse {
    /// Render a node with its placement history resolved against `state`.
    pub fn from_node(node: &Node, state: &ClusterState) -> Self {
        Self {
            id: node.id,
            max_concurrent_jobs: node.max_concurrent_jobs,
            max_total_jobs: node.max_total_jobs,
            vcpu_units: node.vcpu_units,
            memory: node.memory,
            jobs: node
                .jobs
                .iter()
                .filter_map(|id| state.job(id))
                .map(JobResponse::from)
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    healthy: bool,
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(Duration::from_secs(86_400));

    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

/// Build the HTTP API. Job and node routes live under `config.api_prefix`;
/// the health check is always at `/status`.
pub fn router(state: ApiState, config: &ServerConfig) -> Router {
    let prefix = config.api_prefix.trim_end_matches('/');

    Router::new()
        .route("/status", get(health_handler))
        .route(
            &format!("{}/jobs", prefix),
            get(list_jobs_handler).post(submit_jobs_handler),
        )
        .route(
            &format!("{}/jobs/{{job_id}}", prefix),
            delete(terminate_job_handler),
        )
        .route(
            &format!("{}/nodes", prefix),
            get(list_nodes_handler).post(provision_nodes_handler),
        )
        .route(
            &format!("{}/nodes/{{node_id}}", prefix),
            delete(remove_node_handler),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.cors_origins))
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse { healthy: true })
}

async fn list_jobs_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let mut scheduler = state.scheduler.write().await;
    let jobs: Vec<JobResponse> = scheduler.list_jobs().iter().map(JobResponse::from).collect();
    Json(jobs)
}

async fn submit_jobs_handler(
    State(state): State<ApiState>,
    payload: Result<Json<Vec<JobSpec>>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(specs) = payload?;
    specs.iter().try_for_each(JobSpec::validate)?;

    let mut scheduler = state.scheduler.write().await;
    let jobs = scheduler.submit_jobs(specs)?;
    let body: Vec<JobResponse> = jobs.iter().map(JobResponse::from).collect();
    Ok((StatusCode::CREATED, Json(body)))
}

async fn terminate_job_handler(
    State(state): State<ApiState>,
    Path(job_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.scheduler.write().await.terminate_job(job_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_nodes_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let mut scheduler = state.scheduler.write().await;
    let nodes = scheduler.list_nodes();
    let body: Vec<NodeResponse> = nodes
        .iter()
        .map(|node| NodeResponse::from_node(node, scheduler.state()))
        .collect();
    Json(body)
}

async fn provision_nodes_handler(
    State(state): State<ApiState>,
    payload: Result<Json<Vec<NodeSpec>>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(specs) = payload?;
    specs.iter().try_for_each(NodeSpec::validate)?;

    let mut scheduler = state.scheduler.write().await;
    let nodes = scheduler.provision_nodes(specs);
    let body: Vec<NodeResponse> = nodes
        .iter()
        .map(|node| NodeResponse::from_node(node, scheduler.state()))
        .collect();
    Ok((StatusCode::CREATED, Json(body)))
}

async fn remove_node_handler(
    State(state): State<ApiState>,
    Path(node_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.scheduler.write().await.remove_node(node_id)?;
    Ok(StatusCode::NO_CONTENT)
}
