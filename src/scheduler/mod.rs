pub mod clock;
pub mod feasibility;
pub mod job;
pub mod node;
pub mod placement;
pub mod refresh;
pub mod rescheduler;
pub mod store;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use clock::{Clock, ManualClock, SystemClock};
pub use job::{Job, JobSpec, JobStatus};
pub use node::{BestFit, LaneTable, Node, NodeSpec};
pub use placement::Placement;
pub use refresh::RefreshSummary;
pub use store::ClusterState;

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};

/// The scheduling engine.
///
/// Owns the cluster state and is its only writer. Every public operation
/// below first advances the simulated world to "now" (status refresh followed
/// by lane cleanup) and only then performs its own mutation, so placement
/// decisions never read stale lanes. Callers share it behind a single lock.
#[derive(Debug)]
pub struct Scheduler {
    state: ClusterState,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: ClusterState::new(),
            clock,
            config,
        }
    }

    pub fn state(&self) -> &ClusterState {
        &self.state
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Bring every job status and lane up to date with the clock.
    pub fn refresh(&mut self) -> RefreshSummary {
        let now = self.clock.now();
        self.state.refresh(now, &self.config)
    }

    /// All jobs in submission order
    pub fn list_jobs(&mut self) -> Vec<Job> {
        self.refresh();
        self.state.jobs().into_iter().cloned().collect()
    }

    /// Create and place a batch of jobs, all or nothing.
    pub fn submit_jobs(&mut self, specs: Vec<JobSpec>) -> Result<Vec<Job>> {
        self.refresh();
        self.submit_batch(specs)
    }

    /// Terminate a Scheduled or Running job and pull the rest of its lane forward.
    pub fn terminate_job(&mut self, job_id: Uuid) -> Result<()> {
        self.refresh();

        let job = self
            .state
            .job_mut(&job_id)
            .ok_or(SchedulerError::JobNotFound(job_id))?;
        let previous = job.status;
        if !previous.is_active() {
            return Err(SchedulerError::InvalidTerminationState(job_id));
        }
        job.status = JobStatus::Terminated;

        self.handle_termination(job_id, previous);
        tracing::info!(job_id = %job_id, previous_status = %previous, "Job terminated");
        Ok(())
    }

    /// All nodes in provisioning order
    pub fn list_nodes(&mut self) -> Vec<Node> {
        self.refresh();
        self.state.nodes().into_iter().cloned().collect()
    }

    pub fn provision_nodes(&mut self, specs: Vec<NodeSpec>) -> Vec<Node> {
        self.refresh();

        specs
            .into_iter()
            .map(|spec| {
                let node = Node::new(spec);
                tracing::info!(
                    node_id = %node.id,
                    lanes = node.max_concurrent_jobs,
                    max_total_jobs = node.max_total_jobs,
                    vcpu_units = node.vcpu_units,
                    memory = node.memory,
                    "Node provisioned"
                );
                self.state.insert_node(node.clone());
                node
            })
            .collect()
    }

    /// Remove a node, moving every job in its lanes onto the remaining nodes.
    /// If any of them cannot be placed the node stays and nothing moves.
    pub fn remove_node(&mut self, node_id: Uuid) -> Result<()> {
        self.refresh();
        self.evacuate(node_id)
    }
}
