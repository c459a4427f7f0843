use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::scheduler::feasibility::is_feasible;
use crate::scheduler::job::{Job, JobSpec, JobStatus};
use crate::scheduler::refresh::recompute_best_fit;
use crate::scheduler::Scheduler;

/// Where and when a job was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub node_id: Uuid,
    pub lane: usize,
    pub start: DateTime<Utc>,
    /// The lane was free, so the job starts right away.
    pub immediate: bool,
}

impl Scheduler {
    /// Place an existing job on the best node and lane.
    ///
    /// Nodes are visited in provisioning order. The first feasible node
    /// offering a free lane wins outright; otherwise the feasible node whose
    /// best lane frees up earliest is chosen, earlier-provisioned nodes
    /// winning ties. A slot whose window would end past the last
    /// representable instant is never a candidate.
    pub fn schedule(&mut self, job_id: Uuid) -> Result<Placement> {
        let now = self.clock.now();
        let job = self
            .state
            .job(&job_id)
            .ok_or(SchedulerError::JobNotFound(job_id))?;

        let mut earliest: Option<Placement> = None;
        let mut immediate: Option<Placement> = None;
        for node in self.state.nodes() {
            if !node.has_room() {
                continue;
            }
            let slot = node.lanes.best_fit();
            if job.window_at(slot.available_at.unwrap_or(now)).is_none() {
                continue;
            }
            if self.config.resource_checks && !is_feasible(job, node, slot, &self.state.jobs, now)
            {
                continue;
            }

            match slot.available_at {
                None => {
                    immediate = Some(Placement {
                        node_id: node.id,
                        lane: slot.lane,
                        start: now,
                        immediate: true,
                    });
                    break;
                }
                Some(at) => {
                    if earliest.is_none_or(|best| at < best.start) {
                        earliest = Some(Placement {
                            node_id: node.id,
                            lane: slot.lane,
                            start: at,
                            immediate: false,
                        });
                    }
                }
            }
        }

        let placement = immediate
            .or(earliest)
            .ok_or(SchedulerError::NoCapacityAvailable)?;
        self.commit(job_id, placement)?;

        tracing::debug!(
            job_id = %job_id,
            node_id = %placement.node_id,
            lane = placement.lane,
            start = %placement.start,
            immediate = placement.immediate,
            "Job placed"
        );
        Ok(placement)
    }

    fn commit(&mut self, job_id: Uuid, placement: Placement) -> Result<()> {
        let job = self
            .state
            .jobs
            .get_mut(&job_id)
            .ok_or(SchedulerError::JobNotFound(job_id))?;
        job.set_window(placement.start)?;
        job.node_id = Some(placement.node_id);
        job.thread_id = Some(placement.lane);
        job.status = JobStatus::Scheduled;

        if let Some(node) = self.state.nodes.get_mut(&placement.node_id) {
            node.lanes.push(placement.lane, job_id);
            node.jobs.push(job_id);
            recompute_best_fit(node, &self.state.jobs);
        }
        Ok(())
    }

    /// Create and place a batch, longest job first.
    ///
    /// If any job cannot be placed every job of the batch is withdrawn again
    /// and the placement error is returned.
    pub fn submit_batch(&mut self, mut specs: Vec<JobSpec>) -> Result<Vec<Job>> {
        specs.sort_by(|a, b| b.total_run_time.cmp(&a.total_run_time));

        let mut batch = Vec::with_capacity(specs.len());
        for spec in specs {
            let job = Job::new(spec);
            let job_id = job.id;
            self.state.insert_job(job);
            batch.push(job_id);

            if let Err(e) = self.schedule(job_id) {
                tracing::warn!(
                    batch_size = batch.len(),
                    failed_job = %job_id,
                    error = %e,
                    "Job batch could not be placed, rolling back"
                );
                self.rollback_batch(&batch);
                return Err(e);
            }
        }

        tracing::info!(jobs = batch.len(), "Job batch placed");
        Ok(batch
            .iter()
            .filter_map(|id| self.state.job(id).cloned())
            .collect())
    }

    /// Terminate the batch, let the capacity pass free its lane slots, then
    /// delete every trace of it.
    fn rollback_batch(&mut self, batch: &[Uuid]) {
        for id in batch {
            if let Some(job) = self.state.job_mut(id) {
                job.status = JobStatus::Terminated;
            }
        }
        self.refresh();

        let ids: HashSet<Uuid> = batch.iter().copied().collect();
        for id in batch {
            self.state.remove_job(id);
        }
        for node in self.state.nodes.values_mut() {
            node.forget_jobs(&ids);
        }
    }
}
