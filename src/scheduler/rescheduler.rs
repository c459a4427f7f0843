use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::scheduler::job::{Job, JobStatus};
use crate::scheduler::placement::Placement;
use crate::scheduler::refresh::recompute_best_fit;
use crate::scheduler::Scheduler;

impl Scheduler {
    /// Re-sequence the jobs queued behind a job that was just terminated.
    ///
    /// Downstream jobs keep their lane order and are packed back to back,
    /// starting now if the terminated job was running (or nothing precedes
    /// it), otherwise right after the preceding job. The terminated entry is
    /// dropped from the lane by the node refresh that follows.
    pub fn handle_termination(&mut self, job_id: Uuid, previous: JobStatus) {
        let now = self.clock.now();
        let Some(node_id) = self.state.job(&job_id).and_then(|job| job.node_id) else {
            return;
        };

        let plan = self.state.node(&node_id).and_then(|node| {
            let (lane, pos) = node.lanes.position_of(&job_id)?;
            let ids = node.lanes.lane(lane)?;
            let to_reschedule = ids[pos + 1..].to_vec();
            let tail_finish = pos
                .checked_sub(1)
                .and_then(|prev| self.state.job(&ids[prev]))
                .and_then(|job| job.expected_finish);
            Some((to_reschedule, tail_finish))
        });

        if let Some((to_reschedule, tail_finish)) = plan {
            let (mut start, starts_now) = match tail_finish {
                Some(finish) if previous != JobStatus::Running => (finish, false),
                _ => (now, true),
            };

            // Starts only move earlier here, so every new window fits whenever
            // the old one did. Plan them all before touching any job.
            let mut windows = Vec::with_capacity(to_reschedule.len());
            for id in &to_reschedule {
                let Some((s, f)) = self.state.job(id).and_then(|job| job.window_at(start)) else {
                    break;
                };
                windows.push((*id, s));
                start = f;
            }

            if windows.len() == to_reschedule.len() {
                for (i, (id, s)) in windows.into_iter().enumerate() {
                    if let Some(job) = self.state.job_mut(&id) {
                        if job.set_window(s).is_ok() && i == 0 && starts_now {
                            job.status = JobStatus::Running;
                        }
                    }
                }
            } else {
                tracing::warn!(
                    job_id = %job_id,
                    node_id = %node_id,
                    "Lane left unchanged, re-sequenced windows out of range"
                );
            }

            if !to_reschedule.is_empty() {
                tracing::debug!(
                    job_id = %job_id,
                    node_id = %node_id,
                    rescheduled = to_reschedule.len(),
                    starts_now,
                    "Lane re-sequenced after termination"
                );
            }
        }

        self.state.refresh_node(&node_id, now);
    }

    /// Delete a node and place every job from its lanes elsewhere.
    ///
    /// Placements are journaled; if one fails the journal is unwound in
    /// reverse, the displaced jobs get their old records back and the node is
    /// reinserted where it was.
    pub(crate) fn evacuate(&mut self, node_id: Uuid) -> Result<()> {
        let (position, node) = self
            .state
            .remove_node(&node_id)
            .ok_or(SchedulerError::NodeNotFound(node_id))?;

        let displaced = node.lane_job_ids();
        let snapshots: Vec<Job> = displaced
            .iter()
            .filter_map(|id| self.state.job(id).cloned())
            .collect();

        let mut journal: Vec<(Uuid, Placement)> = Vec::with_capacity(displaced.len());
        for job_id in &displaced {
            match self.schedule(*job_id) {
                Ok(placement) => journal.push((*job_id, placement)),
                Err(e) => {
                    self.unwind(journal);
                    for job in snapshots {
                        self.state.insert_job(job);
                    }
                    self.state.restore_node(position, node);
                    tracing::warn!(
                        node_id = %node_id,
                        displaced = displaced.len(),
                        error = %e,
                        "Node removal aborted, jobs could not be relocated"
                    );
                    return Err(e);
                }
            }
        }

        tracing::info!(node_id = %node_id, relocated = journal.len(), "Node removed");
        Ok(())
    }

    fn unwind(&mut self, journal: Vec<(Uuid, Placement)>) {
        for (job_id, placement) in journal.into_iter().rev() {
            if let Some(node) = self.state.nodes.get_mut(&placement.node_id) {
                node.lanes.pop(placement.lane, &job_id);
                node.forget_last(&job_id);
                recompute_best_fit(node, &self.state.jobs);
            }
        }
    }
}
