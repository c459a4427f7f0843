//! Time-driven status refresh and the lane cleanup that follows it.
//!
//! Both passes are independent per key (per job, then per node), so large
//! passes are split into chunks and run on scoped threads. The scope joins
//! every chunk before returning, so no caller ever sees a half-refreshed
//! state.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::scheduler::job::{Job, JobStatus};
use crate::scheduler::node::Node;
use crate::scheduler::store::ClusterState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Jobs that are Done or Terminated after the pass
    pub inactive: usize,
    /// Lane entries dropped by the capacity pass
    pub released: usize,
}

/// Move an active job along its window. Returns true if the job is inactive
/// afterwards.
pub fn refresh_job(job: &mut Job, now: DateTime<Utc>) -> bool {
    if job.status.is_active() {
        if let Some((start, finish)) = job.window() {
            if now >= finish {
                job.status = JobStatus::Done;
            } else if now >= start {
                job.status = JobStatus::Running;
            }
        }
    }
    !job.status.is_active()
}

/// Re-derive the best-fit lane of `node` from the current job windows.
pub fn recompute_best_fit(node: &mut Node, jobs: &HashMap<Uuid, Job>) {
    node.lanes
        .recompute_best_fit(|id| jobs.get(id).and_then(|job| job.expected_finish));
}

/// Run `f` over `items`, fanning out to at most `config.refresh_workers`
/// scoped threads once there are at least `config.parallel_threshold` items.
fn fan_out<T, R, F>(items: Vec<T>, config: &SchedulerConfig, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let workers = config.refresh_workers.max(1);
    if workers == 1 || items.len() < config.parallel_threshold.max(2) {
        return items.into_iter().map(f).collect();
    }

    let chunk_len = items.len().div_ceil(workers);
    let mut chunks: Vec<Vec<T>> = Vec::with_capacity(workers);
    let mut rest = items.into_iter();
    loop {
        let chunk: Vec<T> = rest.by_ref().take(chunk_len).collect();
        if chunk.is_empty() {
            break;
        }
        chunks.push(chunk);
    }

    let f = &f;
    std::thread::scope(|scope| {
        let handles: Vec<_> = chunks
            .into_iter()
            .map(|chunk| scope.spawn(move || chunk.into_iter().map(f).collect::<Vec<R>>()))
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
            .collect()
    })
}

impl ClusterState {
    /// Clock Refresh over every job. Returns the ids of all inactive jobs,
    /// whether they just became inactive or already were.
    pub fn refresh_statuses(
        &mut self,
        now: DateTime<Utc>,
        config: &SchedulerConfig,
    ) -> HashSet<Uuid> {
        let jobs: Vec<&mut Job> = self.jobs.values_mut().collect();
        fan_out(jobs, config, |job| refresh_job(job, now).then_some(job.id))
            .into_iter()
            .flatten()
            .collect()
    }

    /// Capacity pass: drop inactive ids from every node's lanes and recompute
    /// each node's best-fit lane. Returns the number of lane entries dropped.
    pub fn release_inactive(&mut self, inactive: &HashSet<Uuid>, config: &SchedulerConfig) -> usize {
        let jobs = &self.jobs;
        let nodes: Vec<&mut Node> = self.nodes.values_mut().collect();
        fan_out(nodes, config, |node| {
            let released = node.lanes.release(inactive);
            recompute_best_fit(node, jobs);
            released
        })
        .into_iter()
        .sum()
    }

    /// Full refresh: statuses first, then lanes. Runs before every boundary
    /// operation.
    pub fn refresh(&mut self, now: DateTime<Utc>, config: &SchedulerConfig) -> RefreshSummary {
        let inactive = self.refresh_statuses(now, config);
        let released = self.release_inactive(&inactive, config);
        let summary = RefreshSummary {
            inactive: inactive.len(),
            released,
        };
        tracing::debug!(
            inactive = summary.inactive,
            released = summary.released,
            "Cluster state refreshed"
        );
        summary
    }

    /// Refresh only the jobs sitting in `node_id`'s lanes, then clean that
    /// node's lanes.
    pub fn refresh_node(&mut self, node_id: &Uuid, now: DateTime<Utc>) -> RefreshSummary {
        let Some(node) = self.nodes.get_mut(node_id) else {
            return RefreshSummary::default();
        };

        let mut inactive = HashSet::new();
        for id in node.lane_job_ids() {
            if let Some(job) = self.jobs.get_mut(&id) {
                if refresh_job(job, now) {
                    inactive.insert(id);
                }
            }
        }

        let released = node.lanes.release(&inactive);
        recompute_best_fit(node, &self.jobs);
        RefreshSummary {
            inactive: inactive.len(),
            released,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::JobSpec;
    use crate::scheduler::node::NodeSpec;
    use chrono::Duration;

    fn placed_job(start: DateTime<Utc>, run_ms: u64) -> Job {
        let mut job = Job::new(JobSpec::new(run_ms, 1, 128));
        job.set_window(start).unwrap();
        job
    }

    #[test]
    fn refresh_job_follows_window() {
        let now = Utc::now();
        let mut job = placed_job(now + Duration::seconds(1), 1000);

        assert!(!refresh_job(&mut job, now));
        assert_eq!(job.status, JobStatus::Scheduled);

        assert!(!refresh_job(&mut job, now + Duration::seconds(1)));
        assert_eq!(job.status, JobStatus::Running);

        assert!(refresh_job(&mut job, now + Duration::seconds(2)));
        assert_eq!(job.status, JobStatus::Done);
    }

    #[test]
    fn refresh_job_never_moves_backwards() {
        let now = Utc::now();
        let mut job = placed_job(now, 1000);
        refresh_job(&mut job, now + Duration::milliseconds(10));
        assert_eq!(job.status, JobStatus::Running);

        // Looking at an earlier instant does not undo Running
        refresh_job(&mut job, now - Duration::seconds(5));
        assert_eq!(job.status, JobStatus::Running);

        refresh_job(&mut job, now + Duration::seconds(5));
        refresh_job(&mut job, now);
        assert_eq!(job.status, JobStatus::Done);
    }

    #[test]
    fn terminated_jobs_report_inactive_untouched() {
        let now = Utc::now();
        let mut job = placed_job(now, 1000);
        job.status = JobStatus::Terminated;
        assert!(refresh_job(&mut job, now));
        assert_eq!(job.status, JobStatus::Terminated);
    }

    fn seeded_state(jobs_per_node: usize, nodes: usize, now: DateTime<Utc>) -> ClusterState {
        let mut state = ClusterState::new();
        for _ in 0..nodes {
            let mut node = Node::new(NodeSpec::new(1, jobs_per_node, 4, 2048));
            let mut start = now - Duration::seconds(jobs_per_node as i64);
            for _ in 0..jobs_per_node {
                let job = placed_job(start, 1000);
                start += Duration::seconds(1);
                node.lanes.push(0, job.id);
                node.jobs.push(job.id);
                state.insert_job(job);
            }
            state.insert_node(node);
        }
        state
    }

    #[test]
    fn full_refresh_releases_finished_jobs() {
        let now = Utc::now();
        // Each node holds 4 back-to-back 1s jobs ending exactly at `now`
        let mut state = seeded_state(4, 3, now);
        let summary = state.refresh(now, &SchedulerConfig::default());
        assert_eq!(summary.inactive, 12);
        assert_eq!(summary.released, 12);
        for node in state.nodes() {
            assert_eq!(node.lanes.active_job_count(), 0);
            assert_eq!(node.lanes.free_lane_count(), 1);
            assert_eq!(node.jobs.len(), 4);
        }
    }

    #[test]
    fn fanned_out_refresh_matches_inline_refresh() {
        let now = Utc::now();
        let instant = now - Duration::milliseconds(2500);
        let mut inline = seeded_state(6, 40, now);
        let mut parallel = inline.clone();

        let inline_summary = inline.refresh(instant, &SchedulerConfig::default());
        let parallel_summary = parallel.refresh(
            instant,
            &SchedulerConfig::default().with_refresh_workers(4, 2),
        );

        assert_eq!(inline_summary, parallel_summary);
        for node in inline.nodes() {
            let other = parallel.node(&node.id).unwrap();
            assert_eq!(node.lanes, other.lanes);
        }
        for job in inline.jobs() {
            assert_eq!(job.status, parallel.job(&job.id).unwrap().status);
        }
    }

    #[test]
    fn refresh_node_only_touches_that_node() {
        let now = Utc::now();
        let mut state = seeded_state(2, 2, now);
        let ids = state.node_ids().to_vec();

        let summary = state.refresh_node(&ids[0], now);
        assert_eq!(summary.released, 2);
        assert_eq!(state.node(&ids[0]).unwrap().lanes.active_job_count(), 0);
        assert_eq!(state.node(&ids[1]).unwrap().lanes.active_job_count(), 2);
    }
}
