//! Randomised operation sequences against the scheduler, checking the lane
//! bookkeeping and all-or-nothing guarantees after every step.

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;
use uuid::Uuid;

use lanesim::config::SchedulerConfig;
use lanesim::error::SchedulerError;
use lanesim::scheduler::{Clock, Job, JobSpec, JobStatus, ManualClock, Node, NodeSpec, Scheduler};

#[derive(Debug, Clone)]
enum Op {
    Provision(Vec<NodeSpec>),
    Submit(Vec<JobSpec>),
    Terminate(usize),
    Remove(usize),
    Advance(i64),
}

fn node_spec() -> impl Strategy<Value = NodeSpec> {
    (0usize..4, 0usize..6, 1u32..16, 1024u32..16_384)
        .prop_map(|(lanes, total, vcpu, memory)| NodeSpec::new(lanes, total, vcpu, memory))
}

fn job_spec() -> impl Strategy<Value = JobSpec> {
    (1u64..20_000, 1u32..8, 128u32..8192)
        .prop_map(|(run_time, vcpu, memory)| JobSpec::new(run_time, vcpu, memory))
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        1 => prop::collection::vec(node_spec(), 1..3).prop_map(Op::Provision),
        3 => prop::collection::vec(job_spec(), 1..6).prop_map(Op::Submit),
        1 => any::<usize>().prop_map(Op::Terminate),
        1 => any::<usize>().prop_map(Op::Remove),
        2 => (0i64..15_000).prop_map(Op::Advance),
    ]
}

fn snapshot(scheduler: &Scheduler) -> (Vec<Job>, Vec<Node>) {
    let state = scheduler.state();
    (
        state.jobs().into_iter().cloned().collect(),
        state.nodes().into_iter().cloned().collect(),
    )
}

fn rank(status: JobStatus) -> u8 {
    match status {
        JobStatus::Scheduled => 0,
        JobStatus::Running => 1,
        JobStatus::Done | JobStatus::Terminated => 2,
    }
}

fn check_invariants(scheduler: &Scheduler) -> Result<(), TestCaseError> {
    let state = scheduler.state();
    for node in state.nodes() {
        let lanes = node.lanes.lanes();
        prop_assert_eq!(node.lanes.active_job_count(), node.lanes.entry_count());
        prop_assert!(node.lanes.active_job_count() <= node.max_total_jobs);
        prop_assert_eq!(
            node.lanes.free_lane_count(),
            lanes.iter().filter(|l| l.is_empty()).count()
        );
        for (lane, ids) in lanes.iter().enumerate() {
            for id in ids {
                let job = state.job(id).expect("lane entry without a record");
                prop_assert!(job.status.is_active());
                prop_assert_eq!(job.node_id, Some(node.id));
                prop_assert_eq!(job.thread_id, Some(lane));
                prop_assert!(node.jobs.contains(id));
            }
            for pair in ids.windows(2) {
                let (a, b) = (state.job(&pair[0]).unwrap(), state.job(&pair[1]).unwrap());
                prop_assert!(b.expected_start >= a.expected_finish);
            }
        }
    }

    for job in state.jobs() {
        if !job.status.is_active() {
            continue;
        }
        let node = job.node_id.and_then(|id| state.node(&id));
        prop_assert!(node.is_some(), "active job {} is not on any node", job.id);
        let (lane, _) = node
            .and_then(|n| n.lanes.position_of(&job.id))
            .expect("active job missing from its lane");
        prop_assert_eq!(Some(lane), job.thread_id);
    }
    Ok(())
}

fn apply(scheduler: &mut Scheduler, clock: &ManualClock, op: Op) -> Result<(), TestCaseError> {
    match op {
        Op::Provision(specs) => {
            let count = specs.len();
            let before = scheduler.state().node_count();
            scheduler.provision_nodes(specs);
            prop_assert_eq!(scheduler.state().node_count(), before + count);
        }
        Op::Submit(specs) => {
            scheduler.refresh();
            let before = snapshot(scheduler);
            let count = specs.len();
            match scheduler.submit_jobs(specs) {
                Ok(jobs) => {
                    prop_assert_eq!(jobs.len(), count);
                    prop_assert_eq!(scheduler.state().job_count(), before.0.len() + count);
                }
                Err(e) => {
                    prop_assert_eq!(e, SchedulerError::NoCapacityAvailable);
                    prop_assert_eq!(snapshot(scheduler), before);
                }
            }
        }
        Op::Terminate(index) => {
            scheduler.refresh();
            let jobs: Vec<(Uuid, JobStatus)> = scheduler
                .state()
                .jobs()
                .iter()
                .map(|j| (j.id, j.status))
                .collect();
            if jobs.is_empty() {
                return Ok(());
            }
            let (id, status) = jobs[index % jobs.len()];
            let result = scheduler.terminate_job(id);
            if status.is_active() {
                prop_assert!(result.is_ok());
                let job = scheduler.state().job(&id).unwrap();
                prop_assert_eq!(job.status, JobStatus::Terminated);
            } else {
                prop_assert_eq!(result, Err(SchedulerError::InvalidTerminationState(id)));
            }
        }
        Op::Remove(index) => {
            scheduler.refresh();
            let ids = scheduler.state().node_ids();
            if ids.is_empty() {
                return Ok(());
            }
            let id = ids[index % ids.len()];
            let before = snapshot(scheduler);
            match scheduler.remove_node(id) {
                Ok(()) => prop_assert!(scheduler.state().node(&id).is_none()),
                Err(e) => {
                    prop_assert_eq!(e, SchedulerError::NoCapacityAvailable);
                    prop_assert_eq!(snapshot(scheduler), before);
                }
            }
        }
        Op::Advance(ms) => {
            scheduler.refresh();
            let before: HashMap<Uuid, JobStatus> = scheduler
                .state()
                .jobs()
                .iter()
                .map(|j| (j.id, j.status))
                .collect();
            clock.advance_ms(ms);
            scheduler.refresh();
            for job in scheduler.state().jobs() {
                let old = before[&job.id];
                prop_assert!(rank(job.status) >= rank(old));
                if !old.is_active() {
                    prop_assert_eq!(job.status, old);
                }
            }
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_operations_keep_lanes_consistent(ops in prop::collection::vec(op(), 1..25)) {
        let clock = ManualClock::default();
        let mut scheduler = Scheduler::with_clock(SchedulerConfig::default(), Arc::new(clock.clone()));

        for op in ops {
            apply(&mut scheduler, &clock, op)?;
            check_invariants(&scheduler)?;
        }
    }

    #[test]
    fn parallel_refresh_matches_inline(
        nodes in prop::collection::vec(node_spec(), 1..5),
        batches in prop::collection::vec(prop::collection::vec(job_spec(), 1..4), 1..6),
        advance in 0i64..40_000,
    ) {
        let inline_clock = ManualClock::default();
        let parallel_clock = ManualClock::new(inline_clock.now());
        let mut inline = Scheduler::with_clock(SchedulerConfig::default(), Arc::new(inline_clock.clone()));
        let mut parallel = Scheduler::with_clock(
            SchedulerConfig::default().with_refresh_workers(3, 1),
            Arc::new(parallel_clock.clone()),
        );

        inline.provision_nodes(nodes.clone());
        parallel.provision_nodes(nodes);
        for batch in batches {
            let a = inline.submit_jobs(batch.clone()).map(|jobs| jobs.len());
            let b = parallel.submit_jobs(batch).map(|jobs| jobs.len());
            prop_assert_eq!(a, b);
        }

        inline_clock.advance_ms(advance);
        parallel_clock.advance_ms(advance);
        let statuses = |s: &mut Scheduler| -> Vec<JobStatus> {
            s.list_jobs().iter().map(|j| j.status).collect()
        };
        prop_assert_eq!(statuses(&mut inline), statuses(&mut parallel));
        check_invariants(&inline)?;
        check_invariants(&parallel)?;
    }
}
