use std::collections::HashMap;
use std::ops::AddAssign;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::scheduler::job::Job;
use crate::scheduler::node::{BestFit, Node};

/// Aggregate vCPU/memory demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub vcpu_units: u64,
    pub memory: u64,
}

impl ResourceUsage {
    pub fn of(job: &Job) -> Self {
        Self {
            vcpu_units: u64::from(job.vcpu_units),
            memory: u64::from(job.memory),
        }
    }

    /// Component-wise maximum.
    pub fn max(self, other: Self) -> Self {
        Self {
            vcpu_units: self.vcpu_units.max(other.vcpu_units),
            memory: self.memory.max(other.memory),
        }
    }

    pub fn fits(&self, node: &Node) -> bool {
        self.vcpu_units <= u64::from(node.vcpu_units) && self.memory <= u64::from(node.memory)
    }
}

impl AddAssign for ResourceUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.vcpu_units += rhs.vcpu_units;
        self.memory += rhs.memory;
    }
}

/// Half-open interval overlap: `[s1, e1)` and `[s2, e2)`.
pub fn overlaps(
    (s1, e1): (DateTime<Utc>, DateTime<Utc>),
    (s2, e2): (DateTime<Utc>, DateTime<Utc>),
) -> bool {
    s1 < e2 && s2 < e1
}

/// Worst-case usage on `node` while `job` runs in `slot`.
///
/// Every other lane contributes the per-resource peak of the jobs whose
/// windows overlap the candidate window; a lane runs serially, so at most one
/// of those jobs is live at any instant. The candidate lane itself is skipped
/// because the job would be appended after its tail. `None` when the
/// candidate window cannot be represented.
pub fn peak_usage(
    job: &Job,
    node: &Node,
    slot: BestFit,
    jobs: &HashMap<Uuid, Job>,
    now: DateTime<Utc>,
) -> Option<ResourceUsage> {
    let window = job.window_at(slot.available_at.unwrap_or(now))?;

    let mut usage = ResourceUsage::of(job);
    for (lane, ids) in node.lanes.lanes().iter().enumerate() {
        if lane == slot.lane {
            continue;
        }
        let lane_peak = ids
            .iter()
            .filter_map(|id| jobs.get(id))
            .filter(|other| other.window().is_some_and(|w| overlaps(w, window)))
            .map(ResourceUsage::of)
            .fold(ResourceUsage::default(), ResourceUsage::max);
        usage += lane_peak;
    }
    Some(usage)
}

/// Whether placing `job` in `slot` keeps `node` within its vCPU and memory.
/// A window past the representable range is never feasible.
pub fn is_feasible(
    job: &Job,
    node: &Node,
    slot: BestFit,
    jobs: &HashMap<Uuid, Job>,
    now: DateTime<Utc>,
) -> bool {
    peak_usage(job, node, slot, jobs, now).is_some_and(|usage| usage.fits(node))
}
