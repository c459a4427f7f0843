use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::scheduler::job::check_range;

pub const NODE_VCPU_RANGE: (u32, u32) = (1, 360);
pub const NODE_MEMORY_RANGE: (u32, u32) = (1024, 896_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub max_concurrent_jobs: usize,
    pub max_total_jobs: usize,
    pub vcpu_units: u32,
    /// MB
    pub memory: u32,
}

impl NodeSpec {
    pub fn new(
        max_concurrent_jobs: usize,
        max_total_jobs: usize,
        vcpu_units: u32,
        memory: u32,
    ) -> Self {
        Self {
            max_concurrent_jobs,
            max_total_jobs,
            vcpu_units,
            memory,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_range("vcpu_units", self.vcpu_units, NODE_VCPU_RANGE)?;
        check_range("memory", self.memory, NODE_MEMORY_RANGE)
    }
}

/// The lane judged cheapest to extend next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BestFit {
    pub lane: usize,
    /// `None` means the lane can take a job right away.
    pub available_at: Option<DateTime<Utc>>,
}

impl BestFit {
    const IMMEDIATE_FIRST: BestFit = BestFit {
        lane: 0,
        available_at: None,
    };
}

/// Per-node lane bookkeeping.
///
/// Each lane is a FIFO of job ids executed strictly one after another. The
/// counters are derived from the lane contents and kept in step by every
/// mutation here; `best_fit` must be recomputed after each mutation via
/// [`LaneTable::recompute_best_fit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneTable {
    lanes: Vec<Vec<Uuid>>,
    active_job_count: usize,
    free_lane_count: usize,
    best_fit: BestFit,
}

impl LaneTable {
    pub fn new(lane_count: usize) -> Self {
        Self {
            lanes: vec![Vec::new(); lane_count],
            active_job_count: 0,
            free_lane_count: lane_count,
            best_fit: BestFit::IMMEDIATE_FIRST,
        }
    }

    pub fn lanes(&self) -> &[Vec<Uuid>] {
        &self.lanes
    }

    pub fn lane(&self, lane: usize) -> Option<&[Uuid]> {
        self.lanes.get(lane).map(Vec::as_slice)
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn active_job_count(&self) -> usize {
        self.active_job_count
    }

    pub fn free_lane_count(&self) -> usize {
        self.free_lane_count
    }

    pub fn best_fit(&self) -> BestFit {
        self.best_fit
    }

    /// Total number of ids held across all lanes.
    pub fn entry_count(&self) -> usize {
        self.lanes.iter().map(Vec::len).sum()
    }

    /// Find the lane and position holding `job_id`.
    pub fn position_of(&self, job_id: &Uuid) -> Option<(usize, usize)> {
        self.lanes.iter().enumerate().find_map(|(lane, ids)| {
            ids.iter()
                .position(|id| id == job_id)
                .map(|pos| (lane, pos))
        })
    }

    /// Drop inactive ids from every lane, keeping the order of the rest.
    /// Returns how many entries were removed.
    pub fn release(&mut self, inactive: &HashSet<Uuid>) -> usize {
        let mut removed = 0;
        for lane in &mut self.lanes {
            let before = lane.len();
            lane.retain(|id| !inactive.contains(id));
            let dropped = before - lane.len();
            removed += dropped;
            if dropped > 0 && lane.is_empty() {
                self.free_lane_count += 1;
            }
        }
        self.active_job_count = self.active_job_count.saturating_sub(removed);
        removed
    }

    /// Append `job_id` to the tail of `lane`.
    pub fn push(&mut self, lane: usize, job_id: Uuid) {
        let Some(ids) = self.lanes.get_mut(lane) else {
            return;
        };
        if ids.is_empty() {
            self.free_lane_count = self.free_lane_count.saturating_sub(1);
        }
        ids.push(job_id);
        self.active_job_count += 1;
    }

    /// Undo a [`LaneTable::push`]. Only succeeds when `job_id` is the tail of `lane`.
    pub fn pop(&mut self, lane: usize, job_id: &Uuid) -> bool {
        let Some(ids) = self.lanes.get_mut(lane) else {
            return false;
        };
        if ids.last() != Some(job_id) {
            return false;
        }
        ids.pop();
        if ids.is_empty() {
            self.free_lane_count += 1;
        }
        self.active_job_count = self.active_job_count.saturating_sub(1);
        true
    }

    /// Pick the lane to extend next: the first empty lane, otherwise the busy
    /// lane whose tail finishes earliest (lowest index on ties).
    ///
    /// `finish_of` resolves a job id to its expected finish.
    pub fn recompute_best_fit<F>(&mut self, finish_of: F)
    where
        F: Fn(&Uuid) -> Option<DateTime<Utc>>,
    {
        if self.free_lane_count == self.lanes.len() {
            self.best_fit = BestFit::IMMEDIATE_FIRST;
            return;
        }

        let mut best: Option<(usize, DateTime<Utc>)> = None;
        for (lane, ids) in self.lanes.iter().enumerate() {
            let Some(tail) = ids.last() else {
                self.best_fit = BestFit {
                    lane,
                    available_at: None,
                };
                return;
            };
            let finish = finish_of(tail).unwrap_or(DateTime::<Utc>::MAX_UTC);
            if best.is_none_or(|(_, at)| finish < at) {
                best = Some((lane, finish));
            }
        }

        self.best_fit = match best {
            Some((lane, at)) => BestFit {
                lane,
                available_at: Some(at),
            },
            None => BestFit::IMMEDIATE_FIRST,
        };
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: Uuid,
    pub max_concurrent_jobs: usize,
    pub max_total_jobs: usize,
    pub vcpu_units: u32,
    pub memory: u32,
    /// Every job ever placed here, in placement order, including finished ones.
    pub jobs: Vec<Uuid>,
    pub lanes: LaneTable,
}

impl Node {
    pub fn new(spec: NodeSpec) -> Self {
        Self::with_id(Uuid::new_v4(), spec)
    }

    pub fn with_id(id: Uuid, spec: NodeSpec) -> Self {
        Self {
            id,
            max_concurrent_jobs: spec.max_concurrent_jobs,
            max_total_jobs: spec.max_total_jobs,
            vcpu_units: spec.vcpu_units,
            memory: spec.memory,
            jobs: Vec::new(),
            lanes: LaneTable::new(spec.max_concurrent_jobs),
        }
    }

    /// Whether the node can accept one more job at all.
    pub fn has_room(&self) -> bool {
        self.lanes.lane_count() > 0 && self.lanes.active_job_count() < self.max_total_jobs
    }

    /// Ids of every job still in a lane, lane 0 first, FIFO within a lane.
    pub fn lane_job_ids(&self) -> Vec<Uuid> {
        self.lanes.lanes().iter().flatten().copied().collect()
    }

    /// Remove ids from the placement history.
    pub fn forget_jobs(&mut self, ids: &HashSet<Uuid>) {
        self.jobs.retain(|id| !ids.contains(id));
    }

    /// Remove the most recent history entry for `job_id`.
    pub(crate) fn forget_last(&mut self, job_id: &Uuid) {
        if let Some(pos) = self.jobs.iter().rposition(|id| id == job_id) {
            self.jobs.remove(pos);
        }
    }
}
