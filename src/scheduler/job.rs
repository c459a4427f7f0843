use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};

pub const JOB_VCPU_RANGE: (u32, u32) = (1, 360);
pub const JOB_MEMORY_RANGE: (u32, u32) = (128, 896_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Scheduled,
    Running,
    Done,
    Terminated,
}

impl JobStatus {
    /// Scheduled and Running jobs occupy a lane slot.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Scheduled | JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Scheduled => write!(f, "scheduled"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Terminated => write!(f, "terminated"),
        }
    }
}

/// Resource and duration demand for a job that has not been created yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Milliseconds
    pub total_run_time: u64,
    pub vcpu_units: u32,
    /// MB
    pub memory: u32,
}

impl JobSpec {
    pub fn new(total_run_time: u64, vcpu_units: u32, memory: u32) -> Self {
        Self {
            total_run_time,
            vcpu_units,
            memory,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.total_run_time < 1 {
            return Err(SchedulerError::InvalidSpec(
                "total_run_time must be at least 1 ms".to_string(),
            ));
        }
        check_range("vcpu_units", self.vcpu_units, JOB_VCPU_RANGE)?;
        check_range("memory", self.memory, JOB_MEMORY_RANGE)
    }
}

pub(crate) fn check_range(field: &str, value: u32, (min, max): (u32, u32)) -> Result<()> {
    if value < min || value > max {
        return Err(SchedulerError::InvalidSpec(format!(
            "{} must be between {} and {}, got {}",
            field, min, max, value
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: Uuid,
    pub total_run_time: u64,
    pub vcpu_units: u32,
    pub memory: u32,
    pub node_id: Option<Uuid>,
    pub thread_id: Option<usize>,
    pub expected_start: Option<DateTime<Utc>>,
    pub expected_finish: Option<DateTime<Utc>>,
    pub status: JobStatus,
}

impl Job {
    pub fn new(spec: JobSpec) -> Self {
        Self::with_id(Uuid::new_v4(), spec)
    }

    pub fn with_id(id: Uuid, spec: JobSpec) -> Self {
        Self {
            id,
            total_run_time: spec.total_run_time,
            vcpu_units: spec.vcpu_units,
            memory: spec.memory,
            node_id: None,
            thread_id: None,
            expected_start: None,
            expected_finish: None,
            status: JobStatus::Scheduled,
        }
    }

    /// `None` when the run time does not fit a `Duration`.
    pub fn run_time(&self) -> Option<Duration> {
        i64::try_from(self.total_run_time)
            .ok()
            .and_then(Duration::try_milliseconds)
    }

    /// The window the job would occupy if started at `start`, or `None` when
    /// its finish lies past the last representable instant.
    pub fn window_at(&self, start: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let finish = start.checked_add_signed(self.run_time()?)?;
        Some((start, finish))
    }

    /// Pin the job's execution window to start at `start`. A window that
    /// cannot be represented leaves the job untouched and reports no capacity.
    pub fn set_window(&mut self, start: DateTime<Utc>) -> Result<()> {
        let (start, finish) = self
            .window_at(start)
            .ok_or(SchedulerError::NoCapacityAvailable)?;
        self.expected_start = Some(start);
        self.expected_finish = Some(finish);
        Ok(())
    }

    /// The `[start, finish)` window, once placed.
    pub fn window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.expected_start?, self.expected_finish?))
    }
}
