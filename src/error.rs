use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("No available nodes left or not enough resources to run the batch of jobs")]
    NoCapacityAvailable,

    #[error("Job {0} is already terminated or done")]
    InvalidTerminationState(Uuid),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Node not found: {0}")]
    NodeNotFound(Uuid),

    #[error("Invalid request: {0}")]
    InvalidSpec(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
