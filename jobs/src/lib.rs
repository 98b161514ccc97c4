pub mod averaging;
pub mod coordinator;
pub mod job;
pub mod queue;
pub mod streaming;
pub mod target;
pub mod worker;

pub use averaging::FederatedAverager;
pub use coordinator::{DistributedCoordinator, TrainingTarget, TripletBatch};
pub use job::{JobConfig, JobProgress, JobRegistry, JobStatus, LearningJob, CANCELLED_MESSAGE};
pub use queue::{ChannelWorker, TaskEnvelope, WorkerResult, WorkerTask};
pub use streaming::{Stamped, StreamingConfig, StreamingUpdateHandler, UpdateSink};
pub use target::{InMemoryTarget, TrainingState};
pub use worker::{compute_shard, GradientWorker, LocalWorker, WorkerLoop, WorkerPool};

use hyperrec_core::error::{ErrorCode, HyperrecError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("job {job_id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("invalid job configuration: {0}")]
    InvalidConfig(String),
}

impl HyperrecError for JobError {
    fn error_code(&self) -> ErrorCode {
        match self {
            JobError::NotFound(_) => ErrorCode::NotFound,
            JobError::InvalidTransition { .. } => ErrorCode::JobFailed,
            JobError::InvalidConfig(_) => ErrorCode::InvalidArgument,
        }
    }
}
