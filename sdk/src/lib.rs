pub mod request;
pub mod sample;
pub mod service;
pub mod target;

pub use request::{ServiceRequest, ServiceResponse};
pub use sample::{sample_graph, SAMPLE_MARKET, SAMPLE_USERS};
pub use service::{EngineService, HealthStatus, ServiceStats};
pub use target::{InteractionSink, SharedEngine};

use engine::EngineError;
use hyperrec_core::error::{ErrorCode, HyperrecError};
use jobs::JobError;
use storage::SnapshotError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("no snapshot directory configured")]
    SnapshotsDisabled,
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

impl HyperrecError for ServiceError {
    fn error_code(&self) -> ErrorCode {
        match self {
            ServiceError::InvalidRequest(_) | ServiceError::SnapshotsDisabled => {
                ErrorCode::InvalidArgument
            }
            ServiceError::Internal(_) => ErrorCode::Internal,
            ServiceError::Engine(e) => e.error_code(),
            ServiceError::Job(e) => e.error_code(),
            ServiceError::Snapshot(e) => e.error_code(),
        }
    }
}
