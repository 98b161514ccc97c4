pub mod spsa;
pub mod triplet;

pub use spsa::{
    accumulate_gradients, apply_gradient_step, bernoulli_perturbation, count_margin_violations,
    mean_triplet_loss, sync_store, triplet_loss, AnchorGradient, GradientEstimate, OptimizerStats,
    SpsaConfig, SpsaOptimizer, TrainingReport,
};
pub use triplet::{PositivePair, Triplet, TripletGenerator};

use hyperrec_core::error::{ErrorCode, HyperrecError};
use storage::VectorStoreError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrainingError {
    #[error("invalid training configuration: {0}")]
    InvalidConfig(String),
    #[error("training produced a non-finite loss at iteration {0}")]
    NonFiniteLoss(u64),
    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),
}

impl HyperrecError for TrainingError {
    fn error_code(&self) -> ErrorCode {
        match self {
            TrainingError::InvalidConfig(_) => ErrorCode::InvalidArgument,
            TrainingError::NonFiniteLoss(_) => ErrorCode::Computation,
            TrainingError::VectorStore(e) => e.error_code(),
        }
    }
}
