pub mod engine;
pub mod mmr;
pub mod options;
pub mod state;

pub use engine::{EngineStats, Recommendation, RecommendationEngine, TrendingItem};
pub use options::{
    FineTuneOptions, Interaction, MediaInput, RecommendationConfig, RecommendationOptions,
    SeedAggregation,
};
pub use state::EngineSnapshot;

use embedding::EmbeddingError;
use hyperrec_core::error::{ErrorCode, HyperrecError};
use storage::{GraphError, VectorStoreError};
use thiserror::Error;
use training::TrainingError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("engine not initialized")]
    NotInitialized,
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("state document could not be processed: {0}")]
    State(String),
    #[error("vector for {id} has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("training error: {0}")]
    Training(#[from] TrainingError),
}

impl EngineError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl HyperrecError for EngineError {
    fn error_code(&self) -> ErrorCode {
        match self {
            EngineError::NotInitialized => ErrorCode::NotInitialized,
            EngineError::InvalidConfig(_)
            | EngineError::InvalidInput(_)
            | EngineError::State(_)
            | EngineError::DimensionMismatch { .. } => ErrorCode::InvalidArgument,
            EngineError::NotFound { .. } => ErrorCode::NotFound,
            EngineError::Graph(e) => e.error_code(),
            EngineError::VectorStore(e) => e.error_code(),
            EngineError::Embedding(e) => e.error_code(),
            EngineError::Training(e) => e.error_code(),
        }
    }
}
