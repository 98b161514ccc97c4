use hyperrec_core::embedding::EmbeddingMap;
use serde::{Deserialize, Serialize};
use storage::{AdjacencyDocument, VectorStoreSnapshot};

use crate::options::RecommendationConfig;
use crate::EngineError;

/// Everything needed to bring an engine back without recomputing embeddings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub config: RecommendationConfig,
    pub graph: AdjacencyDocument,
    pub vector_store: VectorStoreSnapshot,
    pub embeddings: EmbeddingMap,
    #[serde(default)]
    pub edge_embeddings: EmbeddingMap,
    pub last_updated: Option<i64>,
}

impl EngineSnapshot {
    pub fn to_json(&self) -> Result<Vec<u8>, EngineError> {
        serde_json::to_vec(self).map_err(|e| EngineError::State(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, EngineError> {
        serde_json::from_slice(bytes).map_err(|e| EngineError::State(e.to_string()))
    }
}
