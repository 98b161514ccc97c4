use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::model::NodeId;

/// Node (or edge) id to embedding vector.
pub type EmbeddingMap = BTreeMap<NodeId, Vec<f32>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EmbeddingMethod {
    #[default]
    #[serde(rename = "fast_rp", alias = "fastrp")]
    FastRp,
    #[serde(rename = "node2vec")]
    Node2Vec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EdgeAggregation {
    Mean,
    Max,
    #[default]
    Attention,
}

/// Derives a stable per-node RNG seed, so a node's random projection row does not
/// depend on insertion order.
pub fn node_seed(node_id: &str, base_seed: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(base_seed.to_le_bytes());
    hasher.update(node_id.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_seed_is_reproducible_for_same_inputs() {
        assert_eq!(node_seed("movie-1", 42), node_seed("movie-1", 42));
    }

    #[test]
    fn node_seed_changes_with_base_seed_and_id() {
        assert_ne!(node_seed("movie-1", 42), node_seed("movie-1", 43));
        assert_ne!(node_seed("movie-1", 42), node_seed("movie-2", 42));
    }

    #[test]
    fn embedding_method_uses_config_names() {
        let m: EmbeddingMethod = serde_json::from_str("\"node2vec\"").unwrap();
        assert_eq!(m, EmbeddingMethod::Node2Vec);
        let m: EmbeddingMethod = serde_json::from_str("\"fastrp\"").unwrap();
        assert_eq!(m, EmbeddingMethod::FastRp);
    }
}
