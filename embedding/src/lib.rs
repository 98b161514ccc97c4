pub mod aggregate;
pub mod fastrp;
pub mod node2vec;

pub use aggregate::{HyperedgeEmbedder, MarketEmbedder};
pub use fastrp::FastRp;
pub use node2vec::Node2Vec;

use hyperrec_core::embedding::{EmbeddingMap, EmbeddingMethod};
use hyperrec_core::error::{ErrorCode, HyperrecError};
use serde::{Deserialize, Serialize};
use storage::Hypergraph;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("invalid embedding configuration: {0}")]
    InvalidConfig(String),
}

impl HyperrecError for EmbeddingError {
    fn error_code(&self) -> ErrorCode {
        ErrorCode::InvalidArgument
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub dimensions: usize,
    /// FastRP propagation rounds.
    pub iterations: usize,
    pub walk_length: usize,
    pub num_walks: usize,
    /// Return bias: larger values discourage stepping straight back.
    pub p: f32,
    /// In-out bias: larger values keep walks local.
    pub q: f32,
    pub window_size: usize,
    pub learning_rate: f32,
    pub negative_samples: usize,
    /// Fixed seed for reproducible embeddings; random when absent.
    pub seed: Option<u64>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: 128,
            iterations: 3,
            walk_length: 80,
            num_walks: 10,
            p: 1.0,
            q: 1.0,
            window_size: 5,
            learning_rate: 0.025,
            negative_samples: 5,
            seed: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<(), EmbeddingError> {
        if self.dimensions == 0 {
            return Err(EmbeddingError::InvalidConfig("dimensions must be positive".into()));
        }
        if !(self.p > 0.0 && self.q > 0.0) {
            return Err(EmbeddingError::InvalidConfig("p and q must be positive".into()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(EmbeddingError::InvalidConfig("learning_rate must be positive".into()));
        }
        Ok(())
    }

    pub(crate) fn base_seed(&self) -> u64 {
        self.seed.unwrap_or_else(rand::random)
    }
}

/// Turns a hypergraph into one dense vector per node.
pub trait GraphEmbedder: Send + Sync {
    fn fit(&self, graph: &Hypergraph) -> Result<EmbeddingMap, EmbeddingError>;
}

pub fn embedder_for(method: EmbeddingMethod, config: EmbeddingConfig) -> Box<dyn GraphEmbedder> {
    match method {
        EmbeddingMethod::FastRp => Box::new(FastRp::new(config)),
        EmbeddingMethod::Node2Vec => Box::new(Node2Vec::new(config)),
    }
}

/// Dense neighbour lists over the graph's nodes, in id order.
pub(crate) struct NodeIndex<'a> {
    pub ids: Vec<&'a str>,
    pub neighbors: Vec<Vec<usize>>,
}

impl<'a> NodeIndex<'a> {
    pub fn build(graph: &'a Hypergraph) -> Self {
        let ids: Vec<&str> = graph.nodes().map(|n| n.id.as_str()).collect();
        let position: std::collections::HashMap<&str, usize> =
            ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let neighbors = ids
            .iter()
            .map(|id| {
                graph
                    .neighbors(id, None)
                    .into_iter()
                    .filter_map(|n| position.get(n.id.as_str()).copied())
                    .collect()
            })
            .collect();
        Self { ids, neighbors }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}
