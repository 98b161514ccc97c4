use hyperrec_core::embedding::{node_seed, EmbeddingMap};
use hyperrec_core::vector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use storage::Hypergraph;
use tracing::info;

use crate::{EmbeddingConfig, EmbeddingError, GraphEmbedder, NodeIndex};

/// Fast random-projection embeddings.
///
/// A sparse ternary projection is propagated through the row-normalized adjacency operator;
/// the initial matrix and every propagation round are mixed with weights proportional to
/// `1, 2, 4, ...` (summing to one) and each row is L2-normalized. Cost is
/// O(iterations x edges x dimensions).
pub struct FastRp {
    config: EmbeddingConfig,
}

impl FastRp {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { config }
    }

    /// Each entry is `+sqrt(dim)` or `-sqrt(dim)` with probability 1/6, else 0.
    /// The row only depends on the node id and the base seed.
    fn projection_row(&self, node_id: &str, base_seed: u64) -> Vec<f32> {
        let dim = self.config.dimensions;
        let scale = (dim as f32).sqrt();
        let mut rng = StdRng::seed_from_u64(node_seed(node_id, base_seed));
        (0..dim)
            .map(|_| {
                let r: f32 = rng.gen();
                if r < 1.0 / 6.0 {
                    scale
                } else if r < 2.0 / 6.0 {
                    -scale
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Mixing weights for rounds 0..=iterations.
    pub fn iteration_weights(iterations: usize) -> Vec<f32> {
        let raw: Vec<f32> = std::iter::once(1.0)
            .chain((1..=iterations).map(|i| 2f32.powi(i as i32)))
            .collect();
        let total: f32 = raw.iter().sum();
        raw.into_iter().map(|w| w / total).collect()
    }
}

impl GraphEmbedder for FastRp {
    fn fit(&self, graph: &Hypergraph) -> Result<EmbeddingMap, EmbeddingError> {
        self.config.validate()?;
        let index = NodeIndex::build(graph);
        let n = index.len();
        let dim = self.config.dimensions;
        if n == 0 {
            return Ok(EmbeddingMap::new());
        }

        let base_seed = self.config.base_seed();
        let weights = Self::iteration_weights(self.config.iterations);

        let mut current: Vec<f32> = Vec::with_capacity(n * dim);
        for id in &index.ids {
            current.extend(self.projection_row(id, base_seed));
        }
        let mut combined: Vec<f32> = current.iter().map(|x| x * weights[0]).collect();

        for weight in weights.iter().skip(1) {
            let mut next = vec![0.0f32; n * dim];
            for (row, neighbors) in index.neighbors.iter().enumerate() {
                if neighbors.is_empty() {
                    continue;
                }
                let share = 1.0 / neighbors.len() as f32;
                let target = &mut next[row * dim..(row + 1) * dim];
                for &col in neighbors {
                    vector::add_scaled(target, &current[col * dim..(col + 1) * dim], share);
                }
            }
            vector::add_scaled(&mut combined, &next, *weight);
            current = next;
        }

        let embeddings: EmbeddingMap = index
            .ids
            .iter()
            .enumerate()
            .map(|(row, id)| {
                let mut v = combined[row * dim..(row + 1) * dim].to_vec();
                vector::normalize(&mut v);
                (id.to_string(), v)
            })
            .collect();

        info!(
            nodes = n,
            dimensions = dim,
            iterations = self.config.iterations,
            "FastRP embeddings generated"
        );
        Ok(embeddings)
    }
}
