use hyperrec_core::embedding::EmbeddingMap;
use hyperrec_core::vector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use storage::Hypergraph;
use tracing::info;

use crate::{EmbeddingConfig, EmbeddingError, GraphEmbedder, NodeIndex};

const LEARNING_RATE_DECAY: f32 = 0.9999;

/// Biased random walks followed by skip-gram training with negative sampling.
///
/// Slower than [`crate::FastRp`]; kept for higher fidelity offline rebuilds.
pub struct Node2Vec {
    config: EmbeddingConfig,
}

impl Node2Vec {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { config }
    }

    /// `num_walks` walks from every node, each at most `walk_length` long.
    pub fn generate_walks<R: Rng>(&self, index: &NodeIndex<'_>, rng: &mut R) -> Vec<Vec<usize>> {
        let neighbor_sets: Vec<HashSet<usize>> = index
            .neighbors
            .iter()
            .map(|n| n.iter().copied().collect())
            .collect();

        let mut walks = Vec::with_capacity(self.config.num_walks * index.len());
        for _ in 0..self.config.num_walks {
            for start in 0..index.len() {
                walks.push(self.random_walk(index, &neighbor_sets, start, rng));
            }
        }
        walks
    }

    fn random_walk<R: Rng>(
        &self,
        index: &NodeIndex<'_>,
        neighbor_sets: &[HashSet<usize>],
        start: usize,
        rng: &mut R,
    ) -> Vec<usize> {
        let mut walk = vec![start];
        let mut previous: Option<usize> = None;
        let mut current = start;

        while walk.len() < self.config.walk_length {
            let neighbors = &index.neighbors[current];
            if neighbors.is_empty() {
                break;
            }

            let weights: Vec<f32> = neighbors
                .iter()
                .map(|&next| match previous {
                    None => 1.0,
                    Some(prev) if next == prev => 1.0 / self.config.p,
                    Some(prev) if neighbor_sets[prev].contains(&next) => 1.0,
                    Some(_) => 1.0 / self.config.q,
                })
                .collect();

            let total: f32 = weights.iter().sum();
            let mut threshold = rng.gen::<f32>() * total;
            let choice = weights
                .iter()
                .position(|w| {
                    threshold -= w;
                    threshold <= 0.0
                })
                .unwrap_or(neighbors.len() - 1);

            previous = Some(current);
            current = neighbors[choice];
            walk.push(current);
        }
        walk
    }

    fn train<R: Rng>(&self, walks: &[Vec<usize>], vocab: usize, rng: &mut R) -> Vec<Vec<f32>> {
        let dim = self.config.dimensions;
        let init = |rng: &mut R| -> Vec<Vec<f32>> {
            (0..vocab)
                .map(|_| (0..dim).map(|_| rng.gen::<f32>() * 0.01).collect())
                .collect()
        };
        let mut input = init(&mut *rng);
        let mut context = init(&mut *rng);
        let mut lr = self.config.learning_rate;
        let window = self.config.window_size;

        for walk in walks {
            for (i, &center) in walk.iter().enumerate() {
                let start = i.saturating_sub(window);
                let end = (i + window + 1).min(walk.len());

                for (j, &ctx) in walk.iter().enumerate().take(end).skip(start) {
                    if i == j {
                        continue;
                    }

                    let center_vec = input[center].clone();
                    let context_vec = context[ctx].clone();
                    let g = lr * (1.0 - sigmoid(vector::dot(&center_vec, &context_vec)));
                    vector::add_scaled(&mut input[center], &context_vec, g);
                    vector::add_scaled(&mut context[ctx], &center_vec, g);

                    for _ in 0..self.config.negative_samples {
                        let neg = rng.gen_range(0..vocab);
                        if neg == ctx {
                            continue;
                        }
                        let neg_vec = context[neg].clone();
                        let g = lr * sigmoid(vector::dot(&center_vec, &neg_vec));
                        vector::add_scaled(&mut input[center], &neg_vec, -g);
                        vector::add_scaled(&mut context[neg], &center_vec, -g);
                    }
                }
            }
            lr *= LEARNING_RATE_DECAY;
        }

        input
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl GraphEmbedder for Node2Vec {
    fn fit(&self, graph: &Hypergraph) -> Result<EmbeddingMap, EmbeddingError> {
        self.config.validate()?;
        if self.config.walk_length == 0 || self.config.num_walks == 0 {
            return Err(EmbeddingError::InvalidConfig(
                "walk_length and num_walks must be positive".into(),
            ));
        }

        let index = NodeIndex::build(graph);
        if index.len() == 0 {
            return Ok(EmbeddingMap::new());
        }

        let mut rng = StdRng::seed_from_u64(self.config.base_seed());
        let walks = self.generate_walks(&index, &mut rng);
        let vectors = self.train(&walks, index.len(), &mut rng);

        info!(
            nodes = index.len(),
            walks = walks.len(),
            dimensions = self.config.dimensions,
            "Node2Vec embeddings generated"
        );

        Ok(index
            .ids
            .iter()
            .zip(vectors)
            .map(|(id, mut v)| {
                vector::normalize(&mut v);
                (id.to_string(), v)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperrec_core::model::{HyperEdge, HyperNode, NodeData};

    fn path_graph() -> Hypergraph {
        let mut g = Hypergraph::new("test");
        for id in ["a", "b", "c", "lonely"] {
            g.add_node(HyperNode::new(id, NodeData::media(id))).unwrap();
        }
        g.add_edge(HyperEdge::new("link", ["a", "b"], 1.0)).unwrap();
        g.add_edge(HyperEdge::new("link", ["b", "c"], 1.0)).unwrap();
        g
    }

    #[test]
    fn walks_follow_edges_and_stop_at_isolated_nodes() {
        let graph = path_graph();
        let index = NodeIndex::build(&graph);
        let config = EmbeddingConfig {
            walk_length: 6,
            num_walks: 2,
            ..EmbeddingConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        let walks = Node2Vec::new(config).generate_walks(&index, &mut rng);

        assert_eq!(walks.len(), 8);
        for walk in &walks {
            for pair in walk.windows(2) {
                assert!(index.neighbors[pair[0]].contains(&pair[1]));
            }
            let start = index.ids[walk[0]];
            if start == "lonely" {
                assert_eq!(walk.len(), 1);
            } else {
                assert_eq!(walk.len(), 6);
            }
        }
    }

    #[test]
    fn fit_returns_unit_vectors_for_every_node() {
        let config = EmbeddingConfig {
            dimensions: 8,
            walk_length: 10,
            num_walks: 3,
            seed: Some(4),
            ..EmbeddingConfig::default()
        };
        let embeddings = Node2Vec::new(config).fit(&path_graph()).unwrap();
        assert_eq!(embeddings.len(), 4);
        for v in embeddings.values() {
            assert!((vector::l2_norm(v) - 1.0).abs() < 1e-4);
        }
    }
}
