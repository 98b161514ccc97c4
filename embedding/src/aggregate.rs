use hyperrec_core::embedding::{EdgeAggregation, EmbeddingMap};
use hyperrec_core::model::MEDIA;
use hyperrec_core::vector::{self, EPSILON};
use storage::Hypergraph;

/// Derives one vector per hyperedge from its members' embeddings, scaled by the edge weight.
pub struct HyperedgeEmbedder {
    aggregation: EdgeAggregation,
}

impl HyperedgeEmbedder {
    pub fn new(aggregation: EdgeAggregation) -> Self {
        Self { aggregation }
    }

    /// Edges with no embedded members are skipped.
    pub fn embed_edges(&self, graph: &Hypergraph, nodes: &EmbeddingMap) -> EmbeddingMap {
        graph
            .edges()
            .filter_map(|edge| {
                let members: Vec<&[f32]> = edge
                    .node_ids
                    .iter()
                    .filter_map(|id| nodes.get(id).map(Vec::as_slice))
                    .collect();
                self.aggregate(&members, edge.weight)
                    .map(|v| (edge.id.clone(), v))
            })
            .collect()
    }

    pub fn aggregate(&self, vectors: &[&[f32]], weight: f32) -> Option<Vec<f32>> {
        let dim = vectors.first()?.len();
        let mut out = match self.aggregation {
            EdgeAggregation::Mean => mean(vectors, dim),
            EdgeAggregation::Max => (0..dim)
                .map(|i| {
                    vectors
                        .iter()
                        .map(|v| v[i])
                        .fold(f32::NEG_INFINITY, f32::max)
                })
                .collect(),
            EdgeAggregation::Attention => {
                let norms: Vec<f32> = vectors.iter().map(|v| vector::l2_norm(v)).collect();
                let total: f32 = norms.iter().sum();
                if total <= EPSILON {
                    mean(vectors, dim)
                } else {
                    let mut acc = vec![0.0f32; dim];
                    for (v, norm) in vectors.iter().zip(norms) {
                        vector::add_scaled(&mut acc, v, norm / total);
                    }
                    acc
                }
            }
        };
        for x in out.iter_mut() {
            *x *= weight;
        }
        Some(out)
    }
}

fn mean(vectors: &[&[f32]], dim: usize) -> Vec<f32> {
    let mut acc = vec![0.0f32; dim];
    for v in vectors {
        vector::add_scaled(&mut acc, v, 1.0 / vectors.len() as f32);
    }
    acc
}

/// Market (segment) embedding: the mean of every embedded media node.
pub struct MarketEmbedder;

impl MarketEmbedder {
    pub fn market_embedding(graph: &Hypergraph, nodes: &EmbeddingMap) -> Option<Vec<f32>> {
        let vectors: Vec<&[f32]> = graph
            .nodes_by_type(MEDIA)
            .into_iter()
            .filter_map(|n| nodes.get(&n.id).map(Vec::as_slice))
            .collect();
        let dim = vectors.first()?.len();
        Some(mean(&vectors, dim))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_and_max_aggregate_members() {
        let a = [1.0, 0.0];
        let b = [0.0, 3.0];
        let mean = HyperedgeEmbedder::new(EdgeAggregation::Mean)
            .aggregate(&[&a[..], &b[..]], 2.0)
            .unwrap();
        assert_eq!(mean, vec![1.0, 3.0]);

        let max = HyperedgeEmbedder::new(EdgeAggregation::Max)
            .aggregate(&[&a[..], &b[..]], 1.0)
            .unwrap();
        assert_eq!(max, vec![1.0, 3.0]);
    }

    #[test]
    fn attention_weights_by_norm() {
        let a = [1.0, 0.0];
        let b = [0.0, 3.0];
        let att = HyperedgeEmbedder::new(EdgeAggregation::Attention)
            .aggregate(&[&a[..], &b[..]], 1.0)
            .unwrap();
        assert!((att[0] - 0.25).abs() < 1e-6);
        assert!((att[1] - 2.25).abs() < 1e-6);
    }

    #[test]
    fn attention_of_zero_vectors_falls_back_to_mean() {
        let z = [0.0, 0.0];
        let att = HyperedgeEmbedder::new(EdgeAggregation::Attention)
            .aggregate(&[&z[..], &z[..]], 1.0)
            .unwrap();
        assert_eq!(att, vec![0.0, 0.0]);
        assert!(HyperedgeEmbedder::new(EdgeAggregation::Mean)
            .aggregate(&[], 1.0)
            .is_none());
    }
}
