use hyperrec_core::model::{HyperEdge, NodeId};
use rand::seq::{index, SliceRandom};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use storage::{Hypergraph, MetadataFilter, VectorStore};

use crate::TrainingError;

/// Oversampling factor when mining hard negatives from the vector store.
const NEGATIVE_OVERSAMPLE: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositivePair {
    pub anchor: NodeId,
    pub positive: NodeId,
    pub edge_type: String,
    pub weight: f32,
}

/// Contrastive training example: `anchor` and `positive` share a hyperedge, `negative` is
/// close to `anchor` in vector space but shares no hyperedge with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triplet {
    pub anchor: NodeId,
    pub positive: NodeId,
    pub negative: NodeId,
    pub edge_type: String,
    pub weight: f32,
}

pub struct TripletGenerator<'a> {
    graph: &'a Hypergraph,
    store: &'a VectorStore,
}

impl<'a> TripletGenerator<'a> {
    pub fn new(graph: &'a Hypergraph, store: &'a VectorStore) -> Self {
        Self { graph, store }
    }

    /// Two distinct members of a uniformly sampled hyperedge, `count` times.
    pub fn positive_pairs<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<PositivePair> {
        let edges: Vec<&HyperEdge> = self.graph.edges().collect();
        if edges.is_empty() {
            return Vec::new();
        }

        (0..count)
            .filter_map(|_| {
                let edge = edges.choose(rng)?;
                if edge.node_ids.len() < 2 {
                    return None;
                }
                let picked = index::sample(rng, edge.node_ids.len(), 2);
                Some(PositivePair {
                    anchor: edge.node_ids[picked.index(0)].clone(),
                    positive: edge.node_ids[picked.index(1)].clone(),
                    edge_type: edge.edge_type.clone(),
                    weight: edge.weight,
                })
            })
            .collect()
    }

    /// Nearest stored vectors to `anchor` that share no hyperedge with it, closest first.
    pub fn hard_negatives(&self, anchor: &str, count: usize) -> Result<Vec<NodeId>, TrainingError> {
        let Some(entry) = self.store.get(anchor) else {
            return Ok(Vec::new());
        };

        let connected: HashSet<&NodeId> = self
            .graph
            .edges_for_node(anchor)
            .into_iter()
            .flat_map(|edge| edge.node_ids.iter())
            .collect();

        let candidates =
            self.store
                .search(&entry.vector, count * NEGATIVE_OVERSAMPLE, &MetadataFilter::new())?;

        Ok(candidates
            .into_iter()
            .filter(|hit| hit.id != anchor && !connected.contains(&hit.id))
            .take(count)
            .map(|hit| hit.id)
            .collect())
    }

    /// Up to `batch_size` triplets; pairs whose anchor has no hard negative are dropped.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        batch_size: usize,
        rng: &mut R,
    ) -> Result<Vec<Triplet>, TrainingError> {
        let mut triplets = Vec::with_capacity(batch_size);
        for pair in self.positive_pairs(batch_size, rng) {
            let Some(negative) = self.hard_negatives(&pair.anchor, 1)?.into_iter().next() else {
                continue;
            };
            triplets.push(Triplet {
                anchor: pair.anchor,
                positive: pair.positive,
                negative,
                edge_type: pair.edge_type,
                weight: pair.weight,
            });
        }
        Ok(triplets)
    }
}
