use hyperrec_core::embedding::EmbeddingMap;
use hyperrec_core::model::NodeId;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use storage::{Hypergraph, VectorStore};
use tokio::sync::Mutex;
use training::{apply_gradient_step, mean_triplet_loss, sync_store, Triplet, TripletGenerator};

use crate::coordinator::{TrainingTarget, TripletBatch};

/// Graph, node vectors and the store that indexes them.
pub struct TrainingState {
    pub graph: Hypergraph,
    pub embeddings: EmbeddingMap,
    pub store: VectorStore,
}

struct Inner {
    state: TrainingState,
    rng: StdRng,
}

/// A [`TrainingTarget`] that owns its state behind a single async mutex.
pub struct InMemoryTarget {
    inner: Mutex<Inner>,
}

impl InMemoryTarget {
    pub fn new(state: TrainingState, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            inner: Mutex::new(Inner { state, rng }),
        }
    }

    pub async fn with_state<R>(&self, f: impl FnOnce(&TrainingState) -> R) -> R {
        let inner = self.inner.lock().await;
        f(&inner.state)
    }

    pub fn into_state(self) -> TrainingState {
        self.inner.into_inner().state
    }
}

#[async_trait::async_trait]
impl TrainingTarget for InMemoryTarget {
    async fn node_count(&self) -> anyhow::Result<usize> {
        Ok(self.inner.lock().await.state.graph.node_count())
    }

    async fn sample_triplets(&self, count: usize) -> anyhow::Result<TripletBatch> {
        let mut guard = self.inner.lock().await;
        let Inner { state, rng } = &mut *guard;
        let triplets = TripletGenerator::new(&state.graph, &state.store).generate(count, rng)?;
        Ok(TripletBatch::from_triplets(triplets, &state.embeddings))
    }

    async fn apply_gradients(
        &self,
        gradients: BTreeMap<NodeId, Vec<f32>>,
        step: f32,
    ) -> anyhow::Result<usize> {
        let mut guard = self.inner.lock().await;
        let state = &mut guard.state;
        let touched = apply_gradient_step(&mut state.embeddings, &gradients, step);
        sync_store(&mut state.store, &state.embeddings, &touched)?;
        Ok(touched.len())
    }

    async fn mean_loss(&self, triplets: &[Triplet], margin: f32) -> anyhow::Result<f32> {
        let guard = self.inner.lock().await;
        Ok(mean_triplet_loss(&guard.state.embeddings, triplets, margin))
    }
}
