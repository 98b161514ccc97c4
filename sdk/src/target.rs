use engine::{Interaction, RecommendationEngine};
use hyperrec_core::model::NodeId;
use jobs::{Stamped, TrainingTarget, TripletBatch, UpdateSink};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use training::Triplet;

/// Lets the distributed coordinator train the engine that serves requests.
///
/// Reads share the engine lock; only the per-epoch gradient step takes it exclusively.
pub struct SharedEngine {
    engine: Arc<RwLock<RecommendationEngine>>,
    rng: Mutex<StdRng>,
}

impl SharedEngine {
    pub fn new(engine: Arc<RwLock<RecommendationEngine>>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            engine,
            rng: Mutex::new(rng),
        }
    }
}

#[async_trait::async_trait]
impl TrainingTarget for SharedEngine {
    async fn node_count(&self) -> anyhow::Result<usize> {
        Ok(self.engine.read().await.graph()?.node_count())
    }

    async fn sample_triplets(&self, count: usize) -> anyhow::Result<TripletBatch> {
        let engine = self.engine.read().await;
        let mut rng = self.rng.lock().await;
        let triplets = engine.mine_triplets(count, &mut *rng)?;
        Ok(TripletBatch::from_triplets(triplets, engine.embeddings()?))
    }

    async fn apply_gradients(
        &self,
        gradients: BTreeMap<NodeId, Vec<f32>>,
        step: f32,
    ) -> anyhow::Result<usize> {
        Ok(self.engine.write().await.apply_gradients(&gradients, step)?)
    }

    async fn mean_loss(&self, triplets: &[Triplet], margin: f32) -> anyhow::Result<f32> {
        Ok(self.engine.read().await.triplet_loss(triplets, margin)?)
    }
}

/// Applies buffered interactions to the live engine under one write lock per batch.
///
/// Interactions the engine rejects are logged and skipped so one bad record cannot hold back
/// the rest of the stream.
pub struct InteractionSink {
    engine: Arc<RwLock<RecommendationEngine>>,
}

impl InteractionSink {
    pub fn new(engine: Arc<RwLock<RecommendationEngine>>) -> Self {
        Self { engine }
    }
}

#[async_trait::async_trait]
impl UpdateSink<Interaction> for InteractionSink {
    async fn apply(&self, batch: &[Stamped<Interaction>]) -> anyhow::Result<()> {
        let mut engine = self.engine.write().await;
        let mut applied = 0usize;
        for stamped in batch {
            match engine.add_interaction(&stamped.update) {
                Ok(_) => applied += 1,
                Err(e) => warn!(
                    user = %stamped.update.user_id,
                    item = %stamped.update.item_id,
                    received_at = stamped.received_at,
                    "Dropping streamed interaction: {}",
                    e
                ),
            }
        }
        debug!(applied, received = batch.len(), "Streamed interactions applied");
        Ok(())
    }
}
