use hyperrec_core::embedding::EmbeddingMap;
use hyperrec_core::model::NodeId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use training::{SpsaConfig, TrainingError, Triplet};

use crate::averaging::FederatedAverager;
use crate::job::{JobConfig, JobRegistry, LearningJob, CANCELLED_MESSAGE};
use crate::queue::WorkerTask;
use crate::worker::WorkerPool;
use crate::JobError;

pub const DEFAULT_LOSS_SAMPLE_SIZE: usize = 100;

/// Triplets mined for one epoch plus the vectors they reference.
#[derive(Debug, Clone, Default)]
pub struct TripletBatch {
    pub triplets: Vec<Triplet>,
    pub embeddings: EmbeddingMap,
}

impl TripletBatch {
    /// Builds a batch, copying only the vectors `triplets` mention.
    pub fn from_triplets(triplets: Vec<Triplet>, all: &EmbeddingMap) -> Self {
        let embeddings = referenced_vectors(&triplets, all);
        Self {
            triplets,
            embeddings,
        }
    }
}

fn referenced_vectors(triplets: &[Triplet], all: &EmbeddingMap) -> EmbeddingMap {
    let mut out = EmbeddingMap::new();
    for t in triplets {
        for id in [&t.anchor, &t.positive, &t.negative] {
            if out.contains_key(id) {
                continue;
            }
            if let Some(v) = all.get(id) {
                out.insert(id.clone(), v.clone());
            }
        }
    }
    out
}

/// The model state a distributed job trains. The coordinator only talks to it between
/// worker rounds, so implementations may lock freely inside each call.
#[async_trait::async_trait]
pub trait TrainingTarget: Send + Sync {
    async fn node_count(&self) -> anyhow::Result<usize>;

    async fn sample_triplets(&self, count: usize) -> anyhow::Result<TripletBatch>;

    /// Applies `v <- normalize(v - step * g)` and refreshes the vector store.
    /// Returns the number of updated nodes.
    async fn apply_gradients(
        &self,
        gradients: BTreeMap<NodeId, Vec<f32>>,
        step: f32,
    ) -> anyhow::Result<usize>;

    async fn mean_loss(&self, triplets: &[Triplet], margin: f32) -> anyhow::Result<f32>;
}

enum EpochOutcome {
    Finished,
    Cancelled,
}

/// Owns learning jobs and drives them: shard, dispatch, average, step.
#[derive(Clone)]
pub struct DistributedCoordinator {
    registry: JobRegistry,
    pool: WorkerPool,
    spsa: SpsaConfig,
    loss_sample_size: usize,
}

impl DistributedCoordinator {
    pub fn new(pool: WorkerPool, spsa: SpsaConfig) -> Self {
        Self {
            registry: JobRegistry::new(),
            pool,
            spsa,
            loss_sample_size: DEFAULT_LOSS_SAMPLE_SIZE,
        }
    }

    pub fn with_loss_sample_size(mut self, size: usize) -> Self {
        self.loss_sample_size = size.max(1);
        self
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn create_job(&self, config: JobConfig) -> Result<LearningJob, JobError> {
        config.validate()?;
        let job = LearningJob::new(config);
        info!(job_id = %job.id, "Created learning job");
        self.registry.insert(job.clone());
        Ok(job)
    }

    pub fn get_job(&self, id: &str) -> Result<LearningJob, JobError> {
        self.registry
            .get(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    pub fn list_jobs(&self) -> Vec<LearningJob> {
        self.registry.list()
    }

    pub fn cancel_job(&self, id: &str) -> Result<LearningJob, JobError> {
        let job = self.registry.request_cancel(id)?;
        info!(job_id = %id, status = ?job.status, "Cancellation requested");
        Ok(job)
    }

    /// Creates a job and trains it on a background task. Returns the pending record.
    pub fn start_job(
        &self,
        config: JobConfig,
        target: Arc<dyn TrainingTarget>,
    ) -> Result<LearningJob, JobError> {
        let job = self.create_job(config)?;
        let coordinator = self.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move {
            if let Err(e) = coordinator.run_job(&job_id, target).await {
                warn!(job_id = %job_id, "Learning job did not run: {}", e);
            }
        });
        Ok(job)
    }

    /// Trains a pending job to the end. Training failures are recorded on the job rather than
    /// returned; the error path is reserved for unknown jobs and illegal transitions.
    pub async fn run_job(
        &self,
        job_id: &str,
        target: Arc<dyn TrainingTarget>,
    ) -> Result<LearningJob, JobError> {
        let job = self.get_job(job_id)?;

        let node_count = match target.node_count().await {
            Ok(n) => n,
            Err(e) => return self.registry.mark_failed(job_id, &e.to_string()),
        };
        let total_batches = node_count.div_ceil(job.config.batch_size);
        let job = self.registry.mark_running(job_id, total_batches)?;

        match self.train_epochs(&job, node_count, target.as_ref()).await {
            Ok(EpochOutcome::Finished) => self.registry.mark_completed(job_id),
            Ok(EpochOutcome::Cancelled) => self.registry.mark_failed(job_id, CANCELLED_MESSAGE),
            Err(e) => self.registry.mark_failed(job_id, &e.to_string()),
        }
    }

    async fn train_epochs(
        &self,
        job: &LearningJob,
        node_count: usize,
        target: &dyn TrainingTarget,
    ) -> anyhow::Result<EpochOutcome> {
        let mut rng = match job.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut averager = FederatedAverager::new();
        let epochs = job.config.epochs;

        for epoch in 0..epochs {
            if self.registry.cancel_requested(&job.id) {
                info!(job_id = %job.id, epoch, "Stopping cancelled job");
                return Ok(EpochOutcome::Cancelled);
            }
            self.registry.set_epoch(&job.id, epoch + 1)?;

            let batch = target.sample_triplets(node_count.max(1)).await?;
            let k = epoch as u64;
            let perturbation = self.spsa.perturbation(k);
            let step = self.spsa.step_size(k);

            let tasks = self.shard(job, epoch, &batch, perturbation, &mut rng);
            let results = self.pool.dispatch(tasks).await?;
            for result in results {
                averager.receive(result);
            }
            let gradients = averager.aggregate();
            averager.clear();
            let updated = target.apply_gradients(gradients, step).await?;

            let sample = batch.triplets.len().min(self.loss_sample_size);
            let loss = target
                .mean_loss(&batch.triplets[..sample], self.spsa.margin)
                .await?;
            if !loss.is_finite() {
                return Err(TrainingError::NonFiniteLoss(k + 1).into());
            }
            self.registry.record_loss(&job.id, loss)?;

            info!(
                job_id = %job.id,
                epoch = epoch + 1,
                epochs,
                loss,
                triplets = batch.triplets.len(),
                updated,
                "Epoch finished"
            );
        }

        Ok(EpochOutcome::Finished)
    }

    /// Splits the batch into at most `num_workers` contiguous shards of near-equal size.
    fn shard(
        &self,
        job: &LearningJob,
        epoch: usize,
        batch: &TripletBatch,
        perturbation: f32,
        rng: &mut StdRng,
    ) -> Vec<WorkerTask> {
        if batch.triplets.is_empty() {
            return Vec::new();
        }
        let shard_size = batch
            .triplets
            .len()
            .div_ceil(job.config.num_workers)
            .max(1);

        batch
            .triplets
            .chunks(shard_size)
            .enumerate()
            .map(|(i, shard)| WorkerTask {
                job_id: job.id.clone(),
                epoch,
                worker_id: format!("worker-{i}"),
                triplets: shard.to_vec(),
                embeddings: referenced_vectors(shard, &batch.embeddings),
                perturbation,
                margin: self.spsa.margin,
                seed: rng.gen(),
            })
            .collect()
    }
}
