use crate::queue::{ChannelWorker, TaskEnvelope, WorkerResult, WorkerTask};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Computes per-anchor gradient estimates for one shard. Implementations may run in-process
/// or forward the serialized task to another machine.
#[async_trait::async_trait]
pub trait GradientWorker: Send + Sync {
    async fn process(&self, task: WorkerTask) -> anyhow::Result<WorkerResult>;
}

/// Pure shard computation; shared by every in-process worker flavour.
pub fn compute_shard(task: WorkerTask) -> WorkerResult {
    let mut rng = StdRng::seed_from_u64(task.seed);
    let estimate = training::accumulate_gradients(
        &task.embeddings,
        &task.triplets,
        task.perturbation,
        task.margin,
        &mut rng,
    );
    WorkerResult {
        avg_loss: estimate.average_loss(),
        processed: estimate.processed,
        updates: estimate.anchors,
        job_id: task.job_id,
        epoch: task.epoch,
        worker_id: task.worker_id,
    }
}

/// Runs shards on the blocking thread pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalWorker;

#[async_trait::async_trait]
impl GradientWorker for LocalWorker {
    async fn process(&self, task: WorkerTask) -> anyhow::Result<WorkerResult> {
        let result = tokio::task::spawn_blocking(move || compute_shard(task)).await?;
        Ok(result)
    }
}

/// Receiving end of a [`ChannelWorker`].
pub struct WorkerLoop {
    name: String,
    receiver: mpsc::Receiver<TaskEnvelope>,
    inner: Arc<dyn GradientWorker>,
}

impl WorkerLoop {
    pub fn new(
        name: impl Into<String>,
        receiver: mpsc::Receiver<TaskEnvelope>,
        inner: Arc<dyn GradientWorker>,
    ) -> Self {
        Self {
            name: name.into(),
            receiver,
            inner,
        }
    }

    pub async fn run(mut self) {
        info!(worker = %self.name, "Worker started");
        while let Some(TaskEnvelope { task, reply }) = self.receiver.recv().await {
            debug!(
                worker = %self.name,
                job_id = %task.job_id,
                epoch = task.epoch,
                triplets = task.triplets.len(),
                "Processing shard"
            );
            let result = self.inner.process(task).await;
            if let Err(e) = &result {
                error!(worker = %self.name, "Failed to process shard: {}", e);
            }
            // The requester may have given up; nothing to do then.
            let _ = reply.send(result);
        }
        info!(worker = %self.name, "Worker stopped");
    }
}

/// Fixed set of workers; tasks are assigned round-robin.
#[derive(Clone)]
pub struct WorkerPool {
    workers: Vec<Arc<dyn GradientWorker>>,
}

impl WorkerPool {
    pub fn new(workers: Vec<Arc<dyn GradientWorker>>) -> Self {
        Self { workers }
    }

    /// `size` in-process workers, called directly.
    pub fn local(size: usize) -> Self {
        let workers = (0..size.max(1))
            .map(|_| Arc::new(LocalWorker) as Arc<dyn GradientWorker>)
            .collect();
        Self { workers }
    }

    /// `size` worker loops spawned on the current runtime, each reached through its own channel.
    pub fn spawn_channel(size: usize, capacity: usize) -> Self {
        let workers = (0..size.max(1))
            .map(|i| {
                let (sender, receiver) = mpsc::channel(capacity.max(1));
                let worker_loop =
                    WorkerLoop::new(format!("worker-{i}"), receiver, Arc::new(LocalWorker));
                tokio::spawn(worker_loop.run());
                Arc::new(ChannelWorker::new(sender)) as Arc<dyn GradientWorker>
            })
            .collect();
        Self { workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Runs every task concurrently. Results come back in task order; the first failure wins.
    pub async fn dispatch(&self, tasks: Vec<WorkerTask>) -> anyhow::Result<Vec<WorkerResult>> {
        if self.workers.is_empty() {
            anyhow::bail!("Worker pool is empty");
        }

        let mut set = JoinSet::new();
        let count = tasks.len();
        for (i, task) in tasks.into_iter().enumerate() {
            let worker = Arc::clone(&self.workers[i % self.workers.len()]);
            set.spawn(async move { (i, worker.process(task).await) });
        }

        let mut results: Vec<(usize, WorkerResult)> = Vec::with_capacity(count);
        while let Some(joined) = set.join_next().await {
            let (i, result) = joined?;
            results.push((i, result?));
        }
        results.sort_by_key(|(i, _)| *i);
        Ok(results.into_iter().map(|(_, r)| r).collect())
    }
}
