use hyperrec_core::embedding::EmbeddingMap;
use hyperrec_core::model::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};
use training::{AnchorGradient, Triplet};

use crate::worker::GradientWorker;

/// One shard of an epoch, self-contained so it can be shipped to a remote worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerTask {
    pub job_id: String,
    pub epoch: usize,
    pub worker_id: String,
    pub triplets: Vec<Triplet>,
    /// Vectors of every node the shard references.
    pub embeddings: EmbeddingMap,
    pub perturbation: f32,
    pub margin: f32,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    pub job_id: String,
    pub epoch: usize,
    pub worker_id: String,
    pub updates: BTreeMap<NodeId, AnchorGradient>,
    pub avg_loss: f32,
    pub processed: usize,
}

/// A task plus the channel its result goes back on.
pub struct TaskEnvelope {
    pub task: WorkerTask,
    pub reply: oneshot::Sender<anyhow::Result<WorkerResult>>,
}

/// Client side of a worker reached over an in-process channel.
pub struct ChannelWorker {
    sender: mpsc::Sender<TaskEnvelope>,
}

impl ChannelWorker {
    pub fn new(sender: mpsc::Sender<TaskEnvelope>) -> Self {
        Self { sender }
    }
}

#[async_trait::async_trait]
impl GradientWorker for ChannelWorker {
    async fn process(&self, task: WorkerTask) -> anyhow::Result<WorkerResult> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(TaskEnvelope { task, reply })
            .await
            .map_err(|e| anyhow::anyhow!("Worker queue send error: {}", e))?;
        response
            .await
            .map_err(|_| anyhow::anyhow!("Worker dropped the task without replying"))?
    }
}
