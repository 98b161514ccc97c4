use engine::{
    EngineError, EngineSnapshot, EngineStats, Interaction, MediaInput, Recommendation,
    RecommendationConfig, RecommendationEngine, RecommendationOptions, SeedAggregation,
    TrendingItem,
};
use hyperrec_core::config::AppConfig;
use hyperrec_core::error::HyperrecError;
use hyperrec_core::metrics::{MetricsCollector, MetricsSnapshot};
use hyperrec_core::model::{now_millis, EdgeId, NodeId};
use jobs::{
    DistributedCoordinator, JobConfig, LearningJob, StreamingConfig, StreamingUpdateHandler,
    WorkerPool,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use storage::{Hypergraph, MetadataFilter, SnapshotManager};
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use training::SpsaConfig;

use crate::request::{ServiceRequest, ServiceResponse};
use crate::sample::sample_graph;
use crate::target::{InteractionSink, SharedEngine};
use crate::ServiceError;

const DEFAULT_METRICS_HISTORY: usize = 1000;
const DEFAULT_SNAPSHOT_RETENTION: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub initialized: bool,
    pub last_updated: Option<i64>,
    pub active_jobs: usize,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    pub engine: EngineStats,
    pub metrics: MetricsSnapshot,
    pub jobs: usize,
}

/// Async front door to one engine: request dispatch, background fine-tuning and snapshots.
///
/// Cloning is cheap and every clone serves the same engine.
#[derive(Clone)]
pub struct EngineService {
    engine: Arc<RwLock<RecommendationEngine>>,
    coordinator: DistributedCoordinator,
    metrics: MetricsCollector,
    snapshots: Option<Arc<SnapshotManager>>,
    streaming: StreamingConfig,
}

impl EngineService {
    pub fn new(config: RecommendationConfig) -> Result<Self, ServiceError> {
        let spsa = SpsaConfig::default();
        let coordinator =
            DistributedCoordinator::new(WorkerPool::local(spsa.num_workers), spsa.clone());
        let engine = RecommendationEngine::new(config)?.with_spsa_config(spsa);
        Ok(Self {
            engine: Arc::new(RwLock::new(engine)),
            coordinator,
            metrics: MetricsCollector::new(DEFAULT_METRICS_HISTORY),
            snapshots: None,
            streaming: StreamingConfig::default(),
        })
    }

    /// Builds the service from layered configuration, with snapshots under
    /// `service.snapshot_dir`.
    pub fn from_app_config(app: &AppConfig) -> Result<Self, ServiceError> {
        let spsa = SpsaConfig::from(&app.training);
        spsa.validate().map_err(EngineError::from)?;
        let coordinator =
            DistributedCoordinator::new(WorkerPool::local(spsa.num_workers), spsa.clone())
                .with_loss_sample_size(app.training.loss_sample_size);
        let engine = RecommendationEngine::new(RecommendationConfig::from(&app.engine))?
            .with_spsa_config(spsa);

        info!(
            snapshot_dir = %app.service.snapshot_dir,
            dimensions = app.engine.dimensions,
            "Engine service configured"
        );
        Ok(Self {
            engine: Arc::new(RwLock::new(engine)),
            coordinator,
            metrics: MetricsCollector::new(app.service.metrics_history),
            snapshots: Some(Arc::new(
                SnapshotManager::new(&app.service.snapshot_dir)
                    .with_retention(app.service.snapshot_retention),
            )),
            streaming: StreamingConfig {
                batch_size: app.service.stream_batch_size,
                flush_interval: Duration::from_millis(app.service.stream_flush_interval_ms),
            },
        })
    }

    pub fn with_snapshot_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.snapshots = Some(Arc::new(
            SnapshotManager::new(dir).with_retention(DEFAULT_SNAPSHOT_RETENTION),
        ));
        self
    }

    pub fn with_coordinator(mut self, coordinator: DistributedCoordinator) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn with_streaming(mut self, streaming: StreamingConfig) -> Self {
        self.streaming = streaming;
        self
    }

    /// A buffer that feeds interactions into this engine in batches. Auto-flush is off until
    /// the caller starts it.
    pub fn interaction_stream(&self) -> StreamingUpdateHandler<Interaction> {
        StreamingUpdateHandler::new(
            self.streaming,
            Arc::new(InteractionSink::new(self.engine.clone())),
        )
    }

    pub fn engine(&self) -> &Arc<RwLock<RecommendationEngine>> {
        &self.engine
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn health(&self) -> HealthStatus {
        let engine = self.engine.read().await;
        let active_jobs = self
            .coordinator
            .list_jobs()
            .iter()
            .filter(|job| !job.status.is_terminal())
            .count();
        HealthStatus {
            status: "ok".to_string(),
            initialized: engine.is_initialized(),
            last_updated: engine.last_updated(),
            active_jobs,
            timestamp: now_millis(),
        }
    }

    /// Replaces the engine's state with `graph`, or with the sample catalog when none is given.
    /// A new `config` swaps the engine but keeps its training settings.
    pub async fn initialize(
        &self,
        config: Option<RecommendationConfig>,
        graph: Option<Hypergraph>,
    ) -> Result<EngineStats, ServiceError> {
        let mut engine = self.engine.write().await;
        if let Some(config) = config {
            let spsa = engine.spsa_config().clone();
            *engine = RecommendationEngine::new(config)?.with_spsa_config(spsa);
        }

        let graph = match graph {
            Some(graph) => graph,
            None => {
                let seed = engine.config().seed.unwrap_or_else(rand::random);
                sample_graph(seed).map_err(EngineError::from)?
            }
        };

        let stats = engine.initialize(graph)?;
        info!(
            nodes = stats.graph.total_nodes,
            edges = stats.graph.total_edges,
            "Service engine initialized"
        );
        Ok(stats)
    }

    pub async fn add_media(&self, media: MediaInput) -> Result<NodeId, ServiceError> {
        Ok(self.engine.write().await.add_media(media)?)
    }

    pub async fn add_interaction(&self, interaction: &Interaction) -> Result<EdgeId, ServiceError> {
        Ok(self.engine.write().await.add_interaction(interaction)?)
    }

    pub async fn recommendations(
        &self,
        user_id: &str,
        options: &RecommendationOptions,
    ) -> Result<Vec<Recommendation>, ServiceError> {
        Ok(self.engine.read().await.recommendations(user_id, options)?)
    }

    pub async fn similar_items(
        &self,
        item_id: &str,
        limit: Option<usize>,
        filters: &MetadataFilter,
    ) -> Result<Vec<Recommendation>, ServiceError> {
        Ok(self.engine.read().await.similar_items(item_id, limit, filters)?)
    }

    pub async fn multi_seed(
        &self,
        seed_ids: &[NodeId],
        limit: Option<usize>,
        aggregation: SeedAggregation,
        filters: &MetadataFilter,
    ) -> Result<Vec<Recommendation>, ServiceError> {
        let engine = self.engine.read().await;
        Ok(engine.multi_seed(seed_ids, limit, aggregation, filters)?)
    }

    pub async fn trending(
        &self,
        limit: Option<usize>,
        window_millis: i64,
    ) -> Result<Vec<TrendingItem>, ServiceError> {
        Ok(self.engine.read().await.trending(limit, window_millis)?)
    }

    /// Queues a distributed fine-tuning job against the live engine and returns it pending.
    /// Per-epoch losses reach the metrics once the job ends.
    pub async fn start_fine_tune(&self, config: JobConfig) -> Result<LearningJob, ServiceError> {
        if !self.engine.read().await.is_initialized() {
            return Err(EngineError::NotInitialized.into());
        }

        let target = Arc::new(SharedEngine::new(self.engine.clone(), config.seed));
        let job = self.coordinator.create_job(config)?;

        let coordinator = self.coordinator.clone();
        let metrics = self.metrics.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move {
            match coordinator.run_job(&job_id, target).await {
                Ok(finished) => {
                    for loss in &finished.progress.losses {
                        metrics.record_training_epoch(*loss);
                    }
                    info!(
                        job_id = %job_id,
                        status = ?finished.status,
                        epochs = finished.progress.losses.len(),
                        "Fine-tune job finished"
                    );
                }
                Err(e) => warn!(job_id = %job_id, "Fine-tune job did not run: {}", e),
            }
        });
        Ok(job)
    }

    pub fn get_job(&self, job_id: &str) -> Result<LearningJob, ServiceError> {
        Ok(self.coordinator.get_job(job_id)?)
    }

    pub fn list_jobs(&self) -> Vec<LearningJob> {
        self.coordinator.list_jobs()
    }

    pub fn cancel_job(&self, job_id: &str) -> Result<LearningJob, ServiceError> {
        Ok(self.coordinator.cancel_job(job_id)?)
    }

    pub async fn export_state(&self) -> Result<EngineSnapshot, ServiceError> {
        Ok(self.engine.read().await.export_state()?)
    }

    pub async fn import_state(&self, snapshot: EngineSnapshot) -> Result<EngineStats, ServiceError> {
        let mut engine = self.engine.write().await;
        engine.import_state(snapshot)?;
        Ok(engine.stats()?)
    }

    pub async fn stats(&self) -> Result<ServiceStats, ServiceError> {
        let engine = self.engine.read().await.stats()?;
        Ok(ServiceStats {
            engine,
            metrics: self.metrics.snapshot(),
            jobs: self.coordinator.list_jobs().len(),
        })
    }

    /// Writes the exported state as the next numbered snapshot.
    pub async fn save_snapshot(&self) -> Result<(u64, PathBuf), ServiceError> {
        let snapshots = self.snapshots.as_ref().ok_or(ServiceError::SnapshotsDisabled)?;
        let bytes = self.engine.read().await.export_state()?.to_json()?;
        let (sequence, path) = snapshots.append_snapshot(&bytes).await?;
        info!(sequence, path = %path.display(), bytes = bytes.len(), "Engine snapshot saved");
        Ok((sequence, path))
    }

    /// Loads the newest snapshot into the engine. `None` when there is nothing to restore.
    pub async fn restore_snapshot(&self) -> Result<Option<u64>, ServiceError> {
        let snapshots = self.snapshots.as_ref().ok_or(ServiceError::SnapshotsDisabled)?;
        let Some((sequence, bytes)) = snapshots.load_latest().await? else {
            info!(dir = %snapshots.dir().display(), "No snapshot to restore");
            return Ok(None);
        };
        let snapshot = EngineSnapshot::from_json(&bytes)?;
        self.engine.write().await.import_state(snapshot)?;
        info!(sequence, "Engine snapshot restored");
        Ok(Some(sequence))
    }

    /// Parses and handles one JSON request. Never fails; errors come back in the envelope.
    pub async fn handle_json(&self, raw: &str) -> ServiceResponse {
        match serde_json::from_str::<ServiceRequest>(raw) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                self.metrics.record_request(0, true);
                let err = ServiceError::InvalidRequest(e.to_string());
                warn!("Rejected malformed request: {}", err);
                ServiceResponse::failure(&err)
            }
        }
    }

    pub async fn handle(&self, request: ServiceRequest) -> ServiceResponse {
        let start = Instant::now();
        let result = self.dispatch(request).await;
        let elapsed = start.elapsed().as_micros() as u64;
        self.metrics.record_request(elapsed, result.is_err());

        match result {
            Ok(data) => ServiceResponse::success(data),
            Err(e) => {
                error!(code = %e.error_code(), latency_us = elapsed, "Request failed: {}", e);
                ServiceResponse::failure(&e)
            }
        }
    }

    async fn dispatch(&self, request: ServiceRequest) -> Result<Value, ServiceError> {
        match request {
            ServiceRequest::Health => to_value(self.health().await),
            ServiceRequest::Initialize { config, graph } => {
                let graph = graph
                    .map(Hypergraph::from_adjacency_list)
                    .transpose()
                    .map_err(EngineError::from)?;
                to_value(self.initialize(config, graph).await?)
            }
            ServiceRequest::AddMedia(media) => Ok(json!({ "id": self.add_media(media).await? })),
            ServiceRequest::AddInteraction(interaction) => {
                Ok(json!({ "edge_id": self.add_interaction(&interaction).await? }))
            }
            ServiceRequest::Recommendations { user_id, options } => {
                to_value(self.recommendations(&user_id, &options).await?)
            }
            ServiceRequest::SimilarItems {
                item_id,
                limit,
                filters,
            } => to_value(self.similar_items(&item_id, limit, &filters).await?),
            ServiceRequest::MultiSeed {
                seed_ids,
                limit,
                aggregation,
                filters,
            } => to_value(
                self.multi_seed(&seed_ids, limit, aggregation, &filters)
                    .await?,
            ),
            ServiceRequest::Trending {
                limit,
                window_millis,
            } => to_value(self.trending(limit, window_millis).await?),
            ServiceRequest::StartFineTune { config } => {
                to_value(self.start_fine_tune(config).await?)
            }
            ServiceRequest::GetJob { job_id } => to_value(self.get_job(&job_id)?),
            ServiceRequest::ListJobs => to_value(self.list_jobs()),
            ServiceRequest::CancelJob { job_id } => to_value(self.cancel_job(&job_id)?),
            ServiceRequest::ExportState => to_value(self.export_state().await?),
            ServiceRequest::ImportState { state } => to_value(self.import_state(*state).await?),
            ServiceRequest::Stats => to_value(self.stats().await?),
            ServiceRequest::SaveSnapshot => {
                let (sequence, path) = self.save_snapshot().await?;
                Ok(json!({ "sequence": sequence, "path": path.display().to_string() }))
            }
            ServiceRequest::RestoreSnapshot => {
                Ok(json!({ "sequence": self.restore_snapshot().await? }))
            }
        }
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, ServiceError> {
    serde_json::to_value(value).map_err(|e| ServiceError::Internal(e.to_string()))
}
