use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;

use crate::embedding::{EdgeAggregation, EmbeddingMethod};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceSettings {
    pub snapshot_dir: String,
    /// Newest snapshots kept on disk; `0` keeps all of them.
    pub snapshot_retention: usize,
    pub metrics_history: usize,
    /// Buffered streaming updates that force a flush.
    pub stream_batch_size: usize,
    pub stream_flush_interval_ms: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            snapshot_dir: "data/snapshots".to_string(),
            snapshot_retention: 5,
            metrics_history: 1_000,
            stream_batch_size: 1_000,
            stream_flush_interval_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineSettings {
    pub dimensions: usize,
    pub top_k: usize,
    pub diversity_weight: f32,
    pub use_ivf_index: bool,
    pub num_clusters: usize,
    pub ivf_min_vectors: usize,
    pub n_probe: usize,
    pub method: EmbeddingMethod,
    pub fastrp_iterations: usize,
    pub edge_aggregation: EdgeAggregation,
    pub seed: Option<u64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            dimensions: 128,
            top_k: 10,
            diversity_weight: 0.3,
            use_ivf_index: false,
            num_clusters: 16,
            ivf_min_vectors: 100,
            n_probe: 5,
            method: EmbeddingMethod::FastRp,
            fastrp_iterations: 3,
            edge_aggregation: EdgeAggregation::Attention,
            seed: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrainingSettings {
    pub a: f32,
    pub c: f32,
    pub alpha: f32,
    pub gamma: f32,
    pub stability: f32,
    pub margin: f32,
    pub epochs: usize,
    pub batch_size: usize,
    pub num_workers: usize,
    pub loss_sample_size: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            a: 0.1,
            c: 0.1,
            alpha: 0.602,
            gamma: 0.101,
            stability: 100.0,
            margin: 0.2,
            epochs: 10,
            batch_size: 32,
            num_workers: 4,
            loss_sample_size: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub engine: EngineSettings,
    pub training: TrainingSettings,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(".")
    }

    /// Loads `config/default`, then `config/{RUN_MODE}` and `HYPERREC__*` overrides,
    /// resolving the config directory under `root`.
    pub fn load_from(root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let config_dir = root.as_ref().join("config");

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default")))
            .add_source(File::from(config_dir.join(run_mode)).required(false))
            .add_source(
                Environment::with_prefix("HYPERREC")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}
