use hyperrec_core::config::EngineSettings;
use hyperrec_core::embedding::{EdgeAggregation, EmbeddingMethod};
use hyperrec_core::model::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use storage::MetadataFilter;

use crate::EngineError;

const MAX_LIMIT: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    pub dimensions: usize,
    pub top_k: usize,
    /// 0 ranks purely by relevance; 1 purely by novelty against already picked items.
    pub diversity_weight: f32,
    pub use_ivf_index: bool,
    pub num_clusters: usize,
    /// IVF is only built when more vectors than this are stored.
    pub ivf_min_vectors: usize,
    pub n_probe: usize,
    pub method: EmbeddingMethod,
    pub fastrp_iterations: usize,
    pub edge_aggregation: EdgeAggregation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self::from(&EngineSettings::default())
    }
}

impl From<&EngineSettings> for RecommendationConfig {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            dimensions: settings.dimensions,
            top_k: settings.top_k,
            diversity_weight: settings.diversity_weight,
            use_ivf_index: settings.use_ivf_index,
            num_clusters: settings.num_clusters,
            ivf_min_vectors: settings.ivf_min_vectors,
            n_probe: settings.n_probe,
            method: settings.method,
            fastrp_iterations: settings.fastrp_iterations,
            edge_aggregation: settings.edge_aggregation,
            seed: settings.seed,
        }
    }
}

impl RecommendationConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.dimensions == 0 {
            return Err(EngineError::InvalidConfig("dimensions must be positive".into()));
        }
        if self.top_k == 0 || self.top_k > MAX_LIMIT {
            return Err(EngineError::InvalidConfig(format!(
                "top_k must be between 1 and {MAX_LIMIT}"
            )));
        }
        if !(0.0..=1.0).contains(&self.diversity_weight) {
            return Err(EngineError::InvalidConfig(
                "diversity_weight must be within [0, 1]".into(),
            ));
        }
        if self.num_clusters == 0 || self.n_probe == 0 {
            return Err(EngineError::InvalidConfig(
                "num_clusters and n_probe must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub(crate) fn check_limit(&self, limit: Option<usize>) -> Result<usize, EngineError> {
        let limit = limit.unwrap_or(self.top_k);
        if limit == 0 || limit > MAX_LIMIT {
            return Err(EngineError::InvalidInput(format!(
                "limit must be between 1 and {MAX_LIMIT}"
            )));
        }
        Ok(limit)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationOptions {
    /// Falls back to the configured `top_k`.
    pub limit: Option<usize>,
    pub filters: MetadataFilter,
    pub exclude_ids: Vec<NodeId>,
    pub include_explanation: bool,
}

impl RecommendationOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn excluding<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.exclude_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_filters(mut self, filters: MetadataFilter) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_explanation(mut self) -> Self {
        self.include_explanation = true;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedAggregation {
    #[default]
    Mean,
    Max,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FineTuneOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub margin: f32,
}

impl Default for FineTuneOptions {
    fn default() -> Self {
        Self {
            epochs: 5,
            batch_size: 32,
            margin: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub user_id: NodeId,
    pub item_id: NodeId,
    /// Becomes the edge type `user_{interaction_type}`.
    pub interaction_type: String,
    #[serde(default = "default_rating")]
    pub rating: f32,
}

impl Interaction {
    pub fn new(
        user_id: impl Into<NodeId>,
        item_id: impl Into<NodeId>,
        interaction_type: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            item_id: item_id.into(),
            interaction_type: interaction_type.into(),
            rating: default_rating(),
        }
    }

    pub fn with_rating(mut self, rating: f32) -> Self {
        self.rating = rating;
        self
    }
}

const fn default_rating() -> f32 {
    1.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaInput {
    pub id: Option<NodeId>,
    pub title: String,
    pub year: Option<i32>,
    pub description: Option<String>,
    pub genres: Vec<String>,
    pub actors: Vec<String>,
    pub directors: Vec<String>,
    pub extensions: BTreeMap<String, Value>,
}

impl MediaInput {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<NodeId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_genres<I, S>(mut self, genres: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.genres = genres.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_actors<I, S>(mut self, actors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actors = actors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_directors<I, S>(mut self, directors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.directors = directors.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn validate(&self) -> Result<(), EngineError> {
        if self.title.trim().is_empty() {
            return Err(EngineError::InvalidInput("title must not be empty".into()));
        }
        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err(EngineError::InvalidInput("id must not be empty when provided".into()));
            }
        }
        let mut names = self.genres.iter().chain(&self.actors).chain(&self.directors);
        if names.any(|name| name.trim().is_empty()) {
            return Err(EngineError::InvalidInput(
                "genre, actor and director names must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_engine_settings() {
        let config = RecommendationConfig::default();
        assert_eq!(config.dimensions, 128);
        assert_eq!(config.top_k, 10);
        assert!((config.diversity_weight - 0.3).abs() < 1e-6);
        assert_eq!(config.n_probe, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let bad = RecommendationConfig {
            diversity_weight: 1.5,
            ..RecommendationConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = RecommendationConfig {
            top_k: 0,
            ..RecommendationConfig::default()
        };
        assert!(bad.validate().is_err());
        assert!(RecommendationConfig::default().check_limit(Some(5_000)).is_err());
        assert!(RecommendationConfig::default().check_limit(Some(0)).is_err());
        assert_eq!(RecommendationConfig::default().check_limit(Some(1)).unwrap(), 1);
        assert_eq!(RecommendationConfig::default().check_limit(None).unwrap(), 10);
    }

    #[test]
    fn interaction_rating_defaults_to_one() {
        let parsed: Interaction = serde_json::from_str(
            r#"{"user_id":"u1","item_id":"m1","interaction_type":"watch"}"#,
        )
        .unwrap();
        assert_eq!(parsed, Interaction::new("u1", "m1", "watch"));
    }

    #[test]
    fn media_input_requires_a_title() {
        assert!(MediaInput::new("  ").validate().is_err());
        assert!(MediaInput::new("Alien").with_genres([""]).validate().is_err());
        assert!(MediaInput::new("Alien").with_genres(["Horror"]).validate().is_ok());
    }
}
