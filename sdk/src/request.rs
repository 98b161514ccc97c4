use engine::{
    EngineSnapshot, Interaction, MediaInput, RecommendationConfig, RecommendationOptions,
    SeedAggregation,
};
use hyperrec_core::error::{ErrorResponse, HyperrecError};
use hyperrec_core::model::NodeId;
use jobs::JobConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use storage::{AdjacencyDocument, MetadataFilter};

const DEFAULT_TRENDING_WINDOW_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// One operation against the service, tagged by `op`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServiceRequest {
    Health,
    /// Uses the built-in sample catalog when no graph is given.
    Initialize {
        #[serde(default)]
        config: Option<RecommendationConfig>,
        #[serde(default)]
        graph: Option<AdjacencyDocument>,
    },
    AddMedia(MediaInput),
    AddInteraction(Interaction),
    Recommendations {
        user_id: NodeId,
        #[serde(default)]
        options: RecommendationOptions,
    },
    SimilarItems {
        item_id: NodeId,
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        filters: MetadataFilter,
    },
    MultiSeed {
        seed_ids: Vec<NodeId>,
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        aggregation: SeedAggregation,
        #[serde(default)]
        filters: MetadataFilter,
    },
    Trending {
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default = "default_window")]
        window_millis: i64,
    },
    StartFineTune {
        #[serde(default)]
        config: JobConfig,
    },
    GetJob {
        job_id: String,
    },
    ListJobs,
    CancelJob {
        job_id: String,
    },
    ExportState,
    ImportState {
        state: Box<EngineSnapshot>,
    },
    Stats,
    SaveSnapshot,
    RestoreSnapshot,
}

fn default_window() -> i64 {
    DEFAULT_TRENDING_WINDOW_MILLIS
}

/// Envelope returned for every request; errors never escape as panics or raw errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

impl ServiceResponse {
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: &dyn HyperrecError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.to_response()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_are_tagged_by_op() {
        let request: ServiceRequest = serde_json::from_str(
            r#"{"op":"recommendations","user_id":"user-alice","options":{"limit":3}}"#,
        )
        .unwrap();
        match request {
            ServiceRequest::Recommendations { user_id, options } => {
                assert_eq!(user_id, "user-alice");
                assert_eq!(options.limit, Some(3));
            }
            other => panic!("unexpected request {other:?}"),
        }

        let request: ServiceRequest = serde_json::from_str(r#"{"op":"trending"}"#).unwrap();
        assert!(matches!(
            request,
            ServiceRequest::Trending {
                limit: None,
                window_millis: DEFAULT_TRENDING_WINDOW_MILLIS
            }
        ));
    }

    #[test]
    fn newtype_variants_read_inline_fields() {
        let request: ServiceRequest = serde_json::from_str(
            r#"{"op":"add_interaction","user_id":"u1","item_id":"movie-1","interaction_type":"like"}"#,
        )
        .unwrap();
        match request {
            ServiceRequest::AddInteraction(interaction) => {
                assert_eq!(interaction.interaction_type, "like");
                assert!((interaction.rating - 1.0).abs() < f32::EPSILON);
            }
            other => panic!("unexpected request {other:?}"),
        }
    }
}
