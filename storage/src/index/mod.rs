pub mod flat;
pub mod ivf;

pub use flat::{exact_top_k, within_radius, Neighbor};
pub use ivf::IvfIndex;

use hyperrec_core::vector;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
    Dot,
}

impl DistanceMetric {
    /// Smaller is closer for every metric. Cosine assumes both inputs are unit length.
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - vector::dot(a, b),
            DistanceMetric::Euclidean => vector::euclidean(a, b),
            DistanceMetric::Dot => -vector::dot(a, b),
        }
    }

    pub fn normalizes(self) -> bool {
        matches!(self, DistanceMetric::Cosine)
    }
}
