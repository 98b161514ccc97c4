use hyperrec_core::error::{ErrorCode, HyperrecError};
use hyperrec_core::model::now_millis;
use hyperrec_core::vector;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::index::{exact_top_k, within_radius, DistanceMetric, IvfIndex, Neighbor};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VectorStoreError {
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("vector {0} contains non-finite values")]
    NonFinite(String),
    #[error("not enough vectors for IVF indexing: {available} vectors, {clusters} clusters")]
    InsufficientVectors { available: usize, clusters: usize },
    #[error("invalid vector store configuration: {0}")]
    InvalidConfig(String),
}

impl HyperrecError for VectorStoreError {
    fn error_code(&self) -> ErrorCode {
        ErrorCode::InvalidArgument
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    pub dimensions: usize,
    #[serde(default)]
    pub metric: DistanceMetric,
    pub num_clusters: usize,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            dimensions: 128,
            metric: DistanceMetric::Cosine,
            num_clusters: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub timestamp: i64,
}

/// Accepted values for one metadata key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    AnyOf(Vec<Value>),
    Exact(Value),
}

impl FilterValue {
    fn accepts(&self, actual: Option<&Value>) -> bool {
        match (self, actual) {
            (FilterValue::AnyOf(values), Some(actual)) => values.contains(actual),
            (FilterValue::Exact(expected), Some(actual)) => expected == actual,
            (_, None) => false,
        }
    }
}

/// Conjunction of per-key constraints over entry metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter(BTreeMap<String, FilterValue>);

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exact(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), FilterValue::Exact(value.into()));
        self
    }

    pub fn any_of<I, V>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.0.insert(
            key.into(),
            FilterValue::AnyOf(values.into_iter().map(Into::into).collect()),
        );
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether some constraint already applies to `key`.
    pub fn constrains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn matches(&self, metadata: &BTreeMap<String, Value>) -> bool {
        self.0
            .iter()
            .all(|(key, accepted)| accepted.accepts(metadata.get(key)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub distance: f32,
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredVector {
    pub id: String,
    #[serde(flatten)]
    pub entry: VectorEntry,
}

/// Serialized form of a [`VectorStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorStoreSnapshot {
    pub dimensions: usize,
    pub metric: DistanceMetric,
    pub num_clusters: usize,
    pub vectors: Vec<StoredVector>,
    #[serde(default)]
    pub centroids: Option<Vec<Vec<f32>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorStoreStats {
    pub total_vectors: usize,
    pub dimensions: usize,
    pub metric: DistanceMetric,
    pub has_ivf_index: bool,
    pub num_clusters: usize,
}

/// In-memory vector store with exact, radius and IVF-approximate search.
///
/// Any insert or delete drops the IVF index; approximate searches issued before the
/// next [`VectorStore::build_ivf_index`] fall back to exact search.
#[derive(Debug, Clone)]
pub struct VectorStore {
    config: VectorStoreConfig,
    entries: BTreeMap<String, VectorEntry>,
    ivf: Option<IvfIndex>,
}

impl VectorStore {
    pub fn new(config: VectorStoreConfig) -> Result<Self, VectorStoreError> {
        if config.dimensions == 0 {
            return Err(VectorStoreError::InvalidConfig(
                "dimensions must be positive".to_string(),
            ));
        }
        if config.num_clusters == 0 {
            return Err(VectorStoreError::InvalidConfig(
                "num_clusters must be positive".to_string(),
            ));
        }
        Ok(Self {
            config,
            entries: BTreeMap::new(),
            ivf: None,
        })
    }

    pub fn config(&self) -> &VectorStoreConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_ivf_index(&self) -> bool {
        self.ivf.is_some()
    }

    fn check_dimensions(&self, v: &[f32]) -> Result<(), VectorStoreError> {
        if v.len() != self.config.dimensions {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.config.dimensions,
                actual: v.len(),
            });
        }
        Ok(())
    }

    fn check_vector(&self, id: &str, v: &[f32]) -> Result<(), VectorStoreError> {
        self.check_dimensions(v)?;
        if v.iter().any(|x| !x.is_finite()) {
            return Err(VectorStoreError::NonFinite(id.to_string()));
        }
        Ok(())
    }

    fn prepare(&self, v: &[f32]) -> Vec<f32> {
        if self.config.metric.normalizes() {
            vector::normalized(v)
        } else {
            v.to_vec()
        }
    }

    /// Inserts or replaces a vector, normalizing it under the cosine metric.
    pub fn add(
        &mut self,
        id: impl Into<String>,
        v: &[f32],
        metadata: BTreeMap<String, Value>,
    ) -> Result<(), VectorStoreError> {
        let id = id.into();
        self.check_vector(&id, v)?;
        let entry = VectorEntry {
            vector: self.prepare(v),
            metadata,
            timestamp: now_millis(),
        };
        self.entries.insert(id, entry);
        self.ivf = None;
        Ok(())
    }

    /// Validates every item before inserting any of them.
    pub fn add_batch<I>(&mut self, items: I) -> Result<usize, VectorStoreError>
    where
        I: IntoIterator<Item = (String, Vec<f32>, BTreeMap<String, Value>)>,
    {
        let items: Vec<_> = items.into_iter().collect();
        for (id, v, _) in &items {
            self.check_vector(id, v)?;
        }
        let count = items.len();
        for (id, v, metadata) in items {
            self.add(id, &v, metadata)?;
        }
        Ok(count)
    }

    pub fn get(&self, id: &str) -> Option<&VectorEntry> {
        self.entries.get(id)
    }

    pub fn delete(&mut self, id: &str) -> bool {
        let existed = self.entries.remove(id).is_some();
        if existed {
            self.ivf = None;
        }
        existed
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    fn candidates<'a>(
        &'a self,
        filter: &'a MetadataFilter,
    ) -> impl Iterator<Item = (&'a str, &'a [f32])> + 'a {
        self.entries
            .iter()
            .filter(move |(_, e)| filter.matches(&e.metadata))
            .map(|(id, e)| (id.as_str(), e.vector.as_slice()))
    }

    fn to_hits(&self, neighbors: Vec<Neighbor>) -> Vec<SearchHit> {
        neighbors
            .into_iter()
            .map(|n| {
                let metadata = self
                    .entries
                    .get(&n.id)
                    .map(|e| e.metadata.clone())
                    .unwrap_or_default();
                SearchHit {
                    id: n.id,
                    distance: n.distance,
                    metadata,
                }
            })
            .collect()
    }

    /// Exact top-k, ascending by distance.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchHit>, VectorStoreError> {
        self.check_dimensions(query)?;
        let query = self.prepare(query);
        let hits = exact_top_k(self.config.metric, &query, self.candidates(filter), k);
        Ok(self.to_hits(hits))
    }

    pub fn search_within_radius(
        &self,
        query: &[f32],
        radius: f32,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchHit>, VectorStoreError> {
        self.check_dimensions(query)?;
        let query = self.prepare(query);
        let hits = within_radius(self.config.metric, &query, self.candidates(filter), radius);
        Ok(self.to_hits(hits))
    }

    /// Clusters the current vectors and returns the number of clusters built.
    pub fn build_ivf_index<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<usize, VectorStoreError> {
        let clusters = self.config.num_clusters;
        if self.entries.len() < clusters {
            warn!(
                available = self.entries.len(),
                clusters, "Not enough vectors for IVF indexing"
            );
            return Err(VectorStoreError::InsufficientVectors {
                available: self.entries.len(),
                clusters,
            });
        }

        let items: Vec<(&str, &[f32])> = self
            .entries
            .iter()
            .map(|(id, e)| (id.as_str(), e.vector.as_slice()))
            .collect();
        let index = IvfIndex::build(self.config.metric, &items, clusters, rng);
        let built = index.num_clusters();
        self.ivf = Some(index);

        info!(vectors = self.entries.len(), clusters = built, "IVF index built");
        Ok(built)
    }

    /// Approximate top-k probing the `n_probe` nearest clusters.
    pub fn search_ivf(
        &self,
        query: &[f32],
        k: usize,
        n_probe: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchHit>, VectorStoreError> {
        let Some(index) = &self.ivf else {
            debug!("IVF index missing or stale, falling back to exact search");
            return self.search(query, k, filter);
        };

        self.check_dimensions(query)?;
        let query = self.prepare(query);
        let probed = index.probe(&query, n_probe.max(1));
        let items = probed
            .into_iter()
            .flat_map(|cluster| index.list(cluster))
            .filter_map(|id| self.entries.get_key_value(id))
            .filter(|(_, e)| filter.matches(&e.metadata))
            .map(|(id, e)| (id.as_str(), e.vector.as_slice()));

        let hits = exact_top_k(self.config.metric, &query, items, k);
        Ok(self.to_hits(hits))
    }

    pub fn to_snapshot(&self) -> VectorStoreSnapshot {
        VectorStoreSnapshot {
            dimensions: self.config.dimensions,
            metric: self.config.metric,
            num_clusters: self.config.num_clusters,
            vectors: self
                .entries
                .iter()
                .map(|(id, entry)| StoredVector {
                    id: id.clone(),
                    entry: entry.clone(),
                })
                .collect(),
            centroids: self.ivf.as_ref().map(|index| index.centroids().to_vec()),
        }
    }

    /// Restores vectors verbatim. Stored centroids are reused to rebuild the posting lists.
    pub fn from_snapshot(snapshot: VectorStoreSnapshot) -> Result<Self, VectorStoreError> {
        let mut store = VectorStore::new(VectorStoreConfig {
            dimensions: snapshot.dimensions,
            metric: snapshot.metric,
            num_clusters: snapshot.num_clusters,
        })?;

        for stored in snapshot.vectors {
            store.check_vector(&stored.id, &stored.entry.vector)?;
            store.entries.insert(stored.id, stored.entry);
        }

        if let Some(centroids) = snapshot.centroids {
            for c in &centroids {
                store.check_dimensions(c)?;
            }
            let items: Vec<(&str, &[f32])> = store
                .entries
                .iter()
                .map(|(id, e)| (id.as_str(), e.vector.as_slice()))
                .collect();
            let index = IvfIndex::from_centroids(store.config.metric, centroids, &items);
            store.ivf = Some(index);
        }

        Ok(store)
    }

    pub fn stats(&self) -> VectorStoreStats {
        VectorStoreStats {
            total_vectors: self.entries.len(),
            dimensions: self.config.dimensions,
            metric: self.config.metric,
            has_ivf_index: self.ivf.is_some(),
            num_clusters: self.config.num_clusters,
        }
    }
}
