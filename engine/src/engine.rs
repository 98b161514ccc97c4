use embedding::{embedder_for, EmbeddingConfig, HyperedgeEmbedder, MarketEmbedder};
use hyperrec_core::embedding::EmbeddingMap;
use hyperrec_core::model::{
    now_millis, EdgeId, HyperEdge, HyperNode, MediaAttributes, NodeData, NodeId, ACTOR, DIRECTOR,
    GENRE, INTERACTION_PREFIX, MEDIA,
};
use hyperrec_core::vector::{l2_norm, normalize, weighted_mean};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use storage::{
    DistanceMetric, GraphStats, Hypergraph, MetadataFilter, SearchHit, VectorStore,
    VectorStoreConfig, VectorStoreStats,
};
use tracing::{debug, info, warn};
use training::{
    apply_gradient_step, mean_triplet_loss, sync_store, SpsaConfig, SpsaOptimizer,
    TrainingReport, Triplet, TripletGenerator,
};

use crate::mmr;
use crate::options::{
    FineTuneOptions, Interaction, MediaInput, RecommendationConfig, RecommendationOptions,
    SeedAggregation,
};
use crate::state::EngineSnapshot;
use crate::EngineError;

const FALLBACK_REASON: &str = "Recommended based on your preferences";
const MISSING_ITEM_REASON: &str = "Popular item";
const MAX_REASONS: usize = 3;
/// Distance reported for randomly sampled cold-start items.
const RANDOM_SAMPLE_DISTANCE: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: NodeId,
    /// `1 - distance`
    pub score: f32,
    pub distance: f32,
    pub metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl Recommendation {
    fn from_hit(hit: SearchHit) -> Self {
        Self {
            id: hit.id,
            score: 1.0 - hit.distance,
            distance: hit.distance,
            metadata: hit.metadata,
            explanation: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingItem {
    pub id: NodeId,
    /// Summed weight of the interactions inside the window.
    pub score: f32,
    pub interactions: usize,
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub last_updated: Option<i64>,
    pub node_embeddings: usize,
    pub edge_embeddings: usize,
    pub graph: GraphStats,
    pub vector_store: VectorStoreStats,
}

#[derive(Clone)]
struct EngineState {
    graph: Hypergraph,
    store: VectorStore,
    embeddings: EmbeddingMap,
    edge_embeddings: EmbeddingMap,
}

/// Embedding-backed recommender over a media hypergraph.
///
/// Every operation other than construction fails with [`EngineError::NotInitialized`] until
/// [`RecommendationEngine::initialize`] or [`RecommendationEngine::from_state`] has run.
pub struct RecommendationEngine {
    config: RecommendationConfig,
    spsa: SpsaConfig,
    state: Option<EngineState>,
    last_updated: Option<i64>,
}

impl RecommendationEngine {
    pub fn new(config: RecommendationConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            spsa: SpsaConfig::default(),
            state: None,
            last_updated: None,
        })
    }

    /// Optimizer defaults used by [`RecommendationEngine::fine_tune`].
    pub fn with_spsa_config(mut self, spsa: SpsaConfig) -> Self {
        self.spsa = spsa;
        self
    }

    pub fn config(&self) -> &RecommendationConfig {
        &self.config
    }

    pub fn spsa_config(&self) -> &SpsaConfig {
        &self.spsa
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    pub fn last_updated(&self) -> Option<i64> {
        self.last_updated
    }

    fn state(&self) -> Result<&EngineState, EngineError> {
        self.state.as_ref().ok_or(EngineError::NotInitialized)
    }

    fn rng(&self) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    fn touch(&mut self) {
        self.last_updated = Some(now_millis());
    }

    /// Embeds `graph`, derives edge and market vectors and fills a fresh vector store.
    /// Replaces any previous state.
    pub fn initialize(&mut self, mut graph: Hypergraph) -> Result<EngineStats, EngineError> {
        let embedding_config = EmbeddingConfig {
            dimensions: self.config.dimensions,
            iterations: self.config.fastrp_iterations,
            seed: self.config.seed,
            ..EmbeddingConfig::default()
        };
        embedding_config.validate()?;

        let embeddings = embedder_for(self.config.method, embedding_config).fit(&graph)?;
        let edge_embeddings =
            HyperedgeEmbedder::new(self.config.edge_aggregation).embed_edges(&graph, &embeddings);
        graph.set_market_embedding(MarketEmbedder::market_embedding(&graph, &embeddings));

        let mut store = VectorStore::new(VectorStoreConfig {
            dimensions: self.config.dimensions,
            metric: DistanceMetric::Cosine,
            num_clusters: self.config.num_clusters,
        })?;
        store.add_batch(graph.nodes().filter_map(|node| {
            embeddings
                .get(&node.id)
                .map(|v| (node.id.clone(), v.clone(), node_metadata(node)))
        }))?;

        let mut state = EngineState {
            graph,
            store,
            embeddings,
            edge_embeddings,
        };
        let mut rng = self.rng();
        refresh_index(&self.config, &mut state, &mut rng);

        info!(
            nodes = state.graph.node_count(),
            edges = state.graph.edge_count(),
            vectors = state.store.len(),
            method = ?self.config.method,
            "Recommendation engine initialized"
        );
        self.state = Some(state);
        self.touch();
        self.stats()
    }

    /// Adds a media node with its genre, cast and director links. Attribute nodes are reused
    /// by name. New nodes are embedded from their already embedded neighbours.
    pub fn add_media(&mut self, input: MediaInput) -> Result<NodeId, EngineError> {
        let mut rng = self.rng();
        let config = &self.config;
        let state = self.state.as_mut().ok_or(EngineError::NotInitialized)?;
        input.validate()?;

        let id = input
            .id
            .clone()
            .unwrap_or_else(|| format!("media-{}", uuid::Uuid::new_v4()));
        let mut node = HyperNode::new(
            id.clone(),
            NodeData::Media(MediaAttributes {
                title: input.title.clone(),
                year: input.year,
                description: input.description.clone(),
            }),
        );
        node.extensions = input.extensions.clone();
        state.graph.add_node(node)?;

        let links = [
            (GENRE, "same_genre", &input.genres),
            (ACTOR, "same_cast", &input.actors),
            (DIRECTOR, "same_director", &input.directors),
        ];
        let mut created = Vec::new();
        let mut new_edges = Vec::new();
        for (kind, edge_type, names) in links {
            for name in names {
                let attribute_id = match find_attribute(&state.graph, kind, name) {
                    Some(existing) => existing,
                    None => {
                        let attribute_id = format!("{kind}-{}", slug(name));
                        let node = HyperNode::new(attribute_id.clone(), attribute_data(kind, name));
                        state.graph.add_node(node)?;
                        created.push(attribute_id.clone());
                        attribute_id
                    }
                };
                let edge = state
                    .graph
                    .add_edge(HyperEdge::new(edge_type, [id.clone(), attribute_id], 1.0))?;
                new_edges.push(edge.id.clone());
            }
        }

        state.embeddings.remove(&id);
        embed_inductively(state, &id)?;
        for attribute_id in &created {
            embed_inductively(state, attribute_id)?;
        }
        embed_edges(config, state, &new_edges);
        let market = MarketEmbedder::market_embedding(&state.graph, &state.embeddings);
        state.graph.set_market_embedding(market);
        refresh_index(config, state, &mut rng);

        info!(media = %id, attributes = created.len(), edges = new_edges.len(), "Media added");
        self.touch();
        Ok(id)
    }

    /// Records a `user_{type}` edge between the user and an existing item. Unknown users are
    /// created on first sight.
    pub fn add_interaction(&mut self, interaction: &Interaction) -> Result<EdgeId, EngineError> {
        let config = &self.config;
        let state = self.state.as_mut().ok_or(EngineError::NotInitialized)?;
        let edge_id = record_interaction(state, interaction)?;
        embed_edges(config, state, std::slice::from_ref(&edge_id));

        debug!(
            user = %interaction.user_id,
            item = %interaction.item_id,
            kind = %interaction.interaction_type,
            "Interaction recorded"
        );
        self.touch();
        Ok(edge_id)
    }

    /// Personalized recommendations for `user_id`, diversified with MMR.
    pub fn recommendations(
        &self,
        user_id: &str,
        options: &RecommendationOptions,
    ) -> Result<Vec<Recommendation>, EngineError> {
        let state = self.state()?;
        let limit = self.config.check_limit(options.limit)?;
        let filter = media_filter(&options.filters);
        let mut excluded: HashSet<&str> = options.exclude_ids.iter().map(String::as_str).collect();
        excluded.insert(user_id);

        let Some(query) = user_embedding(state, user_id) else {
            debug!(user = user_id, "No embedding or interactions, serving cold start");
            return self.cold_start(state, user_id, limit, &filter, &excluded, options);
        };

        let k = limit * 3 + options.exclude_ids.len();
        let candidates: Vec<SearchHit> = self
            .search(state, &query, k, &filter)?
            .into_iter()
            .filter(|hit| !excluded.contains(hit.id.as_str()))
            .collect();

        let picked = mmr::diversify(candidates, limit, self.config.diversity_weight, |id| {
            state.embeddings.get(id).map(Vec::as_slice)
        });
        Ok(self.finish(state, user_id, picked, options.include_explanation))
    }

    fn cold_start(
        &self,
        state: &EngineState,
        user_id: &str,
        limit: usize,
        filter: &MetadataFilter,
        excluded: &HashSet<&str>,
        options: &RecommendationOptions,
    ) -> Result<Vec<Recommendation>, EngineError> {
        if let Some(market) = state.graph.market_embedding() {
            let hits: Vec<SearchHit> = self
                .search(state, market, limit + excluded.len(), filter)?
                .into_iter()
                .filter(|hit| !excluded.contains(hit.id.as_str()))
                .take(limit)
                .collect();
            if !hits.is_empty() {
                return Ok(self.finish(state, user_id, hits, options.include_explanation));
            }
        }

        let media: Vec<(&HyperNode, BTreeMap<String, Value>)> = state
            .graph
            .nodes_by_type(MEDIA)
            .into_iter()
            .filter(|node| !excluded.contains(node.id.as_str()))
            .map(|node| (node, node_metadata(node)))
            .filter(|(_, metadata)| filter.matches(metadata))
            .collect();
        let mut rng = self.rng();
        let sampled = media
            .choose_multiple(&mut rng, limit)
            .map(|(node, metadata)| SearchHit {
                id: node.id.clone(),
                distance: RANDOM_SAMPLE_DISTANCE,
                metadata: metadata.clone(),
            })
            .collect();
        Ok(self.finish(state, user_id, sampled, options.include_explanation))
    }

    fn finish(
        &self,
        state: &EngineState,
        user_id: &str,
        hits: Vec<SearchHit>,
        include_explanation: bool,
    ) -> Vec<Recommendation> {
        hits.into_iter()
            .map(|hit| {
                let explanation = include_explanation.then(|| explain(state, user_id, &hit.id));
                Recommendation {
                    explanation,
                    ..Recommendation::from_hit(hit)
                }
            })
            .collect()
    }

    fn search(
        &self,
        state: &EngineState,
        query: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchHit>, EngineError> {
        let hits = if self.config.use_ivf_index {
            state.store.search_ivf(query, k, self.config.n_probe, filter)?
        } else {
            state.store.search(query, k, filter)?
        };
        Ok(hits)
    }

    /// Nearest media items to `item_id`, excluding the item itself.
    pub fn similar_items(
        &self,
        item_id: &str,
        limit: Option<usize>,
        filters: &MetadataFilter,
    ) -> Result<Vec<Recommendation>, EngineError> {
        let state = self.state()?;
        let limit = self.config.check_limit(limit)?;
        if !state.graph.contains_node(item_id) {
            return Err(EngineError::not_found("item", item_id));
        }
        let query = state
            .embeddings
            .get(item_id)
            .ok_or_else(|| EngineError::not_found("embedding", item_id))?;

        Ok(self
            .search(state, query, limit + 1, &media_filter(filters))?
            .into_iter()
            .filter(|hit| hit.id != item_id)
            .take(limit)
            .map(Recommendation::from_hit)
            .collect())
    }

    /// Searches around the mean (or element-wise max) of several seed items.
    pub fn multi_seed(
        &self,
        seed_ids: &[NodeId],
        limit: Option<usize>,
        aggregation: SeedAggregation,
        filters: &MetadataFilter,
    ) -> Result<Vec<Recommendation>, EngineError> {
        let state = self.state()?;
        let limit = self.config.check_limit(limit)?;
        if seed_ids.is_empty() {
            return Err(EngineError::InvalidInput("at least one seed is required".into()));
        }

        let dims = self.config.dimensions;
        let mut seeds: Vec<&[f32]> = Vec::with_capacity(seed_ids.len());
        for id in seed_ids {
            let v = state
                .embeddings
                .get(id)
                .ok_or_else(|| EngineError::not_found("item", id.clone()))?;
            check_dimensions(id, v, dims)?;
            seeds.push(v);
        }

        let mut query = match aggregation {
            SeedAggregation::Mean => weighted_mean(seeds.iter().map(|v| (*v, 1.0f32)), dims)
                .unwrap_or_else(|| vec![0.0; dims]),
            SeedAggregation::Max => (0..dims)
                .map(|i| {
                    seeds
                        .iter()
                        .filter_map(|v| v.get(i).copied())
                        .fold(f32::NEG_INFINITY, f32::max)
                })
                .collect(),
        };
        normalize(&mut query);

        let seed_set: HashSet<&str> = seed_ids.iter().map(String::as_str).collect();
        Ok(self
            .search(state, &query, limit + seed_ids.len(), &media_filter(filters))?
            .into_iter()
            .filter(|hit| !seed_set.contains(hit.id.as_str()))
            .take(limit)
            .map(Recommendation::from_hit)
            .collect())
    }

    /// Media ranked by the summed weight of interactions created in the last `window_millis`.
    pub fn trending(
        &self,
        limit: Option<usize>,
        window_millis: i64,
    ) -> Result<Vec<TrendingItem>, EngineError> {
        let state = self.state()?;
        let limit = self.config.check_limit(limit)?;
        if window_millis < 0 {
            return Err(EngineError::InvalidInput("time window must not be negative".into()));
        }
        let cutoff = now_millis() - window_millis;

        let mut totals: HashMap<&str, (f32, usize)> = HashMap::new();
        for edge in state.graph.edges() {
            if !edge.is_interaction() || edge.created_at < cutoff {
                continue;
            }
            for member in &edge.node_ids {
                let is_media = state
                    .graph
                    .node(member)
                    .is_some_and(|node| node.node_type() == MEDIA);
                if is_media {
                    let entry = totals.entry(member.as_str()).or_insert((0.0, 0));
                    entry.0 += edge.weight;
                    entry.1 += 1;
                }
            }
        }

        let mut items: Vec<TrendingItem> = totals
            .into_iter()
            .filter_map(|(id, (score, interactions))| {
                let node = state.graph.node(id)?;
                Some(TrendingItem {
                    id: id.to_string(),
                    score,
                    interactions,
                    metadata: node_metadata(node),
                })
            })
            .collect();
        items.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        items.truncate(limit);
        Ok(items)
    }

    /// Appends the interactions and runs SPSA over the whole graph.
    ///
    /// Training runs on a copy of the state that replaces the live one only on success, so a
    /// rejected interaction or a failed epoch leaves the engine as it was.
    pub fn fine_tune(
        &mut self,
        interactions: &[Interaction],
        options: &FineTuneOptions,
    ) -> Result<TrainingReport, EngineError> {
        let current = self.state()?;
        for interaction in interactions {
            check_interaction(&current.graph, interaction)?;
        }
        let spsa = SpsaConfig {
            epochs: options.epochs,
            batch_size: options.batch_size,
            margin: options.margin,
            ..self.spsa.clone()
        };
        spsa.validate()?;
        let mut optimizer = match self.config.seed {
            Some(seed) => SpsaOptimizer::with_seed(spsa, seed),
            None => SpsaOptimizer::new(spsa),
        };
        let mut rng = self.rng();
        let mut state = current.clone();

        for interaction in interactions {
            record_interaction(&mut state, interaction)?;
            embed_inductively(&mut state, &interaction.user_id)?;
        }

        let EngineState {
            graph,
            store,
            embeddings,
            ..
        } = &mut state;
        let report = optimizer.train(graph, embeddings, store)?;

        refresh_derived(&self.config, &mut state);
        refresh_index(&self.config, &mut state, &mut rng);
        self.state = Some(state);
        info!(
            interactions = interactions.len(),
            epochs = report.epoch_losses.len(),
            final_loss = report.final_loss,
            "Fine-tuning finished"
        );
        self.touch();
        Ok(report)
    }

    pub fn graph(&self) -> Result<&Hypergraph, EngineError> {
        Ok(&self.state()?.graph)
    }

    pub fn embeddings(&self) -> Result<&EmbeddingMap, EngineError> {
        Ok(&self.state()?.embeddings)
    }

    pub fn embedding(&self, node_id: &str) -> Result<Option<&[f32]>, EngineError> {
        Ok(self.state()?.embeddings.get(node_id).map(Vec::as_slice))
    }

    /// Mines up to `count` triplets from the current graph and vectors.
    pub fn mine_triplets<R: Rng + ?Sized>(
        &self,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<Triplet>, EngineError> {
        let state = self.state()?;
        Ok(TripletGenerator::new(&state.graph, &state.store).generate(count, rng)?)
    }

    /// Applies one averaged gradient step, then refreshes the store, the derived vectors and
    /// the IVF index.
    pub fn apply_gradients(
        &mut self,
        gradients: &BTreeMap<NodeId, Vec<f32>>,
        step: f32,
    ) -> Result<usize, EngineError> {
        let mut rng = self.rng();
        let config = &self.config;
        let state = self.state.as_mut().ok_or(EngineError::NotInitialized)?;
        let touched = apply_gradient_step(&mut state.embeddings, gradients, step);
        sync_store(&mut state.store, &state.embeddings, &touched)?;
        refresh_derived(config, state);
        refresh_index(config, state, &mut rng);
        self.touch();
        Ok(touched.len())
    }

    pub fn triplet_loss(&self, triplets: &[Triplet], margin: f32) -> Result<f32, EngineError> {
        Ok(mean_triplet_loss(&self.state()?.embeddings, triplets, margin))
    }

    pub fn export_state(&self) -> Result<EngineSnapshot, EngineError> {
        let state = self.state()?;
        Ok(EngineSnapshot {
            config: self.config.clone(),
            graph: state.graph.to_adjacency_list(),
            vector_store: state.store.to_snapshot(),
            embeddings: state.embeddings.clone(),
            edge_embeddings: state.edge_embeddings.clone(),
            last_updated: self.last_updated,
        })
    }

    /// Rebuilds an initialized engine from a snapshot without recomputing any vector.
    pub fn from_state(snapshot: EngineSnapshot) -> Result<Self, EngineError> {
        let mut engine = Self::new(snapshot.config)?;
        engine.restore(
            snapshot.graph,
            snapshot.vector_store,
            snapshot.embeddings,
            snapshot.edge_embeddings,
        )?;
        engine.last_updated = snapshot.last_updated;
        Ok(engine)
    }

    /// Replaces this engine's config and state with the snapshot, keeping optimizer settings.
    pub fn import_state(&mut self, snapshot: EngineSnapshot) -> Result<(), EngineError> {
        let restored = Self::from_state(snapshot)?;
        self.config = restored.config;
        self.state = restored.state;
        self.last_updated = restored.last_updated;
        Ok(())
    }

    fn restore(
        &mut self,
        graph: storage::AdjacencyDocument,
        vector_store: storage::VectorStoreSnapshot,
        embeddings: EmbeddingMap,
        edge_embeddings: EmbeddingMap,
    ) -> Result<(), EngineError> {
        if vector_store.dimensions != self.config.dimensions {
            return Err(EngineError::State(format!(
                "vector store has {} dimensions, config expects {}",
                vector_store.dimensions, self.config.dimensions
            )));
        }
        let dims = self.config.dimensions;
        for (id, v) in embeddings.iter().chain(edge_embeddings.iter()) {
            check_dimensions(id, v, dims)?;
        }
        let graph = Hypergraph::from_adjacency_list(graph)?;
        let store = VectorStore::from_snapshot(vector_store)?;
        info!(
            nodes = graph.node_count(),
            vectors = store.len(),
            "Recommendation engine restored from snapshot"
        );
        self.state = Some(EngineState {
            graph,
            store,
            embeddings,
            edge_embeddings,
        });
        Ok(())
    }

    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let state = self.state()?;
        Ok(EngineStats {
            last_updated: self.last_updated,
            node_embeddings: state.embeddings.len(),
            edge_embeddings: state.edge_embeddings.len(),
            graph: state.graph.stats(),
            vector_store: state.store.stats(),
        })
    }
}

/// Store metadata for a node: its flattened typed attributes, its extensions and `type`.
fn node_metadata(node: &HyperNode) -> BTreeMap<String, Value> {
    let mut metadata = BTreeMap::new();
    if let Ok(Value::Object(mut data)) = serde_json::to_value(&node.data) {
        if let Some(Value::Object(attributes)) = data.remove("attributes") {
            metadata.extend(attributes);
        }
    }
    metadata.extend(node.extensions.clone());
    metadata.insert("type".to_string(), Value::from(node.node_type()));
    metadata
}

/// Restricts a search to media unless the caller already constrains `type`.
fn media_filter(filters: &MetadataFilter) -> MetadataFilter {
    if filters.constrains("type") {
        filters.clone()
    } else {
        filters.clone().exact("type", MEDIA)
    }
}

fn slug(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn attribute_data(kind: &str, name: &str) -> NodeData {
    match kind {
        GENRE => NodeData::genre(name),
        ACTOR => NodeData::actor(name),
        _ => NodeData::director(name),
    }
}

fn find_attribute(graph: &Hypergraph, kind: &str, name: &str) -> Option<NodeId> {
    let name = name.trim();
    graph
        .nodes_by_type(kind)
        .into_iter()
        .find(|node| node.data.label().is_some_and(|label| label.eq_ignore_ascii_case(name)))
        .map(|node| node.id.clone())
}

/// The stored embedding, else the rating-weighted mean of the items the user interacted with.
fn user_embedding(state: &EngineState, user_id: &str) -> Option<Vec<f32>> {
    if let Some(v) = state.embeddings.get(user_id) {
        return Some(v.clone());
    }

    let interacted: Vec<(&[f32], f32)> = state
        .graph
        .edges_for_node(user_id)
        .into_iter()
        .filter(|edge| edge.is_interaction())
        .flat_map(|edge| {
            edge.node_ids
                .iter()
                .filter(move |id| id.as_str() != user_id)
                .map(move |id| (id, edge.weight))
        })
        .filter_map(|(id, weight)| state.embeddings.get(id).map(|v| (v.as_slice(), weight)))
        .collect();

    let mut mean = weighted_mean(interacted, state.store.config().dimensions)?;
    normalize(&mut mean);
    Some(mean)
}

fn interacted_items<'a>(state: &'a EngineState, user_id: &str) -> HashSet<&'a str> {
    state
        .graph
        .edges_for_node(user_id)
        .into_iter()
        .filter(|edge| edge.is_interaction())
        .flat_map(|edge| edge.node_ids.iter().map(String::as_str))
        .filter(|id| *id != user_id)
        .collect()
}

/// Names up to three attributes `item_id` shares with items the user interacted with.
fn explain(state: &EngineState, user_id: &str, item_id: &str) -> String {
    if !state.graph.contains_node(item_id) {
        return MISSING_ITEM_REASON.to_string();
    }
    let history = interacted_items(state, user_id);

    let mut reasons: Vec<String> = Vec::new();
    for edge in state.graph.edges_for_node(item_id) {
        if edge.is_interaction() {
            continue;
        }
        for attribute_id in edge.node_ids.iter().filter(|id| id.as_str() != item_id) {
            let shared = state.graph.edges_for_node(attribute_id).into_iter().any(|other| {
                other.edge_type == edge.edge_type
                    && other.node_ids.iter().any(|m| history.contains(m.as_str()))
            });
            if !shared {
                continue;
            }
            let Some(name) = state.graph.node(attribute_id).and_then(|n| n.data.label()) else {
                continue;
            };
            let kind = edge.edge_type.strip_prefix("same_").unwrap_or(&edge.edge_type);
            let reason = format!("Similar {kind}: {name}");
            if !reasons.contains(&reason) {
                reasons.push(reason);
            }
        }
        if reasons.len() >= MAX_REASONS {
            break;
        }
    }

    if reasons.is_empty() {
        FALLBACK_REASON.to_string()
    } else {
        reasons.truncate(MAX_REASONS);
        reasons.join("; ")
    }
}

fn check_dimensions(id: &str, v: &[f32], expected: usize) -> Result<(), EngineError> {
    if v.len() != expected {
        return Err(EngineError::DimensionMismatch {
            id: id.to_string(),
            expected,
            actual: v.len(),
        });
    }
    Ok(())
}

fn check_interaction(graph: &Hypergraph, interaction: &Interaction) -> Result<(), EngineError> {
    if interaction.interaction_type.trim().is_empty() {
        return Err(EngineError::InvalidInput("interaction type must not be empty".into()));
    }
    if !interaction.rating.is_finite() {
        return Err(EngineError::InvalidInput("rating must be finite".into()));
    }
    if !graph.contains_node(&interaction.item_id) {
        return Err(EngineError::not_found("item", interaction.item_id.clone()));
    }
    Ok(())
}

fn record_interaction(
    state: &mut EngineState,
    interaction: &Interaction,
) -> Result<EdgeId, EngineError> {
    check_interaction(&state.graph, interaction)?;
    if !state.graph.contains_node(&interaction.user_id) {
        state
            .graph
            .add_node(HyperNode::new(interaction.user_id.clone(), NodeData::user()))?;
    }

    let edge = HyperEdge::new(
        format!("{INTERACTION_PREFIX}{}", interaction.interaction_type),
        [interaction.user_id.clone(), interaction.item_id.clone()],
        interaction.rating,
    )
    .with_metadata("timestamp", now_millis());
    Ok(state.graph.add_edge(edge)?.id.clone())
}

/// Gives a node without a vector the normalized mean of its embedded neighbours, falling
/// back to the market vector. Returns whether a vector was assigned.
fn embed_inductively(state: &mut EngineState, node_id: &str) -> Result<bool, EngineError> {
    if state.embeddings.contains_key(node_id) {
        return Ok(false);
    }
    let Some(node) = state.graph.node(node_id) else {
        return Ok(false);
    };

    let dims = state.store.config().dimensions;
    let neighbours: Vec<&[f32]> = state
        .graph
        .neighbors(node_id, None)
        .into_iter()
        .filter_map(|n| state.embeddings.get(&n.id).map(Vec::as_slice))
        .collect();
    let Some(mut v) = weighted_mean(neighbours.iter().map(|v| (*v, 1.0f32)), dims)
        .or_else(|| state.graph.market_embedding().map(<[f32]>::to_vec))
    else {
        warn!(node = node_id, "No embedded neighbours, node stays unembedded");
        return Ok(false);
    };
    normalize(&mut v);
    if l2_norm(&v) == 0.0 {
        warn!(node = node_id, "Neighbour vectors cancel out, node stays unembedded");
        return Ok(false);
    }

    let metadata = node_metadata(node);
    state.store.add(node_id, &v, metadata)?;
    state.embeddings.insert(node_id.to_string(), v);
    Ok(true)
}

fn embed_edges(config: &RecommendationConfig, state: &mut EngineState, edge_ids: &[EdgeId]) {
    let embedder = HyperedgeEmbedder::new(config.edge_aggregation);
    for edge_id in edge_ids {
        let Some(edge) = state.graph.edge(edge_id) else {
            continue;
        };
        let members: Vec<&[f32]> = edge
            .node_ids
            .iter()
            .filter_map(|id| state.embeddings.get(id).map(Vec::as_slice))
            .collect();
        if let Some(v) = embedder.aggregate(&members, edge.weight) {
            state.edge_embeddings.insert(edge_id.clone(), v);
        }
    }
}

/// Recomputes every edge vector and the market vector from the node vectors.
fn refresh_derived(config: &RecommendationConfig, state: &mut EngineState) {
    state.edge_embeddings =
        HyperedgeEmbedder::new(config.edge_aggregation).embed_edges(&state.graph, &state.embeddings);
    let market = MarketEmbedder::market_embedding(&state.graph, &state.embeddings);
    state.graph.set_market_embedding(market);
}

/// Builds the IVF index when enabled and the store is large enough. Failures leave searches
/// on the exact path.
fn refresh_index<R: Rng + ?Sized>(config: &RecommendationConfig, state: &mut EngineState, rng: &mut R) {
    if !config.use_ivf_index || state.store.len() <= config.ivf_min_vectors {
        return;
    }
    if let Err(e) = state.store.build_ivf_index(rng) {
        warn!(error = %e, "IVF index build failed, searches stay exact");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_joins_words_with_hyphens() {
        assert_eq!(slug("Keanu Reeves"), "keanu-reeves");
        assert_eq!(slug("  Sci-Fi "), "sci-fi");
        assert_eq!(slug("Jan de Bont"), "jan-de-bont");
    }

    #[test]
    fn metadata_flattens_attributes_and_extensions() {
        let mut node = HyperNode::new(
            "m1",
            NodeData::Media(MediaAttributes {
                title: "Alien".to_string(),
                year: Some(1979),
                description: None,
            }),
        );
        node.extensions.insert("studio".to_string(), Value::from("Fox"));
        let metadata = node_metadata(&node);
        assert_eq!(metadata["type"], Value::from("media"));
        assert_eq!(metadata["title"], Value::from("Alien"));
        assert_eq!(metadata["year"], Value::from(1979));
        assert_eq!(metadata["studio"], Value::from("Fox"));
    }

    #[test]
    fn media_filter_respects_explicit_type() {
        let explicit = MetadataFilter::new().exact("type", "genre");
        assert_eq!(media_filter(&explicit), explicit);

        let plain = media_filter(&MetadataFilter::new());
        let mut metadata = BTreeMap::new();
        metadata.insert("type".to_string(), Value::from("media"));
        assert!(plain.matches(&metadata));
        metadata.insert("type".to_string(), Value::from("genre"));
        assert!(!plain.matches(&metadata));
    }
}
