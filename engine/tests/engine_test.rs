use engine::{
    EngineError, EngineSnapshot, FineTuneOptions, Interaction, MediaInput, RecommendationConfig,
    RecommendationEngine, RecommendationOptions, SeedAggregation,
};
use hyperrec_core::error::{ErrorCode, HyperrecError};
use hyperrec_core::model::{now_millis, HyperEdge, HyperNode, NodeData};
use hyperrec_core::vector::{cosine_distance, l2_norm};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use storage::{Hypergraph, MetadataFilter};

const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

fn engine() -> RecommendationEngine {
    RecommendationEngine::new(
        RecommendationConfig::default()
            .with_dimensions(64)
            .with_seed(42),
    )
    .unwrap()
}

/// Five titles over three genres, plus one user whose only interaction is ten days old.
fn catalog() -> Hypergraph {
    let mut g = Hypergraph::new("test-market");
    for (id, name) in [("genre-horror", "Horror"), ("genre-crime", "Crime"), ("genre-family", "Family")] {
        g.add_node(HyperNode::new(id, NodeData::genre(name))).unwrap();
    }
    for (id, title, genre) in [
        ("m1", "Alien", "genre-horror"),
        ("m2", "The Thing", "genre-horror"),
        ("m3", "Heat", "genre-crime"),
        ("m4", "Ronin", "genre-crime"),
        ("m5", "Up", "genre-family"),
    ] {
        g.add_node(HyperNode::new(id, NodeData::media(title))).unwrap();
        g.add_edge(HyperEdge::new("same_genre", [id, genre], 1.0)).unwrap();
    }
    g.add_node(HyperNode::new("u1", NodeData::user())).unwrap();
    g.add_node(HyperNode::new("u2", NodeData::user())).unwrap();
    g.add_edge(
        HyperEdge::new("user_watch", ["u1", "m1"], 5.0).with_created_at(now_millis() - 10 * DAY_MILLIS),
    )
    .unwrap();
    g.add_edge(
        HyperEdge::new("user_watch", ["u2", "m4"], 10.0).with_created_at(now_millis() - 10 * DAY_MILLIS),
    )
    .unwrap();
    g
}

fn initialized() -> RecommendationEngine {
    let mut engine = engine();
    engine.initialize(catalog()).unwrap();
    engine
}

fn ids(recs: &[engine::Recommendation]) -> Vec<&str> {
    recs.iter().map(|r| r.id.as_str()).collect()
}

#[test]
fn every_operation_requires_initialization() {
    let mut engine = engine();
    let none = MetadataFilter::new();
    let not_init = |e: EngineError| matches!(e, EngineError::NotInitialized);

    assert!(not_init(engine.recommendations("u1", &RecommendationOptions::default()).unwrap_err()));
    assert!(not_init(engine.similar_items("m1", None, &none).unwrap_err()));
    assert!(not_init(
        engine
            .multi_seed(&["m1".to_string()], None, SeedAggregation::Mean, &none)
            .unwrap_err()
    ));
    assert!(not_init(engine.trending(None, DAY_MILLIS).unwrap_err()));
    assert!(not_init(engine.add_media(MediaInput::new("Alien")).unwrap_err()));
    assert!(not_init(
        engine
            .add_interaction(&Interaction::new("u1", "m1", "watch"))
            .unwrap_err()
    ));
    assert!(not_init(engine.fine_tune(&[], &FineTuneOptions::default()).unwrap_err()));
    assert!(not_init(engine.export_state().unwrap_err()));
    assert!(not_init(engine.stats().unwrap_err()));
    assert!(not_init(engine.graph().unwrap_err()));
    assert!(not_init(engine.embeddings().unwrap_err()));
    assert!(not_init(engine.mine_triplets(4, &mut StdRng::seed_from_u64(1)).unwrap_err()));
    assert!(not_init(engine.apply_gradients(&BTreeMap::new(), 0.1).unwrap_err()));
    assert!(not_init(engine.triplet_loss(&[], 0.2).unwrap_err()));

    let response = engine.stats().unwrap_err().to_response();
    assert_eq!(response.error_code, ErrorCode::NotInitialized);
}

#[test]
fn initialize_embeds_every_node() {
    let engine = initialized();
    let stats = engine.stats().unwrap();
    assert_eq!(stats.graph.total_nodes, 10);
    assert_eq!(stats.node_embeddings, 10);
    assert_eq!(stats.vector_store.total_vectors, 10);
    assert_eq!(stats.edge_embeddings, 7);
    assert!(stats.graph.has_market_embedding);
    assert!(!stats.vector_store.has_ivf_index);
    assert!(stats.last_updated.is_some());

    for v in engine.embeddings().unwrap().values() {
        assert!((l2_norm(v) - 1.0).abs() < 1e-4);
    }
}

#[test]
fn items_sharing_a_genre_embed_closer_than_unrelated_items() {
    let mut g = Hypergraph::default();
    for id in ["A", "B", "C"] {
        g.add_node(HyperNode::new(id, NodeData::media(id))).unwrap();
    }
    g.add_node(HyperNode::new("G", NodeData::genre("G"))).unwrap();
    g.add_edge(HyperEdge::new("same_genre", ["A", "G"], 1.0)).unwrap();
    g.add_edge(HyperEdge::new("same_genre", ["B", "G"], 1.0)).unwrap();

    let mut engine = engine();
    engine.initialize(g).unwrap();
    let a = engine.embedding("A").unwrap().unwrap();
    let b = engine.embedding("B").unwrap().unwrap();
    let c = engine.embedding("C").unwrap().unwrap();
    assert!(cosine_distance(a, b) < cosine_distance(a, c));
    assert!(cosine_distance(a, b) < cosine_distance(b, c));

    let similar = engine.similar_items("A", Some(1), &MetadataFilter::new()).unwrap();
    assert_eq!(ids(&similar), ["B"]);
}

#[test]
fn excluding_all_but_one_candidate_returns_that_candidate() {
    let engine = initialized();
    let options = RecommendationOptions::default()
        .with_limit(5)
        .excluding(["m1", "m2", "m4", "m5"]);
    let recs = engine.recommendations("u1", &options).unwrap();
    assert_eq!(ids(&recs), ["m3"]);
}

#[test]
fn recommendations_only_return_media_and_respect_limit() {
    let engine = initialized();
    let recs = engine
        .recommendations("u1", &RecommendationOptions::default().with_limit(3))
        .unwrap();
    assert_eq!(recs.len(), 3);
    for rec in &recs {
        assert_eq!(rec.metadata["type"], "media");
        assert!((rec.score - (1.0 - rec.distance)).abs() < 1e-6);
    }

    let err = engine
        .recommendations("u1", &RecommendationOptions::default().with_limit(5_000))
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::InvalidArgument);
}

#[test]
fn explanations_name_shared_attributes() {
    let engine = initialized();
    let recs = engine
        .recommendations(
            "u1",
            &RecommendationOptions::default().with_limit(5).with_explanation(),
        )
        .unwrap();

    let explanation = |id: &str| {
        recs.iter()
            .find(|r| r.id == id)
            .and_then(|r| r.explanation.clone())
            .unwrap()
    };
    assert_eq!(explanation("m2"), "Similar genre: Horror");
    assert_eq!(explanation("m5"), "Recommended based on your preferences");
}

#[test]
fn unknown_users_get_cold_start_media() {
    let engine = initialized();
    let recs = engine
        .recommendations("ghost", &RecommendationOptions::default().with_limit(2))
        .unwrap();
    assert_eq!(recs.len(), 2);
    assert!(recs.iter().all(|r| r.metadata["type"] == "media"));
}

#[test]
fn trending_only_counts_interactions_inside_the_window() {
    let mut engine = initialized();
    engine
        .add_interaction(&Interaction::new("u1", "m2", "watch").with_rating(2.0))
        .unwrap();
    engine
        .add_interaction(&Interaction::new("u2", "m3", "like").with_rating(5.0))
        .unwrap();

    let trending = engine.trending(None, DAY_MILLIS).unwrap();
    let ranked: Vec<(&str, f32)> = trending.iter().map(|t| (t.id.as_str(), t.score)).collect();
    assert_eq!(ranked, [("m3", 5.0), ("m2", 2.0)]);
    assert!(trending.iter().all(|t| t.interactions == 1));

    let everything = engine.trending(Some(10), 30 * DAY_MILLIS).unwrap();
    assert_eq!(everything[0].id, "m4");
    assert!(engine.trending(None, -1).is_err());
}

#[test]
fn add_interaction_creates_users_and_rejects_unknown_items() {
    let mut engine = initialized();
    let edge_id = engine
        .add_interaction(&Interaction::new("newcomer", "m3", "watch"))
        .unwrap();

    let graph = engine.graph().unwrap();
    assert!(graph.contains_node("newcomer"));
    let edge = graph.edge(&edge_id).unwrap();
    assert_eq!(edge.edge_type, "user_watch");
    assert!(edge.metadata.contains_key("timestamp"));
    assert!((edge.weight - 1.0).abs() < f32::EPSILON);

    let recs = engine
        .recommendations("newcomer", &RecommendationOptions::default().with_limit(1))
        .unwrap();
    assert_eq!(ids(&recs), ["m3"]);

    let err = engine
        .add_interaction(&Interaction::new("newcomer", "missing", "watch"))
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::NotFound);
}

#[test]
fn add_media_reuses_attribute_nodes_and_is_searchable() {
    let mut engine = initialized();
    let before = engine.graph().unwrap().node_count();

    let id = engine
        .add_media(
            MediaInput::new("Prometheus")
                .with_id("m9")
                .with_year(2012)
                .with_genres(["horror"])
                .with_directors(["Ridley Scott"]),
        )
        .unwrap();
    assert_eq!(id, "m9");

    let graph = engine.graph().unwrap();
    assert_eq!(graph.node_count(), before + 2);
    assert!(graph.contains_node("director-ridley-scott"));
    assert!(graph.are_connected("m9", "genre-horror"));
    assert_eq!(graph.edges_by_type("same_director").len(), 1);

    let v = engine.embedding("m9").unwrap().unwrap();
    assert!((l2_norm(v) - 1.0).abs() < 1e-4);
    let similar = engine.similar_items("m9", Some(1), &MetadataFilter::new()).unwrap();
    assert!(["m1", "m2"].contains(&similar[0].id.as_str()));

    let generated = engine.add_media(MediaInput::new("Untitled")).unwrap();
    assert!(generated.starts_with("media-"));
}

#[test]
fn similar_items_excludes_the_query_and_rejects_unknown_items() {
    let engine = initialized();
    let similar = engine.similar_items("m1", Some(4), &MetadataFilter::new()).unwrap();
    assert_eq!(similar.len(), 4);
    assert!(similar.iter().all(|r| r.id != "m1"));

    let err = engine.similar_items("nope", None, &MetadataFilter::new()).unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[test]
fn multi_seed_excludes_seeds_and_validates_input() {
    let engine = initialized();
    let seeds = vec!["m1".to_string(), "m3".to_string()];
    for aggregation in [SeedAggregation::Mean, SeedAggregation::Max] {
        let recs = engine
            .multi_seed(&seeds, Some(3), aggregation, &MetadataFilter::new())
            .unwrap();
        assert_eq!(recs.len(), 3);
        assert!(recs.iter().all(|r| !seeds.contains(&r.id)));
    }

    let none = MetadataFilter::new();
    assert!(matches!(
        engine.multi_seed(&[], None, SeedAggregation::Mean, &none),
        Err(EngineError::InvalidInput(_))
    ));
    assert!(matches!(
        engine.multi_seed(&["ghost".to_string()], None, SeedAggregation::Mean, &none),
        Err(EngineError::NotFound { .. })
    ));
}

#[test]
fn fine_tune_records_interactions_and_keeps_unit_vectors() {
    let mut engine = initialized();
    let report = engine
        .fine_tune(
            &[
                Interaction::new("u3", "m3", "watch").with_rating(4.0),
                Interaction::new("u3", "m4", "watch"),
            ],
            &FineTuneOptions {
                epochs: 2,
                batch_size: 8,
                margin: 0.2,
            },
        )
        .unwrap();

    assert_eq!(report.epoch_losses.len(), 2);
    assert!(report.final_loss.is_finite());
    let graph = engine.graph().unwrap();
    assert!(graph.contains_node("u3"));
    assert_eq!(graph.edges_for_node("u3").len(), 2);
    assert!(engine.embedding("u3").unwrap().is_some());
    for v in engine.embeddings().unwrap().values() {
        assert!((l2_norm(v) - 1.0).abs() < 1e-4);
    }

    let bad = FineTuneOptions {
        batch_size: 0,
        ..FineTuneOptions::default()
    };
    assert!(engine.fine_tune(&[], &bad).is_err());
}

#[test]
fn export_then_import_reproduces_recommendations() {
    let engine = initialized();
    let options = RecommendationOptions::default().with_limit(3).with_explanation();
    let before = engine.recommendations("u1", &options).unwrap();

    let bytes = engine.export_state().unwrap().to_json().unwrap();
    let restored = RecommendationEngine::from_state(EngineSnapshot::from_json(&bytes).unwrap()).unwrap();

    assert_eq!(restored.recommendations("u1", &options).unwrap(), before);
    assert_eq!(restored.stats().unwrap(), engine.stats().unwrap());
    assert_eq!(
        restored.similar_items("m3", Some(2), &MetadataFilter::new()).unwrap(),
        engine.similar_items("m3", Some(2), &MetadataFilter::new()).unwrap()
    );
}

#[test]
fn import_rejects_mismatched_dimensions() {
    let engine = initialized();
    let mut snapshot = engine.export_state().unwrap();
    snapshot.config.dimensions = 8;
    assert!(matches!(
        RecommendationEngine::from_state(snapshot),
        Err(EngineError::State(_))
    ));
    assert!(EngineSnapshot::from_json(b"{not json").is_err());
}

#[test]
fn ivf_search_is_used_above_the_threshold() {
    let mut g = Hypergraph::default();
    for genre in 0..4 {
        let genre_id = format!("genre-{genre}");
        g.add_node(HyperNode::new(genre_id.clone(), NodeData::genre(genre_id.clone())))
            .unwrap();
        for i in 0..10 {
            let id = format!("m{genre}-{i}");
            g.add_node(HyperNode::new(id.clone(), NodeData::media(id.clone()))).unwrap();
            g.add_edge(HyperEdge::new("same_genre", [id, genre_id.clone()], 1.0))
                .unwrap();
        }
    }

    let mut engine = RecommendationEngine::new(RecommendationConfig {
        use_ivf_index: true,
        num_clusters: 4,
        ivf_min_vectors: 20,
        n_probe: 4,
        ..RecommendationConfig::default().with_dimensions(32).with_seed(3)
    })
    .unwrap();
    let stats = engine.initialize(g).unwrap();
    assert!(stats.vector_store.has_ivf_index);

    // Probing every cluster is exhaustive.
    let similar = engine.similar_items("m0-0", Some(3), &MetadataFilter::new()).unwrap();
    assert_eq!(similar.len(), 3);
    assert!(similar.iter().all(|r| r.id.starts_with("m0-")));

    let mut gradients = BTreeMap::new();
    gradients.insert("m0-0".to_string(), vec![0.01; 32]);
    assert_eq!(engine.apply_gradients(&gradients, 0.1).unwrap(), 1);
    assert!(engine.stats().unwrap().vector_store.has_ivf_index);
}

#[test]
fn import_rejects_vectors_of_the_wrong_length() {
    let engine = initialized();

    let mut snapshot = engine.export_state().unwrap();
    snapshot.embeddings.insert("m1".to_string(), vec![1.0, 0.0]);
    let err = RecommendationEngine::from_state(snapshot).err().unwrap();
    assert!(matches!(err, EngineError::DimensionMismatch { expected: 64, actual: 2, .. }));
    assert_eq!(err.error_code(), ErrorCode::InvalidArgument);

    let mut snapshot = engine.export_state().unwrap();
    if let Some(v) = snapshot.edge_embeddings.values_mut().next() {
        v.truncate(3);
    }
    assert!(matches!(
        RecommendationEngine::from_state(snapshot),
        Err(EngineError::DimensionMismatch { actual: 3, .. })
    ));

    let mut target = initialized();
    let mut snapshot = engine.export_state().unwrap();
    snapshot.embeddings.insert("m3".to_string(), vec![0.5; 10]);
    assert!(target.import_state(snapshot).is_err());
    let recs = target
        .multi_seed(
            &["m1".to_string(), "m3".to_string()],
            Some(2),
            SeedAggregation::Max,
            &MetadataFilter::new(),
        )
        .unwrap();
    assert_eq!(recs.len(), 2);
}

#[test]
fn failed_fine_tune_leaves_the_engine_untouched() {
    let mut engine = initialized();
    let before = engine.stats().unwrap();
    let embeddings = engine.embeddings().unwrap().clone();

    let err = engine
        .fine_tune(
            &[
                Interaction::new("u3", "m3", "watch"),
                Interaction::new("u3", "missing", "watch"),
            ],
            &FineTuneOptions::default(),
        )
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::NotFound);

    assert_eq!(engine.stats().unwrap(), before);
    assert_eq!(engine.embeddings().unwrap(), &embeddings);
    assert!(!engine.graph().unwrap().contains_node("u3"));
}

#[test]
fn snapshot_file_restores_an_equivalent_engine() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.json");
    let engine = initialized();
    std::fs::write(&path, engine.export_state().unwrap().to_json().unwrap()).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let restored = RecommendationEngine::from_state(EngineSnapshot::from_json(&bytes).unwrap()).unwrap();
    assert_eq!(restored.stats().unwrap(), engine.stats().unwrap());
    assert_eq!(restored.embeddings().unwrap(), engine.embeddings().unwrap());
}
