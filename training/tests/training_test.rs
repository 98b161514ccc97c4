use hyperrec_core::embedding::EmbeddingMap;
use hyperrec_core::model::{HyperEdge, HyperNode, NodeData};
use hyperrec_core::vector::l2_norm;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use storage::{DistanceMetric, Hypergraph, VectorStore, VectorStoreConfig};
use training::{
    count_margin_violations, SpsaConfig, SpsaOptimizer, Triplet, TripletGenerator,
};

fn store(dimensions: usize) -> VectorStore {
    VectorStore::new(VectorStoreConfig {
        dimensions,
        metric: DistanceMetric::Cosine,
        num_clusters: 2,
    })
    .unwrap()
}

/// Two disconnected pairs: {a, b} and {c, d}.
fn two_pair_graph() -> Hypergraph {
    let mut graph = Hypergraph::default();
    for id in ["a", "b", "c", "d"] {
        graph.add_node(HyperNode::new(id, NodeData::media(id))).unwrap();
    }
    graph
        .add_edge(HyperEdge::new("same_genre", ["a", "b"], 1.0))
        .unwrap();
    graph
        .add_edge(HyperEdge::new("same_genre", ["c", "d"], 1.0))
        .unwrap();
    graph
}

fn seeded_embeddings(store: &mut VectorStore) -> EmbeddingMap {
    let vectors = [
        ("a", vec![1.0, 0.2, 0.0]),
        ("b", vec![0.1, 1.0, 0.3]),
        ("c", vec![0.9, 0.3, 0.1]),
        ("d", vec![0.0, 0.2, 1.0]),
    ];
    let mut emb = EmbeddingMap::new();
    for (id, v) in vectors {
        store.add(id, &v, BTreeMap::new()).unwrap();
        emb.insert(id.to_string(), store.get(id).unwrap().vector.clone());
    }
    emb
}

#[test]
fn hard_negatives_skip_anchor_and_connected_nodes() {
    let graph = two_pair_graph();
    let mut s = store(3);
    seeded_embeddings(&mut s);

    let generator = TripletGenerator::new(&graph, &s);
    let negatives = generator.hard_negatives("a", 4).unwrap();
    assert!(!negatives.is_empty());
    assert!(negatives.iter().all(|id| id == "c" || id == "d"));
    // c points the same way as a, so it is the hardest negative
    assert_eq!(negatives[0], "c");

    assert!(generator.hard_negatives("ghost", 2).unwrap().is_empty());
}

#[test]
fn generated_triplets_pair_connected_positives_with_unconnected_negatives() {
    let graph = two_pair_graph();
    let mut s = store(3);
    seeded_embeddings(&mut s);
    let mut rng = StdRng::seed_from_u64(5);

    let triplets = TripletGenerator::new(&graph, &s).generate(16, &mut rng).unwrap();
    assert!(!triplets.is_empty());
    for t in &triplets {
        assert!(graph.are_connected(&t.anchor, &t.positive));
        assert!(!graph.are_connected(&t.anchor, &t.negative));
        assert_ne!(t.anchor, t.negative);
        assert_eq!(t.edge_type, "same_genre");
    }
}

#[test]
fn generator_on_edgeless_graph_yields_nothing() {
    let mut graph = Hypergraph::default();
    graph.add_node(HyperNode::new("solo", NodeData::user())).unwrap();
    let s = store(3);
    let mut rng = StdRng::seed_from_u64(1);
    let triplets = TripletGenerator::new(&graph, &s).generate(8, &mut rng).unwrap();
    assert!(triplets.is_empty());
}

#[test]
fn margin_violations_decrease_on_separable_anchors() {
    let mut emb = EmbeddingMap::new();
    emb.insert("p".into(), vec![1.0, 0.0]);
    emb.insert("n".into(), vec![0.0, 1.0]);
    let mut s = store(2);
    let mut triplets = Vec::new();
    for i in 0..4 {
        let id = format!("anchor{i}");
        emb.insert(id.clone(), vec![0.6, 0.8]);
        s.add(id.clone(), &[0.6, 0.8], BTreeMap::new()).unwrap();
        triplets.push(Triplet {
            anchor: id,
            positive: "p".into(),
            negative: "n".into(),
            edge_type: "same_genre".into(),
            weight: 1.0,
        });
    }

    let config = SpsaConfig {
        a: 0.5,
        stability: 0.0,
        ..SpsaConfig::default()
    };
    let before = count_margin_violations(&emb, &triplets, config.margin);
    assert_eq!(before, 4);

    let mut optimizer = SpsaOptimizer::with_seed(config, 11);
    for _ in 0..10 {
        let loss = optimizer.update_step(&mut emb, &triplets, &mut s).unwrap();
        assert!(loss.is_finite());
    }

    let after = count_margin_violations(&emb, &triplets, 0.2);
    assert!(after < before, "violations went from {before} to {after}");
    for t in &triplets {
        assert!((l2_norm(&emb[&t.anchor]) - 1.0).abs() < 1e-4);
        let stored = &s.get(&t.anchor).unwrap().vector;
        for (x, y) in stored.iter().zip(&emb[&t.anchor]) {
            assert!((x - y).abs() < 1e-5);
        }
    }
    assert_eq!(optimizer.stats().iteration, 10);
    assert_eq!(optimizer.stats().losses.len(), 10);
}

#[test]
fn train_reports_one_loss_per_epoch() {
    let graph = two_pair_graph();
    let mut s = store(3);
    let mut emb = seeded_embeddings(&mut s);

    let config = SpsaConfig {
        epochs: 3,
        batch_size: 4,
        ..SpsaConfig::default()
    };
    let mut optimizer = SpsaOptimizer::with_seed(config, 3);
    let report = optimizer.train(&graph, &mut emb, &mut s).unwrap();

    assert_eq!(report.epoch_losses.len(), 3);
    assert_eq!(report.iterations, 3);
    assert!(report.epoch_losses.iter().all(|l| l.is_finite() && *l >= 0.0));
    assert_eq!(report.final_loss, report.epoch_losses[2]);
    for v in emb.values() {
        assert!((l2_norm(v) - 1.0).abs() < 1e-4);
    }
}

#[test]
fn train_rejects_invalid_config() {
    let graph = two_pair_graph();
    let mut s = store(3);
    let mut emb = seeded_embeddings(&mut s);
    let config = SpsaConfig {
        num_workers: 0,
        ..SpsaConfig::default()
    };
    let mut optimizer = SpsaOptimizer::with_seed(config, 3);
    assert!(optimizer.train(&graph, &mut emb, &mut s).is_err());
}
