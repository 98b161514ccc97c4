//! Synthetic workloads shared by the benches.

use hyperrec_core::model::{HyperEdge, HyperNode, NodeData};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use storage::{GraphError, Hypergraph};

#[derive(Debug, Clone, Copy)]
pub struct CatalogShape {
    pub media: usize,
    pub genres: usize,
    pub actors: usize,
    pub users: usize,
    /// Genres and actors linked to each title.
    pub links_per_media: usize,
    pub interactions_per_user: usize,
}

impl CatalogShape {
    pub fn with_media(media: usize) -> Self {
        Self {
            media,
            genres: (media / 20).max(2),
            actors: (media / 4).max(2),
            users: (media / 2).max(1),
            links_per_media: 3,
            interactions_per_user: 5,
        }
    }

    pub fn node_count(&self) -> usize {
        self.media + self.genres + self.actors + self.users
    }
}

pub fn media_id(i: usize) -> String {
    format!("media-{i}")
}

pub fn user_id(i: usize) -> String {
    format!("user-{i}")
}

/// Random catalog: titles linked to genres and actors, users rating titles.
pub fn synthetic_catalog(shape: CatalogShape, seed: u64) -> Result<Hypergraph, GraphError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut graph = Hypergraph::new("bench-market");

    let genres: Vec<String> = (0..shape.genres).map(|i| format!("genre-{i}")).collect();
    let actors: Vec<String> = (0..shape.actors).map(|i| format!("actor-{i}")).collect();
    for (i, id) in genres.iter().enumerate() {
        graph.add_node(HyperNode::new(id.clone(), NodeData::genre(format!("Genre {i}"))))?;
    }
    for (i, id) in actors.iter().enumerate() {
        graph.add_node(HyperNode::new(id.clone(), NodeData::actor(format!("Actor {i}"))))?;
    }

    for i in 0..shape.media {
        let id = media_id(i);
        graph.add_node(HyperNode::new(id.clone(), NodeData::media(format!("Title {i}"))))?;
        for _ in 0..shape.links_per_media {
            let (edge_type, target) = if rng.gen_bool(0.5) {
                ("same_genre", genres.choose(&mut rng))
            } else {
                ("same_cast", actors.choose(&mut rng))
            };
            if let Some(target) = target {
                graph.add_edge(HyperEdge::new(edge_type, [id.clone(), target.clone()], 1.0))?;
            }
        }
    }

    for u in 0..shape.users {
        let id = user_id(u);
        graph.add_node(HyperNode::new(id.clone(), NodeData::user()))?;
        for _ in 0..shape.interactions_per_user.min(shape.media) {
            let item = media_id(rng.gen_range(0..shape.media));
            let rating = rng.gen_range(1.0..5.0);
            graph.add_edge(HyperEdge::new("user_watch", [id.clone(), item], rating))?;
        }
    }

    Ok(graph)
}

/// `count` random vectors with entries in `[-1, 1)`.
pub fn random_vectors(count: usize, dimensions: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| (0..dimensions).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperrec_core::model::{MEDIA, USER};

    #[test]
    fn catalog_matches_shape() {
        let shape = CatalogShape::with_media(100);
        let graph = synthetic_catalog(shape, 1).unwrap();
        assert_eq!(graph.node_count(), shape.node_count());
        assert_eq!(graph.nodes_by_type(MEDIA).len(), 100);
        assert_eq!(graph.nodes_by_type(USER).len(), 50);
        assert_eq!(graph.edges_by_type("user_watch").len(), 50 * 5);
    }

    #[test]
    fn vectors_are_reproducible() {
        assert_eq!(random_vectors(3, 8, 4), random_vectors(3, 8, 4));
        assert_eq!(random_vectors(10, 8, 4)[9].len(), 8);
    }
}
