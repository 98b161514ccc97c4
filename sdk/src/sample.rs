use hyperrec_core::model::{HyperEdge, HyperNode, MediaAttributes, NodeData};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use storage::{GraphError, Hypergraph};

pub const SAMPLE_MARKET: &str = "sample-market";

struct Movie {
    id: &'static str,
    title: &'static str,
    year: i32,
    genres: &'static [&'static str],
    actors: &'static [&'static str],
    directors: &'static [&'static str],
}

const MOVIES: &[Movie] = &[
    Movie {
        id: "movie-1",
        title: "The Matrix",
        year: 1999,
        genres: &["Sci-Fi", "Action"],
        actors: &["Keanu Reeves", "Laurence Fishburne"],
        directors: &["Wachowskis"],
    },
    Movie {
        id: "movie-2",
        title: "John Wick",
        year: 2014,
        genres: &["Action", "Thriller"],
        actors: &["Keanu Reeves"],
        directors: &["Chad Stahelski"],
    },
    Movie {
        id: "movie-3",
        title: "Inception",
        year: 2010,
        genres: &["Sci-Fi", "Thriller"],
        actors: &["Leonardo DiCaprio"],
        directors: &["Christopher Nolan"],
    },
    Movie {
        id: "movie-4",
        title: "The Dark Knight",
        year: 2008,
        genres: &["Action", "Drama"],
        actors: &["Christian Bale", "Heath Ledger"],
        directors: &["Christopher Nolan"],
    },
    Movie {
        id: "movie-5",
        title: "Interstellar",
        year: 2014,
        genres: &["Sci-Fi", "Drama"],
        actors: &["Matthew McConaughey"],
        directors: &["Christopher Nolan"],
    },
    Movie {
        id: "movie-6",
        title: "Blade Runner",
        year: 1982,
        genres: &["Sci-Fi", "Thriller"],
        actors: &["Harrison Ford"],
        directors: &["Ridley Scott"],
    },
    Movie {
        id: "movie-7",
        title: "Gladiator",
        year: 2000,
        genres: &["Action", "Drama"],
        actors: &["Russell Crowe"],
        directors: &["Ridley Scott"],
    },
    Movie {
        id: "movie-8",
        title: "Constantine",
        year: 2005,
        genres: &["Action", "Fantasy"],
        actors: &["Keanu Reeves"],
        directors: &["Francis Lawrence"],
    },
    Movie {
        id: "movie-9",
        title: "Tenet",
        year: 2020,
        genres: &["Sci-Fi", "Action"],
        actors: &["John David Washington"],
        directors: &["Christopher Nolan"],
    },
    Movie {
        id: "movie-10",
        title: "Speed",
        year: 1994,
        genres: &["Action", "Thriller"],
        actors: &["Keanu Reeves", "Sandra Bullock"],
        directors: &["Jan de Bont"],
    },
];

pub const SAMPLE_USERS: &[&str] = &["user-alice", "user-bob", "user-charlie"];

fn person_id(prefix: &str, name: &str) -> String {
    format!("{prefix}-{}", name.to_lowercase().replace(' ', "-"))
}

/// Demo catalog: ten films with their genres, cast and directors, plus three users who each
/// watched two to four films with ratings between 3 and 5.
pub fn sample_graph(seed: u64) -> Result<Hypergraph, GraphError> {
    let mut graph = Hypergraph::new(SAMPLE_MARKET);
    let mut known = BTreeSet::new();

    for movie in MOVIES {
        graph.add_node(HyperNode::new(
            movie.id,
            NodeData::Media(MediaAttributes {
                title: movie.title.to_string(),
                year: Some(movie.year),
                description: None,
            }),
        ))?;

        let links = movie
            .genres
            .iter()
            .map(|g| (format!("genre-{}", g.to_lowercase()), NodeData::genre(*g), "same_genre"))
            .chain(
                movie
                    .actors
                    .iter()
                    .map(|a| (person_id("actor", a), NodeData::actor(*a), "same_cast")),
            )
            .chain(movie.directors.iter().map(|d| {
                (person_id("director", d), NodeData::director(*d), "same_director")
            }));

        for (id, data, edge_type) in links {
            if known.insert(id.clone()) {
                graph.add_node(HyperNode::new(id.clone(), data))?;
            }
            graph.add_edge(HyperEdge::new(edge_type, [movie.id.to_string(), id], 1.0))?;
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    for user in SAMPLE_USERS {
        graph.add_node(HyperNode::new(*user, NodeData::user()))?;
        let count = rng.gen_range(2..=4);
        let watched: Vec<&Movie> = MOVIES.choose_multiple(&mut rng, count).collect();
        for movie in watched {
            let rating = 3.0 + rng.gen::<f32>() * 2.0;
            let edge = HyperEdge::new("user_watch", [*user, movie.id], rating)
                .with_metadata("timestamp", hyperrec_core::model::now_millis());
            graph.add_edge(edge)?;
        }
    }

    Ok(graph)
}
