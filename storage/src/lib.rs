pub mod hypergraph;
pub mod index;
pub mod snapshot;
pub mod vector_store;

pub use hypergraph::{
    AdjacencyDocument, AdjacencyEntry, GraphError, GraphFilter, GraphStats, GraphView, Hypergraph,
};
pub use index::DistanceMetric;
pub use snapshot::{SnapshotError, SnapshotManager};
pub use vector_store::{
    MetadataFilter, SearchHit, VectorEntry, VectorStore, VectorStoreConfig, VectorStoreError,
    VectorStoreSnapshot, VectorStoreStats,
};
