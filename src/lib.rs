// CorpusDB - A Vector Database for Hierarchical Text Corpora
// Root library module

pub mod ball_tree;
pub mod contracts;
pub mod distance;
pub mod embeddings;
pub mod errors;
pub mod http_server;
pub mod index_manager;
pub mod kd_tree;
pub mod linear_index;
pub mod models;
pub mod observability;
pub mod services;
pub mod store;
pub mod types;

// Re-export key types
pub use observability::{
    init_logging, init_logging_with_level, log_operation, record_metric, with_trace_id, MetricType,
    Operation,
};

pub use errors::{CorpusDbError, Result};

pub use contracts::{Neighbor, VectorIndex};

// Re-export index implementations
pub use ball_tree::{BallTree, DEFAULT_LEAF_SIZE};
pub use kd_tree::KdTreeIndex;
pub use linear_index::LinearIndex;

// Re-export the manager and its routing types
pub use index_manager::{IndexKind, IndexManager, ScoredChunk};

// Re-export embeddings
pub use embeddings::{EmbeddingConfig, EmbeddingProvider, EmbeddingService};

// Re-export persistence
pub use store::{CorpusStore, IndexEntry};

// Re-export validated types
pub use types::{Page, ValidatedLimit, ValidatedSearchQuery};

// Re-export the HTTP surface
pub use http_server::{create_server, start_server, AppState};

pub use services::{ChunkService, DocumentService, LibraryService};
