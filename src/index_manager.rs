//! The index manager: one instance of every enabled index type, kept
//! consistent with the chunk store.
//!
//! All index mutation and query routing goes through this type. A single
//! `tokio::sync::RwLock` guards the index map: searches share a read lock,
//! writes and rebuilds take the write lock. Embedding query text and
//! resolving result ids back to chunk payloads both happen outside the
//! lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ball_tree::BallTree;
use crate::contracts::{Neighbor, VectorIndex};
use crate::embeddings::EmbeddingService;
use crate::errors::{CorpusDbError, Result};
use crate::kd_tree::KdTreeIndex;
use crate::linear_index::LinearIndex;
use crate::models::Chunk;
use crate::observability::PerfTimer;
use crate::store::CorpusStore;

/// Online inserts loosen ball-tree bounds over time; once an index has
/// grown past this factor of its size at last build (and past the floor),
/// it is batch-rebuilt for tight bounds.
const REBUILD_GROWTH_FACTOR: f64 = 1.5;
const REBUILD_FLOOR: usize = 256;

/// The index structures this service can serve queries from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    Linear,
    BallTree,
    KdTree,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Linear => "linear",
            IndexKind::BallTree => "ball_tree",
            IndexKind::KdTree => "kd_tree",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "linear" => Ok(IndexKind::Linear),
            "ball_tree" => Ok(IndexKind::BallTree),
            "kd_tree" => Ok(IndexKind::KdTree),
            other => Err(CorpusDbError::UnknownIndex(other.to_string())),
        }
    }

    pub fn all() -> [IndexKind; 3] {
        [IndexKind::Linear, IndexKind::BallTree, IndexKind::KdTree]
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A search hit resolved against the chunk store. `chunk` is `None` when
/// the id vanished from the store between the index read and the lookup;
/// such stubs are disclosed rather than silently dropped.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub id: Uuid,
    pub distance: f32,
    pub chunk: Option<Chunk>,
}

struct IndexSlot {
    index: Box<dyn VectorIndex>,
    size_at_build: usize,
}

pub struct IndexManager {
    indices: RwLock<HashMap<String, IndexSlot>>,
    embedder: Arc<EmbeddingService>,
    store: CorpusStore,
    dimension: usize,
}

impl IndexManager {
    pub fn new(
        store: CorpusStore,
        embedder: Arc<EmbeddingService>,
        kinds: &[IndexKind],
        leaf_size: usize,
    ) -> Self {
        let dimension = embedder.dimension();
        let mut indices = HashMap::new();
        for kind in kinds {
            let slot = IndexSlot {
                index: make_index(*kind, dimension, leaf_size),
                size_at_build: 0,
            };
            indices.insert(kind.as_str().to_string(), slot);
        }

        Self {
            indices: RwLock::new(indices),
            embedder,
            store,
            dimension,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Names of the configured indices, sorted for stable output.
    pub async fn index_names(&self) -> Vec<String> {
        let guard = self.indices.read().await;
        let mut names: Vec<String> = guard.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn index_len(&self, name: &str) -> Result<usize> {
        let guard = self.indices.read().await;
        let slot = guard
            .get(name)
            .ok_or_else(|| CorpusDbError::UnknownIndex(name.to_string()))?;
        Ok(slot.index.len())
    }

    /// Stream every chunk embedding from the store and batch-build all
    /// configured indices. Called once at startup and again whenever a
    /// full resynchronization is wanted.
    pub async fn rebuild_all(&self) -> Result<()> {
        let names = self.index_names().await;
        for name in names {
            self.rebuild(&name).await?;
        }
        Ok(())
    }

    /// Rebuild one index from the store.
    ///
    /// Holds the write lock across the snapshot read so no concurrent
    /// add/delete can fall between the snapshot and the build. Chunks whose
    /// embedding length differs from the configured dimension are skipped.
    pub async fn rebuild(&self, name: &str) -> Result<usize> {
        let _timer = PerfTimer::new("index.rebuild");
        let mut guard = self.indices.write().await;
        let slot = guard
            .get_mut(name)
            .ok_or_else(|| CorpusDbError::UnknownIndex(name.to_string()))?;

        let entries = self.store.load_index_entries().await?;
        let total = entries.len();

        let mut vectors = Vec::with_capacity(total);
        let mut ids = Vec::with_capacity(total);
        for entry in entries {
            if entry.embedding.len() != self.dimension {
                warn!(
                    chunk_id = %entry.id,
                    got = entry.embedding.len(),
                    expected = self.dimension,
                    "skipping chunk with malformed embedding"
                );
                continue;
            }
            vectors.push(entry.embedding);
            ids.push(entry.id);
        }

        let count = vectors.len();
        slot.index.build(vectors, ids)?;
        slot.size_at_build = count;
        drop(guard);

        self.store.mark_libraries_indexed(Utc::now()).await?;
        info!(index = name, vectors = count, "index rebuilt");
        Ok(count)
    }

    /// Fan an insert out to every configured index. An existing entry with
    /// the same id is replaced, so calling this after a chunk update is
    /// enough to refresh the stored vector.
    pub async fn add_vector(&self, vector: &[f32], id: Uuid) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(CorpusDbError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }

        let mut stale: Vec<String> = Vec::new();
        {
            let mut guard = self.indices.write().await;
            for (name, slot) in guard.iter_mut() {
                slot.index.add(vector.to_vec(), id)?;
                let threshold =
                    (slot.size_at_build.max(REBUILD_FLOOR) as f64 * REBUILD_GROWTH_FACTOR) as usize;
                if slot.index.len() > threshold {
                    stale.push(name.clone());
                }
            }
        }

        for name in stale {
            debug!(index = %name, "growth threshold crossed, rebuilding");
            self.rebuild(&name).await?;
        }
        Ok(())
    }

    /// Fan a delete out to every configured index. Per-index misses are
    /// ignored: deletion is globally idempotent.
    pub async fn delete_vector(&self, id: &Uuid) -> bool {
        let mut guard = self.indices.write().await;
        let mut any = false;
        for slot in guard.values_mut() {
            any |= slot.index.delete(id);
        }
        any
    }

    /// kNN over a raw vector, without store resolution.
    pub async fn search_vector(&self, query: &[f32], k: usize, name: &str) -> Result<Vec<Neighbor>> {
        let guard = self.indices.read().await;
        let slot = guard
            .get(name)
            .ok_or_else(|| CorpusDbError::UnknownIndex(name.to_string()))?;
        slot.index.search(query, k)
    }

    /// Embed `query_text`, run kNN on the named index, and resolve the hits
    /// back to chunk payloads.
    ///
    /// The embedding happens before the lock is taken and the store lookups
    /// happen after it is released; only the index probe itself runs under
    /// the shared lock.
    pub async fn search(&self, query_text: &str, k: usize, name: &str) -> Result<Vec<ScoredChunk>> {
        let query = self.embedder.embed_text(query_text).await?;

        let neighbors = self.search_vector(&query, k, name).await?;

        let mut results = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let chunk = self.store.get_chunk(neighbor.id).await?;
            if chunk.is_none() {
                debug!(chunk_id = %neighbor.id, "search hit no longer present in store");
            }
            results.push(ScoredChunk {
                id: neighbor.id,
                distance: neighbor.distance,
                chunk,
            });
        }
        Ok(results)
    }
}

fn make_index(kind: IndexKind, dimension: usize, leaf_size: usize) -> Box<dyn VectorIndex> {
    match kind {
        IndexKind::Linear => Box::new(LinearIndex::new(dimension)),
        IndexKind::BallTree => Box::new(BallTree::with_leaf_size(dimension, leaf_size)),
        IndexKind::KdTree => Box::new(KdTreeIndex::new(dimension)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ball_tree::DEFAULT_LEAF_SIZE;
    use crate::embeddings::EmbeddingConfig;
    use crate::models::{Chunk, DocumentCreate, Library, LibraryCreate};
    use crate::models::{ChunkCreateRequest, Document};

    async fn test_manager(kinds: &[IndexKind]) -> (IndexManager, CorpusStore) {
        let store = CorpusStore::connect("sqlite::memory:").await.unwrap();
        store.init_schema().await.unwrap();
        let embedder = Arc::new(EmbeddingService::new(EmbeddingConfig::hashing(32)).unwrap());
        let manager = IndexManager::new(store.clone(), embedder, kinds, DEFAULT_LEAF_SIZE);
        (manager, store)
    }

    async fn seed_document(store: &CorpusStore) -> Document {
        let library = Library::from_create(LibraryCreate {
            name: "L".to_string(),
            written_by: "a".to_string(),
            description: "d".to_string(),
            production_date: Utc::now().naive_utc(),
        });
        store.insert_library(&library).await.unwrap();
        let document = Document::from_create(DocumentCreate {
            name: "D".to_string(),
            library_id: library.id,
        });
        store.insert_document(&document).await.unwrap();
        document
    }

    #[tokio::test]
    async fn test_unknown_index_is_rejected() {
        let (manager, _store) = test_manager(&[IndexKind::Linear]).await;
        let err = manager.search_vector(&[0.0; 32], 1, "ball_tree").await;
        assert!(matches!(err, Err(CorpusDbError::UnknownIndex(_))));
    }

    #[tokio::test]
    async fn test_add_fans_out_to_all_indices() {
        let (manager, _store) = test_manager(&IndexKind::all()).await;

        let id = Uuid::new_v4();
        manager.add_vector(&[0.5; 32], id).await.unwrap();

        for name in manager.index_names().await {
            assert_eq!(manager.index_len(&name).await.unwrap(), 1);
            let hits = manager.search_vector(&[0.5; 32], 1, &name).await.unwrap();
            assert_eq!(hits[0].id, id);
            assert_eq!(hits[0].distance, 0.0);
        }
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_across_indices() {
        let (manager, _store) = test_manager(&IndexKind::all()).await;

        let id = Uuid::new_v4();
        manager.add_vector(&[0.1; 32], id).await.unwrap();
        assert!(manager.delete_vector(&id).await);
        assert!(!manager.delete_vector(&id).await);

        for name in manager.index_names().await {
            assert_eq!(manager.index_len(&name).await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected_before_fanout() {
        let (manager, _store) = test_manager(&IndexKind::all()).await;

        let err = manager.add_vector(&[0.0; 3], Uuid::new_v4()).await;
        assert!(matches!(err, Err(CorpusDbError::DimensionMismatch { .. })));
        for name in manager.index_names().await {
            assert_eq!(manager.index_len(&name).await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_rebuild_skips_malformed_embeddings() {
        let (manager, store) = test_manager(&[IndexKind::Linear]).await;
        let document = seed_document(&store).await;

        let good = Chunk::new(document.id, "good".to_string(), vec![0.1; 32]);
        let bad = Chunk::new(document.id, "bad".to_string(), vec![0.1; 7]);
        store.insert_chunk(&good).await.unwrap();
        store.insert_chunk(&bad).await.unwrap();

        let built = manager.rebuild("linear").await.unwrap();
        assert_eq!(built, 1);
        assert_eq!(manager.index_len("linear").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_resolves_chunks_and_discloses_stubs() {
        let (manager, store) = test_manager(&[IndexKind::Linear]).await;
        let document = seed_document(&store).await;

        let request = ChunkCreateRequest {
            text: "alpha".to_string(),
            document_id: document.id,
        };
        let embedding = manager.embedder.embed_text(&request.text).await.unwrap();
        let chunk = Chunk::new(request.document_id, request.text, embedding.clone());
        store.insert_chunk(&chunk).await.unwrap();
        manager.add_vector(&embedding, chunk.id).await.unwrap();

        let hits = manager.search("alpha", 1, "linear").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, chunk.id);
        assert_eq!(hits[0].chunk.as_ref().unwrap().text, "alpha");

        // Remove from the store but not the index: the hit degrades to a
        // stub instead of disappearing.
        store.delete_chunk(chunk.id).await.unwrap();
        let hits = manager.search("alpha", 1, "linear").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].chunk.is_none());
    }

    #[tokio::test]
    async fn test_rebuild_marks_libraries_indexed() {
        let (manager, store) = test_manager(&[IndexKind::Linear]).await;
        let document = seed_document(&store).await;
        let library_id = store
            .get_document(document.id)
            .await
            .unwrap()
            .unwrap()
            .library_id;

        manager.rebuild("linear").await.unwrap();

        let library = store.get_library(library_id).await.unwrap().unwrap();
        assert!(library.indexed_at.is_some());
    }
}
