//! Chunk lifecycle: embedding at create/update time, store commits, and
//! the index mutations that follow every commit.
//!
//! Order matters: the store commit always happens first, the index
//! mutation second. If an index mutation fails after a successful commit
//! the error is surfaced to the caller and the next rebuild reconciles the
//! difference; if the commit fails no index mutation is attempted.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::embeddings::EmbeddingService;
use crate::errors::{CorpusDbError, Result};
use crate::index_manager::{IndexManager, ScoredChunk};
use crate::models::{Chunk, ChunkCreateRequest, ChunkUpdate};
use crate::observability::{log_operation, Operation, OperationContext};
use crate::store::CorpusStore;
use crate::types::{Page, ValidatedSearchQuery};

pub struct ChunkService {
    store: CorpusStore,
    indices: Arc<IndexManager>,
    embedder: Arc<EmbeddingService>,
}

impl ChunkService {
    pub fn new(
        store: CorpusStore,
        indices: Arc<IndexManager>,
        embedder: Arc<EmbeddingService>,
    ) -> Self {
        Self {
            store,
            indices,
            embedder,
        }
    }

    /// Create a chunk: embed its text, commit it, then index it.
    pub async fn create_chunk(&self, request: ChunkCreateRequest) -> Result<Chunk> {
        if request.text.trim().is_empty() {
            return Err(CorpusDbError::validation("chunk text cannot be empty"));
        }
        if self.store.get_document(request.document_id).await?.is_none() {
            return Err(CorpusDbError::not_found("document", request.document_id));
        }

        let embedding = self.embedder.embed_text(&request.text).await?;
        let chunk = Chunk::new(request.document_id, request.text, embedding);
        self.store.insert_chunk(&chunk).await?;

        let ctx = OperationContext::new("create_chunk");
        let result = self.indices.add_vector(&chunk.embedding, chunk.id).await;
        let outcome = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(anyhow::anyhow!(e.to_string())),
        };
        log_operation(
            &ctx,
            &Operation::ChunkWrite {
                chunk_id: chunk.id,
                text_len: chunk.text.len(),
            },
            &outcome,
        );
        result?;

        Ok(chunk)
    }

    /// Create a chunk under a randomly chosen existing document.
    pub async fn create_random_chunk(&self, text: &str) -> Result<Chunk> {
        let document_id = self
            .store
            .get_random_document_id()
            .await?
            .ok_or_else(|| CorpusDbError::validation("no documents exist to attach the chunk to"))?;

        self.create_chunk(ChunkCreateRequest {
            text: text.to_string(),
            document_id,
        })
        .await
    }

    pub async fn get_chunk(&self, id: Uuid) -> Result<Chunk> {
        self.store
            .get_chunk(id)
            .await?
            .ok_or_else(|| CorpusDbError::not_found("chunk", id))
    }

    pub async fn list_chunks(&self, page: Page) -> Result<Vec<Chunk>> {
        self.store.list_chunks(page.skip, page.limit.get()).await
    }

    pub async fn list_chunks_by_document(&self, document_id: Uuid, page: Page) -> Result<Vec<Chunk>> {
        self.store
            .list_chunks_by_document(document_id, page.skip, page.limit.get())
            .await
    }

    /// Update a chunk. A text change recomputes the embedding, and the
    /// index add replaces the previously stored vector for this id, so a
    /// stale embedding can never survive an update.
    pub async fn update_chunk(&self, id: Uuid, update: ChunkUpdate) -> Result<Chunk> {
        let mut chunk = self.get_chunk(id).await?;

        if let Some(document_id) = update.document_id {
            if self.store.get_document(document_id).await?.is_none() {
                return Err(CorpusDbError::not_found("document", document_id));
            }
            chunk.document_id = document_id;
        }
        if let Some(text) = update.text {
            if text.trim().is_empty() {
                return Err(CorpusDbError::validation("chunk text cannot be empty"));
            }
            if text != chunk.text {
                chunk.embedding = self.embedder.embed_text(&text).await?;
            }
            chunk.text = text;
        }
        chunk.updated_at = Utc::now();

        self.store.update_chunk(&chunk).await?;
        self.indices.add_vector(&chunk.embedding, chunk.id).await?;

        Ok(chunk)
    }

    pub async fn delete_chunk(&self, id: Uuid) -> Result<()> {
        if !self.store.delete_chunk(id).await? {
            return Err(CorpusDbError::not_found("chunk", id));
        }
        self.indices.delete_vector(&id).await;
        debug!(chunk_id = %id, "chunk deleted");
        Ok(())
    }

    /// Delete every chunk of a document and un-index them. Returns the
    /// removed chunk ids.
    pub async fn delete_chunks_by_document(&self, document_id: Uuid) -> Result<Vec<Uuid>> {
        let chunk_ids = self.store.delete_chunks_by_document(document_id).await?;
        for chunk_id in &chunk_ids {
            self.indices.delete_vector(chunk_id).await;
        }
        Ok(chunk_ids)
    }

    /// Run the query against each named index, returning per-index result
    /// lists keyed by index name.
    pub async fn search(
        &self,
        query: &ValidatedSearchQuery,
        index_names: &[String],
    ) -> Result<HashMap<String, Vec<ScoredChunk>>> {
        let mut results = HashMap::with_capacity(index_names.len());
        for name in index_names {
            let hits = self.indices.search(query.text(), query.k(), name).await?;
            results.insert(name.clone(), hits);
        }
        Ok(results)
    }
}
