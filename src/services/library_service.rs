//! Library lifecycle, including the cascade delete that removes every
//! document and chunk underneath and un-indexes the removed chunks.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::errors::{CorpusDbError, Result};
use crate::index_manager::IndexManager;
use crate::models::{Library, LibraryCreate, LibraryStats};
use crate::store::CorpusStore;
use crate::types::Page;

pub struct LibraryService {
    store: CorpusStore,
    indices: Arc<IndexManager>,
}

impl LibraryService {
    pub fn new(store: CorpusStore, indices: Arc<IndexManager>) -> Self {
        Self { store, indices }
    }

    pub async fn create_library(&self, create: LibraryCreate) -> Result<Library> {
        validate_payload(&create)?;
        let library = Library::from_create(create);
        self.store.insert_library(&library).await?;
        Ok(library)
    }

    pub async fn get_library(&self, id: Uuid) -> Result<Library> {
        self.store
            .get_library(id)
            .await?
            .ok_or_else(|| CorpusDbError::not_found("library", id))
    }

    pub async fn list_libraries(&self, page: Page) -> Result<Vec<Library>> {
        self.store.list_libraries(page.skip, page.limit.get()).await
    }

    /// Full replacement of the library payload, keeping id, `indexed_at`,
    /// and `created_at`.
    pub async fn update_library(&self, id: Uuid, update: LibraryCreate) -> Result<Library> {
        validate_payload(&update)?;
        let mut library = self.get_library(id).await?;
        library.name = update.name;
        library.written_by = update.written_by;
        library.description = update.description;
        library.production_date = update.production_date;
        library.updated_at = Utc::now();
        self.store.update_library(&library).await?;
        Ok(library)
    }

    /// Cascade-delete a library. Every removed chunk id is also removed
    /// from the indices, so no search can return a chunk of a deleted
    /// library.
    pub async fn delete_library(&self, id: Uuid) -> Result<(Vec<Uuid>, Vec<Uuid>)> {
        let (chunk_ids, document_ids) = self
            .store
            .delete_library_cascade(id)
            .await?
            .ok_or_else(|| CorpusDbError::not_found("library", id))?;

        for chunk_id in &chunk_ids {
            self.indices.delete_vector(chunk_id).await;
        }

        info!(
            library_id = %id,
            chunks = chunk_ids.len(),
            documents = document_ids.len(),
            "library cascade delete complete"
        );
        Ok((chunk_ids, document_ids))
    }

    pub async fn library_stats(&self, id: Uuid) -> Result<LibraryStats> {
        let library = self.get_library(id).await?;
        let document_count = self.store.count_documents_by_library(id).await?;
        let chunk_count = self.store.count_chunks_by_library(id).await?;
        Ok(LibraryStats {
            library_id: library.id,
            library_name: library.name,
            document_count,
            chunk_count,
            created_at: library.created_at,
            updated_at: library.updated_at,
        })
    }
}

fn validate_payload(payload: &LibraryCreate) -> Result<()> {
    if payload.name.trim().is_empty() {
        return Err(CorpusDbError::validation("library name cannot be empty"));
    }
    Ok(())
}
