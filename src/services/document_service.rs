//! Document lifecycle. Deletes cascade to chunks, and the returned chunk
//! id lists drive the matching index removals.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::errors::{CorpusDbError, Result};
use crate::index_manager::IndexManager;
use crate::models::{Document, DocumentCreate, DocumentUpdate};
use crate::store::CorpusStore;
use crate::types::Page;

pub struct DocumentService {
    store: CorpusStore,
    indices: Arc<IndexManager>,
}

impl DocumentService {
    pub fn new(store: CorpusStore, indices: Arc<IndexManager>) -> Self {
        Self { store, indices }
    }

    pub async fn create_document(&self, create: DocumentCreate) -> Result<Document> {
        if create.name.trim().is_empty() {
            return Err(CorpusDbError::validation("document name cannot be empty"));
        }
        // The parent library must exist before anything is written.
        if self.store.get_library(create.library_id).await?.is_none() {
            return Err(CorpusDbError::not_found("library", create.library_id));
        }

        let document = Document::from_create(create);
        self.store.insert_document(&document).await?;
        Ok(document)
    }

    pub async fn get_document(&self, id: Uuid) -> Result<Document> {
        self.store
            .get_document(id)
            .await?
            .ok_or_else(|| CorpusDbError::not_found("document", id))
    }

    pub async fn list_documents(&self, page: Page) -> Result<Vec<Document>> {
        self.store.list_documents(page.skip, page.limit.get()).await
    }

    pub async fn list_documents_by_library(
        &self,
        library_id: Uuid,
        page: Page,
    ) -> Result<Vec<Document>> {
        self.store
            .list_documents_by_library(library_id, page.skip, page.limit.get())
            .await
    }

    pub async fn update_document(&self, id: Uuid, update: DocumentUpdate) -> Result<Document> {
        let mut document = self.get_document(id).await?;
        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(CorpusDbError::validation("document name cannot be empty"));
            }
            document.name = name;
        }
        document.updated_at = Utc::now();
        self.store.update_document(&document).await?;
        Ok(document)
    }

    /// Delete a document and its chunks; the removed chunk ids are also
    /// removed from every index. Returns the removed chunk ids.
    pub async fn delete_document(&self, id: Uuid) -> Result<Vec<Uuid>> {
        let chunk_ids = self
            .store
            .delete_document_cascade(id)
            .await?
            .ok_or_else(|| CorpusDbError::not_found("document", id))?;

        for chunk_id in &chunk_ids {
            self.indices.delete_vector(chunk_id).await;
        }

        info!(document_id = %id, chunks = chunk_ids.len(), "document cascade delete complete");
        Ok(chunk_ids)
    }

    /// Delete every document of a library (with chunks), returning
    /// `(chunk_ids, document_ids)` removed.
    pub async fn delete_documents_by_library(
        &self,
        library_id: Uuid,
    ) -> Result<(Vec<Uuid>, Vec<Uuid>)> {
        let (chunk_ids, document_ids) =
            self.store.delete_documents_by_library(library_id).await?;

        for chunk_id in &chunk_ids {
            self.indices.delete_vector(chunk_id).await;
        }

        info!(
            library_id = %library_id,
            chunks = chunk_ids.len(),
            documents = document_ids.len(),
            "library documents cascade delete complete"
        );
        Ok((chunk_ids, document_ids))
    }
}
