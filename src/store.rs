//! Relational persistence for the corpus.
//!
//! SQLite via sqlx. Ids are UUIDs, timestamps are RFC 3339, and the chunk
//! embedding is stored as a JSON float array. Cascade deletes run inside a
//! transaction with `DELETE … RETURNING id` so callers always learn exactly
//! which chunk ids left the store — the index layer depends on those lists
//! to stay synchronized.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::SqlitePool;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{Chunk, Document, Library};

/// The `(id, embedding)` projection of a chunk, hydrated for index builds.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub id: Uuid,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ChunkRow {
    id: Uuid,
    document_id: Uuid,
    text: String,
    embedding: Json<Vec<f32>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ChunkRow> for Chunk {
    fn from(row: ChunkRow) -> Self {
        Self {
            id: row.id,
            document_id: row.document_id,
            text: row.text,
            embedding: row.embedding.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct IndexEntryRow {
    id: Uuid,
    embedding: Json<Vec<f32>>,
}

#[derive(Clone)]
pub struct CorpusStore {
    pool: SqlitePool,
}

impl CorpusStore {
    /// Connect to the database at `url` (e.g. `sqlite::memory:` or
    /// `sqlite://corpus.db`).
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // An in-memory database lives inside a single connection; a pool of
        // independent connections would each see an empty schema.
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        Ok(Self { pool })
    }

    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self))]
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS libraries (
                id              BLOB PRIMARY KEY,
                name            TEXT NOT NULL,
                written_by      TEXT NOT NULL,
                description     TEXT NOT NULL,
                production_date TEXT NOT NULL,
                indexed_at      TEXT,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id         BLOB PRIMARY KEY,
                library_id BLOB NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
                name       TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id          BLOB PRIMARY KEY,
                document_id BLOB NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                text        TEXT NOT NULL,
                embedding   TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_library ON documents(library_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)")
            .execute(&self.pool)
            .await?;

        info!("corpus schema ready");
        Ok(())
    }

    // ===== Libraries =====

    pub async fn insert_library(&self, library: &Library) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO libraries
                (id, name, written_by, description, production_date, indexed_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(library.id)
        .bind(&library.name)
        .bind(&library.written_by)
        .bind(&library.description)
        .bind(library.production_date)
        .bind(library.indexed_at)
        .bind(library.created_at)
        .bind(library.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_library(&self, id: Uuid) -> Result<Option<Library>> {
        let library = sqlx::query_as::<_, Library>("SELECT * FROM libraries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(library)
    }

    pub async fn list_libraries(&self, skip: usize, limit: usize) -> Result<Vec<Library>> {
        let rows = sqlx::query_as::<_, Library>(
            "SELECT * FROM libraries ORDER BY created_at, id LIMIT ? OFFSET ?",
        )
        .bind(limit as i64)
        .bind(skip as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn update_library(&self, library: &Library) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE libraries
            SET name = ?, written_by = ?, description = ?, production_date = ?,
                indexed_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&library.name)
        .bind(&library.written_by)
        .bind(&library.description)
        .bind(library.production_date)
        .bind(library.indexed_at)
        .bind(library.updated_at)
        .bind(library.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stamp every library as freshly indexed.
    pub async fn mark_libraries_indexed(&self, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE libraries SET indexed_at = ? ")
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a library, its documents, and their chunks.
    ///
    /// Returns `None` when the library does not exist; otherwise the lists
    /// of removed chunk ids and document ids.
    #[instrument(skip(self))]
    pub async fn delete_library_cascade(&self, id: Uuid) -> Result<Option<(Vec<Uuid>, Vec<Uuid>)>> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, Uuid>("SELECT id FROM libraries WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let chunk_ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            DELETE FROM chunks
            WHERE document_id IN (SELECT id FROM documents WHERE library_id = ?)
            RETURNING id
            "#,
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        let document_ids =
            sqlx::query_scalar::<_, Uuid>("DELETE FROM documents WHERE library_id = ? RETURNING id")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM libraries WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some((chunk_ids, document_ids)))
    }

    // ===== Documents =====

    pub async fn insert_document(&self, document: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, library_id, name, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(document.id)
        .bind(document.library_id)
        .bind(&document.name)
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        let document = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(document)
    }

    pub async fn list_documents(&self, skip: usize, limit: usize) -> Result<Vec<Document>> {
        let rows = sqlx::query_as::<_, Document>(
            "SELECT * FROM documents ORDER BY created_at, id LIMIT ? OFFSET ?",
        )
        .bind(limit as i64)
        .bind(skip as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_documents_by_library(
        &self,
        library_id: Uuid,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let rows = sqlx::query_as::<_, Document>(
            r#"
            SELECT * FROM documents WHERE library_id = ?
            ORDER BY created_at, id LIMIT ? OFFSET ?
            "#,
        )
        .bind(library_id)
        .bind(limit as i64)
        .bind(skip as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn update_document(&self, document: &Document) -> Result<()> {
        sqlx::query("UPDATE documents SET name = ?, updated_at = ? WHERE id = ?")
            .bind(&document.name)
            .bind(document.updated_at)
            .bind(document.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete one document and its chunks; returns the removed chunk ids,
    /// or `None` when the document does not exist.
    #[instrument(skip(self))]
    pub async fn delete_document_cascade(&self, id: Uuid) -> Result<Option<Vec<Uuid>>> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, Uuid>("SELECT id FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let chunk_ids =
            sqlx::query_scalar::<_, Uuid>("DELETE FROM chunks WHERE document_id = ? RETURNING id")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(chunk_ids))
    }

    /// Delete every document in a library together with their chunks.
    /// Returns `(chunk_ids, document_ids)` removed.
    #[instrument(skip(self))]
    pub async fn delete_documents_by_library(
        &self,
        library_id: Uuid,
    ) -> Result<(Vec<Uuid>, Vec<Uuid>)> {
        let mut tx = self.pool.begin().await?;

        let chunk_ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            DELETE FROM chunks
            WHERE document_id IN (SELECT id FROM documents WHERE library_id = ?)
            RETURNING id
            "#,
        )
        .bind(library_id)
        .fetch_all(&mut *tx)
        .await?;

        let document_ids =
            sqlx::query_scalar::<_, Uuid>("DELETE FROM documents WHERE library_id = ? RETURNING id")
                .bind(library_id)
                .fetch_all(&mut *tx)
                .await?;

        tx.commit().await?;
        Ok((chunk_ids, document_ids))
    }

    pub async fn get_random_document_id(&self) -> Result<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>("SELECT id FROM documents ORDER BY RANDOM() LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn count_documents_by_library(&self, library_id: Uuid) -> Result<usize> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM documents WHERE library_id = ?")
                .bind(library_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }

    // ===== Chunks =====

    pub async fn insert_chunk(&self, chunk: &Chunk) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, text, embedding, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(chunk.id)
        .bind(chunk.document_id)
        .bind(&chunk.text)
        .bind(Json(&chunk.embedding))
        .bind(chunk.created_at)
        .bind(chunk.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_chunk(&self, id: Uuid) -> Result<Option<Chunk>> {
        let row = sqlx::query_as::<_, ChunkRow>("SELECT * FROM chunks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Chunk::from))
    }

    pub async fn list_chunks(&self, skip: usize, limit: usize) -> Result<Vec<Chunk>> {
        let rows = sqlx::query_as::<_, ChunkRow>(
            "SELECT * FROM chunks ORDER BY created_at, id LIMIT ? OFFSET ?",
        )
        .bind(limit as i64)
        .bind(skip as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Chunk::from).collect())
    }

    pub async fn list_chunks_by_document(
        &self,
        document_id: Uuid,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Chunk>> {
        let rows = sqlx::query_as::<_, ChunkRow>(
            r#"
            SELECT * FROM chunks WHERE document_id = ?
            ORDER BY created_at, id LIMIT ? OFFSET ?
            "#,
        )
        .bind(document_id)
        .bind(limit as i64)
        .bind(skip as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Chunk::from).collect())
    }

    pub async fn update_chunk(&self, chunk: &Chunk) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE chunks
            SET document_id = ?, text = ?, embedding = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(chunk.document_id)
        .bind(&chunk.text)
        .bind(Json(&chunk.embedding))
        .bind(chunk.updated_at)
        .bind(chunk.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_chunk(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM chunks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every chunk of a document; returns the removed chunk ids.
    pub async fn delete_chunks_by_document(&self, document_id: Uuid) -> Result<Vec<Uuid>> {
        let chunk_ids =
            sqlx::query_scalar::<_, Uuid>("DELETE FROM chunks WHERE document_id = ? RETURNING id")
                .bind(document_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(chunk_ids)
    }

    pub async fn count_chunks(&self) -> Result<usize> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    pub async fn count_chunks_by_library(&self, library_id: Uuid) -> Result<usize> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM chunks
            WHERE document_id IN (SELECT id FROM documents WHERE library_id = ?)
            "#,
        )
        .bind(library_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }

    /// Hydrate only `(id, embedding)` for every chunk — what index builds
    /// need, without dragging the text along.
    pub async fn load_index_entries(&self) -> Result<Vec<IndexEntry>> {
        let rows = sqlx::query_as::<_, IndexEntryRow>("SELECT id, embedding FROM chunks")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| IndexEntry {
                id: row.id,
                embedding: row.embedding.0,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkCreateRequest, DocumentCreate, LibraryCreate};

    async fn memory_store() -> CorpusStore {
        let store = CorpusStore::connect("sqlite::memory:").await.unwrap();
        store.init_schema().await.unwrap();
        store
    }

    fn sample_library() -> Library {
        Library::from_create(LibraryCreate {
            name: "Test Library".to_string(),
            written_by: "Test Author".to_string(),
            description: "A test library".to_string(),
            production_date: Utc::now().naive_utc(),
        })
    }

    async fn seed_corpus(store: &CorpusStore, chunks_per_doc: usize) -> (Library, Document) {
        let library = sample_library();
        store.insert_library(&library).await.unwrap();

        let document = Document::from_create(DocumentCreate {
            name: "Doc".to_string(),
            library_id: library.id,
        });
        store.insert_document(&document).await.unwrap();

        for i in 0..chunks_per_doc {
            let request = ChunkCreateRequest {
                text: format!("chunk {i}"),
                document_id: document.id,
            };
            let chunk = Chunk::new(request.document_id, request.text, vec![i as f32, 0.0]);
            store.insert_chunk(&chunk).await.unwrap();
        }

        (library, document)
    }

    #[tokio::test]
    async fn test_library_roundtrip() {
        let store = memory_store().await;
        let library = sample_library();
        store.insert_library(&library).await.unwrap();

        let fetched = store.get_library(library.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "Test Library");
        assert_eq!(fetched.id, library.id);

        assert!(store.get_library(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chunk_embedding_roundtrip() {
        let store = memory_store().await;
        let (_, document) = seed_corpus(&store, 0).await;

        let chunk = Chunk::new(document.id, "alpha".to_string(), vec![0.25, -1.5, 3.0]);
        store.insert_chunk(&chunk).await.unwrap();

        let fetched = store.get_chunk(chunk.id).await.unwrap().unwrap();
        assert_eq!(fetched.embedding, vec![0.25, -1.5, 3.0]);
        assert_eq!(fetched.text, "alpha");
    }

    #[tokio::test]
    async fn test_document_cascade_returns_chunk_ids() {
        let store = memory_store().await;
        let (_, document) = seed_corpus(&store, 3).await;

        let chunk_ids = store
            .delete_document_cascade(document.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chunk_ids.len(), 3);
        assert_eq!(store.count_chunks().await.unwrap(), 0);
        assert!(store.get_document(document.id).await.unwrap().is_none());

        // Deleting again reports the miss instead of erroring.
        assert!(store
            .delete_document_cascade(document.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_library_cascade_removes_everything() {
        let store = memory_store().await;
        let (library, document) = seed_corpus(&store, 2).await;

        let second = Document::from_create(DocumentCreate {
            name: "Doc 2".to_string(),
            library_id: library.id,
        });
        store.insert_document(&second).await.unwrap();
        store
            .insert_chunk(&Chunk::new(second.id, "extra".to_string(), vec![9.0, 9.0]))
            .await
            .unwrap();

        let (chunk_ids, document_ids) = store
            .delete_library_cascade(library.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chunk_ids.len(), 3);
        assert_eq!(document_ids.len(), 2);
        assert!(document_ids.contains(&document.id));
        assert!(store.get_library(library.id).await.unwrap().is_none());
        assert_eq!(store.count_chunks().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pagination_windows() {
        let store = memory_store().await;
        seed_corpus(&store, 5).await;

        let first = store.list_chunks(0, 2).await.unwrap();
        let second = store.list_chunks(2, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        let first_ids: Vec<Uuid> = first.iter().map(|c| c.id).collect();
        assert!(second.iter().all(|c| !first_ids.contains(&c.id)));
    }

    #[tokio::test]
    async fn test_index_entries_projection() {
        let store = memory_store().await;
        seed_corpus(&store, 4).await;

        let entries = store.load_index_entries().await.unwrap();
        assert_eq!(entries.len(), 4);
        assert!(entries.iter().all(|e| e.embedding.len() == 2));
    }

    #[tokio::test]
    async fn test_random_document_id() {
        let store = memory_store().await;
        assert!(store.get_random_document_id().await.unwrap().is_none());

        let (_, document) = seed_corpus(&store, 0).await;
        assert_eq!(
            store.get_random_document_id().await.unwrap(),
            Some(document.id)
        );
    }
}
