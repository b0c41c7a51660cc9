//! Corpus entities and their request payloads.
//!
//! Three levels: a library owns documents, a document owns chunks, and each
//! chunk carries the text span plus its embedding. Entities serialize
//! directly as API responses; the `…Create` / `…Update` types are the
//! request bodies.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A library: the top-level grouping of documents.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Library {
    pub id: Uuid,
    pub name: String,
    pub written_by: String,
    pub description: String,
    /// Caller-supplied date; kept zone-less as provided.
    pub production_date: NaiveDateTime,
    pub indexed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for creating (or fully replacing) a library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryCreate {
    pub name: String,
    pub written_by: String,
    pub description: String,
    pub production_date: NaiveDateTime,
}

impl Library {
    pub fn from_create(create: LibraryCreate) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: create.name,
            written_by: create.written_by,
            description: create.description,
            production_date: create.production_date,
            indexed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-library statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryStats {
    pub library_id: Uuid,
    pub library_name: String,
    pub document_count: usize,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A document inside a library.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Document {
    pub id: Uuid,
    pub library_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for creating a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentCreate {
    pub name: String,
    pub library_id: Uuid,
}

/// Partial update for a document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentUpdate {
    pub name: Option<String>,
}

impl Document {
    pub fn from_create(create: DocumentCreate) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            library_id: create.library_id,
            name: create.name,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A chunk: a contiguous span of text with its computed embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub text: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for creating a chunk. The embedding is computed
/// server-side from the text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkCreateRequest {
    pub text: String,
    pub document_id: Uuid,
}

/// Partial update for a chunk. Changing the text recomputes the embedding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkUpdate {
    pub text: Option<String>,
    pub document_id: Option<Uuid>,
}

impl Chunk {
    pub fn new(document_id: Uuid, text: String, embedding: Vec<f32>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            document_id,
            text,
            embedding,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_create_stamps_fresh_identity() {
        let create = LibraryCreate {
            name: "L1".to_string(),
            written_by: "a".to_string(),
            description: "d".to_string(),
            production_date: Utc::now().naive_utc(),
        };
        let a = Library::from_create(create.clone());
        let b = Library::from_create(create);

        assert_ne!(a.id, b.id);
        assert!(a.indexed_at.is_none());
        assert_eq!(a.created_at, a.updated_at);
    }

    #[test]
    fn test_chunk_serializes_with_embedding() {
        let chunk = Chunk::new(Uuid::new_v4(), "alpha".to_string(), vec![0.25, 0.5]);
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["text"], "alpha");
        assert_eq!(json["embedding"].as_array().unwrap().len(), 2);
    }
}
