//! HTTP REST API server.
//!
//! A thin axum adapter over the service layer: handlers validate inputs,
//! call one service method under a fresh trace id, and map service errors
//! to status codes. No business logic lives here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    errors::CorpusDbError,
    index_manager::IndexManager,
    models::{
        Chunk, ChunkCreateRequest, ChunkUpdate, Document, DocumentCreate, DocumentUpdate, Library,
        LibraryCreate, LibraryStats,
    },
    observability::with_trace_id,
    services::{ChunkService, DocumentService, LibraryService},
    types::{Page, ValidatedSearchQuery},
};

// Global server start time for uptime tracking
static SERVER_START_TIME: once_cell::sync::Lazy<Instant> = once_cell::sync::Lazy::new(Instant::now);

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub libraries: Arc<LibraryService>,
    pub documents: Arc<DocumentService>,
    pub chunks: Arc<ChunkService>,
    pub indices: Arc<IndexManager>,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Plain confirmation message for delete endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Query parameters for list endpoints
#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

/// Query parameters for the chunk search endpoint
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub query: String,
    pub k: Option<usize>,
    /// Comma-separated index names; defaults to every configured index.
    pub index_types: Option<String>,
}

/// Query parameters for random chunk creation
#[derive(Debug, Deserialize)]
pub struct RandomChunkParams {
    pub text: String,
}

/// Search response: per index name, the texts of the matched chunks in
/// ascending distance order.
#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub list_of_chunks: HashMap<String, Vec<String>>,
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

fn error_response(err: CorpusDbError) -> HandlerError {
    let (status, code) = match &err {
        CorpusDbError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        CorpusDbError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_failed"),
        CorpusDbError::DimensionMismatch { .. } => (StatusCode::BAD_REQUEST, "dimension_mismatch"),
        CorpusDbError::UnknownIndex(_) => (StatusCode::BAD_REQUEST, "unknown_index"),
        CorpusDbError::Embedding(_)
        | CorpusDbError::Store(_)
        | CorpusDbError::Serialization(_)
        | CorpusDbError::Http(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            message: err.to_string(),
        }),
    )
}

/// Create the HTTP server with all routes configured
pub fn create_server(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Libraries
        .route("/libraries", post(create_library).get(list_libraries))
        .route("/libraries/", post(create_library).get(list_libraries))
        .route(
            "/libraries/:id",
            get(get_library).put(update_library).delete(delete_library),
        )
        .route("/libraries/:id/stats", get(library_stats))
        // Documents
        .route("/documents", post(create_document).get(list_documents))
        .route("/documents/", post(create_document).get(list_documents))
        .route(
            "/documents/:id",
            get(get_document)
                .put(update_document)
                .delete(delete_document),
        )
        .route(
            "/documents/library/:library_id",
            get(list_documents_by_library).delete(delete_documents_by_library),
        )
        // Chunks
        .route("/chunks", post(create_chunk).get(list_chunks))
        .route("/chunks/", post(create_chunk).get(list_chunks))
        .route("/chunks/random", post(create_random_chunk))
        .route("/chunks/search", post(search_chunks))
        .route(
            "/chunks/:id",
            get(get_chunk).put(update_chunk).delete(delete_chunk),
        )
        .route(
            "/chunks/document/:document_id",
            get(list_chunks_by_document).delete(delete_chunks_by_document),
        )
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// Start the HTTP server on the specified port
pub async fn start_server(state: AppState, port: u16) -> Result<()> {
    let app = create_server(state);
    let listener = TcpListener::bind(&format!("0.0.0.0:{port}")).await?;

    info!("CorpusDB HTTP server starting on port {}", port);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: SERVER_START_TIME.elapsed().as_secs(),
    })
}

// ===== Libraries =====

async fn create_library(
    State(state): State<AppState>,
    Json(request): Json<LibraryCreate>,
) -> Result<(StatusCode, Json<Library>), HandlerError> {
    let result = with_trace_id("create_library", async move {
        state.libraries.create_library(request).await
    })
    .await;

    match result {
        Ok(library) => Ok((StatusCode::CREATED, Json(library))),
        Err(e) => {
            warn!("Failed to create library: {}", e);
            Err(error_response(e))
        }
    }
}

async fn list_libraries(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Library>>, HandlerError> {
    let result = with_trace_id("list_libraries", async move {
        let page = Page::new(params.skip, params.limit)?;
        state.libraries.list_libraries(page).await
    })
    .await;

    result.map(Json).map_err(error_response)
}

async fn get_library(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Library>, HandlerError> {
    let result = with_trace_id("get_library", async move {
        state.libraries.get_library(id).await
    })
    .await;

    result.map(Json).map_err(error_response)
}

async fn update_library(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<LibraryCreate>,
) -> Result<Json<Library>, HandlerError> {
    let result = with_trace_id("update_library", async move {
        state.libraries.update_library(id, request).await
    })
    .await;

    result.map(Json).map_err(error_response)
}

async fn delete_library(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, HandlerError> {
    let result = with_trace_id("delete_library", async move {
        state.libraries.delete_library(id).await
    })
    .await;

    match result {
        Ok(_) => Ok(StatusCode::NO_CONTENT),
        Err(e) => {
            warn!("Failed to delete library: {}", e);
            Err(error_response(e))
        }
    }
}

async fn library_stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<LibraryStats>, HandlerError> {
    let result = with_trace_id("library_stats", async move {
        state.libraries.library_stats(id).await
    })
    .await;

    result.map(Json).map_err(error_response)
}

// ===== Documents =====

async fn create_document(
    State(state): State<AppState>,
    Json(request): Json<DocumentCreate>,
) -> Result<Json<Document>, HandlerError> {
    let result = with_trace_id("create_document", async move {
        state.documents.create_document(request).await
    })
    .await;

    match result {
        Ok(document) => Ok(Json(document)),
        Err(e) => {
            warn!("Failed to create document: {}", e);
            Err(error_response(e))
        }
    }
}

async fn list_documents(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Document>>, HandlerError> {
    let result = with_trace_id("list_documents", async move {
        let page = Page::new(params.skip, params.limit)?;
        state.documents.list_documents(page).await
    })
    .await;

    result.map(Json).map_err(error_response)
}

async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Document>, HandlerError> {
    let result = with_trace_id("get_document", async move {
        state.documents.get_document(id).await
    })
    .await;

    result.map(Json).map_err(error_response)
}

async fn update_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<DocumentUpdate>,
) -> Result<Json<Document>, HandlerError> {
    let result = with_trace_id("update_document", async move {
        state.documents.update_document(id, request).await
    })
    .await;

    result.map(Json).map_err(error_response)
}

async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, HandlerError> {
    let result = with_trace_id("delete_document", async move {
        state.documents.delete_document(id).await
    })
    .await;

    match result {
        Ok(chunk_ids) => Ok(Json(MessageResponse {
            message: format!(
                "Successfully deleted {} chunks and 1 documents",
                chunk_ids.len()
            ),
        })),
        Err(e) => {
            warn!("Failed to delete document: {}", e);
            Err(error_response(e))
        }
    }
}

async fn list_documents_by_library(
    State(state): State<AppState>,
    Path(library_id): Path<Uuid>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Document>>, HandlerError> {
    let result = with_trace_id("list_documents_by_library", async move {
        let page = Page::new(params.skip, params.limit)?;
        state
            .documents
            .list_documents_by_library(library_id, page)
            .await
    })
    .await;

    result.map(Json).map_err(error_response)
}

async fn delete_documents_by_library(
    State(state): State<AppState>,
    Path(library_id): Path<Uuid>,
) -> Result<Json<MessageResponse>, HandlerError> {
    let result = with_trace_id("delete_documents_by_library", async move {
        state.documents.delete_documents_by_library(library_id).await
    })
    .await;

    match result {
        Ok((chunk_ids, document_ids)) => Ok(Json(MessageResponse {
            message: format!(
                "Successfully deleted {} chunks and {} documents from library {}",
                chunk_ids.len(),
                document_ids.len(),
                library_id
            ),
        })),
        Err(e) => {
            warn!("Failed to delete documents by library: {}", e);
            Err(error_response(e))
        }
    }
}

// ===== Chunks =====

async fn create_chunk(
    State(state): State<AppState>,
    Json(request): Json<ChunkCreateRequest>,
) -> Result<Json<Chunk>, HandlerError> {
    let result = with_trace_id("create_chunk", async move {
        state.chunks.create_chunk(request).await
    })
    .await;

    match result {
        Ok(chunk) => Ok(Json(chunk)),
        Err(e) => {
            warn!("Failed to create chunk: {}", e);
            Err(error_response(e))
        }
    }
}

async fn create_random_chunk(
    State(state): State<AppState>,
    Query(params): Query<RandomChunkParams>,
) -> Result<Json<String>, HandlerError> {
    let result = with_trace_id("create_random_chunk", async move {
        state.chunks.create_random_chunk(&params.text).await
    })
    .await;

    match result {
        Ok(_) => Ok(Json("Added".to_string())),
        Err(e) => {
            warn!("Failed to create random chunk: {}", e);
            Err(error_response(e))
        }
    }
}

async fn get_chunk(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Chunk>, HandlerError> {
    let result =
        with_trace_id("get_chunk", async move { state.chunks.get_chunk(id).await }).await;

    result.map(Json).map_err(error_response)
}

async fn list_chunks(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Chunk>>, HandlerError> {
    let result = with_trace_id("list_chunks", async move {
        let page = Page::new(params.skip, params.limit)?;
        state.chunks.list_chunks(page).await
    })
    .await;

    result.map(Json).map_err(error_response)
}

async fn update_chunk(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ChunkUpdate>,
) -> Result<Json<Chunk>, HandlerError> {
    let result = with_trace_id("update_chunk", async move {
        state.chunks.update_chunk(id, request).await
    })
    .await;

    result.map(Json).map_err(error_response)
}

async fn delete_chunk(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, HandlerError> {
    let result = with_trace_id("delete_chunk", async move {
        state.chunks.delete_chunk(id).await
    })
    .await;

    match result {
        Ok(()) => Ok(Json(MessageResponse {
            message: "Chunk deleted successfully".to_string(),
        })),
        Err(e) => {
            warn!("Failed to delete chunk: {}", e);
            Err(error_response(e))
        }
    }
}

async fn list_chunks_by_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Chunk>>, HandlerError> {
    let result = with_trace_id("list_chunks_by_document", async move {
        let page = Page::new(params.skip, params.limit)?;
        state.chunks.list_chunks_by_document(document_id, page).await
    })
    .await;

    result.map(Json).map_err(error_response)
}

async fn delete_chunks_by_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
) -> Result<Json<MessageResponse>, HandlerError> {
    let result = with_trace_id("delete_chunks_by_document", async move {
        state.chunks.delete_chunks_by_document(document_id).await
    })
    .await;

    match result {
        Ok(chunk_ids) => Ok(Json(MessageResponse {
            message: format!(
                "Successfully deleted {} chunks for document {}",
                chunk_ids.len(),
                document_id
            ),
        })),
        Err(e) => {
            warn!("Failed to delete chunks by document: {}", e);
            Err(error_response(e))
        }
    }
}

async fn search_chunks(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, HandlerError> {
    let result = with_trace_id("search_chunks", async move {
        let query =
            ValidatedSearchQuery::new(params.query, params.k.unwrap_or(ValidatedSearchQuery::DEFAULT_K))?;

        let index_names: Vec<String> = match &params.index_types {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
            None => state.indices.index_names().await,
        };
        if index_names.is_empty() {
            return Err(CorpusDbError::validation("no index names given"));
        }

        let results = state.chunks.search(&query, &index_names).await?;

        let list_of_chunks = results
            .into_iter()
            .map(|(name, hits)| {
                let texts = hits
                    .into_iter()
                    .filter_map(|hit| hit.chunk.map(|c| c.text))
                    .collect();
                (name, texts)
            })
            .collect();
        Ok(SearchResponse { list_of_chunks })
    })
    .await;

    match result {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            warn!("Search failed: {}", e);
            Err(error_response(e))
        }
    }
}
