//! CorpusDB API Server
//!
//! HTTP server wiring: relational store, embedding provider, vector index
//! manager, and the service layer on top.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use corpusdb::{
    embeddings::{EmbeddingConfig, EmbeddingService},
    http_server::{start_server, AppState},
    index_manager::{IndexKind, IndexManager},
    observability::init_logging_with_level,
    services::{ChunkService, DocumentService, LibraryService},
    store::CorpusStore,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "CorpusDB API Server")]
struct Args {
    /// Server port
    #[arg(short = 'p', long, default_value = "8080", env = "PORT")]
    port: u16,

    /// Database URL (sqlite::memory: or sqlite://path/to/corpus.db)
    #[arg(long, default_value = "sqlite::memory:", env = "DATABASE_URL")]
    database_url: String,

    /// Comma-separated list of indices to serve (linear, ball_tree, kd_tree)
    #[arg(long, default_value = "linear,ball_tree", env = "CORPUSDB_INDICES")]
    indices: String,

    /// Ball-tree leaf bucket size
    #[arg(long, default_value = "20", env = "CORPUSDB_LEAF_SIZE")]
    leaf_size: usize,

    /// Embedding dimension
    #[arg(long, default_value = "384", env = "CORPUSDB_DIMENSION")]
    dimension: usize,

    /// Enable verbose logging
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short = 'q', long, env = "QUIET_MODE")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging_with_level(args.verbose, args.quiet)?;

    info!("Starting CorpusDB API Server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", args.database_url);
    info!("Port: {}", args.port);

    let kinds = args
        .indices
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(IndexKind::parse)
        .collect::<corpusdb::Result<Vec<IndexKind>>>()?;
    anyhow::ensure!(!kinds.is_empty(), "at least one index must be enabled");

    let store = CorpusStore::connect(&args.database_url).await?;
    store.init_schema().await?;

    let embedder = Arc::new(EmbeddingService::new(EmbeddingConfig::hashing(
        args.dimension,
    ))?);

    let indices = Arc::new(IndexManager::new(
        store.clone(),
        embedder.clone(),
        &kinds,
        args.leaf_size,
    ));
    indices.rebuild_all().await?;
    info!("Indices ready: {}", args.indices);

    let state = AppState {
        libraries: Arc::new(LibraryService::new(store.clone(), indices.clone())),
        documents: Arc::new(DocumentService::new(store.clone(), indices.clone())),
        chunks: Arc::new(ChunkService::new(
            store.clone(),
            indices.clone(),
            embedder.clone(),
        )),
        indices,
    };

    start_server(state, args.port).await
}
