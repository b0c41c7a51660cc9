//! Contracts for the in-memory vector index family.
//!
//! Every index type (exhaustive scan, ball tree, kd tree) implements the
//! same [`VectorIndex`] trait so the index manager can fan writes out to
//! all of them and route queries to any of them interchangeably.

use std::cmp::Ordering;

use uuid::Uuid;

use crate::errors::{CorpusDbError, Result};

/// A single kNN search hit: the chunk id and its Euclidean distance to the
/// query vector.
///
/// Ordering is by `(distance, id)` using `f32::total_cmp`, which makes heap
/// behavior and tie-breaking deterministic across runs and index types.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: Uuid,
    pub distance: f32,
}

impl Neighbor {
    pub fn new(id: Uuid, distance: f32) -> Self {
        Self { id, distance }
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Core trait for vector index operations.
///
/// Implementations are synchronous and never block on I/O; serialization of
/// concurrent access is the index manager's job.
pub trait VectorIndex: Send + Sync {
    /// Short stable name used for routing and logging (`"linear"`,
    /// `"ball_tree"`, `"kd_tree"`).
    fn name(&self) -> &'static str;

    /// The fixed dimensionality every stored vector must have.
    fn dimension(&self) -> usize;

    /// Bulk initialization from a batch.
    ///
    /// # Preconditions
    /// - `vectors` and `ids` have equal length
    /// - every vector has length `dimension()`
    ///
    /// # Postconditions
    /// - any prior state is discarded
    /// - `len()` equals the batch size
    /// - on error the index is left unchanged
    fn build(&mut self, vectors: Vec<Vec<f32>>, ids: Vec<Uuid>) -> Result<()>;

    /// Online insert.
    ///
    /// # Preconditions
    /// - `vector` has length `dimension()`
    ///
    /// # Postconditions
    /// - the entry is searchable immediately
    /// - an existing entry with the same id is replaced, so re-adding is
    ///   idempotent and at most one entry per id exists
    fn add(&mut self, vector: Vec<f32>, id: Uuid) -> Result<()>;

    /// Remove the entry with the given id.
    ///
    /// Returns whether a removal occurred. Deleting an absent id is not an
    /// error.
    fn delete(&mut self, id: &Uuid) -> bool;

    /// Return up to `k` nearest neighbors in ascending Euclidean distance.
    ///
    /// Searching an empty index (or `k == 0`) returns an empty vec; a query
    /// of the wrong dimension is an error.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;

    /// Number of indexed entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared precondition check for query and inserted vectors.
pub(crate) fn ensure_dimension(expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(CorpusDbError::DimensionMismatch { expected, got });
    }
    Ok(())
}

/// Shared precondition check for batch builds.
pub(crate) fn ensure_batch(vectors: &[Vec<f32>], ids: &[Uuid], dimension: usize) -> Result<()> {
    if vectors.len() != ids.len() {
        return Err(CorpusDbError::validation(format!(
            "batch size mismatch: {} vectors, {} ids",
            vectors.len(),
            ids.len()
        )));
    }
    for vector in vectors {
        ensure_dimension(dimension, vector.len())?;
    }
    Ok(())
}
