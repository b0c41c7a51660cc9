//! Exhaustive-scan vector index.
//!
//! Two parallel sequences, one of vectors and one of ids, scanned in full
//! for every query. Exact by construction, O(N·D) per search, and the
//! ground-truth oracle the tree indices are tested against.

use std::collections::BinaryHeap;

use uuid::Uuid;

use crate::contracts::{ensure_batch, ensure_dimension, Neighbor, VectorIndex};
use crate::distance::euclidean;
use crate::errors::Result;

pub struct LinearIndex {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
    ids: Vec<Uuid>,
}

impl LinearIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
            ids: Vec::new(),
        }
    }
}

impl VectorIndex for LinearIndex {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn build(&mut self, vectors: Vec<Vec<f32>>, ids: Vec<Uuid>) -> Result<()> {
        ensure_batch(&vectors, &ids, self.dimension)?;
        self.vectors = vectors;
        self.ids = ids;
        Ok(())
    }

    fn add(&mut self, vector: Vec<f32>, id: Uuid) -> Result<()> {
        ensure_dimension(self.dimension, vector.len())?;
        self.delete(&id);
        self.vectors.push(vector);
        self.ids.push(id);
        Ok(())
    }

    fn delete(&mut self, id: &Uuid) -> bool {
        match self.ids.iter().position(|existing| existing == id) {
            Some(pos) => {
                // O(1) removal: swap with the last entry and truncate.
                self.ids.swap_remove(pos);
                self.vectors.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        ensure_dimension(self.dimension, query.len())?;
        if k == 0 || self.vectors.is_empty() {
            return Ok(Vec::new());
        }

        // Bounded max-heap: the root is the current farthest candidate, so
        // anything closer replaces it.
        let mut heap: BinaryHeap<Neighbor> = BinaryHeap::with_capacity(k + 1);
        for (vector, id) in self.vectors.iter().zip(&self.ids) {
            let candidate = Neighbor::new(*id, euclidean(query, vector));
            if heap.len() < k {
                heap.push(candidate);
            } else if candidate < *heap.peek().expect("heap is non-empty") {
                heap.pop();
                heap.push(candidate);
            }
        }

        let mut results = heap.into_vec();
        results.sort_unstable();
        Ok(results)
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }
}
