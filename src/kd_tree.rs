//! Axis-aligned kd-tree index.
//!
//! A binary space partition cycling through the vector axes by depth.
//! Batch builds pick the median along the current axis, which keeps the
//! tree balanced; online inserts descend to an empty slot. Deletes rebuild
//! the tree from the retained points — O(n log n), but correct, balanced
//! afterwards, and cheap at the corpus sizes this service targets.
//!
//! Search keeps a bounded max-heap over squared distances and only visits
//! the far side of a splitting hyperplane when the hypersphere around the
//! current k-th candidate crosses it.

use std::collections::BinaryHeap;

use uuid::Uuid;

use crate::contracts::{ensure_batch, ensure_dimension, Neighbor, VectorIndex};
use crate::distance::euclidean_sq;
use crate::errors::Result;

struct KdNode {
    vector: Vec<f32>,
    id: Uuid,
    left: Option<Box<KdNode>>,
    right: Option<Box<KdNode>>,
}

fn build_node(mut items: Vec<(Vec<f32>, Uuid)>, depth: usize, dimension: usize) -> Option<Box<KdNode>> {
    if items.is_empty() {
        return None;
    }

    let axis = depth % dimension;
    items.sort_by(|a, b| a.0[axis].total_cmp(&b.0[axis]));

    let mid = items.len() / 2;
    let right_items = items.split_off(mid + 1);
    let (vector, id) = items.pop().expect("median exists");

    Some(Box::new(KdNode {
        vector,
        id,
        left: build_node(items, depth + 1, dimension),
        right: build_node(right_items, depth + 1, dimension),
    }))
}

fn insert_node(
    slot: &mut Option<Box<KdNode>>,
    vector: Vec<f32>,
    id: Uuid,
    depth: usize,
    dimension: usize,
) {
    match slot {
        None => {
            *slot = Some(Box::new(KdNode {
                vector,
                id,
                left: None,
                right: None,
            }));
        }
        Some(node) => {
            let axis = depth % dimension;
            if vector[axis] < node.vector[axis] {
                insert_node(&mut node.left, vector, id, depth + 1, dimension);
            } else {
                insert_node(&mut node.right, vector, id, depth + 1, dimension);
            }
        }
    }
}

fn collect(slot: Option<Box<KdNode>>, out: &mut Vec<(Vec<f32>, Uuid)>) {
    if let Some(node) = slot {
        out.push((node.vector, node.id));
        collect(node.left, out);
        collect(node.right, out);
    }
}

fn contains(slot: &Option<Box<KdNode>>, id: &Uuid) -> bool {
    match slot {
        None => false,
        Some(node) => node.id == *id || contains(&node.left, id) || contains(&node.right, id),
    }
}

fn search_node(
    slot: &Option<Box<KdNode>>,
    query: &[f32],
    k: usize,
    depth: usize,
    dimension: usize,
    heap: &mut BinaryHeap<Neighbor>,
) {
    let Some(node) = slot else {
        return;
    };

    // Heap entries carry squared distances; ordering is unaffected.
    let candidate = Neighbor::new(node.id, euclidean_sq(query, &node.vector));
    if heap.len() < k {
        heap.push(candidate);
    } else if candidate < *heap.peek().expect("heap is non-empty") {
        heap.pop();
        heap.push(candidate);
    }

    let axis = depth % dimension;
    let diff = query[axis] - node.vector[axis];
    let (closer, farther) = if diff < 0.0 {
        (&node.left, &node.right)
    } else {
        (&node.right, &node.left)
    };

    search_node(closer, query, k, depth + 1, dimension, heap);

    // Only cross the hyperplane when the current k-th best hypersphere
    // intersects it.
    let worst = heap.peek().expect("heap is non-empty").distance;
    if heap.len() < k || diff * diff <= worst {
        search_node(farther, query, k, depth + 1, dimension, heap);
    }
}

pub struct KdTreeIndex {
    dimension: usize,
    len: usize,
    root: Option<Box<KdNode>>,
}

impl KdTreeIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            len: 0,
            root: None,
        }
    }
}

impl VectorIndex for KdTreeIndex {
    fn name(&self) -> &'static str {
        "kd_tree"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn build(&mut self, vectors: Vec<Vec<f32>>, ids: Vec<Uuid>) -> Result<()> {
        ensure_batch(&vectors, &ids, self.dimension)?;
        self.len = vectors.len();
        self.root = build_node(
            vectors.into_iter().zip(ids).collect(),
            0,
            self.dimension.max(1),
        );
        Ok(())
    }

    fn add(&mut self, vector: Vec<f32>, id: Uuid) -> Result<()> {
        ensure_dimension(self.dimension, vector.len())?;
        self.delete(&id);
        insert_node(&mut self.root, vector, id, 0, self.dimension.max(1));
        self.len += 1;
        Ok(())
    }

    fn delete(&mut self, id: &Uuid) -> bool {
        if !contains(&self.root, id) {
            return false;
        }

        let mut items = Vec::with_capacity(self.len);
        collect(self.root.take(), &mut items);
        items.retain(|(_, existing)| existing != id);
        self.len = items.len();
        self.root = build_node(items, 0, self.dimension.max(1));
        true
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        ensure_dimension(self.dimension, query.len())?;
        if k == 0 || self.root.is_none() {
            return Ok(Vec::new());
        }

        let mut heap: BinaryHeap<Neighbor> = BinaryHeap::with_capacity(k + 1);
        search_node(&self.root, query, k, 0, self.dimension.max(1), &mut heap);

        let mut results: Vec<Neighbor> = heap
            .into_vec()
            .into_iter()
            .map(|n| Neighbor::new(n.id, n.distance.sqrt()))
            .collect();
        results.sort_unstable();
        Ok(results)
    }

    fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear_index::LinearIndex;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_points(rng: &mut StdRng, n: usize, dimension: usize) -> (Vec<Vec<f32>>, Vec<Uuid>) {
        let vectors = (0..n)
            .map(|_| (0..dimension).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect();
        let ids = (0..n).map(|_| Uuid::new_v4()).collect();
        (vectors, ids)
    }

    #[test]
    fn test_search_matches_linear_oracle() {
        let mut rng = StdRng::seed_from_u64(5);
        let (vectors, ids) = random_points(&mut rng, 200, 5);

        let mut tree = KdTreeIndex::new(5);
        tree.build(vectors.clone(), ids.clone()).unwrap();
        let mut oracle = LinearIndex::new(5);
        oracle.build(vectors, ids).unwrap();

        for _ in 0..20 {
            let query: Vec<f32> = (0..5).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let got: Vec<Uuid> = tree.search(&query, 7).unwrap().iter().map(|n| n.id).collect();
            let expected: Vec<Uuid> =
                oracle.search(&query, 7).unwrap().iter().map(|n| n.id).collect();
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn test_online_insert_then_exact_match() {
        let mut rng = StdRng::seed_from_u64(13);
        let mut tree = KdTreeIndex::new(3);

        let (vectors, ids) = random_points(&mut rng, 60, 3);
        for (vector, id) in vectors.iter().zip(&ids) {
            tree.add(vector.clone(), *id).unwrap();
        }

        let results = tree.search(&vectors[30], 1).unwrap();
        assert_eq!(results[0].id, ids[30]);
        assert_eq!(results[0].distance, 0.0);
    }

    #[test]
    fn test_delete_rebuilds_without_the_id() {
        let mut rng = StdRng::seed_from_u64(17);
        let (vectors, ids) = random_points(&mut rng, 40, 4);

        let mut tree = KdTreeIndex::new(4);
        tree.build(vectors.clone(), ids.clone()).unwrap();

        assert!(tree.delete(&ids[5]));
        assert!(!tree.delete(&ids[5]));
        assert_eq!(tree.len(), 39);

        let results = tree.search(&vectors[5], 39).unwrap();
        assert!(results.iter().all(|n| n.id != ids[5]));
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let mut tree = KdTreeIndex::new(2);
        assert!(tree.add(vec![1.0, 2.0, 3.0], Uuid::new_v4()).is_err());
        assert!(tree.search(&[1.0], 1).is_err());
        assert_eq!(tree.len(), 0);
    }
}
