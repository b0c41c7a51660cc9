//! Metric ball-tree index.
//!
//! A binary tree in which every node covers a hyperball containing all of
//! its descendant points. Leaves hold up to `leaf_size` points; internal
//! nodes hold only bounds and children. Queries prune whole subtrees when
//! the ball cannot contain anything closer than the current k-th best
//! candidate.
//!
//! Online inserts descend to the closest leaf, splitting it when it
//! overflows, and refresh ancestor bounds with the midpoint-of-children
//! formula on the way back up. That formula over-approximates, so bounds
//! loosen slowly under sustained insertion; the index manager restores
//! tight bounds with a batch rebuild once an index has grown well past its
//! last build size.

use std::collections::{BinaryHeap, HashMap};

use uuid::Uuid;

use crate::contracts::{ensure_batch, ensure_dimension, Neighbor, VectorIndex};
use crate::distance::{euclidean, mean};
use crate::errors::{CorpusDbError, Result};

pub const DEFAULT_LEAF_SIZE: usize = 20;

struct BallNode {
    centroid: Vec<f32>,
    radius: f32,
    // Populated for leaves only; internal nodes keep these empty.
    points: Vec<Vec<f32>>,
    ids: Vec<Uuid>,
    left: Option<Box<BallNode>>,
    right: Option<Box<BallNode>>,
}

impl BallNode {
    fn leaf(points: Vec<Vec<f32>>, ids: Vec<Uuid>) -> Self {
        let mut node = Self {
            centroid: Vec::new(),
            radius: 0.0,
            points,
            ids,
            left: None,
            right: None,
        };
        node.refresh_leaf_bounds();
        node
    }

    fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    /// Recompute a leaf's bounds from its remaining points. An emptied leaf
    /// keeps its last centroid with radius 0, which can never wrongly admit
    /// a query since it has no points.
    fn refresh_leaf_bounds(&mut self) {
        if self.points.is_empty() {
            self.radius = 0.0;
            return;
        }
        self.centroid = mean(&self.points);
        self.radius = self
            .points
            .iter()
            .map(|p| euclidean(p, &self.centroid))
            .fold(0.0, f32::max);
    }

    /// Refresh an internal node from its children: centroid midway between
    /// the child centroids, radius enclosing both child balls.
    fn refresh_inner_bounds(&mut self) {
        let (centroid, radius) = match (&self.left, &self.right) {
            (Some(left), Some(right)) => {
                let centroid: Vec<f32> = left
                    .centroid
                    .iter()
                    .zip(&right.centroid)
                    .map(|(a, b)| (a + b) / 2.0)
                    .collect();
                let reach_left = euclidean(&left.centroid, &centroid) + left.radius;
                let reach_right = euclidean(&right.centroid, &centroid) + right.radius;
                (centroid, reach_left.max(reach_right))
            }
            _ => return,
        };
        self.centroid = centroid;
        self.radius = radius;
    }
}

/// Split a point set around its (approximately) mutually farthest pair:
/// pick the point farthest from the first point, then the point farthest
/// from that one. Each point joins the closer pole, ties going left; if a
/// degenerate set leaves one side empty, fall back to a median-index split.
fn partition(
    points: Vec<Vec<f32>>,
    ids: Vec<Uuid>,
) -> (Vec<Vec<f32>>, Vec<Uuid>, Vec<Vec<f32>>, Vec<Uuid>) {
    let farthest_from = |origin: &[f32], candidates: &[Vec<f32>]| -> usize {
        let mut best = 0;
        let mut best_dist = -1.0f32;
        for (i, candidate) in candidates.iter().enumerate() {
            let d = euclidean(origin, candidate);
            if d > best_dist {
                best_dist = d;
                best = i;
            }
        }
        best
    };

    let p1_idx = farthest_from(&points[0], &points);
    let p2_idx = farthest_from(&points[p1_idx], &points);
    let p1 = points[p1_idx].clone();
    let p2 = points[p2_idx].clone();

    let mut left_points = Vec::new();
    let mut left_ids = Vec::new();
    let mut right_points = Vec::new();
    let mut right_ids = Vec::new();
    for (point, id) in points.into_iter().zip(ids) {
        if euclidean(&point, &p1) <= euclidean(&point, &p2) {
            left_points.push(point);
            left_ids.push(id);
        } else {
            right_points.push(point);
            right_ids.push(id);
        }
    }

    if left_points.is_empty() || right_points.is_empty() {
        let mut all_points: Vec<Vec<f32>> = left_points.into_iter().chain(right_points).collect();
        let mut all_ids: Vec<Uuid> = left_ids.into_iter().chain(right_ids).collect();
        let mid = all_points.len() / 2;
        let right_points = all_points.split_off(mid);
        let right_ids = all_ids.split_off(mid);
        return (all_points, all_ids, right_points, right_ids);
    }

    (left_points, left_ids, right_points, right_ids)
}

/// Recursive batch build. Bounds are computed over the full point set
/// before splitting, so batch-built trees carry exact centroids and radii.
fn build_node(points: Vec<Vec<f32>>, ids: Vec<Uuid>, leaf_size: usize) -> Box<BallNode> {
    let centroid = mean(&points);
    let radius = points
        .iter()
        .map(|p| euclidean(p, &centroid))
        .fold(0.0, f32::max);

    if points.len() <= leaf_size {
        return Box::new(BallNode {
            centroid,
            radius,
            points,
            ids,
            left: None,
            right: None,
        });
    }

    let (left_points, left_ids, right_points, right_ids) = partition(points, ids);
    Box::new(BallNode {
        centroid,
        radius,
        points: Vec::new(),
        ids: Vec::new(),
        left: Some(build_node(left_points, left_ids, leaf_size)),
        right: Some(build_node(right_points, right_ids, leaf_size)),
    })
}

fn split_leaf(node: &mut BallNode) {
    let points = std::mem::take(&mut node.points);
    let ids = std::mem::take(&mut node.ids);
    let (left_points, left_ids, right_points, right_ids) = partition(points, ids);
    node.left = Some(Box::new(BallNode::leaf(left_points, left_ids)));
    node.right = Some(Box::new(BallNode::leaf(right_points, right_ids)));
}

fn insert_node(node: &mut BallNode, point: Vec<f32>, id: Uuid, leaf_size: usize) {
    if node.is_leaf() {
        node.points.push(point);
        node.ids.push(id);
        if node.points.len() > leaf_size {
            split_leaf(node);
            node.refresh_inner_bounds();
        } else {
            node.refresh_leaf_bounds();
        }
        return;
    }

    let dist_left = euclidean(&point, &node.left.as_ref().expect("internal node").centroid);
    let dist_right = euclidean(&point, &node.right.as_ref().expect("internal node").centroid);
    if dist_left < dist_right {
        insert_node(node.left.as_mut().expect("internal node"), point, id, leaf_size);
    } else {
        insert_node(node.right.as_mut().expect("internal node"), point, id, leaf_size);
    }
    node.refresh_inner_bounds();
}

fn remove_from_leaf(node: &mut BallNode, id: &Uuid) -> bool {
    if let Some(pos) = node.ids.iter().position(|existing| existing == id) {
        node.ids.remove(pos);
        node.points.remove(pos);
        node.refresh_leaf_bounds();
        true
    } else {
        false
    }
}

/// Follow the insertion path (closer child centroid first). May miss the
/// point when online inserts have drifted centroids since it was stored.
fn delete_guided(node: &mut BallNode, point: &[f32], id: &Uuid) -> bool {
    if node.is_leaf() {
        return remove_from_leaf(node, id);
    }

    let dist_left = euclidean(point, &node.left.as_ref().expect("internal node").centroid);
    let dist_right = euclidean(point, &node.right.as_ref().expect("internal node").centroid);
    let child = if dist_left < dist_right {
        node.left.as_mut().expect("internal node")
    } else {
        node.right.as_mut().expect("internal node")
    };

    let removed = delete_guided(child, point, id);
    if removed {
        node.refresh_inner_bounds();
    }
    removed
}

fn delete_exhaustive(node: &mut BallNode, id: &Uuid) -> bool {
    if node.is_leaf() {
        return remove_from_leaf(node, id);
    }

    let removed = delete_exhaustive(node.left.as_mut().expect("internal node"), id)
        || delete_exhaustive(node.right.as_mut().expect("internal node"), id);
    if removed {
        node.refresh_inner_bounds();
    }
    removed
}

fn search_node(node: &BallNode, query: &[f32], k: usize, heap: &mut BinaryHeap<Neighbor>) {
    // Prune: nothing inside this ball can beat the current k-th candidate.
    if heap.len() == k {
        let farthest = heap.peek().expect("heap is full").distance;
        if euclidean(query, &node.centroid) - node.radius > farthest {
            return;
        }
    }

    if node.is_leaf() {
        for (point, id) in node.points.iter().zip(&node.ids) {
            let candidate = Neighbor::new(*id, euclidean(query, point));
            if heap.len() < k {
                heap.push(candidate);
            } else if candidate < *heap.peek().expect("heap is non-empty") {
                heap.pop();
                heap.push(candidate);
            }
        }
        return;
    }

    // Visit the closer child first so the heap tightens before the sibling
    // is tested against the prune bound.
    let left = node.left.as_deref().expect("internal node");
    let right = node.right.as_deref().expect("internal node");
    if euclidean(query, &left.centroid) < euclidean(query, &right.centroid) {
        search_node(left, query, k, heap);
        search_node(right, query, k, heap);
    } else {
        search_node(right, query, k, heap);
        search_node(left, query, k, heap);
    }
}

pub struct BallTree {
    dimension: usize,
    leaf_size: usize,
    root: Option<Box<BallNode>>,
    // id → vector lookup: feeds the guided delete descent and duplicate
    // replacement without touching the tree.
    entries: HashMap<Uuid, Vec<f32>>,
}

impl BallTree {
    pub fn new(dimension: usize) -> Self {
        Self::with_leaf_size(dimension, DEFAULT_LEAF_SIZE)
    }

    pub fn with_leaf_size(dimension: usize, leaf_size: usize) -> Self {
        Self {
            dimension,
            leaf_size: leaf_size.max(1),
            root: None,
            entries: HashMap::new(),
        }
    }

    pub fn leaf_size(&self) -> usize {
        self.leaf_size
    }
}

impl VectorIndex for BallTree {
    fn name(&self) -> &'static str {
        "ball_tree"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn build(&mut self, vectors: Vec<Vec<f32>>, ids: Vec<Uuid>) -> Result<()> {
        ensure_batch(&vectors, &ids, self.dimension)?;
        let entries: HashMap<Uuid, Vec<f32>> =
            ids.iter().copied().zip(vectors.iter().cloned()).collect();
        if entries.len() != ids.len() {
            return Err(CorpusDbError::validation("duplicate ids in build batch"));
        }

        self.root = if vectors.is_empty() {
            None
        } else {
            Some(build_node(vectors, ids, self.leaf_size))
        };
        self.entries = entries;
        Ok(())
    }

    fn add(&mut self, vector: Vec<f32>, id: Uuid) -> Result<()> {
        ensure_dimension(self.dimension, vector.len())?;
        self.delete(&id);

        match self.root.as_mut() {
            Some(root) => insert_node(root, vector.clone(), id, self.leaf_size),
            None => self.root = Some(Box::new(BallNode::leaf(vec![vector.clone()], vec![id]))),
        }
        self.entries.insert(id, vector);
        Ok(())
    }

    fn delete(&mut self, id: &Uuid) -> bool {
        let Some(point) = self.entries.remove(id) else {
            return false;
        };

        let removed = match self.root.as_mut() {
            Some(root) => delete_guided(root, &point, id) || delete_exhaustive(root, id),
            None => false,
        };
        debug_assert!(removed, "entry tracked in the map but absent from the tree");

        if self.entries.is_empty() {
            self.root = None;
        }
        removed
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        ensure_dimension(self.dimension, query.len())?;
        let Some(root) = self.root.as_deref() else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut heap: BinaryHeap<Neighbor> = BinaryHeap::with_capacity(k + 1);
        search_node(root, query, k, &mut heap);

        let mut results = heap.into_vec();
        results.sort_unstable();
        Ok(results)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
