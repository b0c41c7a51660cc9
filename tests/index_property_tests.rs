// Property-Based Index Tests
// Proptest generates adversarial point sets and queries; the exhaustive
// scan is the oracle the tree indices must agree with on every input.

use corpusdb::{BallTree, KdTreeIndex, LinearIndex, VectorIndex};
use proptest::prelude::*;
use uuid::Uuid;

const DIM: usize = 6;

mod strategies {
    use super::*;

    pub fn vector_strategy() -> impl Strategy<Value = Vec<f32>> {
        prop::collection::vec(-1.0f32..1.0, DIM)
    }

    pub fn point_set_strategy() -> impl Strategy<Value = Vec<Vec<f32>>> {
        prop::collection::vec(vector_strategy(), 1..60)
    }

    // Degenerate sets with heavy duplication exercise the median-split
    // fallback paths.
    pub fn duplicated_point_set_strategy() -> impl Strategy<Value = Vec<Vec<f32>>> {
        (vector_strategy(), 2usize..40)
            .prop_map(|(point, n)| (0..n).map(|_| point.clone()).collect())
    }
}

fn fresh_ids(n: usize) -> Vec<Uuid> {
    (0..n).map(|_| Uuid::new_v4()).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_ball_tree_matches_linear_oracle(
        points in strategies::point_set_strategy(),
        query in strategies::vector_strategy(),
        k in 1usize..12,
    ) {
        let ids = fresh_ids(points.len());

        let mut oracle = LinearIndex::new(DIM);
        oracle.build(points.clone(), ids.clone()).unwrap();
        let mut tree = BallTree::with_leaf_size(DIM, 5);
        tree.build(points, ids).unwrap();

        let expected: Vec<Uuid> = oracle.search(&query, k).unwrap().iter().map(|n| n.id).collect();
        let got: Vec<Uuid> = tree.search(&query, k).unwrap().iter().map(|n| n.id).collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_kd_tree_matches_linear_oracle(
        points in strategies::point_set_strategy(),
        query in strategies::vector_strategy(),
        k in 1usize..12,
    ) {
        let ids = fresh_ids(points.len());

        let mut oracle = LinearIndex::new(DIM);
        oracle.build(points.clone(), ids.clone()).unwrap();
        let mut tree = KdTreeIndex::new(DIM);
        tree.build(points, ids).unwrap();

        let expected: Vec<Uuid> = oracle.search(&query, k).unwrap().iter().map(|n| n.id).collect();
        let got: Vec<Uuid> = tree.search(&query, k).unwrap().iter().map(|n| n.id).collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_duplicated_points_are_all_retrievable(
        points in strategies::duplicated_point_set_strategy(),
    ) {
        let n = points.len();
        let ids = fresh_ids(n);
        let query = points[0].clone();

        let mut tree = BallTree::with_leaf_size(DIM, 3);
        tree.build(points, ids).unwrap();

        let results = tree.search(&query, n).unwrap();
        prop_assert_eq!(results.len(), n);
        prop_assert!(results.iter().all(|r| r.distance == 0.0));
    }

    #[test]
    fn prop_deleted_ids_vanish_from_every_index(
        points in strategies::point_set_strategy(),
        query in strategies::vector_strategy(),
    ) {
        let n = points.len();
        let ids = fresh_ids(n);

        let mut indices: Vec<Box<dyn VectorIndex>> = vec![
            Box::new(LinearIndex::new(DIM)),
            Box::new(BallTree::with_leaf_size(DIM, 4)),
            Box::new(KdTreeIndex::new(DIM)),
        ];

        for index in &mut indices {
            index.build(points.clone(), ids.clone()).unwrap();
            // Remove every other entry.
            for id in ids.iter().step_by(2) {
                prop_assert!(index.delete(id));
            }

            let kept = n - ids.iter().step_by(2).count();
            prop_assert_eq!(index.len(), kept);

            let results = index.search(&query, n).unwrap();
            prop_assert_eq!(results.len(), kept);
            for removed in ids.iter().step_by(2) {
                prop_assert!(results.iter().all(|r| r.id != *removed));
            }
        }
    }
}
