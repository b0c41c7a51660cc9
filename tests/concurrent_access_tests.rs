// Concurrent Access Tests
// Storms of adds, deletes, and searches against a shared index manager:
// no task may ever observe a partially updated index, and the final
// contents must equal exactly what was added and not deleted.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use corpusdb::{
    embeddings::{EmbeddingConfig, EmbeddingService},
    index_manager::{IndexKind, IndexManager},
    store::CorpusStore,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

const DIM: usize = 8;
const WRITERS: usize = 8;
const VECTORS_PER_WRITER: usize = 24;

async fn shared_manager() -> Arc<IndexManager> {
    let store = CorpusStore::connect("sqlite::memory:").await.unwrap();
    store.init_schema().await.unwrap();
    let embedder = Arc::new(EmbeddingService::new(EmbeddingConfig::hashing(DIM)).unwrap());
    Arc::new(IndexManager::new(store, embedder, &IndexKind::all(), 4))
}

fn writer_batch(seed: u64) -> Vec<(Uuid, Vec<f32>)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..VECTORS_PER_WRITER)
        .map(|_| {
            let vector = (0..DIM).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
            (Uuid::new_v4(), vector)
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adds_deletes_and_searches() -> Result<()> {
    let manager = shared_manager().await;

    let batches: Vec<Vec<(Uuid, Vec<f32>)>> =
        (0..WRITERS).map(|w| writer_batch(w as u64)).collect();

    // Each writer adds its whole batch, then deletes the odd half. The
    // surviving set is deterministic even though interleaving is not.
    let mut tasks = Vec::new();
    for batch in batches.clone() {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move {
            for (id, vector) in &batch {
                manager.add_vector(vector, *id).await.unwrap();
            }
            for (id, _) in batch.iter().skip(1).step_by(2) {
                assert!(manager.delete_vector(id).await);
            }
        }));
    }

    // Readers hammer every index while the writers run. Any partially
    // applied mutation would show up as a non-finite distance, an unknown
    // id, or an unsorted result list.
    let every_id: HashSet<Uuid> = batches
        .iter()
        .flatten()
        .map(|(id, _)| *id)
        .collect();
    for reader in 0..6 {
        let manager = manager.clone();
        let every_id = every_id.clone();
        tasks.push(tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(1000 + reader);
            for _ in 0..30 {
                let query: Vec<f32> = (0..DIM).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
                for name in ["linear", "ball_tree", "kd_tree"] {
                    let results = manager.search_vector(&query, 5, name).await.unwrap();
                    assert!(results.len() <= 5);
                    for pair in results.windows(2) {
                        assert!(pair[0].distance <= pair[1].distance);
                    }
                    for hit in &results {
                        assert!(hit.distance.is_finite());
                        assert!(every_id.contains(&hit.id), "unknown id surfaced mid-flight");
                    }
                }
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    // Quiescent state: exactly the even-position vectors of every writer.
    let survivors: Vec<(Uuid, Vec<f32>)> = batches
        .iter()
        .flatten()
        .enumerate()
        .filter(|(i, _)| (i % VECTORS_PER_WRITER) % 2 == 0)
        .map(|(_, entry)| entry.clone())
        .collect();
    let expected = WRITERS * VECTORS_PER_WRITER.div_ceil(2);

    for name in ["linear", "ball_tree", "kd_tree"] {
        assert_eq!(manager.index_len(name).await.unwrap(), expected, "{name}");
    }

    // Every survivor is retrievable at distance zero from every index.
    for (id, vector) in survivors.iter().take(10) {
        for name in ["linear", "ball_tree", "kd_tree"] {
            let results = manager.search_vector(vector, 1, name).await.unwrap();
            assert_eq!(results[0].id, *id, "{name}");
            assert_eq!(results[0].distance, 0.0, "{name}");
        }
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_search_never_sees_torn_state_during_replacement() -> Result<()> {
    let manager = shared_manager().await;

    // One id whose vector is continually replaced while readers search.
    let id = Uuid::new_v4();
    manager.add_vector(&[0.0; DIM], id).await.unwrap();

    let writer = {
        let manager = manager.clone();
        tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(99);
            for _ in 0..200 {
                let vector: Vec<f32> = (0..DIM).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
                manager.add_vector(&vector, id).await.unwrap();
            }
        })
    };

    let reader = {
        let manager = manager.clone();
        tokio::spawn(async move {
            for _ in 0..200 {
                for name in ["linear", "ball_tree", "kd_tree"] {
                    let results = manager.search_vector(&[0.0; DIM], 2, name).await.unwrap();
                    // Replacement is atomic under the write lock: exactly
                    // one entry for the id, never zero, never two.
                    assert_eq!(results.len(), 1);
                    assert_eq!(results[0].id, id);
                    assert!(results[0].distance.is_finite());
                }
            }
        })
    };

    writer.await.unwrap();
    reader.await.unwrap();

    for name in ["linear", "ball_tree", "kd_tree"] {
        assert_eq!(manager.index_len(name).await.unwrap(), 1);
    }
    Ok(())
}
