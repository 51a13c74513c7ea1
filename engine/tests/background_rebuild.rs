//! Background rebuilds: records stay visible while a generation is built and
//! survive cancellation.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::manual_train_config;
use learned_index_engine::approximator::{Approximator, ApproximatorBuilder, TrainingBatch};
use learned_index_engine::{BackgroundIndex, IndexConfig, IndexError, NetworkParameters};
use rand::rngs::StdRng;

/// Returns its scaled input unchanged.
struct Identity;

impl Approximator for Identity {
    fn train_step(&mut self, _batch: &TrainingBatch<'_>) -> f32 {
        0.0
    }

    fn predict(&self, input: f32) -> f32 {
        input
    }
}

/// Holds every rebuild at its first model until the gate opens.
struct GatedBuilder(Arc<AtomicBool>);

impl ApproximatorBuilder for GatedBuilder {
    type Model = Identity;

    fn build(&self, _params: &NetworkParameters, _rng: &mut StdRng) -> Identity {
        while !self.0.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(1));
        }
        Identity
    }
}

#[tokio::test]
async fn test_threshold_starts_rebuild_and_keeps_records_visible() {
    let config = IndexConfig {
        max_overflow_size: 50,
        ..IndexConfig::for_testing(4)
    };
    let index = BackgroundIndex::new(config).unwrap();
    for key in 0..51u64 {
        index.insert(key, key * 2);
    }

    // Visible whether the rebuild is still running or already swapped in
    for key in 0..51u64 {
        assert_eq!(index.find(key).map(|r| r.value), Some(key * 2));
    }

    index.wait_for_rebuild().await.unwrap();
    assert_eq!(index.generation(), 1);
    assert_eq!(index.snapshot_len(), 51);
    assert_eq!(index.pending_len(), 0);
    for key in 0..51u64 {
        assert_eq!(index.find(key).map(|r| r.value), Some(key * 2));
    }
}

#[tokio::test]
async fn test_cancelled_rebuild_loses_no_record() {
    let mut config = manual_train_config(4);
    config.first_stage.max_epochs = 50_000_000;
    let index = BackgroundIndex::new(config).unwrap();
    for key in 0..100u64 {
        index.insert(key, key + 7);
    }

    assert!(index.trigger_rebuild());
    assert!(!index.trigger_rebuild());
    index.insert(1_000, 1);
    index.cancel_rebuild();

    assert_eq!(index.wait_for_rebuild().await, Err(IndexError::RebuildCancelled));
    assert_eq!(index.generation(), 0);
    assert_eq!(index.pending_len(), 0);
    assert_eq!(index.overflow_len(), 101);
    for key in 0..100u64 {
        assert_eq!(index.find(key).map(|r| r.value), Some(key + 7));
    }
    assert_eq!(index.find(1_000).map(|r| r.value), Some(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_inserts_during_rebuild_are_kept() {
    let mut config = manual_train_config(4);
    config.first_stage.max_epochs = 2_000;
    let index = BackgroundIndex::new(config).unwrap();
    for key in 0..500u64 {
        index.insert(key, key);
    }
    index.trigger_rebuild();

    let writer = index.clone();
    let inserts = tokio::spawn(async move {
        for key in 500..600u64 {
            writer.insert(key, key);
            tokio::time::sleep(Duration::from_micros(50)).await;
        }
    });
    inserts.await.unwrap();
    index.wait_for_rebuild().await.unwrap();

    assert_eq!(index.generation(), 1);
    for key in 0..600u64 {
        assert_eq!(index.find(key).map(|r| r.value), Some(key), "key {}", key);
    }

    index.train().await.unwrap();
    assert_eq!(index.generation(), 2);
    assert_eq!(index.snapshot_len(), 600);
    assert_eq!(index.overflow_len(), 0);
    assert_eq!(index.stats().overflow_len, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_waiter_does_not_release_running_rebuild() {
    let gate = Arc::new(AtomicBool::new(false));
    let index = BackgroundIndex::with_builder(manual_train_config(4), GatedBuilder(Arc::clone(&gate)))
        .unwrap();
    for key in 0..100u64 {
        index.insert(key, key);
    }
    assert!(index.trigger_rebuild());

    let waiter = {
        let index = index.clone();
        tokio::spawn(async move { index.wait_for_rebuild().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Still held at the gate, with a waiter parked on it
    assert!(index.is_rebuilding());
    index.insert(1_000, 1);
    assert!(!index.trigger_rebuild());
    assert_eq!(index.pending_len(), 100);
    assert_eq!(index.overflow_len(), 1);
    assert_eq!(index.find(1_000).map(|r| r.value), Some(1));

    gate.store(true, Ordering::Release);
    waiter.await.unwrap().unwrap();
    assert!(!index.is_rebuilding());
    assert_eq!(index.generation(), 1);
    assert_eq!(index.snapshot_len(), 100);
    assert_eq!(index.pending_len(), 0);
    assert_eq!(index.find(1_000).map(|r| r.value), Some(1));
    for key in 0..100u64 {
        assert_eq!(index.find(key).map(|r| r.value), Some(key));
    }

    // A finished rebuild keeps reporting its outcome
    assert_eq!(index.wait_for_rebuild().await, Ok(()));

    index.train().await.unwrap();
    assert_eq!(index.generation(), 2);
    assert_eq!(index.snapshot_len(), 101);
    assert_eq!(index.find(1_000).map(|r| r.value), Some(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_generation_ids_strictly_increase() {
    let config = IndexConfig {
        max_overflow_size: 20,
        ..IndexConfig::for_testing(4)
    };
    let index = BackgroundIndex::new(config).unwrap();

    let mut seen = vec![index.generation()];
    for round in 0..4u64 {
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let index = index.clone();
                tokio::spawn(async move { index.wait_for_rebuild().await })
            })
            .collect();
        for key in round * 100..round * 100 + 30 {
            index.insert(key, key);
        }
        for waiter in waiters {
            waiter.await.unwrap().unwrap();
        }
        index.train().await.unwrap();
        seen.push(index.generation());
    }

    assert!(seen.windows(2).all(|w| w[0] < w[1]), "generations {:?}", seen);
    assert_eq!(index.snapshot_len(), 120);
    for round in 0..4u64 {
        for key in round * 100..round * 100 + 30 {
            assert_eq!(index.find(key).map(|r| r.value), Some(key));
        }
    }
}
