//! Property tests: every key is found after training, with the value of its
//! most recent insert, whatever the key distribution and stage count.

mod common;

use std::collections::HashMap;

use common::manual_train_config;
use learned_index_engine::{Expert, IndexConfig, NetworkParameters, RecursiveModelIndex};
use proptest::prelude::*;

fn small_config(stage_count: usize, max_error: usize) -> IndexConfig {
    let stage = NetworkParameters {
        batch_size: 16,
        max_epochs: 50,
        learning_rate: 0.05,
        width: 4,
    };
    IndexConfig {
        first_stage: stage,
        second_stage: NetworkParameters { width: 0, ..stage },
        max_second_stage_error: max_error,
        ..manual_train_config(stage_count)
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_trained_keys_round_trip(
        entries in prop::collection::vec((0u32..100_000, any::<u16>()), 1..300),
        stage_count in 1usize..12,
        max_error in 0usize..64,
    ) {
        let mut index = RecursiveModelIndex::new(small_config(stage_count, max_error)).unwrap();
        let mut expected = HashMap::new();
        for &(key, value) in &entries {
            index.insert(key, value);
            expected.insert(key, value);
        }
        index.train();

        prop_assert_eq!(index.snapshot_len(), expected.len());
        for (&key, &value) in &expected {
            prop_assert_eq!(index.find(key).map(|r| r.value), Some(value));
        }
    }

    #[test]
    fn prop_model_bounds_are_sound(
        keys in prop::collection::vec(any::<i64>(), 1..300),
        stage_count in 1usize..8,
    ) {
        let mut index = RecursiveModelIndex::new(small_config(stage_count, 1_000)).unwrap();
        for &key in &keys {
            index.insert(key, ());
        }
        index.train();

        let mut keys = keys;
        keys.sort_unstable();
        keys.dedup();
        let generation = index.current_generation();
        prop_assert_eq!(generation.snapshot().len(), keys.len());

        for (position, &key) in keys.iter().enumerate() {
            let slot = generation.stage_for(key).unwrap();
            if let Some(Expert::Model(model)) = generation.expert(slot) {
                let residual = position as i64 - model.predict(key, keys.len());
                prop_assert!(model.bounds().contains(residual));
            }
            prop_assert!(index.find(key).is_some());
        }
    }
}
