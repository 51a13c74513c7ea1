//! Shared dataset generators for integration tests.

#![allow(dead_code)]

use learned_index_engine::IndexConfig;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, LogNormal};

/// `count` lognormal(mean, std_dev) samples, sorted and scaled so the largest
/// becomes `max_value`, then truncated to integers. Duplicates are kept.
pub fn integer_lognormals(count: usize, max_value: f64, mean: f64, std_dev: f64, seed: u64) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let dist = LogNormal::new(mean, std_dev).expect("valid lognormal parameters");
    let mut samples: Vec<f64> = (0..count).map(|_| dist.sample(&mut rng)).collect();
    samples.sort_by(|a, b| a.total_cmp(b));

    let largest = samples.last().copied().unwrap_or(1.0);
    let scale = max_value / largest;
    samples.into_iter().map(|v| (v * scale) as u64).collect()
}

/// Fast configuration with the rebuild threshold out of the way.
pub fn manual_train_config(stage_count: usize) -> IndexConfig {
    IndexConfig {
        max_overflow_size: 1_000_000,
        ..IndexConfig::for_testing(stage_count)
    }
}
