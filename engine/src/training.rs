//! Shared training protocol for both index stages.
//!
//! Each stage runs a fixed number of random mini-batch steps. There is no
//! convergence check, no retry and no loss validation: a poor fit only widens
//! the error bounds that the experts compute afterwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use tracing::trace;

use crate::approximator::{Approximator, TrainingBatch};
use crate::config::NetworkParameters;
use crate::error::IndexError;
use crate::record::IndexKey;

/// Cooperative cancellation for long-running rebuilds.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Per-run training context: randomness plus optional cancellation.
pub struct TrainingContext<'a> {
    pub rng: &'a mut StdRng,
    pub cancel: Option<&'a CancelFlag>,
    pub cancel_check_interval: usize,
}

impl<'a> TrainingContext<'a> {
    pub fn new(rng: &'a mut StdRng) -> Self {
        Self {
            rng,
            cancel: None,
            cancel_check_interval: 1,
        }
    }

    pub fn with_cancel(mut self, cancel: &'a CancelFlag, check_interval: usize) -> Self {
        self.cancel = Some(cancel);
        self.cancel_check_interval = check_interval.max(1);
        self
    }

    fn check_cancelled(&self, epoch: usize) -> Result<(), IndexError> {
        if epoch % self.cancel_check_interval != 0 {
            return Ok(());
        }
        match self.cancel {
            Some(flag) if flag.is_cancelled() => Err(IndexError::RebuildCancelled),
            _ => Ok(()),
        }
    }
}

/// Min-max projection of key features onto `[0, 1]`.
///
/// Keys outside the fitted range map outside `[0, 1]`; the router's clamp
/// takes care of them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureScaler {
    min: f32,
    range: f32,
}

impl FeatureScaler {
    /// Fit to keys sorted ascending.
    pub fn fit<K: IndexKey>(sorted_keys: impl IntoIterator<Item = K>) -> Self {
        let mut iter = sorted_keys.into_iter();
        let Some(first) = iter.next() else {
            return Self { min: 0.0, range: 0.0 };
        };
        let min = first.feature();
        let max = iter.last().map(|k| k.feature()).unwrap_or(min);
        Self {
            min,
            range: max - min,
        }
    }

    #[inline]
    pub fn apply(&self, feature: f32) -> f32 {
        if self.range > 0.0 {
            (feature - self.min) / self.range
        } else {
            0.0
        }
    }
}

/// A trained approximator together with the input projection it was fit on.
#[derive(Debug, Clone)]
pub struct TrainedStage<A> {
    model: A,
    scaler: FeatureScaler,
}

impl<A: Approximator> TrainedStage<A> {
    pub fn new(model: A, scaler: FeatureScaler) -> Self {
        Self { model, scaler }
    }

    /// Raw normalized estimate for `key`; deliberately unclamped.
    #[inline]
    pub fn estimate<K: IndexKey>(&self, key: K) -> f32 {
        self.model.predict(self.scaler.apply(key.feature()))
    }

    pub fn model(&self) -> &A {
        &self.model
    }
}

/// Run `params.max_epochs` random-batch steps of `model` over `samples`.
///
/// `samples` are `(input, position)` pairs; `output_scale` is the size of the
/// dataset positions refer to. The batch is capped at `samples.len()`, so the
/// caller never has to. Returns the loss of the final step.
pub fn fit<A: Approximator>(
    model: &mut A,
    params: &NetworkParameters,
    samples: &[(f32, f32)],
    output_scale: usize,
    ctx: &mut TrainingContext<'_>,
) -> Result<f32, IndexError> {
    if samples.is_empty() {
        return Ok(0.0);
    }

    let batch_size = params.effective_batch_size(samples.len());
    let mut inputs = vec![0.0f32; batch_size];
    let mut labels = vec![0.0f32; batch_size];
    let mut last_loss = 0.0;

    for epoch in 0..params.max_epochs {
        ctx.check_cancelled(epoch)?;

        let picks = rand::seq::index::sample(&mut *ctx.rng, samples.len(), batch_size);
        for (slot, idx) in picks.into_iter().enumerate() {
            let (input, label) = samples[idx];
            inputs[slot] = input;
            labels[slot] = label;
        }

        last_loss = model.train_step(&TrainingBatch {
            inputs: &inputs,
            labels: &labels,
            output_scale: output_scale as f32,
        });

        if epoch % 1_000 == 0 {
            trace!(epoch, loss = last_loss, batch_size, "training step");
        }
    }

    Ok(last_loss)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    /// Counts steps and records the largest batch it was given.
    #[derive(Default)]
    struct CountingModel {
        steps: usize,
        max_batch: usize,
    }

    impl Approximator for CountingModel {
        fn train_step(&mut self, batch: &TrainingBatch<'_>) -> f32 {
            self.steps += 1;
            self.max_batch = self.max_batch.max(batch.len());
            batch.output_scale
        }

        fn predict(&self, _input: f32) -> f32 {
            0.0
        }
    }

    fn params(batch_size: usize, max_epochs: usize) -> NetworkParameters {
        NetworkParameters {
            batch_size,
            max_epochs,
            learning_rate: 0.01,
            width: 0,
        }
    }

    #[test]
    fn test_fit_runs_fixed_epochs_with_capped_batch() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut ctx = TrainingContext::new(&mut rng);
        let mut model = CountingModel::default();
        let samples: Vec<(f32, f32)> = (0..5).map(|i| (i as f32, i as f32)).collect();

        let loss = fit(&mut model, &params(128, 37), &samples, 5, &mut ctx).unwrap();
        assert_eq!(model.steps, 37);
        assert_eq!(model.max_batch, 5);
        assert_eq!(loss, 5.0);
    }

    #[test]
    fn test_fit_on_empty_samples_is_noop() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut ctx = TrainingContext::new(&mut rng);
        let mut model = CountingModel::default();
        assert_eq!(fit(&mut model, &params(8, 10), &[], 0, &mut ctx).unwrap(), 0.0);
        assert_eq!(model.steps, 0);
    }

    #[test]
    fn test_fit_observes_cancellation() {
        let mut rng = StdRng::seed_from_u64(1);
        let flag = CancelFlag::new();
        flag.cancel();
        let mut ctx = TrainingContext::new(&mut rng).with_cancel(&flag, 1);
        let mut model = CountingModel::default();
        let samples = vec![(0.0, 0.0), (1.0, 1.0)];

        let result = fit(&mut model, &params(2, 100), &samples, 2, &mut ctx);
        assert_eq!(result, Err(IndexError::RebuildCancelled));
        assert_eq!(model.steps, 0);
    }

    #[test]
    fn test_feature_scaler() {
        let scaler = FeatureScaler::fit(vec![10u64, 20, 30]);
        assert_eq!(scaler.apply(10.0), 0.0);
        assert_eq!(scaler.apply(30.0), 1.0);
        assert_eq!(scaler.apply(20.0), 0.5);
        assert!(scaler.apply(40.0) > 1.0);

        let flat = FeatureScaler::fit(vec![7u64]);
        assert_eq!(flat.apply(7.0), 0.0);
        assert_eq!(FeatureScaler::fit(Vec::<u64>::new()).apply(3.0), 0.0);
    }
}
