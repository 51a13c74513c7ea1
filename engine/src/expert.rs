//! Second-stage experts.
//!
//! An expert owns one partition of the snapshot as chosen by the router. It
//! either predicts positions with a trained approximator plus in-sample error
//! bounds, or, when those bounds are too wide, answers from an exact tree.

use tracing::{debug, warn};

use crate::approximator::{Approximator, ApproximatorBuilder};
use crate::config::NetworkParameters;
use crate::error::IndexError;
use crate::index::{BTreeIndex, OrderedIndex};
use crate::record::{IndexKey, Record};
use crate::training::{fit, FeatureScaler, TrainedStage, TrainingContext};

/// Signed residual extremes `true_index - predicted_index` over a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorBounds {
    pub max_negative_error: i64,
    pub max_positive_error: i64,
    pub max_absolute_error: u64,
}

impl ErrorBounds {
    /// Extremes of `residuals`, folded from zero so every window contains the
    /// predicted slot.
    pub fn from_residuals(residuals: impl IntoIterator<Item = i64>) -> Self {
        residuals
            .into_iter()
            .fold(Self::default(), |bounds, residual| Self {
                max_negative_error: bounds.max_negative_error.min(residual),
                max_positive_error: bounds.max_positive_error.max(residual),
                max_absolute_error: bounds.max_absolute_error.max(residual.unsigned_abs()),
            })
    }

    pub fn contains(&self, residual: i64) -> bool {
        residual >= self.max_negative_error && residual <= self.max_positive_error
    }

    /// Inclusive search window around `predicted`, clipped to
    /// `[0, last_index]`. `None` when the clipped window is empty.
    pub fn window(&self, predicted: i64, last_index: usize) -> Option<(usize, usize)> {
        let lo = predicted.saturating_add(self.max_negative_error).max(0);
        let hi = predicted
            .saturating_add(self.max_positive_error)
            .min(last_index as i64);
        if lo > hi {
            return None;
        }
        Some((lo as usize, hi as usize))
    }

    /// Number of slots a lookup scans at most.
    pub fn window_len(&self) -> u64 {
        (self.max_positive_error - self.max_negative_error) as u64 + 1
    }
}

/// Which lookup path an expert serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpertMode {
    Invalid,
    Model,
    Tree,
}

/// Expert serving lookups from a trained approximator.
#[derive(Debug, Clone)]
pub struct ModelExpert<A> {
    stage: TrainedStage<A>,
    bounds: ErrorBounds,
}

impl<A: Approximator> ModelExpert<A> {
    /// Predicted snapshot position: normalized output × dataset size,
    /// truncated and held to `[-n, 2n]`. May be negative or past the end;
    /// the window clips it.
    #[inline]
    pub fn predict<K: IndexKey>(&self, key: K, total_dataset_size: usize) -> i64 {
        predict_position(&self.stage, key, total_dataset_size)
    }

    pub fn bounds(&self) -> &ErrorBounds {
        &self.bounds
    }
}

/// Expert serving lookups from an exact key → snapshot position tree.
#[derive(Debug, Clone)]
pub struct TreeExpert<K> {
    tree: BTreeIndex<K, usize>,
    /// Bounds of the discarded model, kept for diagnostics.
    rejected_bounds: ErrorBounds,
}

impl<K: IndexKey> TreeExpert<K> {
    /// `(key, snapshot position)` if the key was in this partition.
    pub fn tree_find(&self, key: K) -> Option<(K, usize)> {
        self.tree.get(&key).map(|&position| (key, position))
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn rejected_bounds(&self) -> &ErrorBounds {
        &self.rejected_bounds
    }
}

/// One second-stage slot. Modes are mutually exclusive by construction.
#[derive(Debug, Clone)]
pub enum Expert<K, A> {
    /// Never received training data.
    Invalid,
    Model(ModelExpert<A>),
    Tree(TreeExpert<K>),
}

impl<K: IndexKey, A: Approximator> Expert<K, A> {
    /// Train a fresh expert on the snapshot records at `bucket` (ascending
    /// snapshot positions).
    ///
    /// The approximator learns key → snapshot position (not position within
    /// the bucket). Its error is measured in-sample on the same records; if
    /// the worst absolute residual exceeds `max_error`, every record of the
    /// bucket goes into an exact tree instead.
    pub fn train<V, B>(
        slot: usize,
        snapshot: &[Record<K, V>],
        bucket: &[usize],
        params: &NetworkParameters,
        max_error: usize,
        builder: &B,
        ctx: &mut TrainingContext<'_>,
    ) -> Result<Self, IndexError>
    where
        B: ApproximatorBuilder<Model = A>,
    {
        if bucket.is_empty() {
            warn!(slot, "empty partition, expert left invalid");
            return Ok(Expert::Invalid);
        }

        let total = snapshot.len();
        let scaler = FeatureScaler::fit(bucket.iter().map(|&i| snapshot[i].key));
        let samples: Vec<(f32, f32)> = bucket
            .iter()
            .map(|&i| (scaler.apply(snapshot[i].key.feature()), i as f32))
            .collect();

        let mut model = builder.build(params, &mut *ctx.rng);
        let loss = fit(&mut model, params, &samples, total, ctx)?;
        let stage = TrainedStage::new(model, scaler);

        let bounds = ErrorBounds::from_residuals(
            bucket
                .iter()
                .map(|&i| i as i64 - predict_position(&stage, snapshot[i].key, total)),
        );

        debug!(
            slot,
            records = bucket.len(),
            loss,
            max_abs = bounds.max_absolute_error,
            max_negative = bounds.max_negative_error,
            max_positive = bounds.max_positive_error,
            "expert trained"
        );

        if bounds.max_absolute_error > max_error as u64 {
            let tree = BTreeIndex::from_pairs(bucket.iter().map(|&i| (snapshot[i].key, i)));
            return Ok(Expert::Tree(TreeExpert {
                tree,
                rejected_bounds: bounds,
            }));
        }

        Ok(Expert::Model(ModelExpert { stage, bounds }))
    }

    pub fn mode(&self) -> ExpertMode {
        match self {
            Expert::Invalid => ExpertMode::Invalid,
            Expert::Model(_) => ExpertMode::Model,
            Expert::Tree(_) => ExpertMode::Tree,
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, Expert::Invalid)
    }
}

#[inline]
fn predict_position<K: IndexKey, A: Approximator>(
    stage: &TrainedStage<A>,
    key: K,
    total_dataset_size: usize,
) -> i64 {
    // `as` maps NaN to 0; the clamp keeps residual and window arithmetic
    // exact for diverged models
    let n = total_dataset_size as i64;
    let raw = (stage.estimate(key) as f64 * total_dataset_size as f64) as i64;
    raw.clamp(-n, 2 * n)
}
