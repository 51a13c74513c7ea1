//! The two-stage recursive model index.
//!
//! A router approximator maps a key to a normalized position and thereby picks
//! one of `N` second-stage experts; the expert either predicts the key's
//! snapshot position within trained error bounds or answers from an exact
//! tree. Records inserted since the last rebuild live in an overflow buffer
//! that every lookup checks first.
//!
//! Each rebuild produces a fresh immutable [`Generation`]. The index holds the
//! current one behind an `Arc` and replaces it in a single assignment, so a
//! lookup always sees one complete generation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::approximator::{Approximator, ApproximatorBuilder};
use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::expert::{Expert, ExpertMode};
use crate::metrics;
use crate::network::DenseNetworkBuilder;
use crate::overflow::OverflowBuffer;
use crate::record::{merge_sorted, IndexKey, Record};
use crate::training::{fit, FeatureScaler, TrainedStage, TrainingContext};

/// Map a router estimate onto an expert slot in `[0, stage_count)`.
///
/// `floor(estimate × stage_count)`, saturating: negative and NaN estimates go
/// to the first expert, estimates at or above 1.0 (and +inf) to the last.
/// `stage_count` must be non-zero.
#[inline]
pub fn route(estimate: f32, stage_count: usize) -> usize {
    let scaled = (estimate as f64 * stage_count as f64).floor();
    (scaled as usize).min(stage_count - 1)
}

/// Summary of an index and its current generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexStats {
    pub generation: u64,
    pub snapshot_len: usize,
    pub overflow_len: usize,
    pub stage_count: usize,
    pub model_experts: usize,
    pub tree_experts: usize,
    pub invalid_experts: usize,
    /// Largest `max_absolute_error` among model experts
    pub max_error_bound: u64,
    /// Mean search window over model experts, in snapshot slots
    pub mean_window: f64,
}

/// One immutable build of the hierarchy: sorted snapshot, router and experts.
pub struct Generation<K, V, A> {
    id: u64,
    snapshot: Vec<Record<K, V>>,
    /// `None` until the first rebuild over a non-empty snapshot
    router: Option<TrainedStage<A>>,
    experts: Vec<Expert<K, A>>,
}

impl<K: IndexKey, V, A: Approximator> Generation<K, V, A> {
    /// Generation zero: no snapshot and every expert invalid.
    pub fn empty(stage_count: usize) -> Self {
        Self {
            id: 0,
            snapshot: Vec::new(),
            router: None,
            experts: (0..stage_count).map(|_| Expert::Invalid).collect(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn snapshot(&self) -> &[Record<K, V>] {
        &self.snapshot
    }

    pub fn experts(&self) -> &[Expert<K, A>] {
        &self.experts
    }

    pub fn expert(&self, slot: usize) -> Option<&Expert<K, A>> {
        self.experts.get(slot)
    }

    /// Expert slot the router assigns to `key`, or `None` before the first
    /// non-empty rebuild.
    pub fn stage_for(&self, key: K) -> Option<usize> {
        self.router
            .as_ref()
            .map(|router| route(router.estimate(key), self.experts.len()))
    }

    /// Look `key` up in the snapshot through router and expert.
    ///
    /// Before the first non-empty rebuild every expert is invalid, so every
    /// lookup here is a routing error.
    pub fn find(&self, key: K) -> Option<&Record<K, V>> {
        let Some(slot) = self.stage_for(key) else {
            warn!(
                generation = self.id,
                key = ?key,
                "routing error: no trained router, every expert is invalid"
            );
            metrics::ROUTING_ERRORS_TOTAL.inc();
            return None;
        };

        match &self.experts[slot] {
            Expert::Invalid => {
                warn!(
                    generation = self.id,
                    slot,
                    key = ?key,
                    "routing error: key routed to an untrained expert"
                );
                metrics::ROUTING_ERRORS_TOTAL.inc();
                None
            }
            Expert::Tree(tree) => {
                let (_, position) = tree.tree_find(key)?;
                metrics::TREE_READS_TOTAL.inc();
                self.snapshot.get(position)
            }
            Expert::Model(model) => {
                let last_index = self.snapshot.len() - 1;
                let predicted = model.predict(key, self.snapshot.len());
                let (lo, hi) = model.bounds().window(predicted, last_index)?;
                metrics::PROBE_LEN.observe((hi - lo + 1) as f64);

                let found = self.snapshot[lo..=hi].iter().find(|r| r.key == key);
                if found.is_some() {
                    metrics::MODEL_READS_TOTAL.inc();
                }
                found
            }
        }
    }

    /// Expert counts by mode: (model, tree, invalid).
    pub fn mode_counts(&self) -> (usize, usize, usize) {
        self.experts
            .iter()
            .fold((0, 0, 0), |(m, t, i), expert| match expert.mode() {
                ExpertMode::Model => (m + 1, t, i),
                ExpertMode::Tree => (m, t + 1, i),
                ExpertMode::Invalid => (m, t, i + 1),
            })
    }

    pub fn stats(&self) -> IndexStats {
        let (model_experts, tree_experts, invalid_experts) = self.mode_counts();

        let mut max_error_bound = 0;
        let mut window_total = 0u64;
        for expert in &self.experts {
            if let Expert::Model(model) = expert {
                max_error_bound = max_error_bound.max(model.bounds().max_absolute_error);
                window_total += model.bounds().window_len();
            }
        }
        let mean_window = if model_experts > 0 {
            window_total as f64 / model_experts as f64
        } else {
            0.0
        };

        IndexStats {
            generation: self.id,
            snapshot_len: self.snapshot.len(),
            overflow_len: 0,
            stage_count: self.experts.len(),
            model_experts,
            tree_experts,
            invalid_experts,
            max_error_bound,
            mean_window,
        }
    }
}

/// Build the generation that follows one holding `previous`, folding in
/// `incoming` overflow records.
///
/// Steps: merge and sort, train the router on the whole snapshot, partition by
/// the freshly trained router with [`route`], then train one expert per
/// partition. Fails only when `ctx` carries a cancellation flag that gets set.
pub fn build_generation<K, V, B>(
    id: u64,
    previous: &[Record<K, V>],
    incoming: &[Record<K, V>],
    config: &IndexConfig,
    builder: &B,
    ctx: &mut TrainingContext<'_>,
) -> Result<Generation<K, V, B::Model>, IndexError>
where
    K: IndexKey,
    V: Clone,
    B: ApproximatorBuilder,
{
    let stage_count = config.stage_count;
    let snapshot = merge_sorted(previous, incoming);
    if snapshot.is_empty() {
        return Ok(Generation {
            id,
            ..Generation::empty(stage_count)
        });
    }

    let total = snapshot.len();
    let scaler = FeatureScaler::fit(snapshot.iter().map(|r| r.key));
    let samples: Vec<(f32, f32)> = snapshot
        .iter()
        .enumerate()
        .map(|(i, r)| (scaler.apply(r.key.feature()), i as f32))
        .collect();

    let mut model = builder.build(&config.first_stage, &mut *ctx.rng);
    let router_loss = fit(&mut model, &config.first_stage, &samples, total, ctx)?;
    let router = TrainedStage::new(model, scaler);

    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); stage_count];
    for (position, record) in snapshot.iter().enumerate() {
        buckets[route(router.estimate(record.key), stage_count)].push(position);
    }

    let mut experts = Vec::with_capacity(stage_count);
    for (slot, bucket) in buckets.iter().enumerate() {
        experts.push(Expert::train(
            slot,
            &snapshot,
            bucket,
            &config.second_stage,
            config.max_second_stage_error,
            builder,
            ctx,
        )?);
    }

    debug!(generation = id, records = total, router_loss, "router trained");

    Ok(Generation {
        id,
        snapshot,
        router: Some(router),
        experts,
    })
}

/// Log and export a freshly installed generation.
pub(crate) fn record_rebuild<K, V, A>(generation: &Generation<K, V, A>, elapsed: Duration)
where
    K: IndexKey,
    A: Approximator,
{
    let stats = generation.stats();
    metrics::REBUILDS_TOTAL.inc();
    metrics::REBUILD_DURATION_SECONDS.observe(elapsed.as_secs_f64());
    metrics::EXPERTS_MODEL.set(stats.model_experts as f64);
    metrics::EXPERTS_TREE.set(stats.tree_experts as f64);
    metrics::EXPERTS_INVALID.set(stats.invalid_experts as f64);
    metrics::EXPERT_ERROR_MAX.set(stats.max_error_bound as f64);

    info!(
        generation = stats.generation,
        records = stats.snapshot_len,
        model = stats.model_experts,
        tree = stats.tree_experts,
        invalid = stats.invalid_experts,
        max_error = stats.max_error_bound,
        elapsed_ms = elapsed.as_millis() as u64,
        "index rebuilt"
    );
}

pub(crate) fn rng_from_config(config: &IndexConfig) -> StdRng {
    match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Single-owner recursive model index.
///
/// `insert` and `train` take `&mut self`; an insert that pushes the overflow
/// buffer past its threshold rebuilds synchronously before returning. See
/// [`crate::background::BackgroundIndex`] for a rebuild that runs off the
/// caller's thread.
pub struct RecursiveModelIndex<K, V, B: ApproximatorBuilder = DenseNetworkBuilder> {
    config: IndexConfig,
    builder: B,
    rng: StdRng,
    current: Arc<Generation<K, V, B::Model>>,
    overflow: OverflowBuffer<K, V>,
}

impl<K: IndexKey, V: Clone> RecursiveModelIndex<K, V, DenseNetworkBuilder> {
    /// Index backed by the default dense network approximator.
    pub fn new(config: IndexConfig) -> anyhow::Result<Self> {
        Self::with_builder(config, DenseNetworkBuilder)
    }
}

impl<K: IndexKey, V: Clone, B: ApproximatorBuilder> RecursiveModelIndex<K, V, B> {
    pub fn with_builder(config: IndexConfig, builder: B) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            rng: rng_from_config(&config),
            current: Arc::new(Generation::empty(config.stage_count)),
            overflow: OverflowBuffer::new(config.max_overflow_size),
            builder,
            config,
        })
    }

    /// Append a record; rebuilds first if the overflow buffer is now over its
    /// threshold.
    pub fn insert(&mut self, key: K, value: V) {
        self.overflow.push(key, value);
        if self.overflow.exceeds_capacity() {
            self.train();
        }
    }

    /// Overflow buffer first (newest wins), then router → expert → snapshot.
    pub fn find(&self, key: K) -> Option<&Record<K, V>> {
        metrics::LOOKUPS_TOTAL.inc();

        if let Some(record) = self.overflow.get(key) {
            metrics::OVERFLOW_HITS_TOTAL.inc();
            return Some(record);
        }

        let found = self.current.find(key);
        if found.is_none() {
            metrics::LOOKUP_MISSES_TOTAL.inc();
        }
        found
    }

    /// Rebuild the hierarchy over snapshot plus overflow and clear the
    /// overflow buffer.
    pub fn train(&mut self) {
        let started = Instant::now();
        let next_id = self.current.id() + 1;
        let mut ctx = TrainingContext::new(&mut self.rng);

        match build_generation(
            next_id,
            self.current.snapshot(),
            self.overflow.records(),
            &self.config,
            &self.builder,
            &mut ctx,
        ) {
            Ok(generation) => {
                record_rebuild(&generation, started.elapsed());
                self.current = Arc::new(generation);
                self.overflow.clear();
            }
            Err(error) => {
                warn!(%error, "rebuild failed, keeping previous generation");
            }
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Id of the current generation; 0 before the first rebuild.
    pub fn generation(&self) -> u64 {
        self.current.id()
    }

    pub fn current_generation(&self) -> Arc<Generation<K, V, B::Model>> {
        Arc::clone(&self.current)
    }

    pub fn expert(&self, slot: usize) -> Option<&Expert<K, B::Model>> {
        self.current.expert(slot)
    }

    pub fn snapshot_len(&self) -> usize {
        self.current.snapshot().len()
    }

    pub fn overflow_len(&self) -> usize {
        self.overflow.len()
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            overflow_len: self.overflow.len(),
            ..self.current.stats()
        }
    }
}
