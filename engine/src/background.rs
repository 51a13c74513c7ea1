// Background rebuild: the recursive model index with rebuilds moved off the
// caller's thread.
//
// When the overflow buffer crosses its threshold, its contents are frozen into
// a pending set and the next generation is built on a tokio blocking task.
// Lookups keep serving live overflow → pending → current generation until the
// task swaps the new generation in under the write lock. A cancelled rebuild
// hands its pending records back to the overflow buffer.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::approximator::ApproximatorBuilder;
use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::hierarchy::{build_generation, record_rebuild, rng_from_config, Generation, IndexStats};
use crate::metrics;
use crate::network::DenseNetworkBuilder;
use crate::overflow::OverflowBuffer;
use crate::record::{IndexKey, Record};
use crate::training::{CancelFlag, TrainingContext};

/// Outcome of a rebuild; `None` while it runs.
type Outcome = Option<Result<(), IndexError>>;

/// The most recently started rebuild. Stays in `State` after it finishes so
/// late waiters still see how it ended.
struct InFlight {
    cancel: CancelFlag,
    outcome: watch::Receiver<Outcome>,
    handle: JoinHandle<()>,
}

struct State<K, V, A> {
    current: Arc<Generation<K, V, A>>,
    overflow: OverflowBuffer<K, V>,
    /// Records frozen for the in-flight rebuild, oldest first
    pending: Arc<Vec<Record<K, V>>>,
    rebuild: Option<InFlight>,
}

struct Shared<K, V, B: ApproximatorBuilder> {
    config: IndexConfig,
    builder: B,
    rng: Mutex<StdRng>,
    state: RwLock<State<K, V, B::Model>>,
}

/// Shareable recursive model index whose rebuilds run on tokio's blocking
/// pool. Cloning yields another handle to the same index.
pub struct BackgroundIndex<K, V, B: ApproximatorBuilder = DenseNetworkBuilder> {
    shared: Arc<Shared<K, V, B>>,
    runtime: Handle,
}

impl<K, V, B: ApproximatorBuilder> Clone for BackgroundIndex<K, V, B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            runtime: self.runtime.clone(),
        }
    }
}

impl<K, V> BackgroundIndex<K, V, DenseNetworkBuilder>
where
    K: IndexKey,
    V: Clone + Send + Sync + 'static,
{
    /// Must be called from within a tokio runtime.
    pub fn new(config: IndexConfig) -> Result<Self> {
        Self::with_builder(config, DenseNetworkBuilder)
    }
}

impl<K, V, B> BackgroundIndex<K, V, B>
where
    K: IndexKey,
    V: Clone + Send + Sync + 'static,
    B: ApproximatorBuilder,
{
    pub fn with_builder(config: IndexConfig, builder: B) -> Result<Self> {
        config.validate()?;
        let runtime =
            Handle::try_current().context("BackgroundIndex must be created inside a tokio runtime")?;

        let state = State {
            current: Arc::new(Generation::empty(config.stage_count)),
            overflow: OverflowBuffer::new(config.max_overflow_size),
            pending: Arc::new(Vec::new()),
            rebuild: None,
        };

        Ok(Self {
            shared: Arc::new(Shared {
                rng: Mutex::new(rng_from_config(&config)),
                state: RwLock::new(state),
                builder,
                config,
            }),
            runtime,
        })
    }

    /// Append a record; starts a background rebuild if the overflow buffer is
    /// now over its threshold and none is running.
    pub fn insert(&self, key: K, value: V) {
        let mut state = self.shared.state.write();
        state.overflow.push(key, value);
        if state.overflow.exceeds_capacity() && !is_running(&*state) {
            self.start_rebuild(&mut state);
        }
    }

    /// Live overflow, then records frozen for an in-flight rebuild, then the
    /// current generation.
    pub fn find(&self, key: K) -> Option<Record<K, V>> {
        metrics::LOOKUPS_TOTAL.inc();
        let state = self.shared.state.read();

        let frozen = || state.pending.iter().rev().find(|r| r.key == key);
        if let Some(record) = state.overflow.get(key).or_else(frozen) {
            metrics::OVERFLOW_HITS_TOTAL.inc();
            return Some(record.clone());
        }

        let found = state.current.find(key).cloned();
        if found.is_none() {
            metrics::LOOKUP_MISSES_TOTAL.inc();
        }
        found
    }

    /// Start a rebuild now unless one is already running. Returns whether a
    /// new rebuild was started.
    pub fn trigger_rebuild(&self) -> bool {
        let mut state = self.shared.state.write();
        if is_running(&*state) {
            return false;
        }
        self.start_rebuild(&mut state);
        true
    }

    /// Ask the in-flight rebuild, if any, to stop at its next check.
    pub fn cancel_rebuild(&self) {
        if let Some(job) = &self.shared.state.read().rebuild {
            job.cancel.cancel();
        }
    }

    /// Wait for the most recently started rebuild to finish and report how it
    /// ended. Returns `Ok(())` immediately when nothing was started. Any number
    /// of callers may wait on the same rebuild.
    pub async fn wait_for_rebuild(&self) -> Result<(), IndexError> {
        let outcome = self
            .shared
            .state
            .read()
            .rebuild
            .as_ref()
            .map(|job| job.outcome.clone());
        let Some(mut outcome) = outcome else {
            return Ok(());
        };

        let finished = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| IndexError::RebuildFailed("rebuild task exited without an outcome".into()))?;
        (*finished).clone().unwrap_or(Ok(()))
    }

    /// Rebuild over everything inserted so far and wait for the swap.
    pub async fn train(&self) -> Result<(), IndexError> {
        // A rebuild already in flight only covers what was frozen at its start
        if self.is_rebuilding() {
            self.wait_for_rebuild().await?;
        }
        self.trigger_rebuild();
        self.wait_for_rebuild().await
    }

    pub fn is_rebuilding(&self) -> bool {
        is_running(&*self.shared.state.read())
    }

    pub fn generation(&self) -> u64 {
        self.shared.state.read().current.id()
    }

    pub fn current_generation(&self) -> Arc<Generation<K, V, B::Model>> {
        Arc::clone(&self.shared.state.read().current)
    }

    pub fn snapshot_len(&self) -> usize {
        self.shared.state.read().current.snapshot().len()
    }

    pub fn overflow_len(&self) -> usize {
        self.shared.state.read().overflow.len()
    }

    /// Records frozen for the in-flight rebuild.
    pub fn pending_len(&self) -> usize {
        self.shared.state.read().pending.len()
    }

    pub fn stats(&self) -> IndexStats {
        let state = self.shared.state.read();
        IndexStats {
            overflow_len: state.overflow.len() + state.pending.len(),
            ..state.current.stats()
        }
    }

    fn start_rebuild(&self, state: &mut State<K, V, B::Model>) {
        // Left behind only by a rebuild task that panicked
        if !state.pending.is_empty() {
            let orphaned = state.pending.as_ref().clone();
            state.overflow.restore(orphaned);
        }

        let frozen = Arc::new(state.overflow.drain_all());
        state.pending = Arc::clone(&frozen);

        let cancel = CancelFlag::new();
        let (report, outcome) = watch::channel(None);
        let previous = Arc::clone(&state.current);
        let shared = Arc::clone(&self.shared);
        let flag = cancel.clone();
        debug!(
            generation = previous.id(),
            frozen = frozen.len(),
            "starting background rebuild"
        );

        let handle = self
            .runtime
            .spawn_blocking(move || shared.run_rebuild(previous, frozen, flag, report));
        state.rebuild = Some(InFlight {
            cancel,
            outcome,
            handle,
        });
    }
}

impl<K, V, B> Shared<K, V, B>
where
    K: IndexKey,
    V: Clone + Send + Sync + 'static,
    B: ApproximatorBuilder,
{
    fn run_rebuild(
        &self,
        previous: Arc<Generation<K, V, B::Model>>,
        frozen: Arc<Vec<Record<K, V>>>,
        cancel: CancelFlag,
        report: watch::Sender<Outcome>,
    ) {
        let started = Instant::now();
        let result = {
            let mut rng = self.rng.lock();
            let mut ctx = TrainingContext::new(&mut *rng)
                .with_cancel(&cancel, self.config.rebuild.cancel_check_interval);
            build_generation(
                previous.id() + 1,
                previous.snapshot(),
                &frozen,
                &self.config,
                &self.builder,
                &mut ctx,
            )
        };

        let mut state = self.state.write();
        if Arc::ptr_eq(&state.pending, &frozen) {
            state.pending = Arc::new(Vec::new());
        }
        let outcome = match result {
            Ok(generation) => {
                record_rebuild(&generation, started.elapsed());
                state.current = Arc::new(generation);
                Ok(())
            }
            Err(error) => {
                let records = Arc::try_unwrap(frozen).unwrap_or_else(|shared| shared.as_ref().clone());
                warn!(%error, returned = records.len(), "rebuild abandoned, records returned to overflow");
                state.overflow.restore(records);
                metrics::REBUILDS_CANCELLED_TOTAL.inc();
                Err(error)
            }
        };
        // Published under the state lock: once the swap is visible, so is the
        // outcome
        report.send_replace(Some(outcome));
    }
}

fn is_running<K, V, A>(state: &State<K, V, A>) -> bool {
    state
        .rebuild
        .as_ref()
        .map_or(false, |job| job.outcome.borrow().is_none() && !job.handle.is_finished())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_runtime() {
        let result: Result<BackgroundIndex<u64, u64>> =
            BackgroundIndex::new(IndexConfig::for_testing(4));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_train_swaps_generation() {
        let index = BackgroundIndex::new(IndexConfig::for_testing(4)).unwrap();
        for key in 0..200u64 {
            index.insert(key, key * 2);
        }
        assert_eq!(index.generation(), 0);

        index.train().await.unwrap();
        assert_eq!(index.generation(), 1);
        assert_eq!(index.snapshot_len(), 200);
        assert_eq!(index.overflow_len(), 0);
        assert_eq!(index.pending_len(), 0);
        for key in 0..200u64 {
            assert_eq!(index.find(key).map(|r| r.value), Some(key * 2));
        }
    }

    #[tokio::test]
    async fn test_wait_without_rebuild_is_ok() {
        let index: BackgroundIndex<u32, u32> =
            BackgroundIndex::new(IndexConfig::for_testing(2)).unwrap();
        assert!(index.wait_for_rebuild().await.is_ok());
        assert!(!index.is_rebuilding());
    }
}
