//! Learned index engine: a two-stage recursive model index.
//!
//! A router model sends each key to one of `N` second-stage experts. Each
//! expert predicts the key's position in a sorted snapshot within in-sample
//! error bounds, or falls back to an exact B-tree when those bounds are too
//! wide. New records land in an overflow buffer until the next rebuild.
//!
//! ```
//! use learned_index_engine::{IndexConfig, RecursiveModelIndex};
//!
//! let mut index = RecursiveModelIndex::new(IndexConfig::for_testing(4)).unwrap();
//! for key in 0..100u64 {
//!     index.insert(key, key * 2);
//! }
//! index.train();
//! assert_eq!(index.find(42).map(|r| r.value), Some(84));
//! ```

pub mod approximator;
pub mod background;
pub mod config;
pub mod error;
pub mod expert;
pub mod hierarchy;
pub mod index;
pub mod metrics;
pub mod network;
pub mod overflow;
pub mod record;
pub mod telemetry;
pub mod training;

pub use approximator::{Approximator, ApproximatorBuilder, TrainingBatch};
pub use background::BackgroundIndex;
pub use config::{IndexConfig, NetworkParameters};
pub use error::IndexError;
pub use expert::{ErrorBounds, Expert, ExpertMode, ModelExpert, TreeExpert};
pub use hierarchy::{build_generation, route, Generation, IndexStats, RecursiveModelIndex};
pub use index::{BTreeIndex, OrderedIndex};
pub use network::{DenseNetwork, DenseNetworkBuilder};
pub use overflow::OverflowBuffer;
pub use record::{IndexKey, Record};
pub use training::{CancelFlag, TrainingContext};
