//! Tracing subscriber setup for binaries and benchmarks.
//!
//! The library itself only emits events; installing a subscriber is left to
//! whoever owns the process.

use anyhow::{anyhow, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(config: &LoggingConfig) -> String {
    let level = config.level.as_str();
    format!("learned_index_engine={},rmi_demo={}", level, level)
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level. Fails if a subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(config).into());

    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init(),
    };

    installed.map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}
