//! Build a recursive model index over `i → 2i`, then look keys up.
//!
//! Usage:
//!   rmi_demo --keys 10000 --stages 100 --lookup 5000 --lookup 9999
//!   rmi_demo --config index.toml --print-stats
//!   rmi_demo --print-config > index.toml

use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use learned_index_engine::config::generate_example_toml;
use learned_index_engine::telemetry::init_tracing;
use learned_index_engine::{IndexConfig, RecursiveModelIndex};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "rmi_demo")]
#[command(about = "Train a two-stage learned index and query it", long_about = None)]
struct Args {
    /// Config file (TOML/YAML/JSON); LEARNED_INDEX__* variables override it
    #[arg(long, value_name = "FILE")]
    config: Option<String>,

    /// Number of keys to insert (0..keys, value = 2 × key)
    #[arg(long, default_value_t = 10_000)]
    keys: u64,

    /// Override the number of second-stage experts
    #[arg(long)]
    stages: Option<usize>,

    /// Override training epochs for both stages
    #[arg(long)]
    epochs: Option<usize>,

    /// Keys to look up after training
    #[arg(long = "lookup", default_values_t = vec![5_000u64])]
    lookups: Vec<u64>,

    /// Print index statistics as JSON
    #[arg(long, default_value_t = false)]
    print_stats: bool,

    /// Print the default configuration as TOML and exit
    #[arg(long, default_value_t = false)]
    print_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print!("{}", generate_example_toml());
        return Ok(());
    }

    let mut config = IndexConfig::load(args.config.as_deref())?;
    if let Some(stages) = args.stages {
        config.stage_count = stages;
    }
    if let Some(epochs) = args.epochs {
        config.first_stage.max_epochs = epochs;
        config.second_stage.max_epochs = epochs;
    }
    // Every key goes through overflow; rebuild once, explicitly
    config.max_overflow_size = config.max_overflow_size.max(args.keys as usize);

    init_tracing(&config.logging)?;

    let mut index = RecursiveModelIndex::new(config)?;
    for key in 0..args.keys {
        index.insert(key, key * 2);
    }

    let started = Instant::now();
    index.train();
    info!(
        keys = args.keys,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "training finished"
    );

    for key in &args.lookups {
        match index.find(*key) {
            Some(record) => println!("{}, {}", record.key, record.value),
            None => println!("Could not find {}", key),
        }
    }

    if args.print_stats {
        println!("{}", serde_json::to_string_pretty(&index.stats())?);
    }

    Ok(())
}
