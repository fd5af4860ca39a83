use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod models;
mod naive;
mod runner;
mod stats;

use models::{SimulationConfig, StrategyKind};

/// Cache race simulator CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for the CLI
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run writers, loaders and region invalidations against a strategy
    Run {
        /// Number of distinct keys
        #[arg(long, default_value = "16")]
        keys: u64,

        /// Number of writer threads
        #[arg(long, default_value = "4")]
        writers: usize,

        /// Number of loader threads
        #[arg(long, default_value = "8")]
        loaders: usize,

        /// Operations per thread
        #[arg(long, default_value = "2000")]
        ops: usize,

        /// Each writer invalidates the region after every N commits (0 = never)
        #[arg(long, default_value = "50")]
        evict_all_every: usize,

        /// Maximum delay a loader sleeps between reading a row and caching it,
        /// in microseconds
        #[arg(long, default_value = "200")]
        max_load_delay_us: u64,

        /// Seed for the workload's random generators
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Strategies to run (read-write, naive). Defaults to both.
        #[arg(long, value_name = "STRATEGIES", num_args = 1.., value_delimiter = ',')]
        strategy: Option<Vec<String>>,

        /// Export results to CSV file
        #[arg(long, value_name = "PATH")]
        output_csv: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Run {
            keys,
            writers,
            loaders,
            ops,
            evict_all_every,
            max_load_delay_us,
            seed,
            strategy,
            output_csv,
        } => {
            let config = SimulationConfig {
                keys,
                writers,
                loaders,
                ops,
                evict_all_every,
                max_load_delay: Duration::from_micros(max_load_delay_us),
                seed,
                strategies: parse_strategies(strategy.as_deref()),
            };
            run_simulation(config, output_csv)
        }
    }
}

/// Parse the strategy names, falling back to every strategy
fn parse_strategies(names: Option<&[String]>) -> Vec<StrategyKind> {
    let mut selected = Vec::new();
    for name in names.unwrap_or_default() {
        match StrategyKind::parse(name) {
            Some(kind) if !selected.contains(&kind) => selected.push(kind),
            Some(_) => {}
            None => println!("Warning: Unknown strategy '{name}', skipping"),
        }
    }
    if selected.is_empty() {
        StrategyKind::all()
    } else {
        selected
    }
}

fn run_simulation(
    config: SimulationConfig,
    output_csv: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Cache Race Simulation");
    println!("=====================");
    println!("Keys: {}", config.keys);
    println!(
        "Writers: {}  Loaders: {}  Ops/thread: {}",
        config.writers, config.loaders, config.ops
    );
    if config.evict_all_every > 0 {
        println!("evict_all every {} commits per writer", config.evict_all_every);
    } else {
        println!("evict_all disabled");
    }
    println!("Max load delay: {:?}", config.max_load_delay);
    println!("Seed: {}", config.seed);
    println!(
        "Strategies: {:?}",
        config
            .strategies
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
    );
    println!();

    let runner = runner::SimulationRunner::new(config.clone());
    let result = runner.run()?;

    println!("Simulation completed in {:.2?}\n", result.duration);
    stats::print_results(&result);
    stats::print_metrics(&result);

    if let Some(path) = output_csv {
        stats::export_csv(&path, &config, &result)?;
        println!("\nResults exported to {}", path.display());
    }

    Ok(())
}
