use std::path::PathBuf;

use anyhow::Result;
use architecture_search::{
    config::{load_config, TrainingConfig},
    data::record_paths,
    search::{architecture_search, NetworkEvaluator},
};
use clap::Parser;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::info;

/// Random search over feed-forward network architectures.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Data mode: pure, flip, aug, bin, gray, green
    #[arg(short, long, default_value = "pure")]
    mode: String,

    /// Number of architectures to try
    #[arg(short, long, default_value_t = 10)]
    experiments: usize,

    /// Exclusive upper bound on the number of hidden layers
    #[arg(short, long, default_value_t = 4)]
    deepest_net_size: usize,

    /// Directory holding the record files
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Report file, overwritten on every run
    #[arg(short, long, default_value = "architecture.txt")]
    output: PathBuf,

    /// JSON file overriding the training parameters
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed for sampling and training
    #[arg(long)]
    seed: Option<u64>,

    /// Hide the per-epoch progress bars
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "architecture_search=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let base = match &cli.config {
        Some(path) => load_config(path)?,
        None => TrainingConfig::default(),
    };

    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let trial_rng = StdRng::seed_from_u64(rng.random());

    let records = record_paths(&cli.data_dir, &cli.mode);
    info!(mode = %cli.mode, experiments = cli.experiments, "starting architecture search");

    let mut evaluator = NetworkEvaluator::new(records, trial_rng, !cli.quiet);
    let report = architecture_search(
        &mut evaluator,
        &mut rng,
        &base,
        cli.experiments,
        cli.deepest_net_size,
    )?;
    report.write(&cli.output)?;

    if let Some(best) = report.best() {
        info!(
            architecture = ?best.architecture,
            valid_accuracy = best.valid_accuracy,
            report = %cli.output.display(),
            "search finished"
        );
    }
    Ok(())
}
