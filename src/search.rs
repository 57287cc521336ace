//! Random architecture search.
//!
//! Samples hidden layer widths and activations, trains one network per
//! sample and reports the one with the best validation accuracy.

use std::{
    cmp::Ordering,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{ensure, Context, Result};
use rand::Rng;
use tracing::{debug, info};

use crate::{
    checkpoint::remove_checkpoints,
    config::TrainingConfig,
    data::DataHolder,
    metrics::{accuracy_per_category, command_name},
    nn::Network,
    trainer::Trainer,
    Activation,
};

/// Hidden layer widths and their activations, one pair per experiment.
pub type Architectures = (Vec<Vec<usize>>, Vec<Vec<Activation>>);

/// Draws `experiments` depths uniformly from `1..deepest_net_size`, then for
/// every depth that many widths from `1..max_layer_width` and as many
/// activations.
pub fn sample_architectures<R: Rng>(
    rng: &mut R,
    experiments: usize,
    deepest_net_size: usize,
    max_layer_width: usize,
) -> Result<Architectures> {
    ensure!(experiments >= 1, "at least one experiment is needed");
    ensure!(
        deepest_net_size >= 2,
        "deepest_net_size must be at least 2, got {deepest_net_size}"
    );
    ensure!(
        max_layer_width >= 2,
        "max_layer_width must be at least 2, got {max_layer_width}"
    );

    let depths: Vec<usize> = (0..experiments)
        .map(|_| rng.random_range(1..deepest_net_size))
        .collect();

    let architectures: Vec<Vec<usize>> = depths
        .iter()
        .map(|&depth| {
            (0..depth)
                .map(|_| rng.random_range(1..max_layer_width))
                .collect()
        })
        .collect();
    let activations: Vec<Vec<Activation>> = depths
        .iter()
        .map(|&depth| {
            (0..depth)
                .map(|_| Activation::SAMPLED[rng.random_range(0..Activation::SAMPLED.len())])
                .collect()
        })
        .collect();

    Ok((architectures, activations))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub valid_accuracy: f32,
    pub per_category: Vec<f32>,
}

/// Trains and scores a single configuration.
pub trait Evaluator {
    fn evaluate(&mut self, config: &TrainingConfig) -> Result<Evaluation>;
}

/// Trains a fresh [`Network`] on the three record files for every
/// configuration and deletes its checkpoints afterwards.
pub struct NetworkEvaluator<R> {
    records: [PathBuf; 3],
    rng: R,
    verbose: bool,
}

impl<R: Rng> NetworkEvaluator<R> {
    pub fn new(records: [PathBuf; 3], rng: R, verbose: bool) -> Self {
        Self {
            records,
            rng,
            verbose,
        }
    }
}

impl<R: Rng> Evaluator for NetworkEvaluator<R> {
    fn evaluate(&mut self, config: &TrainingConfig) -> Result<Evaluation> {
        let data = DataHolder::load(config, &self.records)?;
        debug!(valid = %data.valid_record().display(), shape = ?data.shape(), "data loaded");

        let sizes: Vec<usize> = std::iter::once(data.input_size())
            .chain(config.architecture.iter().copied())
            .chain(std::iter::once(config.num_labels))
            .collect();
        let network = Network::new(&sizes, &config.activations, &mut self.rng)?;

        let mut trainer = Trainer::new(config, network, &data);
        trainer.fit(&mut self.rng, self.verbose)?;

        let valid_accuracy = trainer.valid_accuracy();
        let predictions = trainer.predict(&data.valid.images);
        let per_category = accuracy_per_category(&predictions, &data.valid.labels, config.num_labels);
        info!(valid_accuracy, test_accuracy = trainer.test_accuracy(), "trial scored");

        remove_checkpoints(&config.checkpoint_dir)?;

        Ok(Evaluation {
            valid_accuracy,
            per_category,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrialResult {
    pub valid_accuracy: f32,
    pub architecture: Vec<usize>,
    /// `key: value` lines of the configuration the trial trained with.
    pub info: Vec<String>,
    pub per_category: Vec<f32>,
}

impl TrialResult {
    /// Orders by accuracy, then architecture, then info.
    pub fn rank(&self, other: &Self) -> Ordering {
        self.valid_accuracy
            .total_cmp(&other.valid_accuracy)
            .then_with(|| self.architecture.cmp(&other.architecture))
            .then_with(|| self.info.cmp(&other.info))
    }

    /// `[w1, w2]: valid_acc = 0.812500 | up = 0.900000, left = ...`
    pub fn summary(&self) -> String {
        let categories = self
            .per_category
            .iter()
            .enumerate()
            .map(|(i, acc)| format!("{} = {acc:.6}", command_name(i)))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "{:?}: valid_acc = {:.6} | {}",
            self.architecture, self.valid_accuracy, categories
        )
    }
}

pub fn select_best(trials: &[TrialResult]) -> Option<&TrialResult> {
    trials.iter().max_by(|a, b| a.rank(b))
}

#[derive(Debug, Clone)]
pub struct SearchReport {
    pub trials: Vec<TrialResult>,
}

impl SearchReport {
    pub fn best(&self) -> Option<&TrialResult> {
        select_best(&self.trials)
    }

    /// One summary line per trial, a blank line, then a paragraph about the
    /// best trial.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for trial in &self.trials {
            out.push_str(&trial.summary());
            out.push('\n');
        }
        out.push('\n');

        if let Some(best) = self.best() {
            out.push_str(&format!(
                "In an experiment with {} architectures the best one is {:?} with valid accuracy of {:.6}.\n",
                self.trials.len(),
                best.architecture,
                best.valid_accuracy
            ));
            out.push_str("The training uses the following params:\n");
            for line in &best.info {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }

    /// Writes the report to `path`, replacing whatever was there.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.render())
            .with_context(|| format!("cannot write report '{}'", path.display()))
    }
}

/// Samples `experiments` architectures and evaluates each in turn. The
/// first failing trial aborts the search.
pub fn architecture_search<E: Evaluator, R: Rng>(
    evaluator: &mut E,
    rng: &mut R,
    base: &TrainingConfig,
    experiments: usize,
    deepest_net_size: usize,
) -> Result<SearchReport> {
    let (architectures, activations) =
        sample_architectures(rng, experiments, deepest_net_size, base.max_layer_width)?;
    let mut trials = Vec::with_capacity(experiments);

    for (i, (architecture, activations)) in architectures.into_iter().zip(activations).enumerate() {
        let config = base.with_architecture(architecture, activations);
        config.validate()?;
        info!(
            trial = i + 1,
            of = experiments,
            architecture = ?config.architecture,
            activations = ?config.activations,
            "training"
        );

        let evaluation = evaluator
            .evaluate(&config)
            .with_context(|| format!("trial {} {:?}", i + 1, config.architecture))?;

        let trial = TrialResult {
            valid_accuracy: evaluation.valid_accuracy,
            info: config.info(),
            architecture: config.architecture,
            per_category: evaluation.per_category,
        };
        info!("{}", trial.summary());
        trials.push(trial);
    }

    Ok(SearchReport { trials })
}
