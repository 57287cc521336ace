use std::time::Instant;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressIterator, ProgressStyle};
use nalgebra::DVector;
use rand::{seq::SliceRandom, Rng};
use tracing::{debug, info};

use crate::{
    checkpoint::{Checkpoint, CheckpointManager},
    config::TrainingConfig,
    data::{DataHolder, Split},
    metrics,
    nn::Network,
};

/// Trains one network on a data holder's splits, keeping the parameters
/// that scored best on the validation split.
pub struct Trainer<'a> {
    config: &'a TrainingConfig,
    network: Network,
    data: &'a DataHolder,
    checkpoints: CheckpointManager,
}

impl<'a> Trainer<'a> {
    pub fn new(config: &'a TrainingConfig, network: Network, data: &'a DataHolder) -> Self {
        Self {
            config,
            network,
            data,
            checkpoints: CheckpointManager::new(&config.checkpoint_dir),
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Mini-batch stochastic gradient descent over the training split for
    /// the configured number of epochs. The validation split is evaluated
    /// after each epoch. The best epoch's parameters are held in memory,
    /// which costs one extra copy of the network, and written to the
    /// checkpoint directory once training ends. The network is then rolled
    /// back to them.
    pub fn fit<R: Rng>(&mut self, rng: &mut R, verbose: bool) -> Result<()> {
        let style = ProgressStyle::with_template(
            "[{elapsed:.green}] [{wide_bar:.cyan/red}] {pos:.red}/{len:.green} ({eta})",
        )?
        .progress_chars("=> ");

        let mut training_data = self.data.train.samples();
        let valid_data = self.data.valid.samples();
        let eta = self.config.learning_rate as f32;
        let mut best: Option<Checkpoint> = None;

        debug!(
            epochs = self.config.epochs,
            mini_batch = self.config.batch_size,
            examples = training_data.len(),
            "starting training"
        );

        for epoch in 0..self.config.epochs {
            training_data.shuffle(rng);
            let start = Instant::now();
            let mini_batches = training_data.chunks(self.config.batch_size);

            let bar = if verbose {
                ProgressBar::new(mini_batches.len() as u64).with_style(style.clone())
            } else {
                ProgressBar::hidden()
            };
            for mini_batch in mini_batches.progress_with(bar) {
                self.network.update_mini_batch(mini_batch, eta);
            }

            let (correct, loss) = self.network.evaluate(&valid_data);
            let accuracy = if valid_data.is_empty() {
                0.0
            } else {
                correct as f32 / valid_data.len() as f32
            };

            debug!(
                epoch,
                correct,
                total = valid_data.len(),
                loss,
                time = ?start.elapsed(),
                "epoch complete"
            );

            if best.as_ref().map_or(true, |b| accuracy > b.valid_accuracy) {
                debug!(epoch, valid_accuracy = accuracy, "new best epoch");
                best = Some(Checkpoint {
                    epoch,
                    valid_accuracy: accuracy,
                    network: self.network.clone(),
                });
            }
        }

        let checkpoint = best.context("no epoch was trained")?;
        self.checkpoints
            .save(&checkpoint)
            .context("cannot checkpoint the best network")?;
        info!(
            epoch = checkpoint.epoch,
            valid_accuracy = checkpoint.valid_accuracy,
            "restored best epoch"
        );
        self.network = checkpoint.network;
        Ok(())
    }

    pub fn predict(&self, images: &[DVector<f32>]) -> Vec<usize> {
        self.network.predict(images)
    }

    fn accuracy(&self, split: &Split) -> f32 {
        metrics::accuracy(&self.predict(&split.images), &split.labels)
    }

    pub fn valid_accuracy(&self) -> f32 {
        self.accuracy(&self.data.valid)
    }

    pub fn test_accuracy(&self) -> f32 {
        self.accuracy(&self.data.test)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        checkpoint::remove_checkpoints,
        data::{record_paths, write_records},
        example::ImageRecord,
        Activation,
    };
    use rand::{rngs::StdRng, SeedableRng};

    fn images(rng: &mut StdRng, n: usize) -> Vec<ImageRecord> {
        // label 0 images are dark, label 1 images are bright
        (0..n)
            .map(|i| {
                let label = i % 2;
                let base = if label == 0 { 0 } else { 180 };
                ImageRecord {
                    height: 2,
                    width: 2,
                    depth: 1,
                    label,
                    pixels: (0..4).map(|_| base + rng.random_range(0..60u8)).collect(),
                }
            })
            .collect()
    }

    #[test]
    fn fit_learns_and_restores_best_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let paths = record_paths(dir.path(), "pure");
        write_records(&paths[0], &images(&mut rng, 80)).unwrap();
        write_records(&paths[1], &images(&mut rng, 20)).unwrap();
        write_records(&paths[2], &images(&mut rng, 20)).unwrap();

        let config = TrainingConfig {
            num_labels: 2,
            learning_rate: 0.5,
            batch_size: 8,
            epochs: 30,
            checkpoint_dir: dir.path().join("checkpoints").display().to_string(),
            ..Default::default()
        }
        .with_architecture(vec![8], vec![Activation::Sigmoid]);
        let data = DataHolder::load(&config, &paths).unwrap();
        let network = Network::new(&[4, 8, 2], &config.activations, &mut rng).unwrap();

        let mut trainer = Trainer::new(&config, network, &data);
        trainer.fit(&mut rng, false).unwrap();

        let saved = CheckpointManager::new(&config.checkpoint_dir).load().unwrap();
        assert_eq!(&saved.network, trainer.network());
        assert_eq!(trainer.valid_accuracy(), saved.valid_accuracy);
        assert!(trainer.valid_accuracy() > 0.9);
        assert!(trainer.test_accuracy() > 0.9);

        remove_checkpoints(&config.checkpoint_dir).unwrap();
        assert!(!dir.path().join("checkpoints").exists());
    }

    #[test]
    fn unstable_training_keeps_the_best_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let paths = record_paths(dir.path(), "pure");
        write_records(&paths[0], &images(&mut rng, 40)).unwrap();
        write_records(&paths[1], &images(&mut rng, 20)).unwrap();
        write_records(&paths[2], &images(&mut rng, 20)).unwrap();

        let config = TrainingConfig {
            num_labels: 2,
            learning_rate: 5.0,
            batch_size: 4,
            epochs: 12,
            checkpoint_dir: dir.path().join("checkpoints").display().to_string(),
            ..Default::default()
        }
        .with_architecture(vec![6], vec![Activation::Sigmoid]);
        let data = DataHolder::load(&config, &paths).unwrap();
        let network = Network::new(&[4, 6, 2], &config.activations, &mut rng).unwrap();

        let mut trainer = Trainer::new(&config, network, &data);
        trainer.fit(&mut rng, false).unwrap();

        let saved = CheckpointManager::new(&config.checkpoint_dir).load().unwrap();
        assert_eq!(&saved.network, trainer.network());
        assert_eq!(trainer.valid_accuracy(), saved.valid_accuracy);
    }

    #[test]
    fn unwritable_checkpoint_dir_fails_the_fit() {
        let dir = tempfile::tempdir().unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let paths = record_paths(dir.path(), "pure");
        for path in &paths {
            write_records(path, &images(&mut rng, 8)).unwrap();
        }
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        let config = TrainingConfig {
            num_labels: 2,
            epochs: 2,
            checkpoint_dir: blocker.join("checkpoints").display().to_string(),
            ..Default::default()
        };
        let data = DataHolder::load(&config, &paths).unwrap();
        let network = Network::new(&[4, 2], &[], &mut rng).unwrap();

        let err = Trainer::new(&config, network, &data)
            .fit(&mut rng, false)
            .unwrap_err();
        assert!(format!("{err:#}").contains("cannot checkpoint"), "{err:#}");
    }
}
