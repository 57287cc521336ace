//! Writes the best network of a training run to disk and reads it back.
//!
//! Layout:
//!
//! ```text
//! checkpoints/
//!   best.json   network parameters, epoch and validation accuracy
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::nn::Network;

const BEST: &str = "best.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: usize,
    pub valid_accuracy: f32,
    pub network: Network,
}

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Writes `checkpoint` as `best.json`, creating the directory on first
    /// use. The JSON grows with the parameter count (tens of MB for the
    /// widest sampled networks), so the trainer calls this once per fit.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("cannot create '{}'", self.dir.display()))?;

        let path = self.dir.join(BEST);
        let json = serde_json::to_string(checkpoint)?;
        fs::write(&path, json).with_context(|| format!("cannot write '{}'", path.display()))?;

        debug!(
            epoch = checkpoint.epoch,
            valid_accuracy = checkpoint.valid_accuracy,
            "saved checkpoint"
        );
        Ok(())
    }

    pub fn load(&self) -> Result<Checkpoint> {
        let path = self.dir.join(BEST);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("cannot read checkpoint '{}'", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("corrupt checkpoint '{}'", path.display()))
    }
}

/// Deletes the checkpoint directory if it exists.
pub fn remove_checkpoints(dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    if dir.exists() {
        fs::remove_dir_all(dir).with_context(|| format!("cannot remove '{}'", dir.display()))?;
        debug!(dir = %dir.display(), "removed checkpoints");
    }
    Ok(())
}
