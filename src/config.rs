//! Training configuration.
//!
//! Every field has a default, so a JSON file only needs the keys it wants to
//! change:
//!
//! ```json
//! { "learning_rate": 0.05, "epochs": 20 }
//! ```

use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::Activation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    /// Widths of the hidden layers, input to output.
    pub architecture: Vec<usize>,
    /// One activation per hidden layer.
    pub activations: Vec<Activation>,
    pub num_labels: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,
    pub checkpoint_dir: String,
    /// Exclusive upper bound on sampled hidden layer widths.
    pub max_layer_width: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            architecture: Vec::new(),
            activations: Vec::new(),
            num_labels: 4,
            learning_rate: 0.02,
            batch_size: 32,
            epochs: 10,
            checkpoint_dir: "checkpoints".to_string(),
            max_layer_width: 1000,
        }
    }
}

impl TrainingConfig {
    /// A copy of `self` training the given architecture.
    pub fn with_architecture(&self, architecture: Vec<usize>, activations: Vec<Activation>) -> Self {
        Self {
            architecture,
            activations,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0) {
            bail!("learning_rate must be positive, got {}", self.learning_rate);
        }
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.epochs == 0 {
            bail!("epochs must be at least 1");
        }
        if self.num_labels < 2 {
            bail!("num_labels must be at least 2, got {}", self.num_labels);
        }
        if self.max_layer_width < 2 {
            bail!("max_layer_width must be at least 2, got {}", self.max_layer_width);
        }
        if self.architecture.len() != self.activations.len() {
            bail!(
                "architecture has {} layers but {} activations were given",
                self.architecture.len(),
                self.activations.len()
            );
        }
        if self.architecture.contains(&0) {
            bail!("hidden layers must have at least one unit");
        }
        Ok(())
    }

    /// `key: value` lines describing every field, sorted by key. Lists are
    /// written the way `Debug` writes them, e.g. `architecture: [12, 7]`.
    pub fn info(&self) -> Vec<String> {
        let activations: Vec<String> = self.activations.iter().map(|a| a.to_string()).collect();
        vec![
            format!("activations: [{}]", activations.join(", ")),
            format!("architecture: {:?}", self.architecture),
            format!("batch_size: {}", self.batch_size),
            format!("checkpoint_dir: {}", self.checkpoint_dir),
            format!("epochs: {}", self.epochs),
            format!("learning_rate: {}", self.learning_rate),
            format!("max_layer_width: {}", self.max_layer_width),
            format!("num_labels: {}", self.num_labels),
        ]
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<TrainingConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("cannot read config '{}'", path.display()))?;
    let config: TrainingConfig = serde_json::from_str(&contents)
        .with_context(|| format!("invalid config '{}'", path.display()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        TrainingConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "learning_rate": 0.5, "epochs": 3 }}"#).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.learning_rate, 0.5);
        assert_eq!(config.epochs, 3);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.checkpoint_dir, "checkpoints");
    }

    #[test]
    fn rejects_bad_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "batch_size": 0 }}"#).unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("batch_size"));

        let config = TrainingConfig {
            learning_rate: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_keys_and_missing_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "learing_rate": 0.1 }}"#).unwrap();
        assert!(load_config(file.path()).is_err());

        let err = load_config("no/such/config.json").unwrap_err();
        assert!(err.to_string().contains("no/such/config.json"));
    }

    #[test]
    fn mismatched_activations_are_rejected() {
        let config = TrainingConfig::default()
            .with_architecture(vec![10, 5], vec![Activation::ReLU]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn info_lists_every_field() {
        let config = TrainingConfig::default()
            .with_architecture(vec![12, 7], vec![Activation::ReLU, Activation::Tanh]);
        let info = config.info();

        assert_eq!(
            info,
            vec![
                "activations: [relu, tanh]",
                "architecture: [12, 7]",
                "batch_size: 32",
                "checkpoint_dir: checkpoints",
                "epochs: 10",
                "learning_rate: 0.02",
                "max_layer_width: 1000",
                "num_labels: 4",
            ]
        );
    }

    #[test]
    fn info_architecture_matches_the_summary_format() {
        let config = TrainingConfig::default()
            .with_architecture(vec![300, 25], vec![Activation::Sigmoid, Activation::Identity]);
        let info = config.info();

        assert!(info.contains(&format!("architecture: {:?}", config.architecture)));
        assert!(info.contains(&"activations: [sigmoid, identity]".to_string()));
    }

    #[test]
    fn info_covers_every_serialized_key() {
        let serde_json::Value::Object(fields) =
            serde_json::to_value(TrainingConfig::default()).unwrap()
        else {
            panic!("config serializes to an object");
        };
        let keys: Vec<&str> = TrainingConfig::default()
            .info()
            .iter()
            .map(|line| line.split_once(": ").unwrap().0)
            .map(|key| fields.get_key_value(key).unwrap().0.as_str())
            .collect();

        assert_eq!(keys, fields.keys().map(String::as_str).collect::<Vec<_>>());
    }
}
