use std::{fs, path::Path, path::PathBuf};

use serde::Deserialize;

use dataset::DataConfig;
use dist::DistConfig;
use glow::GlowConfig;

use crate::TrainerError;

/// The whole run configuration, loaded once at start-up and threaded
/// explicitly through the training loop.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub train_config: TrainConfig,
    pub data_config: DataConfig,
    pub dist_config: DistConfig,
    pub waveglow_config: GlowConfig,
}

/// The `train_config` group.
#[derive(Debug, Clone, Deserialize)]
pub struct TrainConfig {
    pub output_directory: PathBuf,
    pub epochs: usize,
    pub learning_rate: f32,
    pub sigma: f32,
    pub iters_per_checkpoint: u64,
    pub batch_size: usize,
    pub seed: u64,
    #[serde(default)]
    pub fp16_run: bool,
    /// Resume point; an empty string starts fresh.
    #[serde(default)]
    pub checkpoint_path: String,
    #[serde(default = "default_with_logging")]
    pub with_logging: bool,
    /// Accepted for interface compatibility; this loader is synchronous.
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
}

fn default_with_logging() -> bool {
    true
}

fn default_num_workers() -> usize {
    2
}

impl Config {
    /// Reads and parses the JSON run configuration.
    pub fn from_file(path: &Path) -> Result<Self, TrainerError> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|source| TrainerError::Config {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let text = r#"{
            "train_config": {
                "output_directory": "/tmp/out",
                "epochs": 2,
                "learning_rate": 1e-4,
                "sigma": 1.0,
                "iters_per_checkpoint": 1000,
                "batch_size": 4,
                "seed": 1234
            },
            "data_config": {
                "training_files": "train.txt",
                "eval_files": "eval.txt"
            },
            "dist_config": { "url": "127.0.0.1:40000" },
            "waveglow_config": {}
        }"#;

        let config: Config = serde_json::from_str(text).unwrap();
        assert_eq!(config.train_config.epochs, 2);
        assert!(!config.train_config.fp16_run);
        assert!(config.train_config.checkpoint_path.is_empty());
        assert_eq!(config.train_config.num_workers, 2);
        assert_eq!(config.dist_config.world_size, 1);
        assert_eq!(config.waveglow_config.n_group, 8);
        assert_eq!(config.data_config.segment_length, 16000);
    }
}
