use serde::Deserialize;

use crate::{GlowErr, Result};

/// Architecture hyperparameters for the flow vocoder.
///
/// Deserialized from the `waveglow_config` group of the run configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GlowConfig {
    /// Mel channels of the conditioning spectrogram.
    #[serde(default = "default_n_mel_channels")]
    pub n_mel_channels: usize,
    /// Number of coupling steps in the flow.
    #[serde(default = "default_n_flows")]
    pub n_flows: usize,
    /// Audio samples folded into one multi-channel frame. Must be even.
    #[serde(default = "default_n_group")]
    pub n_group: usize,
    /// Hidden width of each coupling network.
    #[serde(default = "default_n_channels")]
    pub n_channels: usize,
}

fn default_n_mel_channels() -> usize {
    80
}

fn default_n_flows() -> usize {
    6
}

fn default_n_group() -> usize {
    8
}

fn default_n_channels() -> usize {
    128
}

impl GlowConfig {
    /// Checks the configuration invariants the architecture relies on.
    pub fn validate(&self) -> Result<()> {
        if self.n_group == 0 || self.n_group % 2 != 0 {
            return Err(GlowErr::InvalidConfig(format!(
                "n_group must be a positive even number, got {}",
                self.n_group
            )));
        }

        if self.n_flows == 0 {
            return Err(GlowErr::InvalidConfig("n_flows must be at least 1".into()));
        }

        if self.n_mel_channels == 0 || self.n_channels == 0 {
            return Err(GlowErr::InvalidConfig(
                "n_mel_channels and n_channels must be non-zero".into(),
            ));
        }

        Ok(())
    }
}

impl Default for GlowConfig {
    fn default() -> Self {
        Self {
            n_mel_channels: default_n_mel_channels(),
            n_flows: default_n_flows(),
            n_group: default_n_group(),
            n_channels: default_n_channels(),
        }
    }
}
