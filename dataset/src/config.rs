use std::path::PathBuf;

use serde::Deserialize;

/// Which file list a dataset is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Eval,
}

/// The `data_config` group of the run configuration.
///
/// The train and eval file lists are two explicit values; the dataset for
/// each split is built from its own list.
#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// File with one training WAV path per line.
    pub training_files: PathBuf,
    /// File with one evaluation WAV path per line.
    pub eval_files: PathBuf,
    /// Audio samples per training segment.
    #[serde(default = "default_segment_length")]
    pub segment_length: usize,
    /// Expected sample rate of every clip.
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: u32,
    /// FFT size of the mel analysis.
    #[serde(default = "default_filter_length")]
    pub filter_length: usize,
    /// Hop between analysis frames, in samples.
    #[serde(default = "default_hop_length")]
    pub hop_length: usize,
    /// Analysis window length, in samples.
    #[serde(default = "default_win_length")]
    pub win_length: usize,
    /// Mel filterbank rows.
    #[serde(default = "default_n_mel_channels")]
    pub n_mel_channels: usize,
    /// Lowest filterbank frequency, Hz.
    #[serde(default)]
    pub mel_fmin: f32,
    /// Highest filterbank frequency, Hz.
    #[serde(default = "default_mel_fmax")]
    pub mel_fmax: f32,
}

fn default_segment_length() -> usize {
    16000
}

fn default_sampling_rate() -> u32 {
    22050
}

fn default_filter_length() -> usize {
    1024
}

fn default_hop_length() -> usize {
    256
}

fn default_win_length() -> usize {
    1024
}

fn default_n_mel_channels() -> usize {
    80
}

fn default_mel_fmax() -> f32 {
    8000.0
}
