use std::{
    fs,
    path::{Path, PathBuf},
};

use hound::{SampleFormat, WavReader};
use ndarray::Array2;
use rand::Rng;

use crate::{DataConfig, DatasetErr, MelFrontend, Result, Split};

/// Normalization divisor for 16-bit PCM.
const MAX_WAV_VALUE: f32 = 32768.0;

/// Produces (mel, audio) training pairs from a list of WAV files.
///
/// Each item access loads its clip, cuts a random `segment_length` window
/// (zero-padding clips that are shorter) and runs the mel frontend over it.
pub struct MelAudioDataset {
    files: Vec<PathBuf>,
    frontend: MelFrontend,
    segment_length: usize,
    sampling_rate: u32,
}

impl std::fmt::Debug for MelAudioDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MelAudioDataset")
            .field("files", &self.files)
            .field("segment_length", &self.segment_length)
            .field("sampling_rate", &self.sampling_rate)
            .finish_non_exhaustive()
    }
}

/// Reads one path per non-empty line.
fn read_file_list(path: &Path) -> Result<Vec<PathBuf>> {
    let text = fs::read_to_string(path).map_err(|source| DatasetErr::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let files: Vec<PathBuf> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect();

    if files.is_empty() {
        return Err(DatasetErr::EmptyFileList(path.to_path_buf()));
    }

    Ok(files)
}

/// Loads a mono 16-bit PCM WAV as normalized f32 samples.
fn load_wav(path: &Path, expected_rate: u32) -> Result<Vec<f32>> {
    let reader = WavReader::open(path).map_err(|source| DatasetErr::Wav {
        path: path.to_path_buf(),
        source,
    })?;

    let spec = reader.spec();
    if spec.sample_rate != expected_rate {
        return Err(DatasetErr::SampleRateMismatch {
            path: path.to_path_buf(),
            got: spec.sample_rate,
            expected: expected_rate,
        });
    }

    if spec.channels != 1 || spec.bits_per_sample != 16 || spec.sample_format != SampleFormat::Int
    {
        return Err(DatasetErr::UnsupportedWav {
            path: path.to_path_buf(),
            detail: format!(
                "{} channel(s), {} bits, {:?}",
                spec.channels, spec.bits_per_sample, spec.sample_format
            ),
        });
    }

    reader
        .into_samples::<i16>()
        .map(|sample| {
            sample
                .map(|s| s as f32 / MAX_WAV_VALUE)
                .map_err(|source| DatasetErr::Wav {
                    path: path.to_path_buf(),
                    source,
                })
        })
        .collect()
}

impl MelAudioDataset {
    /// Builds the dataset for one split of the data configuration.
    pub fn from_config(cfg: &DataConfig, split: Split) -> Result<Self> {
        let list = match split {
            Split::Train => &cfg.training_files,
            Split::Eval => &cfg.eval_files,
        };

        Ok(Self {
            files: read_file_list(list)?,
            frontend: MelFrontend::new(cfg)?,
            segment_length: cfg.segment_length,
            sampling_rate: cfg.sampling_rate,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn segment_length(&self) -> usize {
        self.segment_length
    }

    pub fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    /// Mel frames each item's spectrogram will have.
    pub fn mel_frames(&self) -> usize {
        self.frontend.frames_for(self.segment_length)
    }

    pub fn n_mels(&self) -> usize {
        self.frontend.n_mels()
    }

    /// Loads the item at `idx` (panics if out of bounds).
    ///
    /// # Arguments
    /// * `rng` - Source of the random segment offset.
    ///
    /// # Returns
    /// The `[n_mels, frames]` spectrogram and the `segment_length` audio
    /// window it was computed from.
    pub fn load_item(&self, idx: usize, rng: &mut impl Rng) -> Result<(Array2<f32>, Vec<f32>)> {
        let path = &self.files[idx];
        let samples = load_wav(path, self.sampling_rate)?;

        let segment = if samples.len() >= self.segment_length {
            let start = rng.random_range(0..=samples.len() - self.segment_length);
            samples[start..start + self.segment_length].to_vec()
        } else {
            log::debug!(
                "{} is shorter than a segment ({} < {}), zero-padding",
                path.display(),
                samples.len(),
                self.segment_length
            );
            let mut padded = samples;
            padded.resize(self.segment_length, 0.0);
            padded
        };

        let mel = self.frontend.mel(&segment)?;
        Ok((mel, segment))
    }
}
