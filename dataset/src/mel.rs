use std::sync::Arc;

use ndarray::{Array1, Array2};
use rustfft::{Fft, FftPlanner, num_complex::Complex};

use crate::{DataConfig, DatasetErr, Result};

/// Mel-spectrogram frontend with a cached FFT plan.
///
/// Precomputes the FFT, the Hann window and the mel filterbank once; `mel`
/// then turns raw audio into a log-compressed `[n_mels, frames]` matrix.
pub struct MelFrontend {
    fft: Arc<dyn Fft<f32>>,
    /// Hann window of `win_length` samples, centered in `filter_length`.
    window: Vec<f32>,
    /// Mel filterbank, `[n_mels, filter_length / 2 + 1]`.
    filters: Array2<f32>,
    filter_length: usize,
    hop_length: usize,
    n_mels: usize,
}

/// Floor applied before the log, matching the usual dynamic range compression.
const LOG_FLOOR: f32 = 1e-5;

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Builds an HTK-style triangular mel filterbank.
fn mel_filterbank(
    sample_rate: u32,
    filter_length: usize,
    n_mels: usize,
    fmin: f32,
    fmax: f32,
) -> Array2<f32> {
    let n_bins = filter_length / 2 + 1;
    let bin_hz = sample_rate as f32 / filter_length as f32;

    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);
    let points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
        .collect();

    let mut filters = Array2::zeros((n_mels, n_bins));
    for m in 0..n_mels {
        let (left, center, right) = (points[m], points[m + 1], points[m + 2]);

        for bin in 0..n_bins {
            let freq = bin as f32 * bin_hz;
            let weight = if freq <= left || freq >= right {
                0.0
            } else if freq <= center {
                (freq - left) / (center - left)
            } else {
                (right - freq) / (right - center)
            };

            filters[[m, bin]] = weight.max(0.0);
        }
    }

    filters
}

impl MelFrontend {
    /// Creates a new `MelFrontend` from the data configuration.
    pub fn new(cfg: &DataConfig) -> Result<Self> {
        if cfg.filter_length == 0 || cfg.filter_length % 2 != 0 {
            return Err(DatasetErr::InvalidStft(format!(
                "filter_length must be a positive even number, got {}",
                cfg.filter_length
            )));
        }

        if cfg.hop_length == 0 {
            return Err(DatasetErr::InvalidStft("hop_length must be non-zero".into()));
        }

        if cfg.win_length == 0 || cfg.win_length > cfg.filter_length {
            return Err(DatasetErr::InvalidStft(format!(
                "win_length must be in 1..=filter_length, got {}",
                cfg.win_length
            )));
        }

        if cfg.n_mel_channels == 0 || !(cfg.mel_fmin < cfg.mel_fmax) {
            return Err(DatasetErr::InvalidStft(
                "need n_mel_channels > 0 and mel_fmin < mel_fmax".into(),
            ));
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(cfg.filter_length);

        // Hann window of win_length samples, centered in the FFT frame.
        let mut window = vec![0.0; cfg.filter_length];
        let offset = (cfg.filter_length - cfg.win_length) / 2;
        for i in 0..cfg.win_length {
            let phase = 2.0 * std::f32::consts::PI * i as f32 / (cfg.win_length - 1).max(1) as f32;
            window[offset + i] = 0.5 * (1.0 - phase.cos());
        }

        let filters = mel_filterbank(
            cfg.sampling_rate,
            cfg.filter_length,
            cfg.n_mel_channels,
            cfg.mel_fmin,
            cfg.mel_fmax,
        );

        Ok(Self {
            fft,
            window,
            filters,
            filter_length: cfg.filter_length,
            hop_length: cfg.hop_length,
            n_mels: cfg.n_mel_channels,
        })
    }

    pub fn n_mels(&self) -> usize {
        self.n_mels
    }

    /// Frames produced for a clip of `n_samples` samples.
    pub fn frames_for(&self, n_samples: usize) -> usize {
        1 + n_samples / self.hop_length
    }

    /// Computes the log-compressed mel spectrogram, `[n_mels, frames]`.
    ///
    /// The signal is reflect-padded by half a frame on each side so frames
    /// stay centered on their hop positions.
    pub fn mel(&self, audio: &[f32]) -> Result<Array2<f32>> {
        let pad = self.filter_length / 2;

        if audio.len() <= pad {
            return Err(DatasetErr::ClipTooShort {
                samples: audio.len(),
                needed: pad + 1,
            });
        }

        let mut padded = Vec::with_capacity(audio.len() + 2 * pad);
        padded.extend((0..pad).map(|i| audio[pad - i]));
        padded.extend_from_slice(audio);
        padded.extend((0..pad).map(|j| audio[audio.len() - 2 - j]));

        let frames = self.frames_for(audio.len());
        let n_bins = self.filter_length / 2 + 1;
        let mut out = Array2::zeros((self.n_mels, frames));
        let mut buf = vec![Complex::new(0.0f32, 0.0); self.filter_length];
        let mut magnitude = Array1::zeros(n_bins);

        for frame in 0..frames {
            let start = frame * self.hop_length;
            for (i, slot) in buf.iter_mut().enumerate() {
                *slot = Complex::new(padded[start + i] * self.window[i], 0.0);
            }

            self.fft.process(&mut buf);

            for (bin, m) in magnitude.iter_mut().enumerate() {
                *m = buf[bin].norm();
            }

            let col = self.filters.dot(&magnitude);
            for (m, v) in col.iter().enumerate() {
                out[[m, frame]] = v.max(LOG_FLOOR).ln();
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_config() -> DataConfig {
        DataConfig {
            training_files: PathBuf::new(),
            eval_files: PathBuf::new(),
            segment_length: 2048,
            sampling_rate: 16000,
            filter_length: 256,
            hop_length: 64,
            win_length: 256,
            n_mel_channels: 20,
            mel_fmin: 0.0,
            mel_fmax: 8000.0,
        }
    }

    fn sine(freq: f32, sr: u32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sr as f32).sin())
            .collect()
    }

    #[test]
    fn mel_has_expected_shape_and_is_finite() {
        let frontend = MelFrontend::new(&test_config()).unwrap();
        let audio = sine(440.0, 16000, 1024);

        let mel = frontend.mel(&audio).unwrap();
        assert_eq!(mel.dim(), (20, 1 + 1024 / 64));
        assert!(mel.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn low_tone_peaks_in_a_lower_channel_than_high_tone() {
        let frontend = MelFrontend::new(&test_config()).unwrap();

        let argmax = |audio: &[f32]| {
            let mel = frontend.mel(audio).unwrap();
            let energy: Vec<f32> = (0..mel.nrows()).map(|m| mel.row(m).sum()).collect();
            energy
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap()
        };

        let low = argmax(&sine(200.0, 16000, 2048));
        let high = argmax(&sine(4000.0, 16000, 2048));
        assert!(low < high, "low {low} should be below high {high}");
    }

    #[test]
    fn short_clips_are_rejected() {
        let frontend = MelFrontend::new(&test_config()).unwrap();
        let err = frontend.mel(&[0.0; 16]).unwrap_err();
        assert!(matches!(err, DatasetErr::ClipTooShort { .. }));
    }

    #[test]
    fn odd_filter_length_is_rejected() {
        let mut cfg = test_config();
        cfg.filter_length = 255;
        assert!(matches!(
            MelFrontend::new(&cfg),
            Err(DatasetErr::InvalidStft(_))
        ));
    }
}
