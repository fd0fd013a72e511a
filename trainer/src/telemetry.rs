//! File-backed metric and audio sink under `{output_directory}/logs/{split}`.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
};

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::TrainerError;

/// Appends scalars to per-metric files and dumps audio samples as WAVs.
///
/// A metric name may contain `/` separators; they become subdirectories,
/// so `gpu0/memory` lands in `<dir>/gpu0/memory`.
pub struct Telemetry {
    dir: PathBuf,
}

impl Telemetry {
    pub fn new(dir: PathBuf) -> Result<Self, TrainerError> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Appends one `step\tvalue` line to the metric's file.
    pub fn scalar(&self, name: &str, step: u64, value: f64) -> Result<(), TrainerError> {
        let path = self.dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{step}\t{value}")?;
        Ok(())
    }

    /// Writes `samples` as a 16-bit mono WAV named `<name>.wav`.
    pub fn audio(&self, name: &str, samples: &[f32], sample_rate: u32) -> Result<(), TrainerError> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let path = self.dir.join(format!("{name}.wav"));
        let mut writer = WavWriter::create(path, spec)?;
        for &sample in samples {
            let quantized = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(quantized)?;
        }

        writer.finalize()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("telemetry_{tag}_{}", std::process::id()))
    }

    #[test]
    fn scalars_append_tab_separated_lines() {
        let sink = Telemetry::new(scratch_dir("scalar")).unwrap();
        sink.scalar("loss", 10, 1.5).unwrap();
        sink.scalar("loss", 20, 0.75).unwrap();

        let text = fs::read_to_string(scratch_dir("scalar").join("loss")).unwrap();
        assert!(text.ends_with("10\t1.5\n20\t0.75\n"));
    }

    #[test]
    fn nested_metric_names_become_subdirectories() {
        let sink = Telemetry::new(scratch_dir("nested")).unwrap();
        sink.scalar("gpu0/memory", 10, 42.0).unwrap();

        assert!(scratch_dir("nested").join("gpu0").join("memory").is_file());
    }

    #[test]
    fn audio_roundtrips_through_the_wav() {
        let sink = Telemetry::new(scratch_dir("audio")).unwrap();
        let samples = [0.0f32, 0.5, -0.5, 1.0];
        sink.audio("sample_0_orig_epoch0", &samples, 16000).unwrap();

        let path = scratch_dir("audio").join("sample_0_orig_epoch0.wav");
        let mut reader = hound::WavReader::open(path).unwrap();
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();

        assert_eq!(read.len(), 4);
        assert_eq!(read[0], 0);
        assert_eq!(read[3], i16::MAX);
    }
}
