use ndarray::{Array2, Array3, s};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use crate::{MelAudioDataset, Result, ShardSpec};

/// One stacked training batch.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `[batch, n_mels, frames]`
    pub mel: Array3<f32>,
    /// `[batch, segment_length]`
    pub audio: Array2<f32>,
}

/// Shard-aware, epoch-shuffling batch iterator.
///
/// Every process shuffles the full index space with the same seed-plus-epoch
/// stream, so the per-epoch permutation is identical across ranks and each
/// rank walks only its own contiguous shard of it. Trailing items that do
/// not fill a batch are dropped.
pub struct DataLoader {
    dataset: MelAudioDataset,
    shard: ShardSpec,
    batch_size: usize,
    seed: u64,
    order: Vec<usize>,
    cursor: usize,
    rng: StdRng,
}

impl DataLoader {
    pub fn new(dataset: MelAudioDataset, shard: ShardSpec, batch_size: usize, seed: u64) -> Self {
        assert!(batch_size > 0, "batch_size must be > 0");

        let mut loader = Self {
            dataset,
            shard,
            batch_size,
            seed,
            order: Vec::new(),
            cursor: 0,
            rng: StdRng::seed_from_u64(seed),
        };
        loader.set_epoch(0);
        loader
    }

    /// Full batches this process's shard yields per epoch.
    pub fn len(&self) -> usize {
        self.shard.range(self.dataset.len()).len() / self.batch_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dataset(&self) -> &MelAudioDataset {
        &self.dataset
    }

    /// Reshuffles for `epoch` and rewinds the cursor.
    pub fn set_epoch(&mut self, epoch: usize) {
        let total = self.dataset.len();

        let mut order: Vec<usize> = (0..total).collect();
        let mut shuffle_rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
        order.shuffle(&mut shuffle_rng);

        self.order = order[self.shard.range(total)].to_vec();
        self.cursor = 0;
        self.rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
    }

    /// Returns the next stacked batch, or `None` when the shard is exhausted.
    pub fn next_batch(&mut self) -> Option<Result<Batch>> {
        if self.cursor + self.batch_size > self.order.len() {
            return None;
        }

        let indices = &self.order[self.cursor..self.cursor + self.batch_size];
        self.cursor += self.batch_size;

        let n_mels = self.dataset.n_mels();
        let frames = self.dataset.mel_frames();
        let segment = self.dataset.segment_length();

        let mut mel = Array3::zeros((self.batch_size, n_mels, frames));
        let mut audio = Array2::zeros((self.batch_size, segment));

        for (slot, &idx) in indices.iter().enumerate() {
            let (item_mel, item_audio) = match self.dataset.load_item(idx, &mut self.rng) {
                Ok(pair) => pair,
                Err(e) => return Some(Err(e)),
            };

            mel.slice_mut(s![slot, .., ..]).assign(&item_mel);
            audio
                .row_mut(slot)
                .assign(&ndarray::ArrayView1::from(&item_audio[..]));
        }

        Some(Ok(Batch { mel, audio }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DataConfig, Split};
    use hound::SampleFormat;
    use std::num::NonZeroUsize;
    use std::path::{Path, PathBuf};
    use std::{fs, io::Write};

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("loader_{tag}_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_wav(path: &Path, n: usize) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..n {
            writer.write_sample((i as i16).wrapping_mul(257)).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn build_dataset(dir: &Path, clips: usize) -> MelAudioDataset {
        let mut entries = Vec::new();
        for i in 0..clips {
            let wav = dir.join(format!("clip_{i}.wav"));
            write_wav(&wav, 1024);
            entries.push(wav);
        }

        let list = dir.join("files.txt");
        let mut f = fs::File::create(&list).unwrap();
        for e in &entries {
            writeln!(f, "{}", e.display()).unwrap();
        }

        let cfg = DataConfig {
            training_files: list.clone(),
            eval_files: list,
            segment_length: 512,
            sampling_rate: 16000,
            filter_length: 256,
            hop_length: 64,
            win_length: 256,
            n_mel_channels: 8,
            mel_fmin: 0.0,
            mel_fmax: 8000.0,
        };

        MelAudioDataset::from_config(&cfg, Split::Train).unwrap()
    }

    #[test]
    fn drop_last_batching_over_a_shard() {
        let dir = scratch_dir("droplast");
        let ds = build_dataset(&dir, 7);

        // Shard 0 of 2 gets 4 items => 2 batches of 2.
        let shard = ShardSpec::new(0, NonZeroUsize::new(2).unwrap());
        let mut loader = DataLoader::new(ds, shard, 2, 1234);

        assert_eq!(loader.len(), 2);
        assert!(loader.next_batch().unwrap().is_ok());
        assert!(loader.next_batch().unwrap().is_ok());
        assert!(loader.next_batch().is_none());
    }

    #[test]
    fn batches_have_stacked_shapes() {
        let dir = scratch_dir("stack");
        let ds = build_dataset(&dir, 4);
        let frames = ds.mel_frames();

        let shard = ShardSpec::new(0, NonZeroUsize::new(1).unwrap());
        let mut loader = DataLoader::new(ds, shard, 2, 0);

        let batch = loader.next_batch().unwrap().unwrap();
        assert_eq!(batch.mel.dim(), (2, 8, frames));
        assert_eq!(batch.audio.dim(), (2, 512));
    }

    #[test]
    fn epoch_shuffle_is_deterministic_across_loaders() {
        let dir = scratch_dir("determinism");

        let mk = || {
            let ds = build_dataset(&dir, 6);
            let shard = ShardSpec::new(0, NonZeroUsize::new(1).unwrap());
            DataLoader::new(ds, shard, 2, 99)
        };

        let mut a = mk();
        let mut b = mk();
        a.set_epoch(3);
        b.set_epoch(3);
        assert_eq!(a.order, b.order);

        b.set_epoch(4);
        assert_ne!(a.order, b.order);
    }
}
