//! End-to-end single-process training runs over a tiny synthetic corpus.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use hound::SampleFormat;

use dataset::DataConfig;
use dist::DistConfig;
use glow::GlowConfig;
use trainer::{Config, TrainConfig, train};

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("trainer_e2e_{tag}_{}", std::process::id()));
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
        let sample = ((i as f32 * 0.05).sin() * 8000.0) as i16;
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
}

/// Four clips, shared between the train and eval lists.
fn build_corpus(dir: &Path) -> PathBuf {
    let list = dir.join("files.txt");
    let mut f = fs::File::create(&list).unwrap();

    for i in 0..4 {
        let wav = dir.join(format!("clip_{i}.wav"));
        write_wav(&wav, 1500);
        writeln!(f, "{}", wav.display()).unwrap();
    }

    list
}

fn tiny_config(dir: &Path, epochs: usize, checkpoint_path: String) -> Config {
    let list = build_corpus(dir);

    Config {
        train_config: TrainConfig {
            output_directory: dir.join("out"),
            epochs,
            learning_rate: 1e-4,
            sigma: 1.0,
            iters_per_checkpoint: 1,
            batch_size: 2,
            seed: 1234,
            fp16_run: false,
            checkpoint_path,
            with_logging: false,
            num_workers: 2,
        },
        data_config: DataConfig {
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
        },
        dist_config: DistConfig {
            url: "127.0.0.1:40000".to_string(),
            world_size: 1,
        },
        waveglow_config: GlowConfig {
            n_mel_channels: 8,
            n_flows: 2,
            n_group: 8,
            n_channels: 4,
        },
    }
}

#[test]
fn one_epoch_writes_a_checkpoint_per_iteration() {
    let dir = scratch_dir("fresh");
    let config = tiny_config(&dir, 1, String::new());

    train::run(&config, 1, 0, "").unwrap();

    // 4 clips at batch size 2 is 2 iterations per epoch.
    assert!(dir.join("out").join("waveglow_1").is_file());
    assert!(dir.join("out").join("waveglow_2").is_file());
    assert!(!dir.join("out").join("waveglow_3").exists());
}

#[test]
fn resuming_continues_past_the_stored_iteration() {
    let dir = scratch_dir("resume");

    let first = tiny_config(&dir, 1, String::new());
    train::run(&first, 1, 0, "").unwrap();

    let stored = dir.join("out").join("waveglow_2");
    assert!(stored.is_file());

    // Same corpus, one more epoch, resuming from iteration 2: the epoch
    // offset lands on epoch 1 and the next processed iterations are 3 and 4.
    let second = tiny_config(&dir, 2, stored.display().to_string());
    train::run(&second, 1, 0, "").unwrap();

    assert!(dir.join("out").join("waveglow_3").is_file());
    assert!(dir.join("out").join("waveglow_4").is_file());
    assert!(!dir.join("out").join("waveglow_5").exists());
}

#[test]
fn fp16_run_completes_with_the_scaler_enabled() {
    let dir = scratch_dir("fp16");
    let mut config = tiny_config(&dir, 1, String::new());
    config.train_config.fp16_run = true;

    train::run(&config, 1, 0, "").unwrap();
    assert!(dir.join("out").join("waveglow_2").is_file());
}
