//! The epoch/iteration control loop.

use std::{fs, num::NonZeroUsize, path::Path};

use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rand::{SeedableRng, rngs::StdRng};

use dataset::{Batch, DataLoader, MelAudioDataset, ShardSpec, Split};
use dist::ProcessGroup;
use glow::{Adam, FlowLoss, GradScaler, Optimizer, WaveGlow};

use crate::{Config, TrainerError, checkpoint, gpu, telemetry::Telemetry};

/// Train-split metrics are emitted every this many iterations.
const METRIC_INTERVAL: u64 = 10;
/// Paired original/generated clips written per evaluation pass.
const EVAL_SAMPLES: usize = 5;

/// Applies the observed downgrade: a multi-process world without a group
/// name falls back to a single process, with a warning rather than an error.
pub fn effective_world_size(world_size: usize, group_name: &str) -> usize {
    if world_size > 1 && group_name.is_empty() {
        warn!("multiple processes configured but no distributed group set");
        warn!("only running 1 process");
        return 1;
    }

    world_size
}

/// Rejects a single-process run on a non-zero rank before any allocation.
pub fn validate_launch(world_size: usize, rank: usize) -> Result<(), TrainerError> {
    if world_size == 1 && rank != 0 {
        return Err(TrainerError::SingleProcessRank(rank));
    }

    Ok(())
}

fn epoch_offset(iteration: u64, batches_per_epoch: u64) -> u64 {
    iteration / batches_per_epoch
}

/// A checkpoint is written exactly when the advanced counter hits the
/// cadence on the coordinating process.
fn should_checkpoint(iteration: u64, iters_per_checkpoint: u64, rank: usize) -> bool {
    rank == 0 && iters_per_checkpoint != 0 && iteration % iters_per_checkpoint == 0
}

/// Averages the loss across the group; a lone process reports it untouched.
fn reduced_loss(group: &mut Option<ProcessGroup>, raw: f32) -> Result<f32, TrainerError> {
    match group {
        Some(g) => Ok(g.reduce_loss(raw)?),
        None => Ok(raw),
    }
}

fn progress_bar(len: u64) -> ProgressBar {
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    bar
}

/// Runs the whole training: INIT, then RUNNING/EVALUATING per epoch until
/// the configured epoch count is exhausted.
pub fn run(config: &Config, num_procs: usize, rank: usize, group_name: &str) -> Result<(), TrainerError> {
    let train = &config.train_config;

    // INIT: deterministic seeding of both random streams.
    let mut init_rng = StdRng::seed_from_u64(train.seed);
    let mut sample_rng = StdRng::seed_from_u64(train.seed.wrapping_add(1));

    let criterion = FlowLoss::new(train.sigma);
    let mut model = WaveGlow::new(&config.waveglow_config, &mut init_rng)?;

    let mut group = if num_procs > 1 {
        Some(ProcessGroup::init(
            rank,
            num_procs,
            group_name,
            &config.dist_config,
        )?)
    } else {
        None
    };

    let mut optimizer = Adam::new(model.size(), train.learning_rate, 0.9, 0.999, 1e-8);
    let mut scaler = train.fp16_run.then(GradScaler::default);

    let mut iteration: u64 = 0;
    if !train.checkpoint_path.is_empty() {
        iteration = checkpoint::load(Path::new(&train.checkpoint_path), &mut model, &mut optimizer)?;
    }

    info!("creating dataloaders with {} workers", train.num_workers);
    let world = NonZeroUsize::new(num_procs.max(1)).unwrap();
    let shard = ShardSpec::new(rank, world);

    let trainset = MelAudioDataset::from_config(&config.data_config, Split::Train)?;
    let evalset = MelAudioDataset::from_config(&config.data_config, Split::Eval)?;
    let mut train_loader = DataLoader::new(trainset, shard, train.batch_size, train.seed);
    let mut eval_loader = DataLoader::new(evalset, shard, train.batch_size, train.seed);

    let batches_per_epoch = train_loader.len() as u64;
    if batches_per_epoch == 0 {
        return Err(TrainerError::EmptyLoader { split: "train" });
    }

    if rank == 0 {
        fs::create_dir_all(&train.output_directory)?;
        info!("output directory {}", train.output_directory.display());
    }

    let (train_log, eval_log) = if train.with_logging && rank == 0 {
        let logs = train.output_directory.join("logs");
        (
            Some(Telemetry::new(logs.join("train"))?),
            Some(Telemetry::new(logs.join("eval"))?),
        )
    } else {
        (None, None)
    };

    if let Some(g) = &mut group {
        g.barrier()?;
    }

    let epoch_offset = epoch_offset(iteration, batches_per_epoch);

    for epoch in epoch_offset..train.epochs as u64 {
        train_loader.set_epoch(epoch as usize);
        let bar = progress_bar(batches_per_epoch);

        while let Some(batch) = train_loader.next_batch() {
            let batch = batch?;

            model.zero_grad();
            let out = model.forward(batch.mel.view(), batch.audio.view())?;
            let loss = criterion.loss(&out);
            let loss = reduced_loss(&mut group, loss)?;

            let (mut d_z, mut d_log_s) = criterion.loss_prime(&out);
            if let Some(sc) = &scaler {
                d_z *= sc.scale();
                d_log_s *= sc.scale();
            }
            model.backward(d_z, d_log_s)?;

            if let Some(g) = &mut group {
                g.all_reduce_mean(model.grads_mut())?;
            }

            let step_usable = match &scaler {
                Some(sc) => sc.unscale(model.grads_mut()),
                None => true,
            };

            if step_usable {
                let (params, grads) = model.params_and_grads_mut();
                optimizer.step(params, grads)?;
            } else {
                warn!("non-finite gradients, skipping step after iteration {iteration}");
            }

            if let Some(sc) = &mut scaler {
                sc.update(!step_usable);
            }

            iteration += 1;
            bar.set_message(format!("epoch {epoch} iter {iteration} loss {loss:.3}"));

            if iteration % METRIC_INTERVAL == 0 {
                if let Some(log) = &train_log {
                    log.scalar("loss", iteration, loss as f64)?;

                    let (memory, load) = gpu::gpu_stats()?;
                    log.scalar("gpu0/memory", iteration, memory as f64)?;
                    log.scalar("gpu0/load", iteration, load as f64)?;
                }
            }

            if should_checkpoint(iteration, train.iters_per_checkpoint, rank) {
                let path = train
                    .output_directory
                    .join(format!("waveglow_{iteration}"));
                checkpoint::save(
                    &model,
                    &config.waveglow_config,
                    &optimizer,
                    train.learning_rate,
                    iteration,
                    &path,
                )?;
            }

            bar.inc(1);
        }

        bar.finish_and_clear();

        evaluate(
            config,
            epoch,
            iteration,
            &mut model,
            &criterion,
            &mut eval_loader,
            eval_log.as_ref(),
            &mut sample_rng,
        )?;
    }

    Ok(())
}

/// One pass over the held-out set: mean loss, plus paired original and
/// generated audio samples from the first batch.
fn evaluate(
    config: &Config,
    epoch: u64,
    iteration: u64,
    model: &mut WaveGlow,
    criterion: &FlowLoss,
    loader: &mut DataLoader,
    log: Option<&Telemetry>,
    sample_rng: &mut StdRng,
) -> Result<(), TrainerError> {
    loader.set_epoch(epoch as usize);
    let bar = progress_bar(loader.len() as u64);

    let mut losses = Vec::new();
    let mut first_batch: Option<Batch> = None;

    while let Some(batch) = loader.next_batch() {
        let batch = batch?;

        let out = model.forward(batch.mel.view(), batch.audio.view())?;
        let loss = criterion.loss(&out);
        losses.push(loss);

        bar.set_message(format!("epoch {epoch} eval {loss:.3}"));
        if first_batch.is_none() {
            first_batch = Some(batch);
        }
        bar.inc(1);
    }

    bar.finish_and_clear();

    if losses.is_empty() {
        warn!("eval set produced no full batches, skipping evaluation");
        return Ok(());
    }

    let mean = losses.iter().sum::<f32>() / losses.len() as f32;
    info!("epoch {epoch} eval avg {mean}");

    let Some(log) = log else {
        return Ok(());
    };
    log.scalar("loss", iteration, mean as f64)?;

    let Some(batch) = first_batch else {
        return Ok(());
    };

    let n_samples = batch.audio.ncols();
    let generated = model.infer(
        batch.mel.view(),
        n_samples,
        config.train_config.sigma,
        sample_rng,
    )?;

    let rate = config.data_config.sampling_rate;
    for i in 0..batch.audio.nrows().min(EVAL_SAMPLES) {
        let original = batch.audio.row(i).to_vec();
        let synthesized = generated.row(i).to_vec();
        log.audio(&format!("sample_{i}_orig_epoch{epoch}"), &original, rate)?;
        log.audio(&format!("sample_{i}_gen_epoch{epoch}"), &synthesized, rate)?;
    }

    Ok(())
}
