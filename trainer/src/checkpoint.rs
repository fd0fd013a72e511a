//! Save and restore of {model weights, optimizer state, iteration, learning rate}.
//!
//! One safetensors file per checkpoint: the model's named parameter tensors,
//! the optimizer moments, and a string-metadata header carrying the scalars.

use std::{collections::HashMap, fs, path::Path};

use log::info;
use safetensors::tensor::{Dtype, SafeTensors, TensorView, serialize_to_file};

use glow::{Adam, GlowConfig, WaveGlow};

use crate::TrainerError;

fn checkpoint_err<E: std::fmt::Display>(e: E) -> TrainerError {
    TrainerError::Checkpoint(e.to_string())
}

/// Decodes a little-endian f32 tensor payload into `out`.
fn copy_f32(bytes: &[u8], out: &mut [f32]) -> Result<(), TrainerError> {
    if bytes.len() != size_of_val(out) {
        return Err(TrainerError::Checkpoint(format!(
            "tensor holds {} bytes, expected {}",
            bytes.len(),
            size_of_val(out)
        )));
    }

    for (chunk, slot) in bytes.chunks_exact(4).zip(out.iter_mut()) {
        *slot = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }

    Ok(())
}

/// Writes the full training state to `path`, overwriting any existing file.
///
/// The serialized weights come from a fresh parameter snapshot rebuilt from
/// the architecture configuration and loaded with the live model's state.
pub fn save(
    model: &WaveGlow,
    glow_config: &GlowConfig,
    optimizer: &Adam,
    learning_rate: f32,
    iteration: u64,
    path: &Path,
) -> Result<(), TrainerError> {
    info!(
        "saving model and optimizer state at iteration {iteration} to {}",
        path.display()
    );

    let snapshot = WaveGlow::with_params(glow_config, model.params().to_vec())?;

    let mut tensors = Vec::new();
    for spec in snapshot.param_layout() {
        let data = &snapshot.params()[spec.span.clone()];
        let view = TensorView::new(Dtype::F32, spec.shape, bytemuck::cast_slice(data))
            .map_err(checkpoint_err)?;
        tensors.push((format!("model.{}", spec.name), view));
    }

    let state_len = vec![optimizer.first_moment().len()];
    tensors.push((
        "optim.m".to_string(),
        TensorView::new(
            Dtype::F32,
            state_len.clone(),
            bytemuck::cast_slice(optimizer.first_moment()),
        )
        .map_err(checkpoint_err)?,
    ));
    tensors.push((
        "optim.v".to_string(),
        TensorView::new(
            Dtype::F32,
            state_len,
            bytemuck::cast_slice(optimizer.second_moment()),
        )
        .map_err(checkpoint_err)?,
    ));

    let (beta1_t, beta2_t) = optimizer.decay_products();
    let metadata = HashMap::from([
        ("iteration".to_string(), iteration.to_string()),
        ("learning_rate".to_string(), learning_rate.to_string()),
        ("beta1_t".to_string(), beta1_t.to_string()),
        ("beta2_t".to_string(), beta2_t.to_string()),
    ]);

    serialize_to_file(tensors, &Some(metadata), path).map_err(checkpoint_err)
}

/// Restores model and optimizer state in place from `path`.
///
/// A missing file is a hard error; the caller gets no chance to retry.
///
/// # Returns
/// The iteration the checkpoint was written at. The training loop resumes
/// with its counter at this value, so the next processed iteration is
/// exactly one past it.
pub fn load(
    path: &Path,
    model: &mut WaveGlow,
    optimizer: &mut Adam,
) -> Result<u64, TrainerError> {
    assert!(
        path.is_file(),
        "checkpoint '{}' does not exist",
        path.display()
    );

    let bytes = fs::read(path)?;

    let (_, header) = SafeTensors::read_metadata(&bytes).map_err(checkpoint_err)?;
    let metadata = header
        .metadata()
        .as_ref()
        .ok_or_else(|| TrainerError::Checkpoint("file carries no metadata header".into()))?;

    let read_scalar = |key: &str| -> Result<f64, TrainerError> {
        metadata
            .get(key)
            .ok_or_else(|| TrainerError::Checkpoint(format!("metadata is missing '{key}'")))?
            .parse::<f64>()
            .map_err(|e| TrainerError::Checkpoint(format!("bad '{key}' value: {e}")))
    };

    let iteration = read_scalar("iteration")? as u64;
    let beta1_t = read_scalar("beta1_t")? as f32;
    let beta2_t = read_scalar("beta2_t")? as f32;

    let tensors = SafeTensors::deserialize(&bytes).map_err(checkpoint_err)?;

    for spec in model.param_layout() {
        let name = format!("model.{}", spec.name);
        let view = tensors.tensor(&name).map_err(checkpoint_err)?;

        if view.shape() != spec.shape {
            return Err(TrainerError::Checkpoint(format!(
                "{name} has shape {:?}, expected {:?}",
                view.shape(),
                spec.shape
            )));
        }

        copy_f32(view.data(), &mut model.params_mut()[spec.span.clone()])?;
    }

    let mut m = vec![0.0; model.size()];
    let mut v = vec![0.0; model.size()];
    copy_f32(
        tensors.tensor("optim.m").map_err(checkpoint_err)?.data(),
        &mut m,
    )?;
    copy_f32(
        tensors.tensor("optim.v").map_err(checkpoint_err)?.data(),
        &mut v,
    )?;
    optimizer.load_state(&m, &v, beta1_t, beta2_t)?;

    info!("loaded checkpoint '{}' (iteration {iteration})", path.display());
    Ok(iteration)
}
