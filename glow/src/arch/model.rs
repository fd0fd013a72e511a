use std::ops::Range;

use ndarray::prelude::*;
use ndarray_rand::RandomExt;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use super::CouplingNet;
use crate::{GlowConfig, GlowErr, Result};

/// The result of a forward pass: the latents plus the accumulated
/// log-Jacobian of the coupling transforms.
#[derive(Debug, Clone)]
pub struct FlowOutput {
    /// Latent tensor, `[batch * t_steps, n_group]`.
    pub z: Array2<f32>,
    /// Sum of every `log_s` element over all flows.
    pub log_s_total: f32,
}

/// Name, shape and flat-slice location of one parameter tensor.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub span: Range<usize>,
}

#[derive(Debug)]
struct FlowCache {
    /// Pre-transform values of the transformed half.
    xb: Array2<f32>,
    exp_s: Array2<f32>,
}

#[derive(Debug)]
struct ForwardCache {
    pre: Vec<FlowCache>,
    rows: usize,
}

/// An affine-coupling normalizing flow over grouped audio samples,
/// conditioned on mel-spectrogram frames.
///
/// Audio is folded into `n_group` channels; each of the `n_flows` coupling
/// steps leaves one half of the channels untouched and applies a learned
/// elementwise affine transform to the other, alternating halves between
/// steps. The transform parameters come from a small conditioning network
/// over the untouched half and the mel features, so the mapping is exactly
/// invertible and `infer` can run the chain backwards from Gaussian noise.
#[derive(Debug)]
pub struct WaveGlow {
    cfg: GlowConfig,
    half: usize,
    cond_dim: usize,
    params: Vec<f32>,
    grads: Vec<f32>,
    flows: Vec<CouplingNet>,
    spans: Vec<Range<usize>>,
    cache: Option<ForwardCache>,
}

/// Channel ranges `(kept, transformed)` for coupling step `k`.
fn split_ranges(k: usize, half: usize, n_group: usize) -> (Range<usize>, Range<usize>) {
    if k % 2 == 0 {
        (0..half, half..n_group)
    } else {
        (half..n_group, 0..half)
    }
}

impl WaveGlow {
    /// Builds a model with freshly initialized parameters.
    ///
    /// Hidden layers start at small random weights; every output layer
    /// starts at zero, so the whole flow begins as the identity transform.
    pub fn new(cfg: &GlowConfig, rng: &mut impl Rng) -> Result<Self> {
        let mut model = Self::skeleton(cfg)?;
        model.init_params(rng);
        Ok(model)
    }

    /// Builds a model around an existing flat parameter vector.
    pub fn with_params(cfg: &GlowConfig, params: Vec<f32>) -> Result<Self> {
        let mut model = Self::skeleton(cfg)?;

        if params.len() != model.size() {
            return Err(GlowErr::ShapeMismatch {
                what: "params",
                got: params.len(),
                expected: model.size(),
            });
        }

        model.params = params;
        Ok(model)
    }

    fn skeleton(cfg: &GlowConfig) -> Result<Self> {
        cfg.validate()?;

        let half = cfg.n_group / 2;
        let cond_dim = cfg.n_mel_channels * cfg.n_group;
        let in_dim = half + cond_dim;

        let mut flows = Vec::with_capacity(cfg.n_flows);
        let mut spans = Vec::with_capacity(cfg.n_flows);
        let mut offset = 0;

        for _ in 0..cfg.n_flows {
            let flow = CouplingNet::new(in_dim, cfg.n_channels, half);
            spans.push(offset..offset + flow.size());
            offset += flow.size();
            flows.push(flow);
        }

        Ok(Self {
            cfg: cfg.clone(),
            half,
            cond_dim,
            params: vec![0.0; offset],
            grads: vec![0.0; offset],
            flows,
            spans,
            cache: None,
        })
    }

    fn init_params(&mut self, rng: &mut impl Rng) {
        for (flow, span) in self.flows.iter().zip(&self.spans) {
            let (in_dim, hidden) = flow.fc1_dim();
            let w1_len = in_dim * hidden;

            // fc1 weights get a fan-in scaled normal; fc1 biases and the
            // whole of fc2 stay zero.
            let std = (1.0 / in_dim as f32).sqrt();
            let normal = Normal::new(0.0, std).unwrap();
            for p in &mut self.params[span.start..span.start + w1_len] {
                *p = normal.sample(rng);
            }
        }
    }

    /// Returns the amount of parameters in the model.
    pub fn size(&self) -> usize {
        self.spans.last().map(|span| span.end).unwrap_or(0)
    }

    pub fn config(&self) -> &GlowConfig {
        &self.cfg
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    pub fn grads(&self) -> &[f32] {
        &self.grads
    }

    pub fn grads_mut(&mut self) -> &mut [f32] {
        &mut self.grads
    }

    /// Simultaneous access to the parameters and their gradient, for the
    /// optimizer step.
    pub fn params_and_grads_mut(&mut self) -> (&mut [f32], &[f32]) {
        (&mut self.params, &self.grads)
    }

    /// Clears the gradient buffers.
    pub fn zero_grad(&mut self) {
        self.grads.fill(0.0);
    }

    /// Describes every named parameter tensor and its flat-slice location.
    pub fn param_layout(&self) -> Vec<ParamSpec> {
        let mut specs = Vec::with_capacity(self.flows.len() * 4);

        for (k, (flow, span)) in self.flows.iter().zip(&self.spans).enumerate() {
            let mut offset = span.start;
            let layers = [("fc1", flow.fc1_dim()), ("fc2", flow.fc2_dim())];

            for (layer, (din, dout)) in layers {
                let w_len = din * dout;
                specs.push(ParamSpec {
                    name: format!("flows.{k}.{layer}.weight"),
                    shape: vec![din, dout],
                    span: offset..offset + w_len,
                });
                specs.push(ParamSpec {
                    name: format!("flows.{k}.{layer}.bias"),
                    shape: vec![dout],
                    span: offset + w_len..offset + w_len + dout,
                });
                offset += w_len + dout;
            }
        }

        specs
    }

    /// Runs the flow forward over a `(mel, audio)` batch.
    ///
    /// # Arguments
    /// * `mel` - Conditioning spectrograms, `[batch, n_mel_channels, frames]`.
    /// * `audio` - Audio segments, `[batch, samples]` with `samples` divisible
    ///   by `n_group`.
    ///
    /// # Returns
    /// The latents and accumulated log-Jacobian, or an error on shape issues.
    pub fn forward(&mut self, mel: ArrayView3<f32>, audio: ArrayView2<f32>) -> Result<FlowOutput> {
        let (batch, _, _) = mel.dim();
        let (audio_batch, n_samples) = audio.dim();

        if audio_batch != batch {
            return Err(GlowErr::ShapeMismatch {
                what: "audio batch",
                got: audio_batch,
                expected: batch,
            });
        }

        let t_steps = self.grouped_steps(n_samples)?;
        let rows = batch * t_steps;

        let mut x = self.group(audio);
        let cond = self.build_cond(mel, n_samples)?;

        let half = self.half;
        let n_group = self.cfg.n_group;
        let cond_dim = self.cond_dim;

        let mut log_s_total = 0.0f64;
        let mut pre = Vec::with_capacity(self.flows.len());

        {
            let Self {
                params,
                flows,
                spans,
                ..
            } = self;

            for (k, flow) in flows.iter_mut().enumerate() {
                let (keep, xform) = split_ranges(k, half, n_group);

                let mut input = Array2::zeros((rows, half + cond_dim));
                input
                    .slice_mut(s![.., ..half])
                    .assign(&x.slice(s![.., keep]));
                input.slice_mut(s![.., half..]).assign(&cond);

                let out = flow.forward(&params[spans[k].clone()], input.view());
                let log_s = out.slice(s![.., ..half]).to_owned();
                let t_shift = out.slice(s![.., half..]).to_owned();

                let xb = x.slice(s![.., xform.clone()]).to_owned();
                let exp_s = log_s.mapv(f32::exp);

                let transformed = &xb * &exp_s + &t_shift;
                x.slice_mut(s![.., xform]).assign(&transformed);

                log_s_total += log_s.iter().map(|&v| v as f64).sum::<f64>();
                pre.push(FlowCache { xb, exp_s });
            }
        }

        self.cache = Some(ForwardCache { pre, rows });

        Ok(FlowOutput {
            z: x,
            log_s_total: log_s_total as f32,
        })
    }

    /// Backpropagates the loss gradient through the flow, accumulating the
    /// parameter gradient into the model's grad buffers.
    ///
    /// # Arguments
    /// * `d_z` - Loss gradient w.r.t. the latents, same shape as `z`.
    /// * `d_log_s` - Loss gradient w.r.t. every individual `log_s` element
    ///   (the direct log-Jacobian term, a constant per element).
    pub fn backward(&mut self, mut d_z: Array2<f32>, d_log_s: f32) -> Result<()> {
        let cache = self.cache.take().ok_or(GlowErr::MissingForward)?;

        let half = self.half;
        let n_group = self.cfg.n_group;
        let rows = cache.rows;

        if d_z.dim() != (rows, n_group) {
            return Err(GlowErr::ShapeMismatch {
                what: "d_z rows",
                got: d_z.nrows(),
                expected: rows,
            });
        }

        let Self {
            params,
            grads,
            flows,
            spans,
            ..
        } = self;

        for (k, flow) in flows.iter_mut().enumerate().rev() {
            let (keep, xform) = split_ranges(k, half, n_group);
            let fc = &cache.pre[k];

            let d_xf = d_z.slice(s![.., xform.clone()]).to_owned();

            // z_b = x_b * e^s + t, so d/ds picks up x_b * e^s, plus the
            // direct log-Jacobian term of the loss.
            let d_ls = &d_xf * &fc.xb * &fc.exp_s + d_log_s;

            let mut d_out = Array2::zeros((rows, n_group));
            d_out.slice_mut(s![.., ..half]).assign(&d_ls);
            d_out.slice_mut(s![.., half..]).assign(&d_xf);

            let span = spans[k].clone();
            let d_in = flow.backward(&params[span.clone()], &mut grads[span], d_out);

            d_z.slice_mut(s![.., xform])
                .assign(&(&d_xf * &fc.exp_s));
            let mut d_keep = d_z.slice_mut(s![.., keep]);
            d_keep += &d_in.slice(s![.., ..half]);
        }

        Ok(())
    }

    /// Samples audio by running the inverse flow from Gaussian noise.
    ///
    /// # Arguments
    /// * `mel` - Conditioning spectrograms, `[batch, n_mel_channels, frames]`.
    /// * `n_samples` - Audio samples to generate per batch entry; must be
    ///   divisible by `n_group`.
    /// * `sigma` - Standard deviation of the latent noise.
    ///
    /// # Returns
    /// Generated audio, `[batch, n_samples]`.
    pub fn infer(
        &mut self,
        mel: ArrayView3<f32>,
        n_samples: usize,
        sigma: f32,
        rng: &mut impl Rng,
    ) -> Result<Array2<f32>> {
        let (batch, _, _) = mel.dim();
        let t_steps = self.grouped_steps(n_samples)?;
        let rows = batch * t_steps;

        if !sigma.is_finite() || sigma <= 0.0 {
            return Err(GlowErr::InvalidSigma(sigma));
        }

        let cond = self.build_cond(mel, n_samples)?;

        let half = self.half;
        let n_group = self.cfg.n_group;
        let cond_dim = self.cond_dim;

        let normal = Normal::new(0.0, sigma).map_err(|_| GlowErr::InvalidSigma(sigma))?;
        let mut x = Array2::random_using((rows, n_group), normal, rng);

        {
            let Self {
                params,
                flows,
                spans,
                ..
            } = self;

            for (k, flow) in flows.iter_mut().enumerate().rev() {
                let (keep, xform) = split_ranges(k, half, n_group);

                let mut input = Array2::zeros((rows, half + cond_dim));
                input
                    .slice_mut(s![.., ..half])
                    .assign(&x.slice(s![.., keep]));
                input.slice_mut(s![.., half..]).assign(&cond);

                let out = flow.forward(&params[spans[k].clone()], input.view());
                let log_s = out.slice(s![.., ..half]).to_owned();
                let t_shift = out.slice(s![.., half..]).to_owned();

                let xb = x.slice(s![.., xform.clone()]).to_owned();
                let restored = (&xb - &t_shift) * log_s.mapv(|v| (-v).exp());
                x.slice_mut(s![.., xform]).assign(&restored);
            }
        }

        Ok(self.ungroup(&x, batch, n_samples))
    }

    /// Validates the sample count and returns the grouped frame count.
    fn grouped_steps(&self, n_samples: usize) -> Result<usize> {
        if n_samples == 0 || n_samples % self.cfg.n_group != 0 {
            return Err(GlowErr::NotGroupable {
                samples: n_samples,
                n_group: self.cfg.n_group,
            });
        }

        Ok(n_samples / self.cfg.n_group)
    }

    /// Folds `[batch, samples]` audio into `[batch * t_steps, n_group]` rows.
    fn group(&self, audio: ArrayView2<f32>) -> Array2<f32> {
        let (batch, n_samples) = audio.dim();
        let n_group = self.cfg.n_group;
        let t_steps = n_samples / n_group;

        let mut x = Array2::zeros((batch * t_steps, n_group));
        for bi in 0..batch {
            for t in 0..t_steps {
                for g in 0..n_group {
                    x[[bi * t_steps + t, g]] = audio[[bi, t * n_group + g]];
                }
            }
        }

        x
    }

    /// The inverse of `group`.
    fn ungroup(&self, x: &Array2<f32>, batch: usize, n_samples: usize) -> Array2<f32> {
        let n_group = self.cfg.n_group;
        let t_steps = n_samples / n_group;

        let mut audio = Array2::zeros((batch, n_samples));
        for bi in 0..batch {
            for t in 0..t_steps {
                for g in 0..n_group {
                    audio[[bi, t * n_group + g]] = x[[bi * t_steps + t, g]];
                }
            }
        }

        audio
    }

    /// Builds the per-row conditioning matrix `[batch * t_steps, cond_dim]`
    /// by nearest-frame upsampling of the mel spectrogram to audio rate.
    fn build_cond(&self, mel: ArrayView3<f32>, n_samples: usize) -> Result<Array2<f32>> {
        let (batch, channels, frames) = mel.dim();
        let n_group = self.cfg.n_group;
        let n_mel = self.cfg.n_mel_channels;

        if channels != n_mel {
            return Err(GlowErr::ShapeMismatch {
                what: "mel channels",
                got: channels,
                expected: n_mel,
            });
        }

        if frames == 0 {
            return Err(GlowErr::ShapeMismatch {
                what: "mel frames",
                got: 0,
                expected: 1,
            });
        }

        let t_steps = n_samples / n_group;
        let mut cond = Array2::zeros((batch * t_steps, self.cond_dim));

        for bi in 0..batch {
            for t in 0..t_steps {
                let row = bi * t_steps + t;
                for g in 0..n_group {
                    let sample = t * n_group + g;
                    let frame = (sample * frames) / n_samples;
                    for j in 0..n_mel {
                        cond[[row, g * n_mel + j]] = mel[[bi, j, frame]];
                    }
                }
            }
        }

        Ok(cond)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FlowLoss;
    use rand::{SeedableRng, rngs::StdRng};

    fn tiny_config() -> GlowConfig {
        GlowConfig {
            n_mel_channels: 1,
            n_flows: 2,
            n_group: 2,
            n_channels: 2,
        }
    }

    fn tiny_inputs(rng: &mut StdRng) -> (Array3<f32>, Array2<f32>) {
        let normal = Normal::new(0.0f32, 1.0).unwrap();
        let mel = Array3::random_using((1, 1, 2), normal, rng);
        let audio = Array2::random_using((1, 4), normal, rng);
        (mel, audio)
    }

    #[test]
    fn fresh_model_is_the_identity_transform() {
        let mut rng = StdRng::seed_from_u64(7);
        let cfg = tiny_config();
        let mut model = WaveGlow::new(&cfg, &mut rng).unwrap();

        let (mel, audio) = tiny_inputs(&mut rng);
        let out = model.forward(mel.view(), audio.view()).unwrap();

        // Output layers start at zero, so log_s = 0 and t = 0 everywhere.
        assert_eq!(out.log_s_total, 0.0);

        let z_energy: f32 = out.z.iter().map(|z| z * z).sum();
        let audio_energy: f32 = audio.iter().map(|a| a * a).sum();
        assert!((z_energy - audio_energy).abs() < 1e-6);
    }

    #[test]
    fn infer_produces_requested_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let cfg = tiny_config();
        let mut model = WaveGlow::new(&cfg, &mut rng).unwrap();

        let normal = Normal::new(0.0f32, 1.0).unwrap();
        let mel = Array3::random_using((3, 1, 4), normal, &mut rng);
        let audio = model.infer(mel.view(), 8, 1.0, &mut rng).unwrap();

        assert_eq!(audio.dim(), (3, 8));
    }

    #[test]
    fn infer_rejects_bad_sigma() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut model = WaveGlow::new(&tiny_config(), &mut rng).unwrap();
        let mel = Array3::zeros((1, 1, 2));

        let err = model.infer(mel.view(), 4, 0.0, &mut rng).unwrap_err();
        assert!(matches!(err, GlowErr::InvalidSigma(_)));
    }

    #[test]
    fn ungrouped_audio_length_must_divide() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut model = WaveGlow::new(&tiny_config(), &mut rng).unwrap();

        let mel = Array3::zeros((1, 1, 2));
        let audio = Array2::zeros((1, 5));
        let err = model.forward(mel.view(), audio.view()).unwrap_err();
        assert!(matches!(err, GlowErr::NotGroupable { .. }));
    }

    #[test]
    fn analytic_gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(1234);
        let cfg = tiny_config();
        let mut model = WaveGlow::new(&cfg, &mut rng).unwrap();

        // Move every parameter off its initialization so no gradient path
        // is trivially zero.
        let noise = Normal::new(0.0f32, 0.1).unwrap();
        for p in model.params_mut() {
            *p += noise.sample(&mut rng);
        }

        let (mel, audio) = tiny_inputs(&mut rng);
        let criterion = FlowLoss::new(1.0);

        model.zero_grad();
        let out = model.forward(mel.view(), audio.view()).unwrap();
        let (d_z, d_log_s) = criterion.loss_prime(&out);
        model.backward(d_z, d_log_s).unwrap();
        let analytic = model.grads().to_vec();

        let eps = 1e-2f32;
        for i in 0..model.size() {
            let original = model.params()[i];

            model.params_mut()[i] = original + eps;
            let plus = criterion.loss(&model.forward(mel.view(), audio.view()).unwrap());

            model.params_mut()[i] = original - eps;
            let minus = criterion.loss(&model.forward(mel.view(), audio.view()).unwrap());

            model.params_mut()[i] = original;

            let numeric = (plus - minus) / (2.0 * eps);
            let tolerance = 2e-3 + 0.05 * analytic[i].abs();
            assert!(
                (numeric - analytic[i]).abs() < tolerance,
                "param {i}: numeric {numeric} vs analytic {}",
                analytic[i]
            );
        }
    }

    #[test]
    fn with_params_validates_length() {
        let cfg = tiny_config();
        let err = WaveGlow::with_params(&cfg, vec![0.0; 3]).unwrap_err();
        assert!(matches!(err, GlowErr::ShapeMismatch { .. }));
    }
}
