use ndarray::Array2;

use crate::arch::FlowOutput;

/// Negative log-likelihood of the flow under a zero-mean Gaussian prior.
///
/// `loss = (sum(z^2) / (2 * sigma^2) - log_s_total) / numel`
#[derive(Debug, Clone, Copy)]
pub struct FlowLoss {
    sigma: f32,
}

impl FlowLoss {
    /// Returns a new `FlowLoss`.
    ///
    /// # Arguments
    /// * `sigma` - Standard deviation of the latent prior.
    pub fn new(sigma: f32) -> Self {
        Self { sigma }
    }

    pub fn sigma(&self) -> f32 {
        self.sigma
    }

    /// Computes the scalar loss for a forward pass.
    pub fn loss(&self, out: &FlowOutput) -> f32 {
        let numel = out.z.len() as f32;
        let z_term: f32 = out.z.iter().map(|z| z * z).sum::<f32>() / (2.0 * self.sigma * self.sigma);

        (z_term - out.log_s_total) / numel
    }

    /// Gradients of the loss: w.r.t. the latents, and w.r.t. every
    /// individual `log_s` element.
    pub fn loss_prime(&self, out: &FlowOutput) -> (Array2<f32>, f32) {
        let numel = out.z.len() as f32;
        let d_z = &out.z * (1.0 / (self.sigma * self.sigma * numel));
        let d_log_s = -1.0 / numel;

        (d_z, d_log_s)
    }
}
