use super::Optimizer;
use crate::{GlowErr, Result};

#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    m: Box<[f32]>,
    v: Box<[f32]>,
    epsilon: f32,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(len: usize, learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            m: vec![0.; len].into_boxed_slice(),
            v: vec![0.; len].into_boxed_slice(),
            epsilon,
        }
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// The running first-moment estimate.
    pub fn first_moment(&self) -> &[f32] {
        &self.m
    }

    /// The running second-moment estimate.
    pub fn second_moment(&self) -> &[f32] {
        &self.v
    }

    /// The accumulated `beta^t` decay products, for checkpointing.
    pub fn decay_products(&self) -> (f32, f32) {
        (self.beta1_t, self.beta2_t)
    }

    /// Restores the optimizer state from a checkpoint.
    pub fn load_state(
        &mut self,
        m: &[f32],
        v: &[f32],
        beta1_t: f32,
        beta2_t: f32,
    ) -> Result<()> {
        if m.len() != self.m.len() || v.len() != self.v.len() {
            return Err(GlowErr::ShapeMismatch {
                what: "optimizer state",
                got: m.len(),
                expected: self.m.len(),
            });
        }

        self.m.copy_from_slice(m);
        self.v.copy_from_slice(v);
        self.beta1_t = beta1_t;
        self.beta2_t = beta2_t;
        Ok(())
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()> {
        if grad.len() != params.len() || params.len() != self.m.len() {
            return Err(GlowErr::ShapeMismatch {
                what: "gradient",
                got: grad.len(),
                expected: self.m.len(),
            });
        }

        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        params
            .iter_mut()
            .zip(grad)
            .zip(self.m.iter_mut())
            .zip(self.v.iter_mut())
            .for_each(|(((p, g), m), v)| {
                *m = b1 * *m + (1. - b1) * g;
                *v = b2 * *v + (1. - b2) * g.powi(2);
                *p -= step_size * *m / (v.sqrt() + eps);
            });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_moves_against_the_gradient() {
        let mut adam = Adam::new(2, 0.1, 0.9, 0.999, 1e-8);
        let mut params = [1.0, -1.0];

        adam.step(&mut params, &[0.5, -0.5]).unwrap();

        // On the first step the bias-corrected update is ~lr * sign(g).
        assert!((params[0] - (1.0 - 0.1)).abs() < 1e-3);
        assert!((params[1] - (-1.0 + 0.1)).abs() < 1e-3);
    }

    #[test]
    fn step_rejects_mismatched_lengths() {
        let mut adam = Adam::new(2, 0.1, 0.9, 0.999, 1e-8);
        let mut params = [0.0, 0.0];

        assert!(adam.step(&mut params, &[1.0]).is_err());
    }

    #[test]
    fn state_roundtrip_restores_moments() {
        let mut a = Adam::new(2, 0.1, 0.9, 0.999, 1e-8);
        let mut params = [1.0, 2.0];
        a.step(&mut params, &[0.1, 0.2]).unwrap();

        let mut b = Adam::new(2, 0.1, 0.9, 0.999, 1e-8);
        let (b1_t, b2_t) = a.decay_products();
        b.load_state(a.first_moment(), a.second_moment(), b1_t, b2_t)
            .unwrap();

        assert_eq!(a.first_moment(), b.first_moment());
        assert_eq!(a.second_moment(), b.second_moment());
        assert_eq!(a.decay_products(), b.decay_products());
    }
}
