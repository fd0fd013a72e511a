use half::f16;

/// Loss-scaling helper for the reduced-precision training path.
///
/// The loss gradient is multiplied by `scale()` before backpropagation so
/// small gradients survive the f16 round-trip; `unscale` quantizes the
/// accumulated gradients through f16, divides the scale back out, and
/// reports whether the step is usable. `update` backs the scale off after
/// an overflow and grows it again after a run of good steps.
#[derive(Debug, Clone)]
pub struct GradScaler {
    scale: f32,
    growth_factor: f32,
    backoff_factor: f32,
    growth_interval: u32,
    good_steps: u32,
}

impl GradScaler {
    pub fn new(initial_scale: f32) -> Self {
        Self {
            scale: initial_scale,
            growth_factor: 2.0,
            backoff_factor: 0.5,
            growth_interval: 2000,
            good_steps: 0,
        }
    }

    /// The current loss multiplier.
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Quantizes `grads` through f16 and removes the loss scale.
    ///
    /// # Returns
    /// `true` when every gradient survived as a finite value; `false` when
    /// the step must be skipped.
    pub fn unscale(&self, grads: &mut [f32]) -> bool {
        let inv = 1.0 / self.scale;
        let mut finite = true;

        for g in grads.iter_mut() {
            let narrowed = f16::from_f32(*g).to_f32();
            if !narrowed.is_finite() {
                finite = false;
            }
            *g = narrowed * inv;
        }

        finite
    }

    /// Adjusts the scale after a step attempt.
    pub fn update(&mut self, found_inf: bool) {
        if found_inf {
            self.scale *= self.backoff_factor;
            self.good_steps = 0;
            return;
        }

        self.good_steps += 1;
        if self.good_steps >= self.growth_interval {
            self.scale *= self.growth_factor;
            self.good_steps = 0;
        }
    }
}

impl Default for GradScaler {
    fn default() -> Self {
        Self::new(1024.0)
    }
}
