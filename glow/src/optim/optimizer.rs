use crate::Result;

pub trait Optimizer {
    /// Updates `params` in place from `grad` according to the algorithm's
    /// learning rule.
    fn step(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()>;
}
