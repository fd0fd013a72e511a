use ndarray::prelude::*;

use super::{ActFn, Dense};

/// The affine coupling network of a single flow step.
///
/// Maps the untouched audio half plus the mel conditioning to a
/// `(log_s, t)` pair for the transformed half.
#[derive(Debug, Clone)]
pub struct CouplingNet {
    fc1: Dense,
    fc2: Dense,
}

impl CouplingNet {
    /// Creates a new `CouplingNet`.
    ///
    /// # Arguments
    /// * `in_dim` - Width of the network input (`n_group / 2` audio channels
    ///   plus the grouped mel conditioning).
    /// * `hidden` - Hidden width.
    /// * `half` - Channels of the transformed half; the output carries
    ///   `log_s` and `t` for each, so the final layer is `2 * half` wide.
    pub fn new(in_dim: usize, hidden: usize, half: usize) -> Self {
        Self {
            fc1: Dense::new((in_dim, hidden), Some(ActFn::Tanh)),
            fc2: Dense::new((hidden, 2 * half), None),
        }
    }

    /// Returns the amount of parameters this network has.
    pub fn size(&self) -> usize {
        self.fc1.size() + self.fc2.size()
    }

    pub fn fc1_dim(&self) -> (usize, usize) {
        self.fc1.dim()
    }

    pub fn fc2_dim(&self) -> (usize, usize) {
        self.fc2.dim()
    }

    /// Forward pass over `params`, this network's slice of the model parameters.
    ///
    /// # Returns
    /// A `[rows, 2 * half]` view holding `log_s` in the first half of the
    /// columns and `t` in the second, valid until the next forward call.
    pub fn forward(&mut self, params: &[f32], input: ArrayView2<f32>) -> ArrayView2<'_, f32> {
        let (p1, p2) = params.split_at(self.fc1.size());
        let h = self.fc1.forward(p1, input).to_owned();
        self.fc2.forward(p2, h.view())
    }

    /// Backpropagates `d_out`, the loss gradient w.r.t. the `(log_s, t)` output.
    ///
    /// Writes this network's parameter gradient into `grad` and returns the
    /// gradient w.r.t. the network input.
    pub fn backward(&mut self, params: &[f32], grad: &mut [f32], d_out: Array2<f32>) -> Array2<f32> {
        let w1_size = self.fc1.size();
        let (p1, p2) = params.split_at(w1_size);
        let (g1, g2) = grad.split_at_mut(w1_size);

        let d_hidden = self.fc2.backward(p2, g2, d_out);
        self.fc1.backward(p1, g1, d_hidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_counts_both_layers() {
        let net = CouplingNet::new(10, 4, 2);
        // fc1: (10 + 1) * 4, fc2: (4 + 1) * 4
        assert_eq!(net.size(), 44 + 20);
    }

    #[test]
    fn zero_params_give_zero_output() {
        let mut net = CouplingNet::new(3, 2, 1);
        let params = vec![0.0; net.size()];
        let input = Array2::from_elem((5, 3), 1.5);

        let out = net.forward(&params, input.view());
        assert_eq!(out.dim(), (5, 2));
        assert!(out.iter().all(|&v| v == 0.0));
    }
}
