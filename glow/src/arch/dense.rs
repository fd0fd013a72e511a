use ndarray::{linalg, prelude::*};

use super::ActFn;

/// A fully connected layer operating on a flat parameter slice.
///
/// Parameters are laid out as the weight matrix (row-major, `in x out`)
/// followed by the bias vector. Forward caches its input and outputs so
/// `backward` can run without recomputation.
#[derive(Debug, Clone)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    size: usize,

    // Forward metadata
    x: Array2<f32>,
    z: Array2<f32>,
    a: Array2<f32>,
}

impl Dense {
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        let empty = Array2::zeros((0, 0));

        Self {
            dim,
            size: (dim.0 + 1) * dim.1,
            act_fn,
            x: empty.clone(),
            z: empty.clone(),
            a: empty,
        }
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the `(input, output)` dimensions of this layer.
    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    /// Computes `act(x * w + b)` and caches the intermediates.
    ///
    /// # Arguments
    /// * `params` - This layer's parameter slice, of length `size()`.
    /// * `x` - The input batch, one row per sample.
    ///
    /// # Returns
    /// A view of the layer output, valid until the next forward call.
    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> ArrayView2<'_, f32> {
        let (w, b) = self.view_params(params);
        let shape = (x.nrows(), self.dim.1);

        self.z = Array2::zeros(shape);
        linalg::general_mat_mul(1.0, &x, &w, 0.0, &mut self.z);
        self.z += &b;

        self.x = x.to_owned();

        let Some(act_fn) = self.act_fn else {
            return self.z.view();
        };

        self.a = self.z.mapv(|z| act_fn.f(z));
        self.a.view()
    }

    /// Backpropagates `d`, the loss gradient w.r.t. this layer's output.
    ///
    /// Writes the parameter gradient into `grad` (overwriting it) and
    /// returns the loss gradient w.r.t. this layer's input.
    pub fn backward(&mut self, params: &[f32], grad: &mut [f32], mut d: Array2<f32>) -> Array2<f32> {
        if let Some(act_fn) = self.act_fn {
            d.zip_mut_with(&self.a, |d, &a| *d *= act_fn.df_from_output(a));
        }

        let (mut dw, mut db) = self.view_grad(grad);
        linalg::general_mat_mul(1.0, &self.x.t(), &d, 0.0, &mut dw);
        db.assign(&d.sum_axis(Axis(0)));

        let (w, _) = self.view_params(params);
        let mut d_prev = Array2::zeros((d.nrows(), w.nrows()));
        linalg::general_mat_mul(1.0, &d, &w.t(), 0.0, &mut d_prev);

        d_prev
    }

    /// Gives a view of the raw gradient slice as this layer's delta weights and delta biases.
    fn view_grad<'a>(&self, grad: &'a mut [f32]) -> (ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>) {
        let w_size = self.size - self.dim.1;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw).unwrap();
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw).unwrap();
        (dw, db)
    }

    /// Gives a view of the raw parameter slice as this layer's weights and biases.
    fn view_params<'a>(&self, params: &'a [f32]) -> (ArrayView2<'a, f32>, ArrayView1<'a, f32>) {
        let w_size = self.size - self.dim.1;
        let weights = ArrayView2::from_shape(self.dim, &params[..w_size]).unwrap();
        let biases = ArrayView1::from_shape(self.dim.1, &params[w_size..]).unwrap();
        (weights, biases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn forward_matches_hand_computation() {
        let mut layer = Dense::new((2, 1), None);
        // w = [[0.5], [-1.0]], b = [0.25]
        let params = [0.5, -1.0, 0.25];

        let x = array![[2.0, 1.0], [0.0, 4.0]];
        let y = layer.forward(&params, x.view());

        assert_eq!(y, array![[0.25], [-3.75]]);
    }

    #[test]
    fn backward_produces_expected_gradients() {
        let mut layer = Dense::new((2, 1), None);
        let params = [0.5, -1.0, 0.0];
        let mut grad = [0.0; 3];

        let x = array![[1.0, 2.0], [3.0, 4.0]];
        layer.forward(&params, x.view());

        let d = array![[1.0], [1.0]];
        let d_prev = layer.backward(&params, &mut grad, d);

        // dw = x^T * d, db = sum(d), d_prev = d * w^T
        assert_eq!(grad, [4.0, 6.0, 2.0]);
        assert_eq!(d_prev, array![[0.5, -1.0], [0.5, -1.0]]);
    }

    #[test]
    fn tanh_backward_uses_activation_derivative() {
        let mut layer = Dense::new((1, 1), Some(ActFn::Tanh));
        let params = [1.0, 0.0];
        let mut grad = [0.0; 2];

        let x = array![[0.5]];
        let a = layer.forward(&params, x.view()).to_owned();
        let d_prev = layer.backward(&params, &mut grad, array![[1.0]]);

        let df = 1.0 - a[[0, 0]] * a[[0, 0]];
        assert!((grad[0] - 0.5 * df).abs() < 1e-6);
        assert!((d_prev[[0, 0]] - df).abs() < 1e-6);
    }
}
