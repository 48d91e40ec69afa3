use std::{cell::RefCell, rc::Rc};

use ndarray::{linalg, prelude::*};
use rand::Rng;

use crate::{
    MlErr, Result,
    arch::activations::ActFn,
    initialization::{ChainedParamGen, ParamGen, RandParamGen},
};

/// A fully connected layer: `a = act_fn(x · W + b)`.
///
/// Its parameters are laid out as the row major `dim.0 x dim.1` weight matrix followed by the
/// `dim.1` biases.
#[derive(Debug, Clone)]
pub struct Dense {
    dim: (usize, usize),
    act_fn: Option<ActFn>,
    size: usize,

    // Forward metadata
    x: Array2<f32>,
    z: Array2<f32>,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `dim` - The amount of inputs and outputs.
    /// * `act_fn` - An optional activation applied to the outputs.
    pub fn new(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        let zeros = Array2::zeros((0, 0));

        Self {
            dim,
            size: (dim.0 + 1) * dim.1,
            act_fn,
            x: zeros.clone(),
            z: zeros,
        }
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    /// Makes a forward pass through the layer, remembering what `backward` needs.
    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.dim.0 {
            return Err(MlErr::SizeMismatch {
                what: "dense layer inputs",
                got: x.ncols(),
                expected: self.dim.0,
            });
        }

        let (w, b) = self.view_params(params)?;

        let mut z = x.dot(&w);
        z += &b;

        self.x = x.to_owned();
        self.z = z;

        let Some(ref act_fn) = self.act_fn else {
            return Ok(self.z.clone());
        };

        Ok(self.z.mapv(|z| act_fn.f(z)))
    }

    /// Writes this layer's gradient into `grad` and returns the delta of its inputs.
    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        if let Some(act_fn) = &self.act_fn {
            d.zip_mut_with(&self.z, |d, &z| *d *= act_fn.df(z));
        }

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &self.x.t(), &d, 0.0, &mut dw);
        db.assign(&d.sum_axis(Axis(0)));

        let (w, _) = self.view_params(params)?;
        Ok(d.dot(&w.t()))
    }

    /// Builds the generator of this layer's initial parameters.
    pub fn param_gen<R: Rng + 'static>(&self, rng: Rc<RefCell<R>>) -> Result<Box<dyn ParamGen>> {
        let w_size = self.size - self.dim.1;
        let weights = RandParamGen::fan_in_uniform(rng.clone(), w_size, self.dim.0)?;
        let biases = RandParamGen::fan_in_uniform(rng, self.dim.1, self.dim.0)?;

        Ok(Box::new(ChainedParamGen::new(vec![
            Box::new(weights),
            Box::new(biases),
        ])))
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        self.check_len(grad.len())?;

        let w_size = self.size - self.dim.1;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw).map_err(|_| self.mismatch(w_size))?;
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw).map_err(|_| self.mismatch(w_size))?;
        Ok((dw, db))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    fn view_params<'a>(&self, params: &'a [f32]) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
        self.check_len(params.len())?;

        let w_size = self.size - self.dim.1;
        let weights =
            ArrayView2::from_shape(self.dim, &params[..w_size]).map_err(|_| self.mismatch(w_size))?;
        let biases = ArrayView1::from_shape(self.dim.1, &params[w_size..])
            .map_err(|_| self.mismatch(w_size))?;
        Ok((weights, biases))
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.size {
            return Err(self.mismatch(len));
        }

        Ok(())
    }

    fn mismatch(&self, got: usize) -> MlErr {
        MlErr::SizeMismatch {
            what: "dense layer parameters",
            got,
            expected: self.size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn forward_is_an_affine_map() {
        let mut dense = Dense::new((2, 1), None);
        let params = [2.0, -1.0, 0.5];
        let y = dense.forward(&params, array![[1.0, 1.0], [3.0, 0.0]].view()).unwrap();

        assert_eq!(y, array![[1.5], [6.5]]);
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut dense = Dense::new((2, 2), Some(ActFn::sigmoid(1.0)));
        let params = [0.3, -0.2, 0.1, 0.4, 0.05, -0.1];
        let x = array![[0.5, -1.0], [1.5, 0.2], [-0.3, 0.8]];

        // loss = sum of outputs
        let y = dense.forward(&params, x.view()).unwrap();
        let mut grad = [0.0; 6];
        dense
            .backward(&params, &mut grad, Array2::ones(y.dim()))
            .unwrap();

        let h = 1e-2;
        for i in 0..params.len() {
            let mut up = params;
            let mut down = params;
            up[i] += h;
            down[i] -= h;

            let l_up = dense.forward(&up, x.view()).unwrap().sum();
            let l_down = dense.forward(&down, x.view()).unwrap().sum();
            let numeric = (l_up - l_down) / (2.0 * h);

            assert!((numeric - grad[i]).abs() < 1e-3, "param {i}: {numeric} vs {}", grad[i]);
        }
    }

    #[test]
    fn wrong_parameter_count_is_an_error() {
        let mut dense = Dense::new((2, 1), None);
        assert!(dense.forward(&[1.0, 2.0], array![[1.0, 1.0]].view()).is_err());
    }
}
