use std::{cell::RefCell, ops::Range, rc::Rc};

use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::{
    Mode, Model,
    activations::ActFn,
    layers::Layer,
};
use crate::{
    MlErr, Result,
    initialization::{ChainedParamGen, ParamGen},
};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
#[derive(Debug, Clone)]
pub struct Sequential {
    layers: Vec<Layer>,
    mode: Mode,
}

impl Sequential {
    /// Creates a new `Sequential`.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance, in training mode.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        Self {
            layers: layers.into_iter().collect(),
            mode: Mode::Train,
        }
    }

    /// Creates a fully connected regressor with a scalar output.
    ///
    /// Each hidden layer is a `Dense` followed, when `batch_norm` is set, by a `BatchNorm`, the
    /// ReLU goes after the normalization.
    ///
    /// # Arguments
    /// * `x_size` - The amount of input features.
    /// * `hidden` - The width of each hidden layer.
    /// * `batch_norm` - Whether to normalize the hidden layers.
    /// * `output` - An optional activation for the output, e.g. `ActFn::exp` to keep it positive.
    pub fn mlp(x_size: usize, hidden: &[usize], batch_norm: bool, output: Option<ActFn>) -> Self {
        let mut layers = Vec::with_capacity(2 * hidden.len() + 1);
        let mut fan_in = x_size;

        for &width in hidden {
            if batch_norm {
                layers.push(Layer::dense((fan_in, width), None));
                layers.push(Layer::batch_norm(width, Some(ActFn::relu())));
            } else {
                layers.push(Layer::dense((fan_in, width), Some(ActFn::relu())));
            }

            fan_in = width;
        }

        layers.push(Layer::dense((fan_in, 1), output));
        Self::new(layers)
    }

    /// Returns the amount of running statistics in the model.
    pub fn stats_size(&self) -> usize {
        self.layers.iter().map(|layer| layer.stats_size()).sum()
    }

    /// Draws the initial parameters of every layer, in order.
    ///
    /// # Arguments
    /// * `rng` - The random number generator, the same seed yields the same parameters.
    pub fn init_params<R: Rng + 'static>(&self, rng: R) -> Result<Vec<f32>> {
        let rng = Rc::new(RefCell::new(rng));
        let param_gens = self
            .layers
            .iter()
            .map(|layer| layer.param_gen(rng.clone()))
            .collect::<Result<Vec<_>>>()?;

        let size = self.size();
        let params = ChainedParamGen::new(param_gens)
            .sample(size)
            .unwrap_or_default();

        if params.len() != size {
            return Err(MlErr::SizeMismatch {
                what: "initial parameters",
                got: params.len(),
                expected: size,
            });
        }

        Ok(params)
    }

    fn check_params(&self, len: usize) -> Result<()> {
        let size = self.size();

        if len != size {
            return Err(MlErr::SizeMismatch {
                what: "model parameters",
                got: len,
                expected: size,
            });
        }

        Ok(())
    }
}

impl Model for Sequential {
    fn size(&self) -> usize {
        self.layers.iter().map(|layer| layer.size()).sum()
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn forward(&mut self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_params(params.len())?;

        let mode = self.mode;
        let mut rest = params;
        let mut a = x.to_owned();

        for layer in self.layers.iter_mut() {
            let (head, tail) = rest.split_at(layer.size());
            a = layer.forward(head, a.view(), mode)?;
            rest = tail;
        }

        Ok(a)
    }

    fn backward(&mut self, params: &[f32], grad: &mut [f32], mut d: Array2<f32>) -> Result<()> {
        self.check_params(params.len())?;
        self.check_params(grad.len())?;

        let mut end = params.len();

        for layer in self.layers.iter_mut().rev() {
            let start = end - layer.size();
            d = layer.backward(&params[start..end], &mut grad[start..end], d)?;
            end = start;
        }

        Ok(())
    }

    fn running_stats(&self) -> Vec<f32> {
        self.layers
            .iter()
            .flat_map(|layer| layer.running_stats())
            .collect()
    }

    fn load_running_stats(&mut self, stats: &[f32]) -> Result<()> {
        let expected = self.stats_size();

        if stats.len() != expected {
            return Err(MlErr::SizeMismatch {
                what: "running statistics",
                got: stats.len(),
                expected,
            });
        }

        let mut rest = stats;

        for layer in self.layers.iter_mut() {
            let (head, tail) = rest.split_at(layer.stats_size());
            layer.load_running_stats(head)?;
            rest = tail;
        }

        Ok(())
    }

    fn first_weights(&self) -> Option<Range<usize>> {
        match self.layers.first()? {
            Layer::Dense(dense) => {
                let (fan_in, fan_out) = dense.dim();
                Some(0..fan_in * fan_out)
            }
            Layer::BatchNorm(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn mlp_layout() {
        let model = Sequential::mlp(3, &[4, 2], true, None);

        // dense 3x4 + bn 4 + dense 4x2 + bn 2 + dense 2x1
        assert_eq!(model.size(), 16 + 8 + 10 + 4 + 3);
        assert_eq!(model.stats_size(), 8 + 4);
        assert_eq!(model.first_weights(), Some(0..12));
    }

    #[test]
    fn initialization_is_deterministic_given_a_seed() {
        let model = Sequential::mlp(3, &[4], true, None);
        let a = model.init_params(StdRng::seed_from_u64(1)).unwrap();
        let b = model.init_params(StdRng::seed_from_u64(1)).unwrap();
        let c = model.init_params(StdRng::seed_from_u64(2)).unwrap();

        assert_eq!(a.len(), model.size());
        assert_eq!(a, b);
        assert_ne!(a, c);
        // batch norm starts as the identity
        assert_eq!(&a[16..20], [1.0; 4]);
        assert_eq!(&a[20..24], [0.0; 4]);
    }

    #[test]
    fn eval_mode_is_independent_of_the_batch() {
        let mut model = Sequential::mlp(2, &[3], true, None);
        let params = model.init_params(StdRng::seed_from_u64(5)).unwrap();
        model.set_mode(Mode::Eval);

        let batch = array![[0.1, 0.2], [3.0, -1.0], [-2.0, 0.5]];
        let together = model.forward(&params, batch.view()).unwrap();
        let alone = model.forward(&params, batch.slice(ndarray::s![0..1, ..])).unwrap();

        assert!((together[[0, 0]] - alone[[0, 0]]).abs() < 1e-5);
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut model = Sequential::new([
            Layer::dense((2, 3), None),
            Layer::batch_norm(3, Some(ActFn::sigmoid(1.0))),
            Layer::dense((3, 1), Some(ActFn::exp())),
        ]);
        let params = model.init_params(StdRng::seed_from_u64(9)).unwrap();
        let x = array![[0.1, 0.2], [1.0, -1.0], [-0.7, 0.5], [0.3, 0.9]];

        let y = model.forward(&params, x.view()).unwrap();
        let mut grad = vec![0.0; params.len()];
        model
            .backward(&params, &mut grad, Array2::ones(y.dim()))
            .unwrap();

        let h = 1e-2;
        for i in 0..params.len() {
            let mut up = params.clone();
            let mut down = params.clone();
            up[i] += h;
            down[i] -= h;

            let l_up = model.forward(&up, x.view()).unwrap().sum();
            let l_down = model.forward(&down, x.view()).unwrap().sum();
            let numeric = (l_up - l_down) / (2.0 * h);

            assert!(
                (numeric - grad[i]).abs() < 1e-2 * (1.0 + grad[i].abs()),
                "param {i}: {numeric} vs {}",
                grad[i]
            );
        }
    }
}
