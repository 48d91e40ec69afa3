use ndarray::prelude::*;

use super::Mode;
use crate::{
    MlErr, Result,
    arch::activations::ActFn,
    initialization::{ConstParamGen, ParamGen},
};

const MOMENTUM: f32 = 0.1;
const EPSILON: f32 = 1e-5;

/// Batch normalization over the features of its input, optionally followed by an activation.
///
/// Its trainable parameters are the `dim` scales followed by the `dim` shifts. The running mean
/// and variance are not trainable, they're part of the model state and travel with checkpoints.
#[derive(Debug, Clone)]
pub struct BatchNorm {
    dim: usize,
    act_fn: Option<ActFn>,
    running_mean: Array1<f32>,
    running_var: Array1<f32>,

    // Forward metadata
    x_hat: Array2<f32>,
    inv_std: Array1<f32>,
    z: Array2<f32>,
    batch_stats: bool,
}

impl BatchNorm {
    /// Creates a new `BatchNorm` layer with zero running mean and unit running variance.
    ///
    /// # Arguments
    /// * `dim` - The amount of features to normalize.
    /// * `act_fn` - An optional activation applied after the affine transform.
    pub fn new(dim: usize, act_fn: Option<ActFn>) -> Self {
        Self {
            dim,
            act_fn,
            running_mean: Array1::zeros(dim),
            running_var: Array1::ones(dim),
            x_hat: Array2::zeros((0, dim)),
            inv_std: Array1::ones(dim),
            z: Array2::zeros((0, dim)),
            batch_stats: false,
        }
    }

    /// Returns the amount of trainable parameters this layer has.
    pub fn size(&self) -> usize {
        2 * self.dim
    }

    /// Returns the amount of running statistics this layer keeps.
    pub fn stats_size(&self) -> usize {
        2 * self.dim
    }

    /// Normalizes `x`, in `Mode::Train` with the statistics of `x` itself, in `Mode::Eval` with
    /// the running ones.
    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>, mode: Mode) -> Result<Array2<f32>> {
        if x.ncols() != self.dim {
            return Err(MlErr::SizeMismatch {
                what: "batch norm inputs",
                got: x.ncols(),
                expected: self.dim,
            });
        }

        let (gamma, beta) = self.view_params(params)?;

        let mean = match mode {
            Mode::Train => {
                let n = x.nrows();
                let mean = x.mean_axis(Axis(0)).ok_or(MlErr::SizeMismatch {
                    what: "batch norm batch",
                    got: 0,
                    expected: 1,
                })?;
                let var = x.var_axis(Axis(0), 0.0);

                self.running_mean *= 1. - MOMENTUM;
                self.running_mean.scaled_add(MOMENTUM, &mean);

                // A single sample carries no information about the spread.
                if n > 1 {
                    let unbiased = &var * (n as f32 / (n - 1) as f32);
                    self.running_var *= 1. - MOMENTUM;
                    self.running_var.scaled_add(MOMENTUM, &unbiased);
                }

                self.inv_std = var.mapv(|v| 1. / (v + EPSILON).sqrt());
                self.batch_stats = true;
                mean
            }
            Mode::Eval => {
                self.inv_std = self.running_var.mapv(|v| 1. / (v + EPSILON).sqrt());
                self.batch_stats = false;
                self.running_mean.clone()
            }
        };

        let mut x_hat = &x - &mean;
        x_hat *= &self.inv_std;

        let mut z = &x_hat * &gamma;
        z += &beta;

        self.x_hat = x_hat;
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

        if grad.len() != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "batch norm gradient",
                got: grad.len(),
                expected: self.size(),
            });
        }

        let (gamma, _) = self.view_params(params)?;
        let (dgamma, dbeta) = grad.split_at_mut(self.dim);

        ArrayViewMut1::from(dgamma).assign(&(&d * &self.x_hat).sum_axis(Axis(0)));
        ArrayViewMut1::from(dbeta).assign(&d.sum_axis(Axis(0)));

        let d_x_hat = &d * &gamma;

        if !self.batch_stats {
            return Ok(d_x_hat * &self.inv_std);
        }

        let n = d.nrows() as f32;
        let sum_d = d_x_hat.sum_axis(Axis(0));
        let sum_d_x_hat = (&d_x_hat * &self.x_hat).sum_axis(Axis(0));

        let mut dx = d_x_hat * n;
        dx -= &sum_d;
        dx -= &(&self.x_hat * &sum_d_x_hat);
        dx *= &(&self.inv_std / n);

        Ok(dx)
    }

    /// Builds the generator of this layer's initial parameters: unit scales and zero shifts.
    pub fn param_gen(&self) -> Box<dyn ParamGen> {
        Box::new(ConstParamGen::new([(1., self.dim), (0., self.dim)]))
    }

    /// Returns the running mean followed by the running variance.
    pub fn running_stats(&self) -> Vec<f32> {
        self.running_mean
            .iter()
            .chain(self.running_var.iter())
            .copied()
            .collect()
    }

    /// Overwrites the running statistics with a previously saved copy.
    pub fn load_running_stats(&mut self, stats: &[f32]) -> Result<()> {
        if stats.len() != self.stats_size() {
            return Err(MlErr::SizeMismatch {
                what: "batch norm running statistics",
                got: stats.len(),
                expected: self.stats_size(),
            });
        }

        let (mean, var) = stats.split_at(self.dim);
        self.running_mean = Array1::from(mean.to_vec());
        self.running_var = Array1::from(var.to_vec());
        Ok(())
    }

    fn view_params<'a>(&self, params: &'a [f32]) -> Result<(ArrayView1<'a, f32>, ArrayView1<'a, f32>)> {
        if params.len() != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "batch norm parameters",
                got: params.len(),
                expected: self.size(),
            });
        }

        let (gamma, beta) = params.split_at(self.dim);
        Ok((ArrayView1::from(gamma), ArrayView1::from(beta)))
    }
}
