use std::{cell::RefCell, rc::Rc};

use ndarray::{Array2, ArrayView2};
use rand::Rng;

use super::{BatchNorm, Dense, Mode};
use crate::{Result, arch::activations::ActFn, initialization::ParamGen};

/// The layers a `Sequential` can be composed of.
#[derive(Debug, Clone)]
pub enum Layer {
    Dense(Dense),
    BatchNorm(BatchNorm),
}

impl Layer {
    pub fn dense(dim: (usize, usize), act_fn: Option<ActFn>) -> Self {
        Self::Dense(Dense::new(dim, act_fn))
    }

    pub fn batch_norm(dim: usize, act_fn: Option<ActFn>) -> Self {
        Self::BatchNorm(BatchNorm::new(dim, act_fn))
    }

    /// Returns the amount of trainable parameters of the layer.
    pub fn size(&self) -> usize {
        match self {
            Self::Dense(l) => l.size(),
            Self::BatchNorm(l) => l.size(),
        }
    }

    /// Returns the amount of non trainable running statistics of the layer.
    pub fn stats_size(&self) -> usize {
        match self {
            Self::Dense(_) => 0,
            Self::BatchNorm(l) => l.stats_size(),
        }
    }

    pub fn forward(&mut self, params: &[f32], x: ArrayView2<f32>, mode: Mode) -> Result<Array2<f32>> {
        match self {
            Self::Dense(l) => l.forward(params, x),
            Self::BatchNorm(l) => l.forward(params, x, mode),
        }
    }

    pub fn backward(
        &mut self,
        params: &[f32],
        grad: &mut [f32],
        d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        match self {
            Self::Dense(l) => l.backward(params, grad, d),
            Self::BatchNorm(l) => l.backward(params, grad, d),
        }
    }

    pub fn param_gen<R: Rng + 'static>(&self, rng: Rc<RefCell<R>>) -> Result<Box<dyn ParamGen>> {
        match self {
            Self::Dense(l) => l.param_gen(rng),
            Self::BatchNorm(l) => Ok(l.param_gen()),
        }
    }

    pub fn running_stats(&self) -> Vec<f32> {
        match self {
            Self::Dense(_) => Vec::new(),
            Self::BatchNorm(l) => l.running_stats(),
        }
    }

    pub fn load_running_stats(&mut self, stats: &[f32]) -> Result<()> {
        match self {
            Self::Dense(_) => Ok(()),
            Self::BatchNorm(l) => l.load_running_stats(stats),
        }
    }
}
