/// Utility functions for parameter initialization and regularization
use candle_core::{Device, Result, Shape, Tensor};
use rand::distributions::{Distribution, Uniform};
use rand::Rng;

/// Initialization rule for a single parameter tensor
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamInit {
    /// Uniform on [-bound, bound]
    Uniform(f64),
    Zeros,
}

impl ParamInit {
    /// Draw a fresh f32 tensor following this rule
    pub fn sample<R: Rng + ?Sized, S: Into<Shape>>(
        &self,
        shape: S,
        device: &Device,
        rng: &mut R,
    ) -> Result<Tensor> {
        let shape = shape.into();
        match *self {
            ParamInit::Uniform(bound) => {
                let bound = bound as f32;
                let dist = Uniform::new_inclusive(-bound, bound);
                let values: Vec<f32> = (0..shape.elem_count()).map(|_| dist.sample(rng)).collect();
                Tensor::from_vec(values, shape, device)
            }
            ParamInit::Zeros => Tensor::zeros(shape, candle_core::DType::F32, device),
        }
    }
}

/// Bound for variance-scaled uniform init: sqrt(3 / (fan_in + fan_out))
pub fn variance_scaled_bound(fan_in: usize, fan_out: usize) -> f64 {
    (3.0 / (fan_in + fan_out) as f64).sqrt()
}

/// Bound used for recurrent and bias parameters: 1 / sqrt(fan)
pub fn fan_bound(fan: usize) -> f64 {
    1.0 / (fan as f64).sqrt()
}

/// Calculate the number of parameters in a tensor
pub fn count_parameters(tensor: &Tensor) -> usize {
    tensor.dims().iter().product()
}

/// Dropout that is a no-op outside training or when `p` is zero
pub fn dropout(xs: &Tensor, p: f32, train: bool) -> Result<Tensor> {
    if train && p > 0.0 {
        candle_nn::ops::dropout(xs, p)
    } else {
        Ok(xs.clone())
    }
}
