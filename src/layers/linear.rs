/// Fully connected layer used for the projection and the decoder
use candle_core::{Result, Tensor};
use candle_nn::{Init, VarBuilder};
use crate::utils::fan_bound;

pub struct Linear {
    weight: Tensor,
    bias: Option<Tensor>,
}

impl Linear {
    /// Create new Linear layer
    ///
    /// # Arguments
    /// * `in_features` - Input dimension
    /// * `out_features` - Output dimension
    /// * `bias` - Whether to include bias
    /// * `vb` - VarBuilder for parameter initialization
    pub fn new(
        in_features: usize,
        out_features: usize,
        bias: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let bound = fan_bound(in_features);
        let init = Init::Uniform { lo: -bound, up: bound };

        let weight = vb.get_with_hints((out_features, in_features), "weight", init)?;
        let bias = if bias {
            Some(vb.get_with_hints(out_features, "bias", init)?)
        } else {
            None
        };

        Ok(Self { weight, bias })
    }

    /// input @ weight^T + bias, broadcasting over leading dimensions
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let output = input.broadcast_matmul(&self.weight.t()?)?;
        match &self.bias {
            Some(bias) => output.broadcast_add(bias),
            None => Ok(output),
        }
    }

    pub fn in_features(&self) -> usize {
        self.weight.dims()[1]
    }

    pub fn out_features(&self) -> usize {
        self.weight.dims()[0]
    }
}
