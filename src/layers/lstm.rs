/// Multi-layer LSTM over sequence-major input
///
/// Gate layout and parameter names follow the common `(i, f, g, o)`
/// convention: `weight_ih_l{k}` is `[4 * hidden, input]`, `weight_hh_l{k}`
/// is `[4 * hidden, hidden]`, each with its own bias.
use candle_core::{Result, Tensor, D};
use candle_nn::{ops, Init, VarBuilder};
use crate::utils::{dropout, fan_bound};

/// A single LSTM layer
pub struct LstmLayer {
    w_ih: Tensor,
    w_hh: Tensor,
    b_ih: Tensor,
    b_hh: Tensor,
    hidden_size: usize,
}

impl LstmLayer {
    pub fn new(
        input_size: usize,
        hidden_size: usize,
        layer_idx: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let bound = fan_bound(hidden_size);
        let init = Init::Uniform { lo: -bound, up: bound };
        let gates = 4 * hidden_size;

        let w_ih = vb.get_with_hints((gates, input_size), &format!("weight_ih_l{}", layer_idx), init)?;
        let w_hh = vb.get_with_hints((gates, hidden_size), &format!("weight_hh_l{}", layer_idx), init)?;
        let b_ih = vb.get_with_hints(gates, &format!("bias_ih_l{}", layer_idx), init)?;
        let b_hh = vb.get_with_hints(gates, &format!("bias_hh_l{}", layer_idx), init)?;

        Ok(Self {
            w_ih,
            w_hh,
            b_ih,
            b_hh,
            hidden_size,
        })
    }

    /// Run the layer over a whole sequence
    ///
    /// # Arguments
    /// * `xs` - Input [seq_len, batch, input_size]
    /// * `h0` - Initial short-term state [batch, hidden_size]
    /// * `c0` - Initial long-term state [batch, hidden_size]
    ///
    /// # Returns
    /// Tuple of (outputs [seq_len, batch, hidden_size], h_n, c_n)
    pub fn forward(&self, xs: &Tensor, h0: &Tensor, c0: &Tensor) -> Result<(Tensor, Tensor, Tensor)> {
        let (seq_len, batch_size, input_size) = xs.dims3()?;
        let gates = 4 * self.hidden_size;

        // Input contributions for every time step in a single matmul
        let xs_gates = xs
            .reshape((seq_len * batch_size, input_size))?
            .matmul(&self.w_ih.t()?)?
            .broadcast_add(&self.b_ih)?
            .reshape((seq_len, batch_size, gates))?;
        let w_hh_t = self.w_hh.t()?;

        let mut h = h0.clone();
        let mut c = c0.clone();
        let mut outputs = Vec::with_capacity(seq_len);

        for t in 0..seq_len {
            let recurrent = h.matmul(&w_hh_t)?.broadcast_add(&self.b_hh)?;
            let all_gates = (xs_gates.get(t)? + recurrent)?;
            let chunks = all_gates.chunk(4, D::Minus1)?;

            let i = ops::sigmoid(&chunks[0])?;
            let f = ops::sigmoid(&chunks[1])?;
            let g = chunks[2].tanh()?;
            let o = ops::sigmoid(&chunks[3])?;

            c = (f.mul(&c)? + i.mul(&g)?)?;
            h = o.mul(&c.tanh()?)?;
            outputs.push(h.clone());
        }

        Ok((Tensor::stack(&outputs, 0)?, h, c))
    }
}

/// Stack of LSTM layers with dropout between layers
pub struct Lstm {
    layers: Vec<LstmLayer>,
    hidden_size: usize,
    dropout: f32,
}

impl Lstm {
    pub fn new(
        input_size: usize,
        hidden_size: usize,
        num_layers: usize,
        dropout: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut layers = Vec::with_capacity(num_layers);
        for i in 0..num_layers {
            let layer_input = if i == 0 { input_size } else { hidden_size };
            layers.push(LstmLayer::new(layer_input, hidden_size, i, vb.clone())?);
        }

        // A single layer has no inter-layer dropout
        let dropout = if num_layers > 1 { dropout } else { 0.0 };

        Ok(Self {
            layers,
            hidden_size,
            dropout,
        })
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `xs` - Input [seq_len, batch, input_size]
    /// * `h0`, `c0` - Initial states [num_layers, batch, hidden_size]
    /// * `train` - Apply inter-layer dropout
    ///
    /// # Returns
    /// Tuple of (outputs of the last layer, h_n, c_n), states stacked per layer
    pub fn forward(
        &self,
        xs: &Tensor,
        h0: &Tensor,
        c0: &Tensor,
        train: bool,
    ) -> Result<(Tensor, Tensor, Tensor)> {
        let mut layer_input = xs.clone();
        let mut h_n = Vec::with_capacity(self.layers.len());
        let mut c_n = Vec::with_capacity(self.layers.len());

        for (idx, layer) in self.layers.iter().enumerate() {
            let (output, h, c) = layer.forward(&layer_input, &h0.get(idx)?, &c0.get(idx)?)?;
            h_n.push(h);
            c_n.push(c);

            layer_input = if idx + 1 < self.layers.len() {
                dropout(&output, self.dropout, train)?
            } else {
                output
            };
        }

        Ok((layer_input, Tensor::stack(&h_n, 0)?, Tensor::stack(&c_n, 0)?))
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }
}
