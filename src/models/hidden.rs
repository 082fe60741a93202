/// Recurrent state carried between forward passes
use candle_core::{DType, Device, Result, Tensor};
use crate::LmError;

/// Arbitrarily nested hidden state
///
/// Repackaging walks the tree and detaches every leaf, keeping values and
/// dropping computation history.
#[derive(Debug, Clone)]
pub enum HiddenState {
    Leaf(Tensor),
    Node(Vec<HiddenState>),
}

impl HiddenState {
    /// Value-identical copy with no history at any depth
    pub fn repackage(&self) -> Self {
        match self {
            HiddenState::Leaf(t) => HiddenState::Leaf(t.detach()),
            HiddenState::Node(children) => {
                HiddenState::Node(children.iter().map(Self::repackage).collect())
            }
        }
    }
}

/// LSTM state: short-term `h` and long-term `c`, each
/// [num_layers, batch, hidden_size]
#[derive(Debug, Clone)]
pub struct LstmHidden {
    pub h: Tensor,
    pub c: Tensor,
}

impl LstmHidden {
    pub fn new(h: Tensor, c: Tensor) -> Self {
        Self { h, c }
    }

    /// Zero state with no history
    pub fn zeros(
        num_layers: usize,
        batch_size: usize,
        hidden_size: usize,
        device: &Device,
    ) -> Result<Self> {
        let h = Tensor::zeros((num_layers, batch_size, hidden_size), DType::F32, device)?;
        let c = Tensor::zeros((num_layers, batch_size, hidden_size), DType::F32, device)?;
        Ok(Self { h, c })
    }

    /// Cut history while keeping values
    pub fn detach(&self) -> Self {
        Self {
            h: self.h.detach(),
            c: self.c.detach(),
        }
    }
}

impl From<LstmHidden> for HiddenState {
    fn from(hidden: LstmHidden) -> Self {
        HiddenState::Node(vec![HiddenState::Leaf(hidden.h), HiddenState::Leaf(hidden.c)])
    }
}

impl TryFrom<HiddenState> for LstmHidden {
    type Error = LmError;

    fn try_from(state: HiddenState) -> crate::Result<Self> {
        match state {
            HiddenState::Node(children) => match <[HiddenState; 2]>::try_from(children) {
                Ok([HiddenState::Leaf(h), HiddenState::Leaf(c)]) => Ok(Self { h, c }),
                _ => Err(LmError::ShapeMismatch(
                    "LSTM state must be a node of exactly two tensors (h, c)".to_string(),
                )),
            },
            HiddenState::Leaf(_) => Err(LmError::ShapeMismatch(
                "LSTM state must be a (h, c) pair, got a single tensor".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Var;

    fn sum_abs_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
        (a - b)?.abs()?.sum_all()?.to_scalar::<f32>()
    }

    fn collect_leaves<'a>(state: &'a HiddenState, out: &mut Vec<&'a Tensor>) {
        match state {
            HiddenState::Leaf(t) => out.push(t),
            HiddenState::Node(children) => {
                for child in children {
                    collect_leaves(child, out);
                }
            }
        }
    }

    #[test]
    fn test_zeros_shape() -> Result<()> {
        let hidden = LstmHidden::zeros(2, 3, 4, &Device::Cpu)?;
        assert_eq!(hidden.h.dims(), &[2, 3, 4]);
        assert_eq!(hidden.c.dims(), &[2, 3, 4]);
        assert_eq!(hidden.h.sum_all()?.to_scalar::<f32>()?, 0.0);
        Ok(())
    }

    #[test]
    fn test_repackage_preserves_values() -> Result<()> {
        let hidden = LstmHidden::zeros(1, 2, 3, &Device::Cpu)?;
        let state = HiddenState::from(hidden.clone());
        let repackaged = LstmHidden::try_from(state.repackage()).unwrap();

        assert!(sum_abs_diff(&hidden.h, &repackaged.h)? < 1e-9);
        assert!(sum_abs_diff(&hidden.c, &repackaged.c)? < 1e-9);

        Ok(())
    }

    #[test]
    fn test_repackage_drops_history_at_every_depth() -> Result<()> {
        let device = Device::Cpu;
        let var = Var::ones((2, 2), DType::F32, &device)?;
        let derived = (var.as_tensor() * 3.0)?;
        assert!(derived.track_op());

        let state = HiddenState::Node(vec![
            HiddenState::Node(vec![HiddenState::Leaf(derived.clone())]),
            HiddenState::Node(vec![HiddenState::Node(vec![HiddenState::Leaf(
                var.as_tensor().clone(),
            )])]),
        ]);

        let repackaged = state.repackage();
        let mut leaves = Vec::new();
        collect_leaves(&repackaged, &mut leaves);
        assert_eq!(leaves.len(), 2);
        for leaf in &leaves {
            assert!(!leaf.track_op());
        }
        assert!(sum_abs_diff(leaves[0], &derived)? < 1e-9);
        assert_eq!(leaves[1].sum_all()?.to_scalar::<f32>()?, 4.0);

        Ok(())
    }

    #[test]
    fn test_malformed_tree_is_rejected() -> Result<()> {
        let t = Tensor::zeros((1, 1, 1), DType::F32, &Device::Cpu)?;

        let single = HiddenState::Leaf(t.clone());
        assert!(matches!(LstmHidden::try_from(single), Err(LmError::ShapeMismatch(_))));

        let triple = HiddenState::Node(vec![
            HiddenState::Leaf(t.clone()),
            HiddenState::Leaf(t.clone()),
            HiddenState::Leaf(t),
        ]);
        assert!(matches!(LstmHidden::try_from(triple), Err(LmError::ShapeMismatch(_))));

        Ok(())
    }
}
