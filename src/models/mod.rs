/// Character-level LSTM language model
use std::collections::HashMap;
use std::sync::MutexGuard;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::LanguageModelConfig;
use crate::device::ComputeTarget;
use crate::dictionary::Dictionary;
use crate::layers::{CharEmbedding, Linear, Lstm};
use crate::utils::{count_parameters, dropout, fan_bound, variance_scaled_bound, ParamInit};
use crate::LmError;

pub mod generation;
pub mod hidden;
pub mod loader;

pub use hidden::{HiddenState, LstmHidden};

/// Encoder, recurrent core, optional projection and decoder
///
/// All parameters live in one `VarMap` keyed by their persisted names
/// (`encoder.weight`, `rnn.weight_ih_l0`, `proj.weight`, `decoder.bias`, ...).
pub struct LanguageModel {
    config: LanguageModelConfig,
    dictionary: Dictionary,
    varmap: VarMap,

    // Layers
    encoder: CharEmbedding,
    rnn: Lstm,
    proj: Option<Linear>,
    decoder: Linear,

    /// Optional state slot for callers that keep state on the model
    hidden: Option<LstmHidden>,
    training: bool,
    device: Device,
}

impl LanguageModel {
    /// Create a model with weights drawn from an entropy-seeded RNG
    pub fn new(
        dictionary: Dictionary,
        config: LanguageModelConfig,
        target: &ComputeTarget,
    ) -> crate::Result<Self> {
        let mut rng = StdRng::from_entropy();
        Self::build(dictionary, config, target.device()?, &mut rng)
    }

    /// Create a model whose initial weights are fixed by `seed`
    pub fn with_seed(
        dictionary: Dictionary,
        config: LanguageModelConfig,
        target: &ComputeTarget,
        seed: u64,
    ) -> crate::Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::build(dictionary, config, target.device()?, &mut rng)
    }

    pub(crate) fn build<R: Rng + ?Sized>(
        dictionary: Dictionary,
        config: LanguageModelConfig,
        device: Device,
        rng: &mut R,
    ) -> crate::Result<Self> {
        config.validate()?;

        let ntoken = dictionary.len();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let encoder = CharEmbedding::new(ntoken, config.embedding_size, vb.pp("encoder"))?;

        let rnn = Lstm::new(
            config.embedding_size,
            config.hidden_size,
            config.nlayers,
            config.dropout,
            vb.pp("rnn"),
        )?;

        let proj = match config.nout {
            Some(nout) => Some(Linear::new(config.hidden_size, nout, true, vb.pp("proj"))?),
            None => None,
        };

        let decoder = Linear::new(config.representation_size(), ntoken, true, vb.pp("decoder"))?;

        let model = Self {
            config,
            dictionary,
            varmap,
            encoder,
            rnn,
            proj,
            decoder,
            hidden: None,
            training: true,
            device,
        };
        model.init_weights(rng)?;

        log::debug!(
            "Built language model: vocab={}, hidden={}, layers={}, nout={:?}, params={}",
            ntoken,
            model.config.hidden_size,
            model.config.nlayers,
            model.config.nout,
            model.num_parameters()?
        );

        Ok(model)
    }

    /// Initialization rule for a named parameter
    fn param_init(&self, name: &str) -> ParamInit {
        let hidden = self.config.hidden_size;
        match name {
            "encoder.weight" | "decoder.weight" => ParamInit::Uniform(0.1),
            "decoder.bias" => ParamInit::Zeros,
            "proj.weight" => {
                let nout = self.config.representation_size();
                ParamInit::Uniform(variance_scaled_bound(nout, hidden))
            }
            // proj.bias and every recurrent parameter
            _ => ParamInit::Uniform(fan_bound(hidden)),
        }
    }

    /// Re-draw every parameter in place
    ///
    /// Parameters are visited in name order so a seeded RNG always lands
    /// on the same values.
    pub fn init_weights<R: Rng + ?Sized>(&self, rng: &mut R) -> crate::Result<()> {
        let vars = self.lock_vars()?;
        let mut names: Vec<&String> = vars.keys().collect();
        names.sort();

        for name in names {
            let var = &vars[name];
            let value = self.param_init(name).sample(var.dims().to_vec(), var.device(), rng)?;
            var.set(&value)?;
        }

        Ok(())
    }

    fn lock_vars(&self) -> crate::Result<MutexGuard<'_, HashMap<String, Var>>> {
        self.varmap
            .data()
            .lock()
            .map_err(|_| LmError::Candle(candle_core::Error::Msg("var map lock poisoned".to_string())))
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `input` - Symbol indices [seq_len, batch]
    /// * `hidden` - State [num_layers, batch, hidden_size] for h and c
    ///
    /// # Returns
    /// Tuple of (logits [seq_len, batch, vocab], representation
    /// [seq_len, batch, nout or hidden_size], new hidden state)
    pub fn forward(
        &self,
        input: &Tensor,
        hidden: &LstmHidden,
    ) -> crate::Result<(Tensor, Tensor, LstmHidden)> {
        self.forward_t(input, hidden, self.training)
    }

    pub(crate) fn forward_t(
        &self,
        input: &Tensor,
        hidden: &LstmHidden,
        train: bool,
    ) -> crate::Result<(Tensor, Tensor, LstmHidden)> {
        let (seq_len, batch_size) = self.check_input(input)?;
        self.check_hidden(hidden, batch_size)?;

        let input = input.to_device(&self.device)?.to_dtype(DType::U32)?;

        let encoded = self.encoder.forward(&input)?;
        let emb = dropout(&encoded, self.config.dropout, train)?;

        let (output, h, c) = self.rnn.forward(&emb, &hidden.h, &hidden.c, train)?;

        let output = match &self.proj {
            Some(proj) => proj.forward(&output)?,
            None => output,
        };
        let output = dropout(&output, self.config.dropout, train)?;

        let width = output.dim(2)?;
        let decoded = self
            .decoder
            .forward(&output.reshape((seq_len * batch_size, width))?)?;
        let logits = decoded.reshape((seq_len, batch_size, self.encoder.vocab_size()))?;

        Ok((logits, output, LstmHidden::new(h, c)))
    }

    fn check_input(&self, input: &Tensor) -> crate::Result<(usize, usize)> {
        let (seq_len, batch_size) = match input.dims() {
            &[seq_len, batch_size] => (seq_len, batch_size),
            dims => {
                return Err(LmError::ShapeMismatch(format!(
                    "input must be [seq_len, batch], got {:?}",
                    dims
                )))
            }
        };
        if seq_len == 0 || batch_size == 0 {
            return Err(LmError::ShapeMismatch(format!(
                "input must be non-empty, got [{}, {}]",
                seq_len, batch_size
            )));
        }

        match input.dtype() {
            DType::U8 | DType::U32 | DType::I64 => {}
            dtype => {
                return Err(LmError::ShapeMismatch(format!(
                    "input must hold integer symbol indices, got {:?}",
                    dtype
                )))
            }
        }

        let ntoken = self.encoder.vocab_size() as i64;
        let indices = input.flatten_all()?.to_dtype(DType::I64)?.to_vec1::<i64>()?;
        if let Some(bad) = indices.into_iter().find(|&idx| idx < 0 || idx >= ntoken) {
            return Err(LmError::ShapeMismatch(format!(
                "symbol index {} outside a dictionary of {} symbols",
                bad, ntoken
            )));
        }

        Ok((seq_len, batch_size))
    }

    fn check_hidden(&self, hidden: &LstmHidden, batch_size: usize) -> crate::Result<()> {
        let expected = [self.rnn.num_layers(), batch_size, self.rnn.hidden_size()];
        for (name, t) in [("h", &hidden.h), ("c", &hidden.c)] {
            if t.dims() != &expected[..] {
                return Err(LmError::ShapeMismatch(format!(
                    "hidden state {} must be {:?}, got {:?}",
                    name,
                    expected,
                    t.dims()
                )));
            }
        }
        Ok(())
    }

    /// Zero state for `batch_size` sequences
    pub fn init_hidden(&self, batch_size: usize) -> crate::Result<LstmHidden> {
        Ok(LstmHidden::zeros(
            self.rnn.num_layers(),
            batch_size,
            self.rnn.hidden_size(),
            &self.device,
        )?)
    }

    pub fn set_hidden(&mut self, hidden: LstmHidden) {
        self.hidden = Some(hidden);
    }

    pub fn hidden(&self) -> Option<&LstmHidden> {
        self.hidden.as_ref()
    }

    pub fn take_hidden(&mut self) -> Option<LstmHidden> {
        self.hidden.take()
    }

    /// Detach every tensor of a (possibly nested) hidden state
    pub fn repackage_hidden(&self, hidden: &HiddenState) -> HiddenState {
        hidden.repackage()
    }

    /// Contextual representations for a batch of equal-length strings
    ///
    /// Characters missing from the dictionary map to the unknown index.
    /// Strings are not padded: differing character counts are an error.
    ///
    /// # Returns
    /// Representation [seq_len, batch, nout or hidden_size]
    pub fn get_representation<S: AsRef<str>>(
        &self,
        strings: &[S],
        detach: bool,
    ) -> crate::Result<Tensor> {
        let sequences: Vec<Vec<u32>> = strings
            .iter()
            .map(|s| {
                s.as_ref()
                    .chars()
                    .map(|c| self.dictionary.index_of_char(c) as u32)
                    .collect()
            })
            .collect();

        let seq_len = match sequences.first() {
            Some(first) => first.len(),
            None => {
                return Err(LmError::ShapeMismatch(
                    "cannot build a representation for an empty batch".to_string(),
                ))
            }
        };
        if let Some(bad) = sequences.iter().find(|s| s.len() != seq_len) {
            return Err(LmError::ShapeMismatch(format!(
                "strings must have equal length: expected {} characters, got {}",
                seq_len,
                bad.len()
            )));
        }

        let batch_size = sequences.len();
        let flat: Vec<u32> = sequences.into_iter().flatten().collect();
        let batch = Tensor::from_vec(flat, (batch_size, seq_len), &self.device)?
            .t()?
            .contiguous()?;

        let hidden = self.init_hidden(batch_size)?;
        let (_, representation, _) = self.forward(&batch, &hidden)?;

        if detach {
            Ok(representation.detach())
        } else {
            Ok(representation)
        }
    }

    /// Copy of every parameter keyed by name
    pub fn state_dict(&self) -> crate::Result<HashMap<String, Tensor>> {
        let vars = self.lock_vars()?;
        let mut state = HashMap::with_capacity(vars.len());
        for (name, var) in vars.iter() {
            state.insert(name.clone(), var.as_tensor().copy()?.detach());
        }
        Ok(state)
    }

    /// Overwrite every parameter from `state`
    ///
    /// Strict: every parameter must be present with its exact shape and no
    /// unknown names are accepted. Nothing is written unless all checks pass.
    pub fn load_state_dict(&self, state: &HashMap<String, Tensor>) -> crate::Result<()> {
        let vars = self.lock_vars()?;

        if let Some(name) = state.keys().find(|name| !vars.contains_key(*name)) {
            return Err(LmError::CorruptRecord(format!("unexpected tensor '{}'", name)));
        }

        let mut updates = Vec::with_capacity(vars.len());
        for (name, var) in vars.iter() {
            let value = state
                .get(name)
                .ok_or_else(|| LmError::CorruptRecord(format!("missing tensor '{}'", name)))?;
            if value.dims() != var.dims() {
                return Err(LmError::CorruptRecord(format!(
                    "tensor '{}' has shape {:?}, expected {:?}",
                    name,
                    value.dims(),
                    var.dims()
                )));
            }
            updates.push((var, value));
        }

        for (var, value) in updates {
            let value = value.to_device(var.device())?.to_dtype(var.dtype())?;
            var.set(&value)?;
        }

        Ok(())
    }

    /// Trainable variables, for an external optimizer
    pub fn vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    pub fn num_parameters(&self) -> crate::Result<usize> {
        let vars = self.lock_vars()?;
        Ok(vars.values().map(|v| count_parameters(v.as_tensor())).sum())
    }

    pub fn train(&mut self) {
        self.training = true;
    }

    pub fn eval(&mut self) {
        self.training = false;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn config(&self) -> &LanguageModelConfig {
        &self.config
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn is_forward_lm(&self) -> bool {
        self.config.is_forward_lm
    }

    /// Width of the representation returned by `forward`
    pub fn representation_size(&self) -> usize {
        self.config.representation_size()
    }

    pub fn decoder_input_size(&self) -> usize {
        self.decoder.in_features()
    }

    pub fn decoder_output_size(&self) -> usize {
        self.decoder.out_features()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn tiny_config() -> LanguageModelConfig {
        LanguageModelConfig::new(true, 8, 2)
            .with_embedding_size(6)
            .with_dropout(0.25)
    }

    pub(crate) fn tiny_model(nout: Option<usize>, seed: u64) -> crate::Result<LanguageModel> {
        let mut config = tiny_config();
        config.nout = nout;
        LanguageModel::with_seed(Dictionary::from_text("abcdefgh"), config, &ComputeTarget::Cpu, seed)
    }

    pub(crate) fn sum_abs_diff(a: &Tensor, b: &Tensor) -> crate::Result<f32> {
        Ok((a - b)?.abs()?.sum_all()?.to_scalar::<f32>()?)
    }

    fn indices(model: &LanguageModel, rows: &[&str]) -> crate::Result<Tensor> {
        // rows are time steps, columns are batch entries
        let batch_size = rows[0].chars().count();
        let data: Vec<u32> = rows
            .iter()
            .flat_map(|r| r.chars().map(|c| model.dictionary().index_of_char(c) as u32))
            .collect();
        Ok(Tensor::from_vec(data, (rows.len(), batch_size), model.device())?)
    }

    #[test]
    fn test_forward_shapes() -> crate::Result<()> {
        let model = tiny_model(None, 1)?;
        let input = indices(&model, &["abc", "bcd", "cde", "def", "efg"])?;
        let hidden = model.init_hidden(3)?;

        let (logits, representation, new_hidden) = model.forward(&input, &hidden)?;

        assert_eq!(logits.dims(), &[5, 3, 8]);
        assert_eq!(representation.dims(), &[5, 3, 8]);
        assert_eq!(new_hidden.h.dims(), hidden.h.dims());
        assert_eq!(new_hidden.c.dims(), hidden.c.dims());

        Ok(())
    }

    #[test]
    fn test_projection_sets_decoder_width() -> crate::Result<()> {
        let projected = tiny_model(Some(4), 1)?;
        assert_eq!(projected.decoder_input_size(), 4);
        assert_eq!(projected.decoder_output_size(), 8);

        let input = indices(&projected, &["ab", "cd"])?;
        let (logits, representation, _) = projected.forward(&input, &projected.init_hidden(2)?)?;
        assert_eq!(logits.dims(), &[2, 2, 8]);
        assert_eq!(representation.dims(), &[2, 2, 4]);

        let plain = tiny_model(None, 1)?;
        assert_eq!(plain.decoder_input_size(), 8);

        Ok(())
    }

    #[test]
    fn test_shape_mismatch() -> crate::Result<()> {
        let model = tiny_model(None, 1)?;
        let input = indices(&model, &["ab", "cd"])?;

        let wrong_batch = model.init_hidden(3)?;
        assert!(matches!(
            model.forward(&input, &wrong_batch),
            Err(LmError::ShapeMismatch(_))
        ));

        let wrong_layers = LstmHidden::zeros(1, 2, 8, model.device())?;
        assert!(matches!(
            model.forward(&input, &wrong_layers),
            Err(LmError::ShapeMismatch(_))
        ));

        let flat = Tensor::new(&[0u32, 1, 2], model.device())?;
        assert!(matches!(
            model.forward(&flat, &model.init_hidden(1)?),
            Err(LmError::ShapeMismatch(_))
        ));

        Ok(())
    }

    #[test]
    fn test_non_index_input_rejected() -> crate::Result<()> {
        let mut model = tiny_model(None, 1)?;
        let hidden = model.init_hidden(1)?;

        let float_input = Tensor::new(&[[0.7f32]], model.device())?;
        assert!(matches!(
            model.forward(&float_input, &hidden),
            Err(LmError::ShapeMismatch(_))
        ));

        let past_end = Tensor::new(&[[8u32]], model.device())?;
        assert!(matches!(
            model.forward(&past_end, &hidden),
            Err(LmError::ShapeMismatch(_))
        ));

        let negative = Tensor::new(&[[-1i64]], model.device())?;
        assert!(matches!(
            model.forward(&negative, &hidden),
            Err(LmError::ShapeMismatch(_))
        ));

        // Every integer index type is accepted and read the same way
        model.eval();
        let last = Tensor::new(&[[7u32]], model.device())?;
        let (logits, _, _) = model.forward(&last, &hidden)?;
        let (wide, _, _) = model.forward(&last.to_dtype(DType::I64)?, &hidden)?;
        let (narrow, _, _) = model.forward(&last.to_dtype(DType::U8)?, &hidden)?;
        assert_eq!(sum_abs_diff(&logits, &wide)?, 0.0);
        assert_eq!(sum_abs_diff(&logits, &narrow)?, 0.0);

        Ok(())
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = LanguageModelConfig::new(true, 8, 0);
        let result = LanguageModel::new(Dictionary::from_text("ab"), config, &ComputeTarget::Cpu);
        assert!(matches!(result, Err(LmError::Configuration(_))));
    }

    #[test]
    fn test_seeded_init_is_reproducible() -> crate::Result<()> {
        let a = tiny_model(Some(4), 11)?.state_dict()?;
        let b = tiny_model(Some(4), 11)?.state_dict()?;
        let c = tiny_model(Some(4), 12)?.state_dict()?;

        for (name, tensor) in &a {
            assert!(sum_abs_diff(tensor, &b[name])? == 0.0, "{} differs", name);
        }
        assert!(sum_abs_diff(&a["encoder.weight"], &c["encoder.weight"])? > 0.0);

        Ok(())
    }

    #[test]
    fn test_init_policy() -> crate::Result<()> {
        let model = tiny_model(Some(4), 5)?;
        let state = model.state_dict()?;
        let max_abs = |name: &str| -> crate::Result<f32> {
            Ok(state[name].abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()?)
        };

        assert!(max_abs("encoder.weight")? <= 0.1);
        assert!(max_abs("decoder.weight")? <= 0.1);
        assert_eq!(max_abs("decoder.bias")?, 0.0);
        assert!(max_abs("proj.weight")? as f64 <= variance_scaled_bound(4, 8) + 1e-6);
        assert!(max_abs("rnn.weight_hh_l1")? as f64 <= fan_bound(8) + 1e-6);

        Ok(())
    }

    #[test]
    fn test_num_parameters() -> crate::Result<()> {
        let model = tiny_model(Some(4), 1)?;
        let (n, e, h, o) = (8, 6, 8, 4);
        let layer0 = 4 * h * e + 4 * h * h + 8 * h;
        let layer1 = 4 * h * h + 4 * h * h + 8 * h;
        let expected = n * e + layer0 + layer1 + (h * o + o) + (o * n + n);

        assert_eq!(model.num_parameters()?, expected);
        assert_eq!(model.vars().len(), 1 + 8 + 2 + 2);

        Ok(())
    }

    #[test]
    fn test_eval_forward_is_deterministic() -> crate::Result<()> {
        let mut model = tiny_model(None, 2)?;
        model.eval();
        let input = indices(&model, &["ab", "cd", "ef"])?;
        let hidden = model.init_hidden(2)?;

        let (first, _, _) = model.forward(&input, &hidden)?;
        let (second, _, _) = model.forward(&input, &hidden)?;
        assert_eq!(sum_abs_diff(&first, &second)?, 0.0);

        Ok(())
    }

    #[test]
    fn test_hidden_carries_across_chunks() -> crate::Result<()> {
        let mut model = tiny_model(None, 3)?;
        model.eval();

        let whole = indices(&model, &["a", "b", "c", "d"])?;
        let (whole_logits, _, _) = model.forward(&whole, &model.init_hidden(1)?)?;

        let head = indices(&model, &["a", "b"])?;
        let tail = indices(&model, &["c", "d"])?;
        let (_, _, hidden) = model.forward(&head, &model.init_hidden(1)?)?;
        model.set_hidden(hidden.detach());
        let carried = model.take_hidden().unwrap();
        assert!(model.hidden().is_none());
        let (tail_logits, _, _) = model.forward(&tail, &carried)?;

        let diff = sum_abs_diff(&whole_logits.narrow(0, 2, 2)?, &tail_logits)?;
        assert!(diff < 1e-5, "chunked logits diverged by {}", diff);

        Ok(())
    }

    #[test]
    fn test_repackage_initial_hidden_keeps_values() -> crate::Result<()> {
        let model = tiny_model(None, 6)?;
        let hidden = model.init_hidden(3)?;

        let repackaged = model.repackage_hidden(&hidden.clone().into());
        let restored = LstmHidden::try_from(repackaged)?;

        assert_eq!(restored.h.dims(), &[2, 3, 8]);
        assert_eq!(sum_abs_diff(&hidden.h, &restored.h)?, 0.0);
        assert_eq!(sum_abs_diff(&hidden.c, &restored.c)?, 0.0);
        assert!(!restored.h.track_op());

        Ok(())
    }

    #[test]
    fn test_get_representation() -> crate::Result<()> {
        let mut model = tiny_model(Some(4), 4)?;
        model.eval();

        let rep = model.get_representation(&["abc", "xyz"], true)?;
        assert_eq!(rep.dims(), &[3, 2, 4]);
        assert!(!rep.track_op());

        let kept = model.get_representation(&["abc", "xyz"], false)?;
        assert!(sum_abs_diff(&rep, &kept)? < 1e-6);

        // Unknown characters behave exactly like the unknown index
        let unknown = model.get_representation(&["zzz"], true)?;
        let zeroth = model.get_representation(&["aaa"], true)?;
        assert!(sum_abs_diff(&unknown, &zeroth)? < 1e-6);

        Ok(())
    }

    #[test]
    fn test_get_representation_rejects_ragged_batch() -> crate::Result<()> {
        let model = tiny_model(None, 4)?;

        assert!(matches!(
            model.get_representation(&["abc", "ab"], true),
            Err(LmError::ShapeMismatch(_))
        ));
        let empty: [&str; 0] = [];
        assert!(matches!(
            model.get_representation(&empty, true),
            Err(LmError::ShapeMismatch(_))
        ));

        Ok(())
    }

    #[test]
    fn test_load_state_dict_is_strict() -> crate::Result<()> {
        let source = tiny_model(None, 7)?;
        let target = tiny_model(None, 8)?;

        let mut state = source.state_dict()?;
        target.load_state_dict(&state)?;
        assert_eq!(
            sum_abs_diff(&target.state_dict()?["encoder.weight"], &state["encoder.weight"])?,
            0.0
        );

        state.remove("decoder.bias");
        assert!(matches!(target.load_state_dict(&state), Err(LmError::CorruptRecord(_))));

        let mut extra = source.state_dict()?;
        extra.insert("extra.weight".to_string(), Tensor::zeros(2, DType::F32, source.device())?);
        assert!(matches!(target.load_state_dict(&extra), Err(LmError::CorruptRecord(_))));

        Ok(())
    }

    #[test]
    fn test_mode_switching() -> crate::Result<()> {
        let mut model = tiny_model(None, 1)?;
        assert!(model.is_training());
        model.eval();
        assert!(!model.is_training());
        model.train();
        assert!(model.is_training());
        Ok(())
    }
}
