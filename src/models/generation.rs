/// Autoregressive text generation
use candle_core::Tensor;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::LmError;
use super::LanguageModel;

/// Default number of symbols produced per call
pub const DEFAULT_GENERATION_LENGTH: usize = 1000;

/// Softmax temperature applied to the logits while sampling
pub const SAMPLING_TEMPERATURE: f64 = 1.0;

impl LanguageModel {
    /// Sample `length` symbols from the model
    ///
    /// Starts from a zero state and a uniformly random symbol, then feeds
    /// each sampled symbol back as the next input. Dropout is never applied
    /// here, so the output depends only on the weights and `rng`.
    pub fn generate_text<R: Rng + ?Sized>(&self, length: usize, rng: &mut R) -> crate::Result<String> {
        let ntoken = self.dictionary().len();
        if ntoken == 0 {
            return Err(LmError::Configuration(
                "cannot generate text with an empty dictionary".to_string(),
            ));
        }

        let mut hidden = self.init_hidden(1)?;
        let mut idx = rng.gen_range(0..ntoken);
        let mut text = String::with_capacity(length);

        for _ in 0..length {
            let input = Tensor::new(&[[idx as u32]], self.device())?;
            let (logits, _, next_hidden) = self.forward_t(&input, &hidden, false)?;
            hidden = next_hidden;

            let logits = logits.flatten_all()?.to_vec1::<f32>()?;
            idx = sample_index(&logits, SAMPLING_TEMPERATURE, rng)?;

            let symbol = self.dictionary().symbol_at(idx).ok_or_else(|| {
                LmError::Sampling(format!("sampled index {} outside the dictionary", idx))
            })?;
            text.push_str(symbol);
        }

        Ok(text)
    }

    /// Sample `DEFAULT_GENERATION_LENGTH` symbols
    pub fn generate_default_text<R: Rng + ?Sized>(&self, rng: &mut R) -> crate::Result<String> {
        self.generate_text(DEFAULT_GENERATION_LENGTH, rng)
    }
}

/// Draw an index with probability proportional to exp(logit / temperature)
///
/// Logits are shifted by their maximum first; the distribution is the same
/// and exp stays finite.
pub fn sample_index<R: Rng + ?Sized>(
    logits: &[f32],
    temperature: f64,
    rng: &mut R,
) -> crate::Result<usize> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
    let weights: Vec<f64> = logits
        .iter()
        .map(|&logit| ((logit as f64 - max) / temperature).exp())
        .collect();

    let dist = WeightedIndex::new(&weights).map_err(|e| LmError::Sampling(e.to_string()))?;
    Ok(dist.sample(rng))
}
