//! Character-level LSTM language model
//!
//! A recurrent language model over characters, usable both as a text
//! generator and as a feature extractor that turns strings into
//! contextual per-character representations.
//!
//! # Architecture
//!
//! - **Encoder**: character embeddings
//! - **Recurrent core**: multi-layer LSTM carrying `(h, c)` across calls
//! - **Projection**: optional linear map to a narrower representation
//! - **Decoder**: linear map to per-character logits
//!
//! Models persist as safetensors records whose header carries the
//! configuration and dictionary, so a record alone rebuilds the model.
//!
//! # Example
//!
//! ```ignore
//! use char_lm::{ComputeTarget, Dictionary, LanguageModel, LanguageModelConfig};
//!
//! let dictionary = Dictionary::from_text("hello world");
//! let config = LanguageModelConfig::new(true, 128, 1);
//! let model = LanguageModel::with_seed(dictionary, config, &ComputeTarget::Cpu, 42)?;
//! let mut rng = rand::rngs::StdRng::seed_from_u64(7);
//! let text = model.generate_text(100, &mut rng)?;
//! ```

pub mod config;
pub mod device;
pub mod dictionary;
pub mod layers;
pub mod models;
pub mod training;
pub mod utils;

// Re-export commonly used items
pub use config::LanguageModelConfig;
pub use device::ComputeTarget;
pub use dictionary::Dictionary;
pub use models::{HiddenState, LanguageModel, LstmHidden};
pub use training::{OptimizerState, TrainingCheckpoint};

/// Library error types
#[derive(Debug, thiserror::Error)]
pub enum LmError {
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Sampling error: {0}")]
    Sampling(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LmError>;
