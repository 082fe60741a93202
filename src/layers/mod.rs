/// Neural network layer primitives
///
/// This module contains the building blocks of the language model:
/// - Character embeddings (encoder)
/// - Multi-layer LSTM (recurrent core)
/// - Linear layers (projection and decoder)

pub mod embeddings;
pub mod linear;
pub mod lstm;

pub use embeddings::CharEmbedding;
pub use linear::Linear;
pub use lstm::{Lstm, LstmLayer};
