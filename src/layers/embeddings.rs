/// Character embedding layer
use candle_core::{Module, Result, Tensor};
use candle_nn::{Embedding, Init, VarBuilder};

pub struct CharEmbedding {
    embedding: Embedding,
    vocab_size: usize,
}

impl CharEmbedding {
    pub fn new(vocab_size: usize, embedding_size: usize, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(
            (vocab_size, embedding_size),
            "weight",
            Init::Uniform { lo: -0.1, up: 0.1 },
        )?;
        Ok(Self {
            embedding: Embedding::new(weight, embedding_size),
            vocab_size,
        })
    }

    /// Embed integer indices of any shape, appending the embedding dimension
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        self.embedding.forward(input)
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}
