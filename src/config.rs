/// Configuration for the character language model
///
/// Every field is persisted in the record header, so this struct alone
/// rebuilds an architecturally identical model.
use std::path::Path;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LanguageModelConfig {
    /// Reading direction of the training text (false for a backward LM)
    pub is_forward_lm: bool,

    /// LSTM hidden width
    pub hidden_size: usize,

    /// Number of stacked LSTM layers
    pub nlayers: usize,

    /// Character embedding width
    #[serde(default = "default_embedding_size")]
    pub embedding_size: usize,

    /// Width of the optional projection between LSTM and decoder
    #[serde(default)]
    pub nout: Option<usize>,

    /// Dropout probability on embeddings, between layers and on the output
    #[serde(default = "default_dropout")]
    pub dropout: f32,
}

fn default_embedding_size() -> usize {
    100
}

fn default_dropout() -> f32 {
    0.5
}

impl Default for LanguageModelConfig {
    fn default() -> Self {
        Self {
            is_forward_lm: true,
            hidden_size: 2048,
            nlayers: 1,
            embedding_size: default_embedding_size(),
            nout: None,
            dropout: default_dropout(),
        }
    }
}

impl LanguageModelConfig {
    /// Create a configuration with the default embedding size, no
    /// projection and the default dropout.
    pub fn new(is_forward_lm: bool, hidden_size: usize, nlayers: usize) -> Self {
        Self {
            is_forward_lm,
            hidden_size,
            nlayers,
            ..Default::default()
        }
    }

    pub fn with_embedding_size(mut self, embedding_size: usize) -> Self {
        self.embedding_size = embedding_size;
        self
    }

    pub fn with_projection(mut self, nout: usize) -> Self {
        self.nout = Some(nout);
        self
    }

    pub fn with_dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.nlayers < 1 {
            return Err(crate::LmError::Configuration(
                "nlayers must be >= 1".to_string(),
            ));
        }

        if self.hidden_size == 0 {
            return Err(crate::LmError::Configuration(
                "hidden_size must be > 0".to_string(),
            ));
        }

        if self.embedding_size == 0 {
            return Err(crate::LmError::Configuration(
                "embedding_size must be > 0".to_string(),
            ));
        }

        if self.nout == Some(0) {
            return Err(crate::LmError::Configuration(
                "nout must be > 0 when a projection is configured".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.dropout) {
            return Err(crate::LmError::Configuration(format!(
                "Invalid dropout: {}. Must be in [0, 1)",
                self.dropout
            )));
        }

        Ok(())
    }

    /// Width of the representation fed to the decoder
    pub fn representation_size(&self) -> usize {
        self.nout.unwrap_or(self.hidden_size)
    }
}
