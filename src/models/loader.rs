/// Saving and loading models and training checkpoints
use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::LanguageModelConfig;
use crate::device::ComputeTarget;
use crate::dictionary::Dictionary;
use crate::training::checkpoint::{keys, OPTIMIZER_PREFIX};
use crate::training::{OptimizerState, Record, TrainingCheckpoint};
use super::LanguageModel;

impl LanguageModel {
    /// Save configuration, dictionary and weights
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let record = self.to_record()?;
        record.save(path.as_ref())?;
        log::info!("Saved language model to {}", path.as_ref().display());
        Ok(())
    }

    /// Save everything needed to resume training
    pub fn save_checkpoint<P: AsRef<Path>>(
        &self,
        path: P,
        optimizer_state: &OptimizerState,
        epoch: usize,
        split: usize,
        loss: f64,
    ) -> crate::Result<()> {
        let mut record = self.to_record()?;

        record.set_field(keys::OPTIMIZER_STATE_DICT, &optimizer_state.scalars)?;
        for (name, tensor) in &optimizer_state.tensors {
            record
                .tensors
                .insert(format!("{}{}", OPTIMIZER_PREFIX, name), tensor.clone());
        }
        record.set_field(keys::EPOCH, &epoch)?;
        record.set_field(keys::SPLIT, &split)?;
        record.set_field(keys::LOSS, &loss)?;

        record.save(path.as_ref())?;
        log::info!(
            "Saved checkpoint to {} (epoch={}, split={}, loss={:.4})",
            path.as_ref().display(),
            epoch,
            split,
            loss
        );
        Ok(())
    }

    /// Load a saved model in evaluation mode on `target`
    pub fn load_language_model<P: AsRef<Path>>(
        path: P,
        target: &ComputeTarget,
    ) -> crate::Result<Self> {
        let device = target.device()?;
        let mut record = Record::load(path.as_ref(), &device)?;
        record.take_optimizer_tensors();

        let model = Self::from_record(&record, device)?;
        log::info!("Loaded language model from {}", path.as_ref().display());
        Ok(model)
    }

    /// Load a checkpoint; progress fields absent from older records are `None`
    pub fn load_checkpoint<P: AsRef<Path>>(
        path: P,
        target: &ComputeTarget,
    ) -> crate::Result<TrainingCheckpoint> {
        let device = target.device()?;
        let mut record = Record::load(path.as_ref(), &device)?;
        let optimizer_tensors = record.take_optimizer_tensors();

        let optimizer_state = if record.has_field(keys::OPTIMIZER_STATE_DICT)
            || !optimizer_tensors.is_empty()
        {
            Some(OptimizerState {
                scalars: record.optional(keys::OPTIMIZER_STATE_DICT).unwrap_or_default(),
                tensors: optimizer_tensors,
            })
        } else {
            None
        };

        let epoch = record.optional(keys::EPOCH);
        let split = record.optional(keys::SPLIT);
        let loss = record.optional(keys::LOSS);

        let model = Self::from_record(&record, device)?;
        log::info!(
            "Loaded checkpoint from {} (epoch={:?}, split={:?}, loss={:?})",
            path.as_ref().display(),
            epoch,
            split,
            loss
        );

        Ok(TrainingCheckpoint {
            model,
            epoch,
            split,
            loss,
            optimizer_state,
        })
    }

    fn to_record(&self) -> crate::Result<Record> {
        let config = self.config();
        let mut record = Record::new(self.state_dict()?);

        record.set_field(keys::DICTIONARY, self.dictionary())?;
        record.set_field(keys::IS_FORWARD_LM, &config.is_forward_lm)?;
        record.set_field(keys::HIDDEN_SIZE, &config.hidden_size)?;
        record.set_field(keys::NLAYERS, &config.nlayers)?;
        record.set_field(keys::EMBEDDING_SIZE, &config.embedding_size)?;
        if let Some(nout) = config.nout {
            record.set_field(keys::NOUT, &nout)?;
        }
        record.set_field(keys::DROPOUT, &config.dropout)?;

        Ok(record)
    }

    /// Rebuild from the header, then load the weights
    fn from_record(record: &Record, device: candle_core::Device) -> crate::Result<Self> {
        let dictionary: Dictionary = record.required(keys::DICTIONARY)?;
        let config = LanguageModelConfig {
            is_forward_lm: record.required(keys::IS_FORWARD_LM)?,
            hidden_size: record.required(keys::HIDDEN_SIZE)?,
            nlayers: record.required(keys::NLAYERS)?,
            embedding_size: record.required(keys::EMBEDDING_SIZE)?,
            nout: if record.has_field(keys::NOUT) {
                record.required(keys::NOUT)?
            } else {
                None
            },
            dropout: record.required(keys::DROPOUT)?,
        };

        // Initial values are overwritten right away, so the seed is irrelevant
        let mut rng = StdRng::seed_from_u64(0);
        let mut model = Self::build(dictionary, config, device, &mut rng)?;
        model.load_state_dict(&record.tensors)?;
        model.eval();

        Ok(model)
    }
}
