/// Training-state persistence
///
/// The training loop itself lives with the caller; this module only
/// defines what a resumable checkpoint holds and how it is stored.
pub mod checkpoint;

pub use checkpoint::{CheckpointMetadata, OptimizerState, Record, TrainingCheckpoint};
