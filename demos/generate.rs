/// Build a small character LM, sample from it, extract representations,
/// and round-trip it through a checkpoint
///
/// Usage: cargo run --example generate [config.json]
use char_lm::{ComputeTarget, Dictionary, LanguageModel, LanguageModelConfig, OptimizerState};
use candle_nn::ParamsAdamW;
use rand::rngs::StdRng;
use rand::SeedableRng;

const SAMPLE_LENGTH: usize = 100;

const CORPUS: &str = "the quick brown fox jumps over the lazy dog. \
                      pack my box with five dozen liquor jugs!";

fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("=== Character LM demo ===");

    let config = match std::env::args().nth(1) {
        Some(path) => {
            log::info!("Loading configuration from {}", path);
            LanguageModelConfig::from_json_file(&path)?
        }
        None => LanguageModelConfig::new(true, 128, 2)
            .with_embedding_size(32)
            .with_projection(64)
            .with_dropout(0.1),
    };
    log::info!("Model configuration: {:#?}", config);

    let target = ComputeTarget::detect();
    log::info!("Compute target: {:?}", target);

    let dictionary = Dictionary::from_text(CORPUS);
    log::info!("Dictionary size: {}", dictionary.len());

    let mut model = LanguageModel::with_seed(dictionary, config, &target, 42)?;
    model.eval();
    log::info!("Parameters: {}", model.num_parameters()?);

    // Untrained weights, so expect noise
    let mut rng = StdRng::seed_from_u64(7);
    let text = model.generate_text(SAMPLE_LENGTH, &mut rng)?;
    log::info!("Sampled text: {:?}", text);

    let representation = model.get_representation(&["quick", "brown", "jumps"], true)?;
    log::info!("Representation shape: {:?}", representation.dims());

    let dir = std::env::temp_dir().join("char-lm-demo");
    std::fs::create_dir_all(&dir)?;
    let checkpoint_path = dir.join("checkpoint.safetensors");

    let optimizer = OptimizerState::from_adamw(&ParamsAdamW::default());
    model.save_checkpoint(&checkpoint_path, &optimizer, 1, 0, 4.2)?;

    let checkpoint = LanguageModel::load_checkpoint(&checkpoint_path, &target)?;
    log::info!("Resumed checkpoint: {:?}", checkpoint.metadata());

    let mut rng = StdRng::seed_from_u64(7);
    let replay = checkpoint
        .model
        .generate_text(SAMPLE_LENGTH, &mut rng)?;
    log::info!("Reloaded model reproduces sample: {}", replay == text);

    Ok(())
}
