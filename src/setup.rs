use std::path::{Path, PathBuf};

use anyhow::{Result, ensure};
use burn::tensor::backend::Backend;

use crate::checkpoint::{Checkpoint, CheckpointError};
use crate::dataset::{BatchEncodingDataset, Seq2SeqCollator};
use crate::evaluate::Evaluator;
use crate::model::{Seq2SeqModel, Seq2SeqModelConfig};
use crate::preprocess::{PreprocessConfig, Preprocessor};
use crate::tokenizer::TranslationTokenizer;

#[derive(Clone, Debug)]
pub struct SetupOptions {
    /// Holds one `<checkpoint id>/` directory per pretrained model.
    pub pretrained_dir: PathBuf,
    /// Start from random weights when the checkpoint has no pretrained directory.
    pub allow_random_init: bool,
    pub max_source_length: usize,
    pub max_target_length: usize,
}

impl Default for SetupOptions {
    fn default() -> Self {
        Self {
            pretrained_dir: PathBuf::from("dugong/pretrained"),
            allow_random_init: false,
            max_source_length: 128,
            max_target_length: 128,
        }
    }
}

/// Everything a trainer needs, built in one go.
pub struct TrainingSetup<B: Backend> {
    pub train_dataset: BatchEncodingDataset,
    pub test_dataset: BatchEncodingDataset,
    pub tokenizer: TranslationTokenizer,
    pub checkpoint: Checkpoint,
    pub evaluator: Evaluator,
    pub data_collator: Seq2SeqCollator,
    pub model: Seq2SeqModel<B>,
    pub model_config: Seq2SeqModelConfig,
}

pub fn setup<B: Backend>(
    train_path: &Path,
    test_path: &Path,
    source_lang: &str,
    target_lang: &str,
    size: &str,
    options: &SetupOptions,
    device: &B::Device,
) -> Result<TrainingSetup<B>> {
    let preprocessor = Preprocessor::new(
        PreprocessConfig::new(source_lang.to_string(), target_lang.to_string())
            .with_size(size.to_string())
            .with_max_source_length(options.max_source_length)
            .with_max_target_length(options.max_target_length),
    )?;
    let (train_encoding, test_encoding) = preprocessor.preprocess(train_path, test_path)?;
    let tokenizer = preprocessor.get_tokenizer();
    let checkpoint = preprocessor.get_checkpoint();
    let evaluator = Evaluator::new(tokenizer.clone());
    let data_collator = Seq2SeqCollator::new(
        tokenizer.pad_token_id(),
        tokenizer.pad_token_id(),
        tokenizer.decoder_start_token_id(),
    );

    let (model_config, model) = load_model::<B>(&checkpoint, &tokenizer, options, device)?;
    check_lengths(&model_config, options)?;
    let train_dataset = BatchEncodingDataset::new(train_encoding)?;
    let test_dataset = BatchEncodingDataset::new(test_encoding)?;

    Ok(TrainingSetup {
        train_dataset,
        test_dataset,
        tokenizer,
        checkpoint,
        evaluator,
        data_collator,
        model,
        model_config,
    })
}

/// Encoded sources and labels must fit the learned position table.
fn check_lengths(config: &Seq2SeqModelConfig, options: &SetupOptions) -> Result<()> {
    ensure!(
        options.max_source_length <= config.max_positions,
        "max_source_length {} exceeds the model's {} positions",
        options.max_source_length,
        config.max_positions
    );
    ensure!(
        options.max_target_length <= config.max_positions,
        "max_target_length {} exceeds the model's {} positions",
        options.max_target_length,
        config.max_positions
    );
    Ok(())
}

fn load_model<B: Backend>(
    checkpoint: &Checkpoint,
    tokenizer: &TranslationTokenizer,
    options: &SetupOptions,
    device: &B::Device,
) -> Result<(Seq2SeqModelConfig, Seq2SeqModel<B>)> {
    match checkpoint.load_pretrained::<B>(&options.pretrained_dir, tokenizer.vocab_size(), device) {
        Ok(loaded) => {
            tracing::info!("Loaded pretrained weights for {checkpoint}");
            Ok(loaded)
        }
        Err(err)
            if options.allow_random_init
                && matches!(
                    err.downcast_ref::<CheckpointError>(),
                    Some(CheckpointError::MissingWeights { .. })
                ) =>
        {
            tracing::warn!("{err}; initialising {checkpoint} from scratch");
            let config = checkpoint
                .size
                .model_config(tokenizer.vocab_size(), tokenizer.pad_token_id() as usize);
            let model = config.init::<B>(device);
            Ok((config, model))
        }
        Err(err) => Err(err),
    }
}
