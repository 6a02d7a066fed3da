use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use burn::{
    config::Config,
    module::Module,
    prelude::Backend,
    record::CompactRecorder,
    train::checkpoint::{Checkpointer, FileCheckpointer},
};

use crate::model::{Seq2SeqModel, Seq2SeqModelConfig};

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("unknown model size {0:?} (expected tiny, small, base or large)")]
    UnknownSize(String),
    #[error("unsupported language code {0:?} (expected en, fr, de or ro)")]
    UnsupportedLanguage(String),
    #[error("source and target language are both {0:?}")]
    SameLanguage(String),
    #[error("no pretrained weights for {checkpoint} under {dir}")]
    MissingWeights { checkpoint: String, dir: PathBuf },
    #[error("pretrained {checkpoint} expects a vocabulary of {expected} but the tokenizer has {actual}")]
    VocabMismatch {
        checkpoint: String,
        expected: usize,
        actual: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelSize {
    Tiny,
    Small,
    Base,
    Large,
}

impl ModelSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Small => "small",
            ModelSize::Base => "base",
            ModelSize::Large => "large",
        }
    }

    /// Architecture for this size. `tiny` is for smoke runs only.
    pub fn model_config(&self, vocab_size: usize, pad_token_id: usize) -> Seq2SeqModelConfig {
        let (d_model, n_heads, n_layers, d_ff) = match self {
            ModelSize::Tiny => (64, 4, 2, 256),
            ModelSize::Small => (512, 8, 6, 2048),
            ModelSize::Base => (768, 12, 12, 3072),
            ModelSize::Large => (1024, 16, 24, 4096),
        };
        Seq2SeqModelConfig::new(
            vocab_size,
            pad_token_id,
            512,
            d_model,
            n_heads,
            n_layers,
            n_layers,
            d_ff,
        )
    }
}

impl FromStr for ModelSize {
    type Err = CheckpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tiny" => Ok(ModelSize::Tiny),
            "small" => Ok(ModelSize::Small),
            "base" => Ok(ModelSize::Base),
            "large" => Ok(ModelSize::Large),
            other => Err(CheckpointError::UnknownSize(other.to_string())),
        }
    }
}

impl fmt::Display for ModelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Language {
    English,
    French,
    German,
    Romanian,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::French => "fr",
            Language::German => "de",
            Language::Romanian => "ro",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::French => "French",
            Language::German => "German",
            Language::Romanian => "Romanian",
        }
    }
}

impl FromStr for Language {
    type Err = CheckpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "en" => Ok(Language::English),
            "fr" => Ok(Language::French),
            "de" => Ok(Language::German),
            "ro" => Ok(Language::Romanian),
            other => Err(CheckpointError::UnsupportedLanguage(other.to_string())),
        }
    }
}

/// A model size plus a language pair, e.g. `t5-small-en-fr`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub size: ModelSize,
    pub source: Language,
    pub target: Language,
}

impl Checkpoint {
    pub fn resolve(size: &str, source_lang: &str, target_lang: &str) -> Result<Self, CheckpointError> {
        let checkpoint = Self {
            size: size.parse()?,
            source: source_lang.parse()?,
            target: target_lang.parse()?,
        };
        if checkpoint.source == checkpoint.target {
            return Err(CheckpointError::SameLanguage(source_lang.to_string()));
        }
        Ok(checkpoint)
    }

    pub fn id(&self) -> String {
        format!(
            "t5-{}-{}-{}",
            self.size,
            self.source.code(),
            self.target.code()
        )
    }

    /// Task prompt prepended to every source sentence.
    pub fn prefix(&self) -> String {
        format!(
            "translate {} to {}: ",
            self.source.name(),
            self.target.name()
        )
    }

    /// Loads `config.json` and `model.mpk` from `<root>/<id>/`.
    pub fn load_pretrained<B: Backend>(
        &self,
        root: &Path,
        vocab_size: usize,
        device: &B::Device,
    ) -> Result<(Seq2SeqModelConfig, Seq2SeqModel<B>)> {
        let dir = root.join(self.id());
        let weights = dir.join("model.mpk");
        if !weights.is_file() {
            return Err(CheckpointError::MissingWeights {
                checkpoint: self.id(),
                dir,
            }
            .into());
        }

        let config_path = dir.join("config.json");
        let config = Seq2SeqModelConfig::load(&config_path)
            .map_err(|err| anyhow::anyhow!("{err:?}"))
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        if config.vocab_size != vocab_size {
            return Err(CheckpointError::VocabMismatch {
                checkpoint: self.id(),
                expected: config.vocab_size,
                actual: vocab_size,
            }
            .into());
        }

        let model = config
            .init::<B>(device)
            .load_file(dir.join("model"), &CompactRecorder::new(), device)
            .map_err(|err| anyhow::anyhow!("{err:?}"))
            .with_context(|| format!("failed to load weights from {}", weights.display()))?;
        Ok((config, model))
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

type ModelRecord<B> = <Seq2SeqModel<B> as Module<B>>::Record;
type ModelCheckpointer = FileCheckpointer<CompactRecorder>;

/// Saves `model-<step>.mpk` records under `<output_dir>/checkpoint` and keeps only
/// the newest `save_total_limit` of them.
pub struct CheckpointManager {
    directory: PathBuf,
    checkpointer: ModelCheckpointer,
    save_total_limit: usize,
    saved: VecDeque<usize>,
}

impl CheckpointManager {
    /// A `save_total_limit` of 0 keeps every checkpoint.
    pub fn new(output_dir: impl AsRef<Path>, save_total_limit: usize) -> Self {
        let directory = output_dir.as_ref().join("checkpoint");
        Self {
            checkpointer: FileCheckpointer::new(CompactRecorder::new(), &directory, "model"),
            directory,
            save_total_limit,
            saved: VecDeque::new(),
        }
    }

    pub fn path_for(&self, step: usize) -> PathBuf {
        self.directory.join(format!("model-{step}.mpk"))
    }

    /// Steps still on disk, oldest first.
    pub fn saved_steps(&self) -> Vec<usize> {
        self.saved.iter().copied().collect()
    }

    pub fn save<B: Backend>(&mut self, model: &Seq2SeqModel<B>, step: usize) -> Result<PathBuf> {
        <ModelCheckpointer as Checkpointer<ModelRecord<B>, B>>::save(
            &self.checkpointer,
            step,
            model.clone().into_record(),
        )
        .map_err(|err| anyhow::anyhow!("{err:?}"))
        .with_context(|| format!("failed to save checkpoint {step} to {}", self.directory.display()))?;

        let path = self.path_for(step);
        tracing::info!("Saved checkpoint {}", path.display());

        self.saved.retain(|saved| *saved != step);
        self.saved.push_back(step);
        while self.save_total_limit > 0 && self.saved.len() > self.save_total_limit {
            let Some(oldest) = self.saved.pop_front() else {
                break;
            };
            tracing::debug!("Removing checkpoint {}", self.path_for(oldest).display());
            <ModelCheckpointer as Checkpointer<ModelRecord<B>, B>>::delete(&self.checkpointer, oldest)
                .map_err(|err| anyhow::anyhow!("{err:?}"))
                .with_context(|| format!("failed to remove checkpoint {oldest}"))?;
        }

        Ok(path)
    }

    pub fn restore<B: Backend>(
        &self,
        config: &Seq2SeqModelConfig,
        step: usize,
        device: &B::Device,
    ) -> Result<Seq2SeqModel<B>> {
        let record = <ModelCheckpointer as Checkpointer<ModelRecord<B>, B>>::restore(
            &self.checkpointer,
            step,
            device,
        )
        .map_err(|err| anyhow::anyhow!("{err:?}"))
        .with_context(|| format!("failed to restore checkpoint {step}"))?;

        Ok(config.init::<B>(device).load_record(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use tempfile::tempdir;

    #[test]
    fn checkpoint_id_follows_size_and_pair() {
        let checkpoint = Checkpoint::resolve("small", "en", "fr").unwrap();
        assert_eq!(checkpoint.id(), "t5-small-en-fr");
        assert_eq!(checkpoint.prefix(), "translate English to French: ");
    }

    #[test]
    fn unknown_identifiers_are_rejected() {
        assert!(matches!(
            Checkpoint::resolve("huge", "en", "fr"),
            Err(CheckpointError::UnknownSize(_))
        ));
        assert!(matches!(
            Checkpoint::resolve("small", "en", "jp"),
            Err(CheckpointError::UnsupportedLanguage(_))
        ));
        assert!(matches!(
            Checkpoint::resolve("small", "fr", "fr"),
            Err(CheckpointError::SameLanguage(_))
        ));
    }

    #[test]
    fn missing_pretrained_weights_abort() {
        let dir = tempdir().unwrap();
        let checkpoint = Checkpoint::resolve("tiny", "en", "de").unwrap();
        let err = checkpoint
            .load_pretrained::<NdArray>(dir.path(), 100, &Default::default())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CheckpointError>(),
            Some(CheckpointError::MissingWeights { .. })
        ));
    }

    #[test]
    fn pretrained_directory_loads_and_checks_vocab() {
        let dir = tempdir().unwrap();
        let device = Default::default();
        let checkpoint = Checkpoint::resolve("tiny", "en", "ro").unwrap();
        let config = Seq2SeqModelConfig::new(40, 39, 16, 8, 2, 1, 1, 16);

        let pretrained = dir.path().join(checkpoint.id());
        std::fs::create_dir_all(&pretrained).unwrap();
        config.save(pretrained.join("config.json")).unwrap();
        config
            .init::<NdArray>(&device)
            .save_file(pretrained.join("model"), &CompactRecorder::new())
            .unwrap();

        let (loaded_config, loaded) = checkpoint
            .load_pretrained::<NdArray>(dir.path(), 40, &device)
            .unwrap();
        assert_eq!(loaded_config.d_model, 8);
        assert_eq!(loaded.vocab_size, 40);

        let err = checkpoint
            .load_pretrained::<NdArray>(dir.path(), 41, &device)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CheckpointError>(),
            Some(CheckpointError::VocabMismatch { .. })
        ));
    }

    #[test]
    fn rotation_keeps_newest_checkpoints() {
        let dir = tempdir().unwrap();
        let device = Default::default();
        let config = Seq2SeqModelConfig::new(10, 9, 8, 4, 1, 1, 1, 8);
        let model = config.init::<NdArray>(&device);
        let mut manager = CheckpointManager::new(dir.path(), 2);

        for step in [5, 10, 15] {
            manager.save(&model, step).unwrap();
        }

        assert_eq!(manager.saved_steps(), vec![10, 15]);
        assert!(!manager.path_for(5).exists());
        assert!(manager.path_for(10).is_file());
        assert!(manager.path_for(15).is_file());
    }

    #[test]
    fn zero_limit_keeps_every_checkpoint() {
        let dir = tempdir().unwrap();
        let device = Default::default();
        let config = Seq2SeqModelConfig::new(10, 9, 8, 4, 1, 1, 1, 8);
        let model = config.init::<NdArray>(&device);
        let mut manager = CheckpointManager::new(dir.path(), 0);

        for step in 1..=4 {
            manager.save(&model, step).unwrap();
        }
        assert_eq!(manager.saved_steps(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn saved_checkpoint_restores() {
        let dir = tempdir().unwrap();
        let device = Default::default();
        let config = Seq2SeqModelConfig::new(10, 9, 8, 4, 1, 1, 1, 8);
        let model = config.init::<NdArray>(&device);
        let mut manager = CheckpointManager::new(dir.path(), 1);

        manager.save(&model, 3).unwrap();
        let restored = manager.restore::<NdArray>(&config, 3, &device).unwrap();
        assert_eq!(restored.num_params(), model.num_params());
        assert!(manager.restore::<NdArray>(&config, 4, &device).is_err());
    }
}
