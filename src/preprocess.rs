use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use burn::config::Config;
use serde::Deserialize;

use crate::checkpoint::Checkpoint;
use crate::dataset::BatchEncoding;
use crate::tokenizer::TranslationTokenizer;

#[derive(Config, Debug)]
pub struct PreprocessConfig {
    pub source_lang: String,
    pub target_lang: String,
    #[config(default = "\"small\".to_string()")]
    pub size: String,
    #[config(default = 128)]
    pub max_source_length: usize,
    #[config(default = 128)]
    pub max_target_length: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TranslationPair {
    pub source: String,
    pub target: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRecord {
    Nested { translation: HashMap<String, String> },
    Flat(HashMap<String, String>),
}

impl RawRecord {
    fn into_pair(self, source_lang: &str, target_lang: &str) -> Option<TranslationPair> {
        let mut fields = match self {
            RawRecord::Nested { translation } => translation,
            RawRecord::Flat(fields) => fields,
        };
        Some(TranslationPair {
            source: fields.remove(source_lang)?,
            target: fields.remove(target_lang)?,
        })
    }
}

/// Reads translation pairs from a JSON array or a JSON Lines file.
///
/// Records are either `{"translation": {"en": .., "fr": ..}}` or flat `{"en": .., "fr": ..}`.
pub fn load_pairs(path: &Path, source_lang: &str, target_lang: &str) -> Result<Vec<TranslationPair>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let records: Vec<RawRecord> = if content.trim_start().starts_with('[') {
        serde_json::from_str(&content)
            .with_context(|| format!("malformed JSON in {}", path.display()))?
    } else {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("malformed JSON on line {} of {}", idx + 1, path.display()))
            })
            .collect::<Result<_>>()?
    };

    let pairs = records
        .into_iter()
        .enumerate()
        .map(|(idx, record)| {
            record.into_pair(source_lang, target_lang).with_context(|| {
                format!(
                    "record {idx} of {} has no {source_lang:?}/{target_lang:?} pair",
                    path.display()
                )
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if pairs.is_empty() {
        bail!("no translation pairs in {}", path.display());
    }
    Ok(pairs)
}

/// Loads both splits and turns them into padded encodings for a checkpoint.
pub struct Preprocessor {
    config: PreprocessConfig,
    checkpoint: Checkpoint,
    tokenizer: TranslationTokenizer,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Result<Self> {
        let checkpoint = Checkpoint::resolve(&config.size, &config.source_lang, &config.target_lang)?;
        let tokenizer = TranslationTokenizer::new()?;

        Ok(Self {
            config,
            checkpoint,
            tokenizer,
        })
    }

    pub fn preprocess(&self, train_path: &Path, test_path: &Path) -> Result<(BatchEncoding, BatchEncoding)> {
        let train = self.load(train_path)?;
        let test = self.load(test_path)?;
        tracing::info!("Loaded {} train and {} test pairs", train.len(), test.len());

        Ok((self.encode(&train), self.encode(&test)))
    }

    fn load(&self, path: &Path) -> Result<Vec<TranslationPair>> {
        load_pairs(path, &self.config.source_lang, &self.config.target_lang)
    }

    /// Tokenizes pairs and pads every row to the longest one in the split.
    pub fn encode(&self, pairs: &[TranslationPair]) -> BatchEncoding {
        let prefix = self.checkpoint.prefix();
        let pad = self.tokenizer.pad_token_id();

        let inputs = pairs
            .iter()
            .map(|pair| {
                self.tokenizer
                    .encode_with_eos(&format!("{prefix}{}", pair.source), self.config.max_source_length)
            })
            .collect::<Vec<_>>();
        let labels = pairs
            .iter()
            .map(|pair| {
                self.tokenizer
                    .encode_with_eos(&pair.target, self.config.max_target_length)
            })
            .collect::<Vec<_>>();

        let input_width = inputs.iter().map(Vec::len).max().unwrap_or(0);
        let label_width = labels.iter().map(Vec::len).max().unwrap_or(0);

        let mut encoding = BatchEncoding::default();
        for (input, label) in inputs.into_iter().zip(labels) {
            let mut mask = vec![1; input.len()];
            mask.resize(input_width, 0);
            encoding.attention_mask.push(mask);
            encoding.input_ids.push(pad_to(input, input_width, pad));
            encoding.labels.push(pad_to(label, label_width, pad));
        }
        encoding
    }

    pub fn get_tokenizer(&self) -> TranslationTokenizer {
        self.tokenizer.clone()
    }

    pub fn get_checkpoint(&self) -> Checkpoint {
        self.checkpoint
    }
}

fn pad_to(mut ids: Vec<u32>, width: usize, pad: u32) -> Vec<u32> {
    ids.resize(width, pad);
    ids
}
