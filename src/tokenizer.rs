use std::sync::Arc;

use anyhow::Result;
use tiktoken_rs::{CoreBPE, r50k_base};

pub trait ITokenizer {
    fn encode(&self, text: &str) -> Vec<u32>;
    fn decode(&self, ids: &[u32]) -> Result<String>;
}

pub struct BpeTokenizer {
    bpe: CoreBPE,
}

impl BpeTokenizer {
    pub fn new() -> Result<Self> {
        Ok(Self { bpe: r50k_base()? })
    }
}

impl ITokenizer for BpeTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        // dataset text is never allowed to smuggle in special tokens
        self.bpe.encode_ordinary(text)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.bpe.decode(Vec::from(ids))
    }
}

/// `<|endoftext|>` in the r50k vocabulary, used as end-of-sequence.
pub const EOS_TOKEN_ID: u32 = 50256;
/// One past the r50k vocabulary. Doubles as the decoder start token.
pub const PAD_TOKEN_ID: u32 = 50257;
pub const VOCAB_SIZE: usize = 50258;

/// Tokenizer handle shared by the preprocessor, collator and evaluator.
///
/// Wraps the r50k BPE with the special tokens an encoder-decoder model needs.
/// Cloning is cheap.
#[derive(Clone)]
pub struct TranslationTokenizer {
    bpe: Arc<BpeTokenizer>,
}

impl TranslationTokenizer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            bpe: Arc::new(BpeTokenizer::new()?),
        })
    }

    pub fn pad_token_id(&self) -> u32 {
        PAD_TOKEN_ID
    }

    pub fn eos_token_id(&self) -> u32 {
        EOS_TOKEN_ID
    }

    pub fn decoder_start_token_id(&self) -> u32 {
        PAD_TOKEN_ID
    }

    pub fn vocab_size(&self) -> usize {
        VOCAB_SIZE
    }

    /// Encodes `text`, truncating so that the trailing eos still fits in `max_length`.
    pub fn encode_with_eos(&self, text: &str, max_length: usize) -> Vec<u32> {
        let mut ids = self.bpe.encode(text);
        ids.truncate(max_length.saturating_sub(1));
        ids.push(EOS_TOKEN_ID);
        ids
    }

    /// Decodes ids, dropping pad/eos and everything after the first eos.
    pub fn decode_skip_special(&self, ids: &[u32]) -> Result<String> {
        let content = ids
            .iter()
            .copied()
            .skip_while(|id| *id == PAD_TOKEN_ID)
            .take_while(|id| *id != EOS_TOKEN_ID)
            .filter(|id| *id < EOS_TOKEN_ID)
            .collect::<Vec<_>>();
        Ok(self.bpe.decode(&content)?.trim().to_string())
    }
}

impl ITokenizer for TranslationTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        self.bpe.encode(text)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.bpe.decode(ids)
    }
}
