use std::fmt;

use anyhow::Result;
use burn::prelude::*;

use crate::bleu::corpus_bleu;
use crate::dataset::int_rows;
use crate::tokenizer::TranslationTokenizer;

/// Metric name to value, in insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metrics {
    entries: Vec<(String, f64)>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name`, replacing an earlier value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn with_prefix(&self, prefix: &str) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|(key, value)| (format!("{prefix}{key}"), *value))
                .collect(),
        }
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for Metrics {
    fn from_iter<T: IntoIterator<Item = (K, f64)>>(iter: T) -> Self {
        let mut metrics = Metrics::new();
        for (key, value) in iter {
            metrics.insert(key, value);
        }
        metrics
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>();
        write!(f, "{}", parts.join(" "))
    }
}

pub(crate) fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Turns model outputs into text and scores them with corpus BLEU.
#[derive(Clone)]
pub struct Evaluator {
    tokenizer: TranslationTokenizer,
}

impl Evaluator {
    pub fn new(tokenizer: TranslationTokenizer) -> Self {
        Self { tokenizer }
    }

    pub fn decode_batch(&self, rows: &[Vec<u32>]) -> Result<Vec<String>> {
        rows.iter()
            .map(|row| self.tokenizer.decode_skip_special(row))
            .collect()
    }

    /// `bleu` and `gen_len` for generated ids against label ids.
    pub fn compute_metrics(&self, predictions: &[Vec<u32>], labels: &[Vec<u32>]) -> Result<Metrics> {
        let decoded_preds = self.decode_batch(predictions)?;
        let decoded_labels = self.decode_batch(labels)?;
        let bleu = corpus_bleu(&decoded_preds, &decoded_labels);

        let pad = self.tokenizer.pad_token_id();
        let gen_len = if predictions.is_empty() {
            0.0
        } else {
            predictions
                .iter()
                .map(|row| row.iter().filter(|id| **id != pad).count())
                .sum::<usize>() as f64
                / predictions.len() as f64
        };

        Ok(Metrics::from_iter([
            ("bleu", round4(bleu.score)),
            ("gen_len", round4(gen_len)),
        ]))
    }

    /// Reads predictions off teacher-forced logits by argmax.
    pub fn argmax_predictions<B: Backend>(&self, logits: Tensor<B, 3>) -> Vec<Vec<u32>> {
        let [batch_size, seq_len, _vocab_size] = logits.dims();
        int_rows(logits.argmax(2).reshape([batch_size, seq_len]))
    }
}
