//! Corpus-level BLEU, compatible with sacreBLEU's defaults: mteval 13a
//! tokenization, n-grams up to 4, exponential smoothing and a single reference
//! per hypothesis.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

pub const MAX_NGRAM_ORDER: usize = 4;

lazy_static! {
    static ref PUNCTUATION: Regex = Regex::new(r"([{-~\[-\x60 -&(-+:-@/])").unwrap();
    static ref PERIOD_COMMA_AFTER: Regex = Regex::new(r"([^0-9])([.,])").unwrap();
    static ref PERIOD_COMMA_BEFORE: Regex = Regex::new(r"([.,])([^0-9])").unwrap();
    static ref DASH_AFTER_DIGIT: Regex = Regex::new(r"([0-9])(-)").unwrap();
}

/// Splits a sentence the way mteval-v13a does.
pub fn tokenize_13a(line: &str) -> Vec<String> {
    let mut line = line.replace("<skipped>", "").replace("-\n", "").replace('\n', " ");
    if line.contains('&') {
        line = line
            .replace("&quot;", "\"")
            .replace("&amp;", "&")
            .replace("&lt;", "<")
            .replace("&gt;", ">");
    }

    let line = format!(" {line} ");
    let line = PUNCTUATION.replace_all(&line, " $1 ");
    let line = PERIOD_COMMA_AFTER.replace_all(&line, "$1 $2 ");
    let line = PERIOD_COMMA_BEFORE.replace_all(&line, " $1 $2");
    let line = DASH_AFTER_DIGIT.replace_all(&line, "$1 $2 ");

    line.split_whitespace().map(str::to_string).collect()
}

fn ngram_counts(tokens: &[String], order: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if tokens.len() >= order {
        for ngram in tokens.windows(order) {
            *counts.entry(ngram).or_insert(0) += 1;
        }
    }
    counts
}

#[derive(Clone, Debug, PartialEq)]
pub struct BleuScore {
    /// In `[0, 100]`.
    pub score: f64,
    pub counts: [usize; MAX_NGRAM_ORDER],
    pub totals: [usize; MAX_NGRAM_ORDER],
    pub precisions: [f64; MAX_NGRAM_ORDER],
    pub brevity_penalty: f64,
    pub sys_len: usize,
    pub ref_len: usize,
}

/// Scores `hypotheses` against one reference each. Extra items on either side are ignored.
pub fn corpus_bleu<H: AsRef<str>, R: AsRef<str>>(hypotheses: &[H], references: &[R]) -> BleuScore {
    let mut counts = [0usize; MAX_NGRAM_ORDER];
    let mut totals = [0usize; MAX_NGRAM_ORDER];
    let mut sys_len = 0;
    let mut ref_len = 0;

    for (hypothesis, reference) in hypotheses.iter().zip(references.iter()) {
        let hyp = tokenize_13a(hypothesis.as_ref());
        let reference = tokenize_13a(reference.as_ref());
        sys_len += hyp.len();
        ref_len += reference.len();

        for order in 1..=MAX_NGRAM_ORDER {
            let ref_counts = ngram_counts(&reference, order);
            for (ngram, count) in ngram_counts(&hyp, order) {
                let clip = ref_counts.get(ngram).copied().unwrap_or(0);
                counts[order - 1] += count.min(clip);
            }
            totals[order - 1] += hyp.len().saturating_sub(order - 1);
        }
    }

    score_from_stats(counts, totals, sys_len, ref_len)
}

fn score_from_stats(
    counts: [usize; MAX_NGRAM_ORDER],
    totals: [usize; MAX_NGRAM_ORDER],
    sys_len: usize,
    ref_len: usize,
) -> BleuScore {
    let mut precisions = [0.0; MAX_NGRAM_ORDER];
    let brevity_penalty = if sys_len >= ref_len {
        1.0
    } else if sys_len > 0 {
        (1.0 - ref_len as f64 / sys_len as f64).exp()
    } else {
        0.0
    };

    if counts.iter().all(|count| *count == 0) {
        return BleuScore {
            score: 0.0,
            counts,
            totals,
            precisions,
            brevity_penalty,
            sys_len,
            ref_len,
        };
    }

    let mut smooth = 1.0;
    for n in 0..MAX_NGRAM_ORDER {
        if totals[n] == 0 {
            break;
        }
        precisions[n] = if counts[n] == 0 {
            smooth *= 2.0;
            100.0 / (smooth * totals[n] as f64)
        } else {
            100.0 * counts[n] as f64 / totals[n] as f64
        };
    }

    let log_mean = precisions
        .iter()
        .map(|p| if *p == 0.0 { -9_999_999_999.0 } else { p.ln() })
        .sum::<f64>()
        / MAX_NGRAM_ORDER as f64;

    BleuScore {
        score: brevity_penalty * log_mean.exp(),
        counts,
        totals,
        precisions,
        brevity_penalty,
        sys_len,
        ref_len,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_corpus_scores_100() {
        let corpus = ["the cat sat on the mat", "Il fait beau aujourd'hui."];
        let bleu = corpus_bleu(&corpus, &corpus);
        assert!((bleu.score - 100.0).abs() < 1e-9);
        assert_eq!(bleu.brevity_penalty, 1.0);
    }

    #[test]
    fn disjoint_corpus_scores_0() {
        let bleu = corpus_bleu(&["a b c d"], &["w x y z"]);
        assert_eq!(bleu.score, 0.0);
    }

    #[test]
    fn short_hypothesis_is_penalised() {
        let bleu = corpus_bleu(&["the cat sat on the"], &["the cat sat on the mat"]);
        assert_eq!(bleu.sys_len, 5);
        assert_eq!(bleu.ref_len, 6);
        assert_eq!(bleu.counts, bleu.totals);
        assert!((bleu.score - 100.0 * (-0.2f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn repeated_words_are_clipped() {
        let bleu = corpus_bleu(&["the the the the"], &["the cat"]);
        assert_eq!(bleu.counts[0], 1);
        assert_eq!(bleu.totals[0], 4);
    }

    #[test]
    fn tokenizer_splits_punctuation_but_not_numbers() {
        assert_eq!(
            tokenize_13a("Hello, world! It costs 3.50 dollars."),
            vec!["Hello", ",", "world", "!", "It", "costs", "3.50", "dollars", "."]
        );
    }
}
