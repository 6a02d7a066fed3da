use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    prelude::*,
    tensor::TensorData,
};

/// Parallel token arrays for a whole split, as produced by the preprocessor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchEncoding {
    pub input_ids: Vec<Vec<u32>>,
    pub attention_mask: Vec<Vec<u32>>,
    pub labels: Vec<Vec<u32>>,
}

/// One training example: the three aligned arrays at a single index.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedExample {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub labels: Vec<u32>,
}

impl EncodedExample {
    pub fn new(input_ids: Vec<u32>, attention_mask: Vec<u32>, labels: Vec<u32>) -> Self {
        Self {
            input_ids,
            attention_mask,
            labels,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum EncodingError {
    #[error(
        "encoding arrays differ in length: {input_ids} input_ids, {attention_mask} attention_mask, {labels} labels"
    )]
    MismatchedArrays {
        input_ids: usize,
        attention_mask: usize,
        labels: usize,
    },
    #[error("example {index}: {input_ids} input ids but {attention_mask} attention mask entries")]
    MismatchedMask {
        index: usize,
        input_ids: usize,
        attention_mask: usize,
    },
}

/// Indexable view over a [`BatchEncoding`].
///
/// The arrays are validated once, at construction.
#[derive(Clone, Debug)]
pub struct BatchEncodingDataset {
    encodings: BatchEncoding,
}

impl BatchEncodingDataset {
    pub fn new(encodings: BatchEncoding) -> Result<Self, EncodingError> {
        let (n_inputs, n_masks, n_labels) = (
            encodings.input_ids.len(),
            encodings.attention_mask.len(),
            encodings.labels.len(),
        );
        if n_inputs != n_masks || n_inputs != n_labels {
            return Err(EncodingError::MismatchedArrays {
                input_ids: n_inputs,
                attention_mask: n_masks,
                labels: n_labels,
            });
        }

        let mismatch = encodings
            .input_ids
            .iter()
            .zip(encodings.attention_mask.iter())
            .position(|(ids, mask)| ids.len() != mask.len());
        if let Some(index) = mismatch {
            return Err(EncodingError::MismatchedMask {
                index,
                input_ids: encodings.input_ids[index].len(),
                attention_mask: encodings.attention_mask[index].len(),
            });
        }

        Ok(Self { encodings })
    }

    pub fn encodings(&self) -> &BatchEncoding {
        &self.encodings
    }
}

impl Dataset<EncodedExample> for BatchEncodingDataset {
    fn len(&self) -> usize {
        self.encodings.input_ids.len()
    }

    fn get(&self, index: usize) -> Option<EncodedExample> {
        Some(EncodedExample::new(
            self.encodings.input_ids.get(index)?.clone(),
            self.encodings.attention_mask.get(index)?.clone(),
            self.encodings.labels.get(index)?.clone(),
        ))
    }
}

/// Pads examples to the longest row of the batch and builds decoder inputs by
/// shifting the labels right behind the decoder start token.
#[derive(Clone, Debug)]
pub struct Seq2SeqCollator {
    pub pad_token_id: u32,
    pub label_pad_token_id: u32,
    pub decoder_start_token_id: u32,
}

impl Seq2SeqCollator {
    pub fn new(pad_token_id: u32, label_pad_token_id: u32, decoder_start_token_id: u32) -> Self {
        Self {
            pad_token_id,
            label_pad_token_id,
            decoder_start_token_id,
        }
    }

    /// [`Batcher::batch`] with the backend spelled out.
    pub fn collate<B: Backend>(&self, items: Vec<EncodedExample>, device: &B::Device) -> Seq2SeqBatch<B> {
        <Self as Batcher<B, EncodedExample, Seq2SeqBatch<B>>>::batch(self, items, device)
    }

    /// Shifted labels; label padding becomes regular padding.
    fn decoder_inputs(&self, labels: &[u32]) -> Vec<u32> {
        std::iter::once(self.decoder_start_token_id)
            .chain(labels.iter().take(labels.len().saturating_sub(1)).map(|id| {
                if *id == self.label_pad_token_id {
                    self.pad_token_id
                } else {
                    *id
                }
            }))
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct Seq2SeqBatch<B: Backend> {
    pub input_ids: Tensor<B, 2, Int>,
    pub attention_mask: Tensor<B, 2, Int>,
    pub labels: Tensor<B, 2, Int>,
    pub decoder_input_ids: Tensor<B, 2, Int>,
}

impl<B: Backend> Batcher<B, EncodedExample, Seq2SeqBatch<B>> for Seq2SeqCollator {
    fn batch(&self, items: Vec<EncodedExample>, device: &B::Device) -> Seq2SeqBatch<B> {
        let decoder_inputs = items
            .iter()
            .map(|item| self.decoder_inputs(&item.labels))
            .collect::<Vec<_>>();

        Seq2SeqBatch {
            input_ids: pad_rows(items.iter().map(|item| &item.input_ids[..]), self.pad_token_id, device),
            attention_mask: pad_rows(items.iter().map(|item| &item.attention_mask[..]), 0, device),
            labels: pad_rows(items.iter().map(|item| &item.labels[..]), self.label_pad_token_id, device),
            decoder_input_ids: pad_rows(decoder_inputs.iter().map(|row| &row[..]), self.pad_token_id, device),
        }
    }
}

fn pad_rows<'a, B: Backend>(
    rows: impl Iterator<Item = &'a [u32]> + Clone,
    pad: u32,
    device: &B::Device,
) -> Tensor<B, 2, Int> {
    let n_rows = rows.clone().count();
    let width = rows.clone().map(<[u32]>::len).max().unwrap_or(0);

    let mut flat = Vec::with_capacity(n_rows * width);
    for row in rows {
        flat.extend(row.iter().map(|id| *id as i64));
        flat.extend(std::iter::repeat_n(pad as i64, width - row.len()));
    }

    Tensor::from_data(TensorData::new(flat, [n_rows, width]), device)
}

/// Reads an integer tensor back into host rows.
pub fn int_rows<B: Backend>(tensor: Tensor<B, 2, Int>) -> Vec<Vec<u32>> {
    let [_n_rows, width] = tensor.dims();
    let values = tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .unwrap_or_default();

    values
        .chunks(width.max(1))
        .map(|row| row.iter().map(|id| *id as u32).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn encoding() -> BatchEncoding {
        BatchEncoding {
            input_ids: vec![vec![1, 2, 3], vec![4, 5, 9], vec![6, 9, 9]],
            attention_mask: vec![vec![1, 1, 1], vec![1, 1, 0], vec![1, 0, 0]],
            labels: vec![vec![7, 8], vec![10, 9], vec![11, 12]],
        }
    }

    #[test]
    fn dataset_exposes_every_example_unmodified() {
        let encoding = encoding();
        let dataset = BatchEncodingDataset::new(encoding.clone()).unwrap();

        assert_eq!(dataset.len(), 3);
        for i in 0..3 {
            let item = dataset.get(i).unwrap();
            assert_eq!(item.input_ids, encoding.input_ids[i]);
            assert_eq!(item.attention_mask, encoding.attention_mask[i]);
            assert_eq!(item.labels, encoding.labels[i]);
        }
        assert!(dataset.get(3).is_none());
    }

    #[test]
    fn mismatched_arrays_fail_at_construction() {
        let mut encoding = encoding();
        encoding.labels.pop();

        let err = BatchEncodingDataset::new(encoding).unwrap_err();
        assert_eq!(
            err,
            EncodingError::MismatchedArrays {
                input_ids: 3,
                attention_mask: 3,
                labels: 2
            }
        );
    }

    #[test]
    fn malformed_mask_fails_at_construction() {
        let mut encoding = encoding();
        encoding.attention_mask[1].push(0);

        let err = BatchEncodingDataset::new(encoding).unwrap_err();
        assert!(matches!(err, EncodingError::MismatchedMask { index: 1, .. }));
    }

    #[test]
    fn collator_pads_and_shifts_labels() {
        let device = Default::default();
        let collator = Seq2SeqCollator::new(9, 9, 0);
        let batch: Seq2SeqBatch<TestBackend> = collator.batch(
            vec![
                EncodedExample::new(vec![1, 2], vec![1, 1], vec![7, 8, 9]),
                EncodedExample::new(vec![3, 4, 5], vec![1, 1, 1], vec![6]),
            ],
            &device,
        );

        assert_eq!(int_rows(batch.input_ids), vec![vec![1, 2, 9], vec![3, 4, 5]]);
        assert_eq!(int_rows(batch.attention_mask), vec![vec![1, 1, 0], vec![1, 1, 1]]);
        assert_eq!(int_rows(batch.labels), vec![vec![7, 8, 9], vec![6, 9, 9]]);
        assert_eq!(
            int_rows(batch.decoder_input_ids),
            vec![vec![0, 7, 8], vec![0, 9, 9]]
        );
    }
}
