use burn::config::Config;
use burn::module::{Module, Param};
use burn::nn::{Dropout, DropoutConfig, Embedding, EmbeddingConfig, Linear, LinearConfig};
use burn::tensor::activation::{log_softmax, relu};
use burn::tensor::{Bool, Int, TensorData};
use burn::tensor::{Tensor, backend::Backend};

use crate::attention::{MultiHeadAttention, MultiHeadAttentionConfig, causal_mask, padding_mask};
use crate::dataset::{Seq2SeqBatch, int_rows};

/// Encoder-decoder translation model in the T5 layout: shared embeddings,
/// pre-norm blocks, RMS normalisation and a ReLU feed-forward.
#[derive(Module, Debug)]
pub struct Seq2SeqModel<B: Backend> {
    pub vocab_size: usize,
    pub max_positions: usize,
    pub pad_token_id: usize,
    shared: Embedding<B>,
    pos_emb: Embedding<B>,
    dropout: Dropout,
    encoder_blocks: Vec<EncoderBlock<B>>,
    encoder_norm: RmsNorm<B>,
    decoder_blocks: Vec<DecoderBlock<B>>,
    decoder_norm: RmsNorm<B>,
    lm_head: Linear<B>,
}

impl<B: Backend> Seq2SeqModel<B> {
    fn embed(&self, ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let device = ids.device();
        let [_batch_size, seq_len] = ids.dims();

        let tok_embeds = self.shared.forward(ids);
        let pos_embeds = self
            .pos_emb
            .forward(Tensor::arange(0..seq_len as i64, &device).unsqueeze::<2>());

        self.dropout.forward(tok_embeds + pos_embeds)
    }

    /// Runs the encoder, returning `[batch, src_len, d_model]`.
    pub fn encode(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let mask = padding_mask(attention_mask);

        let mut x = self.embed(input_ids);
        for block in self.encoder_blocks.iter() {
            x = block.forward(x, mask.clone());
        }
        self.encoder_norm.forward(x)
    }

    /// Runs the decoder over `memory`, returning logits `[batch, tgt_len, vocab_size]`.
    pub fn decode(
        &self,
        decoder_input_ids: Tensor<B, 2, Int>,
        memory: Tensor<B, 3>,
        attention_mask: Tensor<B, 2, Int>,
    ) -> Tensor<B, 3> {
        let device = decoder_input_ids.device();
        let [batch_size, tgt_len] = decoder_input_ids.dims();
        let self_mask = causal_mask::<B>(batch_size, tgt_len, &device);
        let cross_mask = padding_mask(attention_mask);

        let mut x = self.embed(decoder_input_ids);
        for block in self.decoder_blocks.iter() {
            x = block.forward(x, memory.clone(), self_mask.clone(), cross_mask.clone());
        }
        let x = self.decoder_norm.forward(x);
        self.lm_head.forward(x)
    }

    /// Teacher-forced forward pass.
    pub fn forward(&self, batch: &Seq2SeqBatch<B>) -> Tensor<B, 3> {
        let memory = self.encode(batch.input_ids.clone(), batch.attention_mask.clone());
        self.decode(
            batch.decoder_input_ids.clone(),
            memory,
            batch.attention_mask.clone(),
        )
    }

    /// Mean cross-entropy over the non-pad labels.
    pub fn forward_loss(&self, batch: &Seq2SeqBatch<B>) -> (Tensor<B, 1>, Tensor<B, 3>) {
        let logits = self.forward(batch);
        let [batch_size, tgt_len, vocab_size] = logits.dims();
        let n_positions = batch_size * tgt_len;

        let targets = batch.labels.clone().reshape([n_positions]);
        let log_probs = log_softmax(logits.clone().reshape([n_positions, vocab_size]), 1);
        let nll = log_probs
            .gather(1, targets.clone().reshape([n_positions, 1]))
            .reshape([n_positions])
            .neg();

        // pad positions contribute neither to the sum nor to the token count
        let is_pad = targets.equal_elem(self.pad_token_id as i64);
        let n_tokens = is_pad.clone().bool_not().int().sum().float().clamp_min(1.0);
        let loss = nll.mask_fill(is_pad, 0.0).sum() / n_tokens;

        (loss, logits)
    }
}

#[derive(Config, Debug)]
pub struct Seq2SeqModelConfig {
    pub vocab_size: usize,
    pub pad_token_id: usize,
    pub max_positions: usize,
    pub d_model: usize,
    pub n_heads: usize,
    pub n_encoder_layers: usize,
    pub n_decoder_layers: usize,
    pub d_ff: usize,
    #[config(default = 0.1)]
    pub drop_rate: f64,
}

impl Seq2SeqModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Seq2SeqModel<B> {
        Seq2SeqModel {
            vocab_size: self.vocab_size,
            max_positions: self.max_positions,
            pad_token_id: self.pad_token_id,
            shared: EmbeddingConfig::new(self.vocab_size, self.d_model).init(device),
            pos_emb: EmbeddingConfig::new(self.max_positions, self.d_model).init(device),
            dropout: DropoutConfig::new(self.drop_rate).init(),
            encoder_blocks: (0..self.n_encoder_layers)
                .map(|_| self.encoder_block().init(device))
                .collect(),
            encoder_norm: RmsNormConfig::new(self.d_model).init(device),
            decoder_blocks: (0..self.n_decoder_layers)
                .map(|_| self.decoder_block().init(device))
                .collect(),
            decoder_norm: RmsNormConfig::new(self.d_model).init(device),
            lm_head: LinearConfig::new(self.d_model, self.vocab_size)
                .with_bias(false)
                .init(device),
        }
    }

    fn encoder_block(&self) -> EncoderBlockConfig {
        EncoderBlockConfig::new(self.d_model, self.n_heads, self.d_ff, self.drop_rate)
    }

    fn decoder_block(&self) -> DecoderBlockConfig {
        DecoderBlockConfig::new(self.d_model, self.n_heads, self.d_ff, self.drop_rate)
    }
}

#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    attn: MultiHeadAttention<B>,
    ff: FeedForward<B>,
    norm1: RmsNorm<B>,
    norm2: RmsNorm<B>,
    dropout_shortcut: Dropout,
}

impl<B: Backend> EncoderBlock<B> {
    pub fn forward(&self, x: Tensor<B, 3>, mask: Tensor<B, 4, Bool>) -> Tensor<B, 3> {
        let shortcut = x.clone();
        let x = self.norm1.forward(x);
        let x = self.attn.forward(x.clone(), x, Some(mask));
        let x = self.dropout_shortcut.forward(x).add(shortcut);

        let shortcut = x.clone();
        let x = self.norm2.forward(x);
        let x = self.ff.forward(x);
        self.dropout_shortcut.forward(x).add(shortcut)
    }
}

#[derive(Config, Debug)]
pub struct EncoderBlockConfig {
    pub d_model: usize,
    pub n_heads: usize,
    pub d_ff: usize,
    pub drop_rate: f64,
}

impl EncoderBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        EncoderBlock {
            attn: MultiHeadAttentionConfig::new(self.d_model, self.n_heads, self.drop_rate).init(device),
            ff: FeedForwardConfig::new(self.d_model, self.d_ff, self.drop_rate).init(device),
            norm1: RmsNormConfig::new(self.d_model).init(device),
            norm2: RmsNormConfig::new(self.d_model).init(device),
            dropout_shortcut: DropoutConfig::new(self.drop_rate).init(),
        }
    }
}

#[derive(Module, Debug)]
pub struct DecoderBlock<B: Backend> {
    self_attn: MultiHeadAttention<B>,
    cross_attn: MultiHeadAttention<B>,
    ff: FeedForward<B>,
    norm1: RmsNorm<B>,
    norm2: RmsNorm<B>,
    norm3: RmsNorm<B>,
    dropout_shortcut: Dropout,
}

impl<B: Backend> DecoderBlock<B> {
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        memory: Tensor<B, 3>,
        self_mask: Tensor<B, 4, Bool>,
        cross_mask: Tensor<B, 4, Bool>,
    ) -> Tensor<B, 3> {
        let shortcut = x.clone();
        let x = self.norm1.forward(x);
        let x = self.self_attn.forward(x.clone(), x, Some(self_mask));
        let x = self.dropout_shortcut.forward(x).add(shortcut);

        let shortcut = x.clone();
        let x = self.norm2.forward(x);
        let x = self.cross_attn.forward(x, memory, Some(cross_mask));
        let x = self.dropout_shortcut.forward(x).add(shortcut);

        let shortcut = x.clone();
        let x = self.norm3.forward(x);
        let x = self.ff.forward(x);
        self.dropout_shortcut.forward(x).add(shortcut)
    }
}

#[derive(Config, Debug)]
pub struct DecoderBlockConfig {
    pub d_model: usize,
    pub n_heads: usize,
    pub d_ff: usize,
    pub drop_rate: f64,
}

impl DecoderBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> DecoderBlock<B> {
        let attn = || MultiHeadAttentionConfig::new(self.d_model, self.n_heads, self.drop_rate).init(device);

        DecoderBlock {
            self_attn: attn(),
            cross_attn: attn(),
            ff: FeedForwardConfig::new(self.d_model, self.d_ff, self.drop_rate).init(device),
            norm1: RmsNormConfig::new(self.d_model).init(device),
            norm2: RmsNormConfig::new(self.d_model).init(device),
            norm3: RmsNormConfig::new(self.d_model).init(device),
            dropout_shortcut: DropoutConfig::new(self.drop_rate).init(),
        }
    }
}

#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    wi: Linear<B>,
    dropout: Dropout,
    wo: Linear<B>,
}

impl<B: Backend> FeedForward<B> {
    pub fn forward<const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        let x = self.wi.forward(input);
        let x = self.dropout.forward(relu(x));
        self.wo.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct FeedForwardConfig {
    pub d_model: usize,
    pub d_ff: usize,
    pub drop_rate: f64,
}

impl FeedForwardConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> FeedForward<B> {
        FeedForward {
            wi: LinearConfig::new(self.d_model, self.d_ff)
                .with_bias(false)
                .init(device),
            dropout: DropoutConfig::new(self.drop_rate).init(),
            wo: LinearConfig::new(self.d_ff, self.d_model)
                .with_bias(false)
                .init(device),
        }
    }
}

/// Scale-only layer norm without mean centering.
#[derive(Module, Debug)]
pub struct RmsNorm<B: Backend> {
    eps: f64,
    scale: Param<Tensor<B, 1>>,
}

impl<B: Backend> RmsNorm<B> {
    pub fn forward<const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        let rms = input
            .clone()
            .powf_scalar(2.0)
            .mean_dim(D - 1)
            .add_scalar(self.eps)
            .sqrt();
        input.div(rms).mul(self.scale.val().unsqueeze())
    }
}

#[derive(Config, Debug)]
pub struct RmsNormConfig {
    pub d_model: usize,
}

impl RmsNormConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> RmsNorm<B> {
        RmsNorm {
            eps: 1e-6,
            scale: Param::from_tensor(Tensor::ones([self.d_model], device)),
        }
    }
}

/// Greedy decoding. Returns one row of generated ids per input, without the
/// decoder start token; rows stop at (and include) the first eos.
pub fn generate_greedy<B: Backend>(
    model: &Seq2SeqModel<B>,
    input_ids: Tensor<B, 2, Int>,
    attention_mask: Tensor<B, 2, Int>,
    decoder_start_token_id: u32,
    eos_token_id: u32,
    max_new_tokens: usize,
) -> Vec<Vec<u32>> {
    let device = input_ids.device();
    let [n_batches, _src_len] = input_ids.dims();
    let memory = model.encode(input_ids, attention_mask.clone());

    let mut idx = Tensor::<B, 2, Int>::full([n_batches, 1], decoder_start_token_id as i64, &device);
    let mut generated = vec![Vec::new(); n_batches];
    let mut finished = vec![false; n_batches];
    let max_new_tokens = max_new_tokens.min(model.max_positions.saturating_sub(1));

    for _ in 0..max_new_tokens {
        let logits = model.decode(idx.clone(), memory.clone(), attention_mask.clone());
        let [_b, n_tokens, vocab_size] = logits.dims();
        let last_logits = logits
            .slice([0..n_batches, n_tokens - 1..n_tokens, 0..vocab_size])
            .squeeze::<2>(1);
        let idx_next = int_rows(last_logits.argmax(1));

        let mut next_ids = Vec::with_capacity(n_batches);
        for (row, next) in idx_next.iter().enumerate() {
            let token = if finished[row] {
                model.pad_token_id as u32
            } else {
                let token = next[0];
                generated[row].push(token);
                finished[row] = token == eos_token_id;
                token
            };
            next_ids.push(token as i64);
        }

        if finished.iter().all(|done| *done) {
            break;
        }

        let idx_next = Tensor::<B, 2, Int>::from_data(TensorData::new(next_ids, [n_batches, 1]), &device);
        idx = Tensor::cat(vec![idx, idx_next], 1);
    }

    generated
}
