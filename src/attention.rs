use burn::config::Config;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::tensor::activation::softmax;
use burn::tensor::cast::ToElement;
use burn::tensor::{Bool, Int};
use burn::tensor::{Tensor, backend::Backend};

/// Multi-head attention shared by encoder self-attention, decoder self-attention
/// and decoder cross-attention.
///
/// Masks are `[batch, 1, q_len, k_len]` with `true` marking positions that must not
/// be attended to. They are broadcast over the heads.
#[derive(Module, Debug)]
pub struct MultiHeadAttention<B: Backend> {
    pub d_model: usize,
    pub num_heads: usize,
    pub head_dim: usize,
    pub w_query: Linear<B>,
    pub w_key: Linear<B>,
    pub w_value: Linear<B>,
    pub out_proj: Linear<B>,
    pub dropout: Dropout,
}

impl<B: Backend> MultiHeadAttention<B> {
    pub fn forward(
        &self,
        query: Tensor<B, 3>,
        key_value: Tensor<B, 3>,
        mask: Option<Tensor<B, 4, Bool>>,
    ) -> Tensor<B, 3> {
        let [b, q_len, _d] = query.shape().dims();
        let [_b, k_len, _d] = key_value.shape().dims();

        let queries = self.split_heads(self.w_query.forward(query), b, q_len);
        let keys = self.split_heads(self.w_key.forward(key_value.clone()), b, k_len);
        let values = self.split_heads(self.w_value.forward(key_value), b, k_len);

        let attn_scores = queries
            .matmul(keys.transpose())
            .div_scalar(self.head_dim.to_f64().sqrt());
        let attn_scores = match mask {
            Some(mask) => attn_scores.mask_fill(
                mask.expand([b, self.num_heads, q_len, k_len]),
                f64::NEG_INFINITY,
            ),
            None => attn_scores,
        };

        let attn_weights = softmax(attn_scores, 3);
        let attn_weights = self.dropout.forward(attn_weights);

        let context_vecs = attn_weights.matmul(values).swap_dims(1, 2);
        let context_vecs = context_vecs.reshape([b, q_len, self.d_model]);
        self.out_proj.forward(context_vecs)
    }

    fn split_heads(&self, x: Tensor<B, 3>, b: usize, len: usize) -> Tensor<B, 4> {
        x.reshape([b, len, self.num_heads, self.head_dim])
            .swap_dims(1, 2)
    }
}

#[derive(Config, Debug)]
pub struct MultiHeadAttentionConfig {
    d_model: usize,
    num_heads: usize,
    dropout: f64,
}

impl MultiHeadAttentionConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MultiHeadAttention<B> {
        assert!(
            self.d_model % self.num_heads == 0,
            "d_model must be divisible by num_heads"
        );

        // T5 projections carry no bias
        let projection = || {
            LinearConfig::new(self.d_model, self.d_model)
                .with_bias(false)
                .init(device)
        };

        MultiHeadAttention {
            d_model: self.d_model,
            num_heads: self.num_heads,
            head_dim: self.d_model / self.num_heads,
            w_query: projection(),
            w_key: projection(),
            w_value: projection(),
            out_proj: projection(),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

/// Hides padded keys. `attention_mask` is `[batch, k_len]` with 1 for real tokens.
pub fn padding_mask<B: Backend>(attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 4, Bool> {
    let [b, k_len] = attention_mask.dims();
    attention_mask.equal_elem(0).reshape([b, 1, 1, k_len])
}

/// Hides future positions from each query, `[batch, 1, len, len]`.
pub fn causal_mask<B: Backend>(batch_size: usize, len: usize, device: &B::Device) -> Tensor<B, 4, Bool> {
    Tensor::<B, 2, Bool>::tril_mask([len, len], 0, device)
        .reshape([1, 1, len, len])
        .expand([batch_size, 1, len, len])
}
