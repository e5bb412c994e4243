// ============================================================
// Layer 5 — Stacked Self-Attention Encoder
// ============================================================
// The transformer phrase layer:
//
//   x [batch, seq, d_input]
//     → Linear d_input → d_hidden, + sinusoidal timing signal
//     → n_layers × EncoderBlock
//         multi-head self-attention (queries, keys and values
//         projected to d_proj, split across n_heads)
//         residual + LayerNorm
//         feed-forward d_hidden → d_ff → d_hidden (ReLU)
//         residual + LayerNorm
//
// Burn's MultiHeadAttention keeps d_model wide projections,
// so the attention here is written out by hand to support a
// separate projection width.
//
// The causal variant (language modelling) adds an
// autoregressive mask so position t only attends to ≤ t.
//
// Reference: Vaswani et al. (2017) Attention Is All You Need

use burn::{
    nn::{
        attention::generate_autoregressive_mask,
        Dropout, DropoutConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::{relu, softmax},
};

use crate::domain::error::{ModelError, ModelResult};

const MASK_FILL: f32 = -1e9;

#[derive(Config, Debug)]
pub struct StackedSelfAttentionConfig {
    pub d_input:  usize,
    pub d_hidden: usize,
    /// Width of the query / key / value projections
    pub d_proj:   usize,
    pub d_ff:     usize,
    pub n_layers: usize,
    pub n_heads:  usize,
    #[config(default = 0.1)]
    pub dropout:  f64,
    #[config(default = false)]
    pub causal:   bool,
}

impl StackedSelfAttentionConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ModelResult<StackedSelfAttention<B>> {
        if self.n_heads == 0 || self.d_proj % self.n_heads != 0 {
            return Err(ModelError::InvalidValue {
                key:    "n_heads".to_string(),
                reason: format!("{} heads do not evenly split a projection of {}", self.n_heads, self.d_proj),
            });
        }

        let layers = (0..self.n_layers)
            .map(|_| self.build_encoder_block(device))
            .collect();

        Ok(StackedSelfAttention {
            input_proj: LinearConfig::new(self.d_input, self.d_hidden).init(device),
            layers,
            causal: self.causal,
            d_hidden: self.d_hidden,
        })
    }

    fn build_encoder_block<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        let query   = LinearConfig::new(self.d_hidden, self.d_proj).init(device);
        let key     = LinearConfig::new(self.d_hidden, self.d_proj).init(device);
        let value   = LinearConfig::new(self.d_hidden, self.d_proj).init(device);
        let attn_out = LinearConfig::new(self.d_proj, self.d_hidden).init(device);
        let ffn_linear1 = LinearConfig::new(self.d_hidden, self.d_ff).init(device);
        let ffn_linear2 = LinearConfig::new(self.d_ff, self.d_hidden).init(device);
        let norm1   = LayerNormConfig::new(self.d_hidden).init(device);
        let norm2   = LayerNormConfig::new(self.d_hidden).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        EncoderBlock {
            query, key, value, attn_out,
            ffn_linear1, ffn_linear2,
            norm1, norm2, dropout,
            n_heads: self.n_heads,
            d_proj:  self.d_proj,
        }
    }
}

#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    pub query:       Linear<B>,
    pub key:         Linear<B>,
    pub value:       Linear<B>,
    pub attn_out:    Linear<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub dropout:     Dropout,
    pub n_heads:     usize,
    pub d_proj:      usize,
}

impl<B: Backend> EncoderBlock<B> {
    /// `blocked` is true wherever attention is not allowed — [batch, seq, seq]
    pub fn forward(&self, x: Tensor<B, 3>, blocked: Tensor<B, 3, Bool>) -> Tensor<B, 3> {
        let attn_output = self.self_attention(x.clone(), blocked);
        let x = self.norm1.forward(x + self.dropout.forward(attn_output));
        let ffn_out = self.ffn_linear2.forward(relu(self.ffn_linear1.forward(x.clone())));
        self.norm2.forward(x + self.dropout.forward(ffn_out))
    }

    fn self_attention(&self, x: Tensor<B, 3>, blocked: Tensor<B, 3, Bool>) -> Tensor<B, 3> {
        let [batch, seq, _] = x.dims();
        let d_proj = self.d_proj;
        let head_dim = d_proj / self.n_heads;

        // [batch, heads, seq, head_dim]
        let split = |t: Tensor<B, 3>| t.reshape([batch, seq, self.n_heads, head_dim]).swap_dims(1, 2);
        let q = split(self.query.forward(x.clone()));
        let k = split(self.key.forward(x.clone()));
        let v = split(self.value.forward(x));

        let scale = (head_dim as f32).sqrt();
        let scores = q.matmul(k.swap_dims(2, 3)) / scale;
        let blocked = blocked.unsqueeze_dim::<4>(1).expand([batch, self.n_heads, seq, seq]);
        let weights = softmax(scores.mask_fill(blocked, MASK_FILL), 3);

        let context = self
            .dropout
            .forward(weights)
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, seq, d_proj]);
        self.attn_out.forward(context)
    }
}

#[derive(Module, Debug)]
pub struct StackedSelfAttention<B: Backend> {
    pub input_proj: Linear<B>,
    pub layers:     Vec<EncoderBlock<B>>,
    pub causal:     bool,
    pub d_hidden:   usize,
}

impl<B: Backend> StackedSelfAttention<B> {
    /// x: [batch, seq, d_input], mask: [batch, seq] → [batch, seq, d_hidden]
    pub fn forward(&self, x: Tensor<B, 3>, mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let [batch, seq, _] = x.dims();
        let device = x.device();

        // Padded keys are never attended to
        let mut blocked = mask.bool_not().unsqueeze_dim::<3>(1).expand([batch, seq, seq]);
        if self.causal {
            let future = generate_autoregressive_mask::<B>(batch, seq, &device);
            blocked = blocked.int().add(future.int()).greater_elem(0);
        }

        let timing = timing_signal::<B>(seq, self.d_hidden, &device).unsqueeze_dim::<3>(0);
        let mut x = self.input_proj.forward(x) + timing;
        for layer in &self.layers {
            x = layer.forward(x, blocked.clone());
        }
        x
    }
}

/// Sinusoidal position signal — shape: [seq, width]
fn timing_signal<B: Backend>(seq: usize, width: usize, device: &B::Device) -> Tensor<B, 2> {
    let half = width / 2;
    let mut values = vec![0.0f32; seq * width];
    for pos in 0..seq {
        for i in 0..half {
            let rate = 1.0 / 10_000f32.powf(i as f32 / half.max(1) as f32);
            let angle = pos as f32 * rate;
            values[pos * width + i] = angle.sin();
            values[pos * width + half + i] = angle.cos();
        }
    }
    Tensor::<B, 1>::from_floats(values.as_slice(), device).reshape([seq, width])
}
