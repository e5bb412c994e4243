// ============================================================
// Layer 5 — Building Blocks
// ============================================================
// Small modules shared by the encoders and the task heads:
//
//   Highway       gate·x + (1−gate)·relu(Wx), one Linear d→2d
//   Pooler        project d_inp → d_proj, then reduce the
//                 sequence (max / mean / final non-pad step)
//   Classifier    log_reg | mlp | fancy_mlp over a vector
//   PairAttention dot-product attention between two
//                 sentences followed by a biLSTM modeling
//                 layer over [s ; attended(other)]
//   MaskedBiLstm  biLSTM whose backward direction starts at
//                 each row's own last real token
//
// Masks are Bool tensors [batch, seq], true at real tokens,
// and padding is always on the right.
// Masked positions are filled with a large finite negative
// value before max / softmax so an all-padding row stays finite.

use burn::{
    module::Ignored,
    nn::{
        Dropout, DropoutConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
        Lstm, LstmConfig,
    },
    prelude::*,
    tensor::activation::{relu, sigmoid, softmax, tanh},
};

use crate::domain::config::{ClassifierKind, PoolType};

/// Fill value for masked scores
const MASK_FILL: f32 = -1e9;

// ─── Mask helpers ─────────────────────────────────────────────────────────────

/// [batch, seq] → [batch, seq, width], true at padding.
pub fn padding_positions<B: Backend>(mask: Tensor<B, 2, Bool>, width: usize) -> Tensor<B, 3, Bool> {
    let [batch, seq] = mask.dims();
    mask.bool_not().unsqueeze_dim::<3>(2).expand([batch, seq, width])
}

/// Zero every padded position of a sequence.
pub fn zero_padding<B: Backend>(x: Tensor<B, 3>, mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
    let [_, _, width] = x.dims();
    x.mask_fill(padding_positions(mask, width), 0.0)
}

/// Reduce [batch, seq, d] to [batch, d] over the real tokens.
pub fn pool_sequence<B: Backend>(x: Tensor<B, 3>, mask: Tensor<B, 2, Bool>, pool: PoolType) -> Tensor<B, 2> {
    let [batch, seq, width] = x.dims();
    match pool {
        PoolType::Max => x
            .mask_fill(padding_positions(mask, width), MASK_FILL)
            .max_dim(1)
            .reshape([batch, width]),
        PoolType::Mean => {
            let weights = mask.float().unsqueeze_dim::<3>(2);
            let count = weights.clone().sum_dim(1).clamp_min(1.0); // [batch, 1, 1]
            (x * weights).sum_dim(1).div(count).reshape([batch, width])
        }
        PoolType::Final => {
            // Index of the last real token; padding is always on the right
            let last = mask
                .int()
                .sum_dim(1)
                .sub_scalar(1)
                .clamp(0, seq.saturating_sub(1) as i32)
                .unsqueeze_dim::<3>(2)
                .expand([batch, 1, width]);
            x.gather(1, last).reshape([batch, width])
        }
    }
}

/// Softmax over the last axis of [batch, rows, cols], ignoring masked columns.
fn masked_softmax<B: Backend>(scores: Tensor<B, 3>, col_mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
    let [batch, rows, cols] = scores.dims();
    let hidden = col_mask.bool_not().unsqueeze_dim::<3>(1).expand([batch, rows, cols]);
    softmax(scores.mask_fill(hidden, MASK_FILL), 2)
}

/// Mirror the real steps of every row; padded steps keep their place.
///
/// Row [a, b, c, pad] becomes [c, b, a, pad]. Applying it twice is the identity.
pub fn reverse_within_lengths<B: Backend>(x: Tensor<B, 3>, mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
    let [batch, seq, width] = x.dims();
    let lengths = mask.clone().int().sum_dim(1).expand([batch, seq]);
    let positions = Tensor::<B, 1, Int>::arange(0..seq as i64, &x.device())
        .reshape([1, seq])
        .expand([batch, seq]);

    // real step i of a row with length L reads step L-1-i
    let mirrored = lengths.sub(positions.clone()).sub_scalar(1);
    let index = positions.mask_where(mask, mirrored);
    x.gather(1, index.unsqueeze_dim::<3>(2).expand([batch, seq, width]))
}

// ─── MaskedBiLstm ─────────────────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct MaskedBiLstmConfig {
    pub d_input:  usize,
    pub d_hidden: usize,
}

impl MaskedBiLstmConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MaskedBiLstm<B> {
        MaskedBiLstm {
            fwd:      LstmConfig::new(self.d_input, self.d_hidden, true).init(device),
            bwd:      LstmConfig::new(self.d_input, self.d_hidden, true).init(device),
            d_hidden: self.d_hidden,
        }
    }
}

/// Bidirectional LSTM over right-padded rows.
///
/// The forward direction reaches padding only after the last real
/// token. The backward one runs over each row reversed within its
/// own length, so no real step ever reads a padded one.
#[derive(Module, Debug)]
pub struct MaskedBiLstm<B: Backend> {
    pub fwd:      Lstm<B>,
    pub bwd:      Lstm<B>,
    pub d_hidden: usize,
}

impl<B: Backend> MaskedBiLstm<B> {
    /// [batch, seq, d_input] → [batch, seq, 2·d_hidden], forward half first
    pub fn forward(&self, x: Tensor<B, 3>, mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let (fwd, _) = self.fwd.forward(x.clone(), None);
        let (bwd, _) = self.bwd.forward(reverse_within_lengths(x, mask.clone()), None);
        Tensor::cat(vec![fwd, reverse_within_lengths(bwd, mask)], 2)
    }
}

// ─── Highway ──────────────────────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct HighwayConfig {
    pub d_model: usize,
}

impl HighwayConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Highway<B> {
        Highway {
            layer:   LinearConfig::new(self.d_model, 2 * self.d_model).init(device),
            d_model: self.d_model,
        }
    }
}

#[derive(Module, Debug)]
pub struct Highway<B: Backend> {
    pub layer:   Linear<B>,
    pub d_model: usize,
}

impl<B: Backend> Highway<B> {
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let projected = self.layer.forward(x.clone());
        let nonlinear = relu(projected.clone().narrow(D - 1, 0, self.d_model));
        let gate = sigmoid(projected.narrow(D - 1, self.d_model, self.d_model));
        gate.clone() * x + gate.neg().add_scalar(1.0) * nonlinear
    }
}

// ─── Pooler ───────────────────────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct PoolerConfig {
    pub d_input: usize,
    pub d_proj:  usize,
    #[config(default = "PoolType::Max")]
    pub pool_type: PoolType,
}

impl PoolerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Pooler<B> {
        Pooler {
            project:   LinearConfig::new(self.d_input, self.d_proj).init(device),
            pool_type: Ignored(self.pool_type),
        }
    }
}

/// Projects every position, then pools over the sequence.
#[derive(Module, Debug)]
pub struct Pooler<B: Backend> {
    pub project:   Linear<B>,
    pub pool_type: Ignored<PoolType>,
}

impl<B: Backend> Pooler<B> {
    /// [batch, seq, d_input] → [batch, d_proj]
    pub fn forward(&self, x: Tensor<B, 3>, mask: Tensor<B, 2, Bool>) -> Tensor<B, 2> {
        pool_sequence(self.project.forward(x), mask, *self.pool_type)
    }
}

// ─── Classifier ───────────────────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct ClassifierConfig {
    pub d_input:   usize,
    pub n_classes: usize,
    pub kind:      ClassifierKind,
    #[config(default = 512)]
    pub d_hidden:  usize,
    #[config(default = 0.0)]
    pub dropout:   f64,
}

impl ClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Classifier<B> {
        let n_blocks = match self.kind {
            ClassifierKind::LogReg   => 0,
            ClassifierKind::Mlp      => 1,
            ClassifierKind::FancyMlp => 2,
        };
        let blocks: Vec<MlpBlock<B>> = (0..n_blocks)
            .map(|i| {
                let d_in = if i == 0 { self.d_input } else { self.d_hidden };
                MlpBlock {
                    linear: LinearConfig::new(d_in, self.d_hidden).init(device),
                    norm:   LayerNormConfig::new(self.d_hidden).init(device),
                }
            })
            .collect();
        let d_out_in = if n_blocks == 0 { self.d_input } else { self.d_hidden };

        Classifier {
            blocks,
            output:  LinearConfig::new(d_out_in, self.n_classes).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

/// dropout → linear → tanh → layer norm
#[derive(Module, Debug)]
pub struct MlpBlock<B: Backend> {
    pub linear: Linear<B>,
    pub norm:   LayerNorm<B>,
}

#[derive(Module, Debug)]
pub struct Classifier<B: Backend> {
    pub blocks:  Vec<MlpBlock<B>>,
    pub output:  Linear<B>,
    pub dropout: Dropout,
}

impl<B: Backend> Classifier<B> {
    /// [batch, d_input] → [batch, n_classes]
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        if self.blocks.is_empty() {
            return self.output.forward(x);
        }
        let mut x = x;
        for block in &self.blocks {
            x = block.norm.forward(tanh(block.linear.forward(self.dropout.forward(x))));
        }
        self.output.forward(self.dropout.forward(x))
    }
}

// ─── PairAttention ────────────────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct PairAttentionConfig {
    /// Width of each encoded sentence
    pub d_input: usize,
    #[config(default = 0.0)]
    pub dropout: f64,
}

impl PairAttentionConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> PairAttention<B> {
        // The modeling layer is as wide as its input sentence again
        let d_hidden = self.d_input / 2;
        PairAttention {
            modeling:   MaskedBiLstmConfig::new(2 * self.d_input, d_hidden).init(device),
            dropout:    DropoutConfig::new(self.dropout).init(),
            output_dim: 2 * d_hidden,
        }
    }
}

#[derive(Module, Debug)]
pub struct PairAttention<B: Backend> {
    pub modeling:   MaskedBiLstm<B>,
    pub dropout:    Dropout,
    pub output_dim: usize,
}

impl<B: Backend> PairAttention<B> {
    /// Contextualise each sentence with its attention over the other.
    /// Returns both sentences at width `output_dim`.
    pub fn forward(
        &self,
        s1:    Tensor<B, 3>,
        s2:    Tensor<B, 3>,
        mask1: Tensor<B, 2, Bool>,
        mask2: Tensor<B, 2, Bool>,
    ) -> (Tensor<B, 3>, Tensor<B, 3>) {
        // [batch, len1, len2]
        let similarity = s1.clone().matmul(s2.clone().swap_dims(1, 2));

        let s1_to_s2 = masked_softmax(similarity.clone(), mask2.clone()).matmul(s2.clone());
        let s2_to_s1 = masked_softmax(similarity.swap_dims(1, 2), mask1.clone()).matmul(s1.clone());

        let s1_ctx = Tensor::cat(vec![s1, s1_to_s2], 2);
        let s2_ctx = Tensor::cat(vec![s2, s2_to_s1], 2);

        let out1 = self.modeling.forward(s1_ctx, mask1);
        let out2 = self.modeling.forward(s2_ctx, mask2);
        (self.dropout.forward(out1), self.dropout.forward(out2))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn floats<const D: usize>(t: Tensor<TestBackend, D>) -> Vec<f32> {
        t.into_data().convert::<f32>().to_vec::<f32>().unwrap()
    }

    fn sequence() -> (Tensor<TestBackend, 3>, Tensor<TestBackend, 2, Bool>) {
        let device = Default::default();
        // batch 1, seq 3, width 2; the last step is padding
        let x = Tensor::<TestBackend, 1>::from_floats([1.0, 5.0, 3.0, 2.0, 100.0, 100.0], &device)
            .reshape([1, 3, 2]);
        let mask = Tensor::<TestBackend, 1, Int>::from_ints([1, 1, 0], &device)
            .reshape([1, 3])
            .equal_elem(1);
        (x, mask)
    }

    #[test]
    fn test_pooling_ignores_padding() {
        let (x, mask) = sequence();
        assert_eq!(floats(pool_sequence(x.clone(), mask.clone(), PoolType::Max)), vec![3.0, 5.0]);
        assert_eq!(floats(pool_sequence(x.clone(), mask.clone(), PoolType::Mean)), vec![2.0, 3.5]);
        assert_eq!(floats(pool_sequence(x, mask, PoolType::Final)), vec![3.0, 2.0]);
    }

    #[test]
    fn test_zero_padding() {
        let (x, mask) = sequence();
        assert_eq!(floats(zero_padding(x, mask)), vec![1.0, 5.0, 3.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_reverse_within_lengths() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_floats([1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 0.0, 0.0], &device)
            .reshape([2, 4, 1]);
        let mask = Tensor::<TestBackend, 1, Int>::from_ints([1, 1, 1, 0, 1, 1, 0, 0], &device)
            .reshape([2, 4])
            .equal_elem(1);

        let reversed = reverse_within_lengths(x.clone(), mask.clone());
        assert_eq!(floats(reversed.clone()), vec![3.0, 2.0, 1.0, 0.0, 5.0, 4.0, 0.0, 0.0]);
        assert_eq!(floats(reverse_within_lengths(reversed, mask)), floats(x));
    }

    #[test]
    fn test_masked_bilstm_ignores_other_rows_padding() {
        let device = Default::default();
        let lstm = MaskedBiLstmConfig::new(3, 2).init::<TestBackend>(&device);

        // Row 0 has two real steps; row 1 has four
        let values: Vec<f32> = (0..24).map(|i| (i as f32 * 0.37).sin()).collect();
        let batched = Tensor::<TestBackend, 1>::from_floats(values.as_slice(), &device).reshape([2, 4, 3]);
        let mask = Tensor::<TestBackend, 1, Int>::from_ints([1, 1, 0, 0, 1, 1, 1, 1], &device)
            .reshape([2, 4])
            .equal_elem(1);
        let alone = batched.clone().narrow(0, 0, 1).narrow(1, 0, 2);
        let alone_mask = Tensor::<TestBackend, 2, Int>::ones([1, 2], &device).equal_elem(1);

        let out_batched = lstm.forward(batched, mask).narrow(0, 0, 1).narrow(1, 0, 2);
        let out_alone = lstm.forward(alone, alone_mask);
        assert_eq!(out_alone.dims(), [1, 2, 4]);
        for (a, b) in floats(out_alone).iter().zip(floats(out_batched)) {
            assert!((a - b).abs() < 1e-5, "{a} != {b}");
        }
    }

    #[test]
    fn test_highway_keeps_shape() {
        let device = Default::default();
        let highway = HighwayConfig::new(6).init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 3>::ones([2, 4, 6], &device);
        assert_eq!(highway.forward(x).dims(), [2, 4, 6]);
    }

    #[test]
    fn test_classifier_kinds() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::ones([3, 8], &device);
        for (kind, n_blocks) in [
            (ClassifierKind::LogReg, 0),
            (ClassifierKind::Mlp, 1),
            (ClassifierKind::FancyMlp, 2),
        ] {
            let cls = ClassifierConfig::new(8, 5, kind).with_d_hidden(4).init::<TestBackend>(&device);
            assert_eq!(cls.blocks.len(), n_blocks);
            assert_eq!(cls.forward(x.clone()).dims(), [3, 5]);
        }
    }

    #[test]
    fn test_pair_attention_output_width() {
        let device = Default::default();
        let attn = PairAttentionConfig::new(6).init::<TestBackend>(&device);
        let s1 = Tensor::<TestBackend, 3>::ones([2, 4, 6], &device);
        let s2 = Tensor::<TestBackend, 3>::ones([2, 3, 6], &device);
        let m1 = Tensor::<TestBackend, 2, Int>::ones([2, 4], &device).equal_elem(1);
        let m2 = Tensor::<TestBackend, 2, Int>::ones([2, 3], &device).equal_elem(1);

        let (o1, o2) = attn.forward(s1, s2, m1, m2);
        assert_eq!(attn.output_dim, 6);
        assert_eq!(o1.dims(), [2, 4, 6]);
        assert_eq!(o2.dims(), [2, 3, 6]);
    }
}
