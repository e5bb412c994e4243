// ============================================================
// Layer 5 — Frozen Pretrained Encoders
// ============================================================
// Two optional pretrained components feed the embedding layer.
//
// ContextualEmbedder (ELMo-style)
//   byte ids [batch, seq, 50]
//     → char embedding 262 × 16
//     → 7 convolutions, 2048 filters in total, max over time
//     → 2 highway layers → projection to 512       (chars only)
//     → + 2-layer biLSTM, 512 per direction          (full)
//     → scalar mix over [token ; token], lstm1, lstm2, × gamma
//   Output: 512 wide (chars only) or 1024 wide (full).
//
// CoveEncoder
//   word vectors [batch, seq, d_word]
//     → 2-layer biLSTM, 300 per direction → 600 wide
//
// Both are frozen (no gradients). Weights come from burn
// records resolved by the PretrainedStore.

use burn::{
    module::Param,
    nn::{
        conv::{Conv1d, Conv1dConfig},
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::{relu, softmax},
};

use crate::data::sample::ELMO_MAX_CHARS;
use crate::domain::error::{ModelError, ModelResult};
use crate::infra::pretrained::PretrainedStore;
use crate::ml::layers::{Highway, HighwayConfig, MaskedBiLstm, MaskedBiLstmConfig};

/// Byte vocabulary: 256 bytes, BOW/EOW/pad markers, +1 shift for padding
pub const N_BYTE_CHARS: usize = 262;

const CHAR_DIM: usize = 16;
const FILTERS: [(usize, usize); 7] = [(1, 32), (2, 32), (3, 64), (4, 128), (5, 256), (6, 512), (7, 1024)];
const N_HIGHWAY: usize = 2;
const PROJECTION_DIM: usize = 512;
const COVE_HIDDEN: usize = 300;

/// Width of the CoVe output.
pub const COVE_DIM: usize = 2 * COVE_HIDDEN;

// ─── ContextualEmbedder ───────────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct ContextualEmbedderConfig {
    /// Char-CNN only (512 wide) instead of the full model (1024 wide)
    #[config(default = true)]
    pub chars_only: bool,
    #[config(default = 0.0)]
    pub dropout:    f64,
}

impl ContextualEmbedderConfig {
    pub fn output_dim(&self) -> usize {
        if self.chars_only { PROJECTION_DIM } else { 2 * PROJECTION_DIM }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ContextualEmbedder<B> {
        let n_filters: usize = FILTERS.iter().map(|&(_, n)| n).sum();

        let convs = FILTERS
            .iter()
            .map(|&(width, n)| Conv1dConfig::new(CHAR_DIM, n, width).init(device))
            .collect();
        let highway = (0..N_HIGHWAY)
            .map(|_| HighwayConfig::new(n_filters).init(device))
            .collect();

        let lstm = if self.chars_only {
            Vec::new()
        } else {
            vec![
                MaskedBiLstmConfig::new(PROJECTION_DIM, PROJECTION_DIM).init(device),
                MaskedBiLstmConfig::new(2 * PROJECTION_DIM, PROJECTION_DIM).init(device),
            ]
        };
        let mix = (!self.chars_only).then(|| ScalarMix {
            weights: Param::from_tensor(Tensor::zeros([3], device)),
            gamma:   Param::from_tensor(Tensor::ones([1], device)),
        });

        ContextualEmbedder {
            char_embedding: EmbeddingConfig::new(N_BYTE_CHARS, CHAR_DIM).init(device),
            convs,
            highway,
            projection: LinearConfig::new(n_filters, PROJECTION_DIM).init(device),
            lstm,
            mix,
            dropout: DropoutConfig::new(self.dropout).init(),
            output_dim: self.output_dim(),
        }
    }
}

/// γ · Σ softmax(w)_k · layer_k
#[derive(Module, Debug)]
pub struct ScalarMix<B: Backend> {
    pub weights: Param<Tensor<B, 1>>,
    pub gamma:   Param<Tensor<B, 1>>,
}

impl<B: Backend> ScalarMix<B> {
    /// Three [batch, seq, d] layers → one [batch, seq, d]
    pub fn forward(&self, layers: Vec<Tensor<B, 3>>) -> Tensor<B, 3> {
        let stacked = Tensor::stack::<4>(layers, 0);
        let [n_layers, batch, seq, width] = stacked.dims();
        let weights = softmax(self.weights.val(), 0).reshape([n_layers, 1, 1, 1]);
        let mixed = (stacked * weights).sum_dim(0).reshape([batch, seq, width]);
        mixed * self.gamma.val().reshape([1, 1, 1])
    }
}

#[derive(Module, Debug)]
pub struct ContextualEmbedder<B: Backend> {
    pub char_embedding: Embedding<B>,
    pub convs:          Vec<Conv1d<B>>,
    pub highway:        Vec<Highway<B>>,
    pub projection:     Linear<B>,
    pub lstm:           Vec<MaskedBiLstm<B>>,
    pub mix:            Option<ScalarMix<B>>,
    pub dropout:        Dropout,
    pub output_dim:     usize,
}

impl<B: Backend> ContextualEmbedder<B> {
    /// Build, then load the pretrained record if one exists.
    /// Without a record the module keeps its initial weights.
    pub fn load(config: &ContextualEmbedderConfig, store: &PretrainedStore, device: &B::Device) -> ModelResult<Self> {
        let module = config.init(device);
        let path = store.contextual_path();
        let module = if store.has_record(&path) {
            store.load_into(module, &path, device)?
        } else {
            tracing::warn!(
                "No contextual encoder weights at '{}', using untrained frozen weights",
                path.display()
            );
            module
        };
        Ok(module.no_grad())
    }

    /// ids: [batch, seq, 50] → [batch, seq, output_dim]
    ///
    /// Padding tokens are the all-zero id rows.
    pub fn forward(&self, ids: Tensor<B, 3, Int>) -> Tensor<B, 3> {
        let [batch, seq, n_chars] = ids.dims();
        let mask = ids.clone().sum_dim(2).reshape([batch, seq]).greater_elem(0);

        // [batch·seq, 16, n_chars]
        let chars = self
            .char_embedding
            .forward(ids.reshape([batch * seq, n_chars]))
            .swap_dims(1, 2);

        let features: Vec<Tensor<B, 2>> = self
            .convs
            .iter()
            .map(|conv| {
                let out = relu(conv.forward(chars.clone()));
                let [rows, filters, _] = out.dims();
                out.max_dim(2).reshape([rows, filters])
            })
            .collect();

        let mut token = Tensor::cat(features, 1);
        for layer in &self.highway {
            token = layer.forward(token);
        }
        let token = self.projection.forward(token).reshape([batch, seq, PROJECTION_DIM]);

        let Some(mix) = &self.mix else {
            return token;
        };

        let mut layers = vec![Tensor::cat(vec![token.clone(), token.clone()], 2)];
        let mut x = token;
        for lstm in &self.lstm {
            let out = lstm.forward(x, mask.clone());
            layers.push(out.clone());
            x = out;
        }
        self.dropout.forward(mix.forward(layers))
    }
}

// ─── CoveEncoder ──────────────────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct CoveEncoderConfig {
    /// Width of the word vectors it reads
    pub d_word: usize,
}

impl CoveEncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> CoveEncoder<B> {
        CoveEncoder {
            layers: vec![
                MaskedBiLstmConfig::new(self.d_word, COVE_HIDDEN).init(device),
                MaskedBiLstmConfig::new(COVE_DIM, COVE_HIDDEN).init(device),
            ],
        }
    }
}

#[derive(Module, Debug)]
pub struct CoveEncoder<B: Backend> {
    pub layers: Vec<MaskedBiLstm<B>>,
}

impl<B: Backend> CoveEncoder<B> {
    /// Build and load the pretrained record; fails when it is missing or unreadable.
    pub fn load(config: &CoveEncoderConfig, store: &PretrainedStore, device: &B::Device) -> ModelResult<Self> {
        let path = store.cove_path();
        if !store.has_record(&path) {
            return Err(ModelError::Pretrained {
                path,
                reason: "no record found".to_string(),
            });
        }
        let module = store.load_into(config.init(device), &path, device)?;
        Ok(module.no_grad())
    }

    /// words: [batch, seq, d_word] → [batch, seq, 600]
    pub fn forward(&self, words: Tensor<B, 3>, mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let mut x = words;
        for layer in &self.layers {
            x = layer.forward(x, mask.clone());
        }
        x
    }
}
