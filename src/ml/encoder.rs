// ============================================================
// Layer 5 — Sentence Encoder Builder
// ============================================================
// One shared encoder serves every task. It is built once from
// the config, the embedder and the task list.
//
// Shell (SentenceEncoder):
//   tokens → embedder → highway × n_layers_highway
//          → [ ; CoVe(word vectors)] → dropout
//          → phrase layer (RNN stack | self-attention | none)
//          → [ ; embeddings] when skip_embs
//   Returns (sequence, mask), mask true at real tokens.
//
// Which phrase layer, and how wide the output is (d_sent):
//
//   any LM task, bidirectional   BiLmEncoder: a forward and a
//                                backward causal encoder, each
//                                d_hid wide (+ d_emb with skip);
//                                d_sent is one direction
//   any LM task, unidirectional  shell with a causal encoder,
//                                d_hid (+ d_emb)
//   bow                          no phrase layer, d_emb (+ d_emb)
//   rnn                          LSTM stack, (1+bi)·d_hid (+ d_emb)
//   transformer                  self-attention, d_hid (+ d_emb)
//
// Padding sits on the right. Forward LSTMs reach it only after
// every real token; bidirectional layers run their backward
// half within each row's length (MaskedBiLstm), so a sentence
// encodes the same whatever else shares its batch.

use burn::{
    nn::{
        Dropout, DropoutConfig,
        Lstm, LstmConfig,
    },
    prelude::*,
};

use crate::data::batcher::TokenInput;
use crate::domain::config::{ExperimentConfig, SentEncoderKind};
use crate::domain::error::{ModelError, ModelResult};
use crate::domain::task::{Task, TaskKind};
use crate::ml::contextual::CoveEncoder;
use crate::ml::embedding::{EmbeddingBundle, TextFieldEmbedder};
use crate::ml::layers::{Highway, HighwayConfig, MaskedBiLstm, MaskedBiLstmConfig};
use crate::ml::transformer::{StackedSelfAttention, StackedSelfAttentionConfig};

// ─── RnnStack ─────────────────────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct RnnStackConfig {
    pub d_input:  usize,
    pub d_hidden: usize,
    #[config(default = 1)]
    pub n_layers: usize,
    #[config(default = false)]
    pub bidirectional: bool,
}

impl RnnStackConfig {
    pub fn output_dim(&self) -> usize {
        if self.bidirectional { 2 * self.d_hidden } else { self.d_hidden }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> RnnStack<B> {
        let d_in = |layer: usize| if layer == 0 { self.d_input } else { self.output_dim() };
        let (uni, bi) = if self.bidirectional {
            let bi = (0..self.n_layers)
                .map(|l| MaskedBiLstmConfig::new(d_in(l), self.d_hidden).init(device))
                .collect();
            (Vec::new(), bi)
        } else {
            let uni = (0..self.n_layers)
                .map(|l| LstmConfig::new(d_in(l), self.d_hidden, true).init(device))
                .collect();
            (uni, Vec::new())
        };
        RnnStack { uni, bi }
    }
}

/// A stack of LSTM layers; exactly one of the two vectors is non-empty.
#[derive(Module, Debug)]
pub struct RnnStack<B: Backend> {
    pub uni: Vec<Lstm<B>>,
    pub bi:  Vec<MaskedBiLstm<B>>,
}

impl<B: Backend> RnnStack<B> {
    pub fn forward(&self, x: Tensor<B, 3>, mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let mut x = x;
        for layer in &self.uni {
            x = layer.forward(x, None).0;
        }
        for layer in &self.bi {
            x = layer.forward(x, mask.clone());
        }
        x
    }
}

// ─── PhraseLayer ──────────────────────────────────────────────────────────────

/// The contextualising core of an encoder. Neither set means identity (bow).
#[derive(Module, Debug)]
pub struct PhraseLayer<B: Backend> {
    pub rnn:         Option<RnnStack<B>>,
    pub transformer: Option<StackedSelfAttention<B>>,
}

impl<B: Backend> PhraseLayer<B> {
    pub fn identity() -> Self {
        Self { rnn: None, transformer: None }
    }

    pub fn forward(&self, x: Tensor<B, 3>, mask: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        if let Some(rnn) = &self.rnn {
            return rnn.forward(x, mask);
        }
        if let Some(transformer) = &self.transformer {
            return transformer.forward(x, mask);
        }
        x
    }

    pub fn describe(&self) -> &'static str {
        match (&self.rnn, &self.transformer) {
            (Some(_), _) => "lstm",
            (_, Some(_)) => "self-attention",
            _ => "bag-of-words",
        }
    }
}

// ─── Shared front end ─────────────────────────────────────────────────────────

/// Embedding, highway, CoVe and dropout, shared by both encoder shells.
#[derive(Module, Debug)]
pub struct EmbeddingStage<B: Backend> {
    pub embedder: TextFieldEmbedder<B>,
    pub cove:     Option<CoveEncoder<B>>,
    pub highway:  Vec<Highway<B>>,
    pub dropout:  Dropout,
    pub pad:      usize,
}

impl<B: Backend> EmbeddingStage<B> {
    /// tokens → ([batch, seq, d_emb], mask)
    pub fn forward(&self, tokens: &TokenInput<B>) -> ModelResult<(Tensor<B, 3>, Tensor<B, 2, Bool>)> {
        let mask = tokens.padding_mask(self.pad)?;

        let mut embs = self.embedder.forward(tokens)?;
        for layer in &self.highway {
            embs = layer.forward(embs);
        }
        if let Some(cove) = &self.cove {
            let cove_embs = cove.forward(self.embedder.embed_words(tokens)?, mask.clone());
            embs = Tensor::cat(vec![embs, cove_embs], 2);
        }
        Ok((self.dropout.forward(embs), mask))
    }
}

// ─── SentenceEncoder ──────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct SentenceEncoder<B: Backend> {
    pub stage:      EmbeddingStage<B>,
    pub phrase:     PhraseLayer<B>,
    pub skip_embs:  bool,
    pub output_dim: usize,
}

impl<B: Backend> SentenceEncoder<B> {
    /// tokens → ([batch, seq, output_dim], mask)
    pub fn forward(&self, tokens: &TokenInput<B>) -> ModelResult<(Tensor<B, 3>, Tensor<B, 2, Bool>)> {
        let (embs, mask) = self.stage.forward(tokens)?;
        let encoded = self.phrase.forward(embs.clone(), mask.clone());
        let encoded = if self.skip_embs { Tensor::cat(vec![encoded, embs], 2) } else { encoded };
        Ok((encoded, mask))
    }
}

// ─── BiLmEncoder ──────────────────────────────────────────────────────────────

/// Two causal encoders reading the sentence in opposite directions.
#[derive(Module, Debug)]
pub struct BiLmEncoder<B: Backend> {
    pub stage:      EmbeddingStage<B>,
    pub fwd:        PhraseLayer<B>,
    pub bwd:        PhraseLayer<B>,
    pub skip_embs:  bool,
    /// Both directions together
    pub output_dim: usize,
}

impl<B: Backend> BiLmEncoder<B> {
    /// (forward tokens, reversed tokens) → ([batch, seq, output_dim], mask)
    ///
    /// The first half of the features is the forward direction, the
    /// second half the backward one; skip embeddings are appended per
    /// direction so the halves stay equally wide.
    pub fn forward(
        &self,
        fwd_tokens: &TokenInput<B>,
        bwd_tokens: &TokenInput<B>,
    ) -> ModelResult<(Tensor<B, 3>, Tensor<B, 2, Bool>)> {
        let (fwd_embs, mask) = self.stage.forward(fwd_tokens)?;
        let (bwd_embs, bwd_mask) = self.stage.forward(bwd_tokens)?;

        let mut fwd = self.fwd.forward(fwd_embs.clone(), mask.clone());
        let mut bwd = self.bwd.forward(bwd_embs.clone(), bwd_mask);
        if self.skip_embs {
            fwd = Tensor::cat(vec![fwd, fwd_embs], 2);
            bwd = Tensor::cat(vec![bwd, bwd_embs], 2);
        }
        Ok((Tensor::cat(vec![fwd, bwd], 2), mask))
    }
}

// ─── SharedEncoder ────────────────────────────────────────────────────────────

/// The one encoder instance every task reads through.
#[derive(Module, Debug)]
pub enum SharedEncoder<B: Backend> {
    Sentence(SentenceEncoder<B>),
    BiLm(BiLmEncoder<B>),
}

impl<B: Backend> SharedEncoder<B> {
    /// Encode a single token field. A BiLM encoder needs both
    /// directions, so it rejects this call.
    pub fn encode(&self, tokens: &TokenInput<B>) -> ModelResult<(Tensor<B, 3>, Tensor<B, 2, Bool>)> {
        match self {
            SharedEncoder::Sentence(encoder) => encoder.forward(tokens),
            SharedEncoder::BiLm(_) => Err(ModelError::Config(
                "the bidirectional LM encoder needs forward and backward inputs".to_string(),
            )),
        }
    }

    pub fn output_dim(&self) -> usize {
        match self {
            SharedEncoder::Sentence(encoder) => encoder.output_dim,
            SharedEncoder::BiLm(encoder) => encoder.output_dim,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            SharedEncoder::Sentence(encoder) => format!(
                "SentenceEncoder({}, skip_embs={}, out={})",
                encoder.phrase.describe(),
                encoder.skip_embs,
                encoder.output_dim
            ),
            SharedEncoder::BiLm(encoder) => format!(
                "BiLmEncoder({}, skip_embs={}, out={})",
                encoder.fwd.describe(),
                encoder.skip_embs,
                encoder.output_dim
            ),
        }
    }
}

// ─── build_sent_encoder ───────────────────────────────────────────────────────

/// Build the shared encoder; returns it with d_sent, the width every head reads.
pub fn build_sent_encoder<B: Backend>(
    cfg:    &ExperimentConfig,
    bundle: EmbeddingBundle<B>,
    tasks:  &[Task],
    device: &B::Device,
) -> ModelResult<(SharedEncoder<B>, usize)> {
    let EmbeddingBundle { d_emb, embedder, cove, pad } = bundle;
    let has_lm = tasks.iter().any(|t| t.kind() == TaskKind::LanguageModeling);

    let n_highway = if cfg.sent_enc == SentEncoderKind::Bow { 0 } else { cfg.n_layers_highway };
    let highway = (0..n_highway)
        .map(|_| HighwayConfig::new(embedder.output_dim).init(device))
        .collect();
    let stage = EmbeddingStage {
        embedder,
        cove,
        highway,
        dropout: DropoutConfig::new(cfg.dropout).init(),
        pad,
    };

    let skip = if cfg.skip_embs { d_emb } else { 0 };

    if has_lm {
        let phrase = || causal_phrase_layer(cfg, d_emb, device);
        let d_sent = cfg.d_hid + skip;
        let encoder = if cfg.bidirectional {
            tracing::info!("Building a bidirectional LM encoder ({:?})", cfg.sent_enc);
            SharedEncoder::BiLm(BiLmEncoder {
                stage,
                fwd: phrase()?,
                bwd: phrase()?,
                skip_embs: cfg.skip_embs,
                output_dim: 2 * d_sent,
            })
        } else {
            tracing::info!("Building a unidirectional LM encoder ({:?})", cfg.sent_enc);
            SharedEncoder::Sentence(SentenceEncoder {
                stage,
                phrase: phrase()?,
                skip_embs: cfg.skip_embs,
                output_dim: d_sent,
            })
        };
        return Ok((encoder, d_sent));
    }

    let (phrase, d_phrase) = match cfg.sent_enc {
        SentEncoderKind::Bow => (PhraseLayer::identity(), d_emb),
        SentEncoderKind::Rnn => {
            let rnn_cfg = RnnStackConfig::new(d_emb, cfg.d_hid)
                .with_n_layers(cfg.n_layers_enc)
                .with_bidirectional(cfg.bidirectional);
            let d = rnn_cfg.output_dim();
            (PhraseLayer { rnn: Some(rnn_cfg.init(device)), transformer: None }, d)
        }
        SentEncoderKind::Transformer => {
            let transformer = transformer_config(cfg, d_emb).init(device)?;
            (PhraseLayer { rnn: None, transformer: Some(transformer) }, cfg.d_hid)
        }
    };
    let d_sent = d_phrase + skip;
    tracing::info!("Built {} sentence encoder, d_sent = {}", phrase.describe(), d_sent);

    let encoder = SharedEncoder::Sentence(SentenceEncoder {
        stage,
        phrase,
        skip_embs: cfg.skip_embs,
        output_dim: d_sent,
    });
    Ok((encoder, d_sent))
}

fn transformer_config(cfg: &ExperimentConfig, d_emb: usize) -> StackedSelfAttentionConfig {
    StackedSelfAttentionConfig::new(d_emb, cfg.d_hid, cfg.d_tproj, cfg.d_ff, cfg.n_layers_enc, cfg.n_heads)
        .with_dropout(cfg.dropout)
}

/// A phrase layer that only looks at earlier positions.
fn causal_phrase_layer<B: Backend>(
    cfg:    &ExperimentConfig,
    d_emb:  usize,
    device: &B::Device,
) -> ModelResult<PhraseLayer<B>> {
    match cfg.sent_enc {
        SentEncoderKind::Rnn => {
            let rnn = RnnStackConfig::new(d_emb, cfg.d_hid)
                .with_n_layers(cfg.n_layers_enc)
                .init(device);
            Ok(PhraseLayer { rnn: Some(rnn), transformer: None })
        }
        SentEncoderKind::Transformer => {
            let transformer = transformer_config(cfg, d_emb).with_causal(true).init(device)?;
            Ok(PhraseLayer { rnn: None, transformer: Some(transformer) })
        }
        SentEncoderKind::Bow => Err(ModelError::Config(
            "language modelling needs an rnn or transformer sentence encoder, not bow".to_string(),
        )),
    }
}

/// A plain sentence encoder over `embedder`, used for decoders.
pub fn decoder_encoder<B: Backend>(
    embedder: TextFieldEmbedder<B>,
    d_hidden: usize,
    n_layers: usize,
    pad:      usize,
    device:   &B::Device,
) -> SentenceEncoder<B> {
    let rnn = RnnStackConfig::new(embedder.output_dim, d_hidden)
        .with_n_layers(n_layers)
        .init(device);
    SentenceEncoder {
        stage: EmbeddingStage {
            embedder,
            cove: None,
            highway: Vec::new(),
            dropout: DropoutConfig::new(0.0).init(),
            pad,
        },
        phrase: PhraseLayer { rnn: Some(rnn), transformer: None },
        skip_embs: false,
        output_dim: d_hidden,
    }
}
