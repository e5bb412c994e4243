// ============================================================
// Layer 5 — Embedding Builder
// ============================================================
// Decides, from the config, which token embedders exist and
// how wide their concatenation (d_emb) is.
//
//   Source       Condition              Width
//   ──────────   ────────────────────   ─────────────────────
//   words        word_embs != none      d_word, or the width
//                                       of the pretrained matrix
//   cove         cove (needs words)     600, only if it loads
//   chars        char_embs              d_char
//   elmo         elmo                   512 (chars only) / 1024
//
// Word vectors are always frozen and the padding row is the
// zero vector. A pretrained matrix is used only for glove /
// fastText and only when its row count equals the word
// vocabulary size.
//
// CoVe is not part of the TextFieldEmbedder: it reads the
// word vectors and its output is concatenated later by the
// sentence encoder. Its width still counts towards d_emb.

use burn::{
    module::Param,
    nn::{
        conv::{Conv1d, Conv1dConfig},
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::relu,
};

use crate::data::batcher::TokenInput;
use crate::domain::config::{ExperimentConfig, WordEmbs};
use crate::domain::error::{ModelError, ModelResult};
use crate::domain::vocab::{Vocabulary, CHARS, TOKENS};
use crate::infra::pretrained::PretrainedStore;
use crate::ml::contextual::{
    ContextualEmbedder, ContextualEmbedderConfig, CoveEncoder, CoveEncoderConfig, COVE_DIM,
};

// ─── WordEmbedder ─────────────────────────────────────────────────────────────

/// Frozen word lookup table with a zero padding row.
#[derive(Module, Debug)]
pub struct WordEmbedder<B: Backend> {
    pub embedding: Embedding<B>,
    pub d_word:    usize,
}

impl<B: Backend> WordEmbedder<B> {
    /// From scratch (`pretrained = None`) or from a `[vocab, d_word]` matrix.
    pub fn new(
        n_words:    usize,
        d_word:     usize,
        pretrained: Option<Tensor<B, 2>>,
        pad:        usize,
        device:     &B::Device,
    ) -> Self {
        let weight = pretrained.unwrap_or_else(|| {
            EmbeddingConfig::new(n_words, d_word).init::<B>(device).weight.val()
        });
        let [n_words, d_word] = weight.dims();
        let weight = weight.slice_assign([pad..pad + 1, 0..d_word], Tensor::zeros([1, d_word], device));

        let mut embedding = EmbeddingConfig::new(n_words, d_word).init(device);
        embedding.weight = Param::from_tensor(weight);
        Self { embedding: embedding.no_grad(), d_word }
    }

    pub fn forward(&self, ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        self.embedding.forward(ids)
    }
}

// ─── CnnEncoder ───────────────────────────────────────────────────────────────

#[derive(Config, Debug)]
pub struct CnnEncoderConfig {
    pub d_input:      usize,
    pub n_filters:    usize,
    pub filter_sizes: Vec<usize>,
    pub output_dim:   Option<usize>,
}

impl CnnEncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> CnnEncoder<B> {
        let convs = self
            .filter_sizes
            .iter()
            .map(|&width| Conv1dConfig::new(self.d_input, self.n_filters, width).init(device))
            .collect();
        let pooled = self.n_filters * self.filter_sizes.len();
        CnnEncoder {
            convs,
            projection: self.output_dim.map(|d| LinearConfig::new(pooled, d).init(device)),
            min_len:    self.filter_sizes.iter().copied().max().unwrap_or(1),
        }
    }
}

/// Convolutions of several widths, ReLU, max over time, optional projection.
#[derive(Module, Debug)]
pub struct CnnEncoder<B: Backend> {
    pub convs:      Vec<Conv1d<B>>,
    pub projection: Option<Linear<B>>,
    /// Shortest input every convolution accepts
    pub min_len:    usize,
}

impl<B: Backend> CnnEncoder<B> {
    /// x: [rows, len, d_input] with len ≥ min_len → [rows, output_dim]
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 2> {
        let x = x.swap_dims(1, 2);
        let pooled: Vec<Tensor<B, 2>> = self
            .convs
            .iter()
            .map(|conv| {
                let out = relu(conv.forward(x.clone()));
                let [rows, filters, _] = out.dims();
                out.max_dim(2).reshape([rows, filters])
            })
            .collect();
        let features = Tensor::cat(pooled, 1);
        match &self.projection {
            Some(projection) => projection.forward(features),
            None => features,
        }
    }
}

// ─── CharEmbedder ─────────────────────────────────────────────────────────────

/// Per-token character CNN.
#[derive(Module, Debug)]
pub struct CharEmbedder<B: Backend> {
    pub embedding: Embedding<B>,
    pub encoder:   CnnEncoder<B>,
    pub dropout:   Dropout,
    pub d_char:    usize,
}

impl<B: Backend> CharEmbedder<B> {
    /// ids: [batch, seq, n_chars] → [batch, seq, d_char]
    pub fn forward(&self, ids: Tensor<B, 3, Int>) -> Tensor<B, 3> {
        let [batch, seq, n_chars] = ids.dims();
        let mut ids = ids.reshape([batch * seq, n_chars]);

        // Words shorter than the widest filter are right-padded
        if n_chars < self.encoder.min_len {
            let pad = Tensor::<B, 2, Int>::zeros([batch * seq, self.encoder.min_len - n_chars], &ids.device());
            ids = Tensor::cat(vec![ids, pad], 1);
        }

        let encoded = self.encoder.forward(self.embedding.forward(ids));
        self.dropout.forward(encoded).reshape([batch, seq, self.d_char])
    }
}

// ─── TextFieldEmbedder ────────────────────────────────────────────────────────

/// Concatenates the vectors of every enabled source, per token.
#[derive(Module, Debug)]
pub struct TextFieldEmbedder<B: Backend> {
    pub words:      Option<WordEmbedder<B>>,
    pub chars:      Option<CharEmbedder<B>>,
    pub elmo:       Option<ContextualEmbedder<B>>,
    pub output_dim: usize,
}

impl<B: Backend> TextFieldEmbedder<B> {
    /// [batch, seq, output_dim]
    pub fn forward(&self, tokens: &TokenInput<B>) -> ModelResult<Tensor<B, 3>> {
        let mut parts = Vec::with_capacity(3);
        if self.words.is_some() {
            parts.push(self.embed_words(tokens)?);
        }
        if let Some(chars) = &self.chars {
            let ids = tokens.chars.clone().ok_or(ModelError::MissingTokens("chars"))?;
            parts.push(chars.forward(ids));
        }
        if let Some(elmo) = &self.elmo {
            let ids = tokens.elmo.clone().ok_or(ModelError::MissingTokens("elmo"))?;
            parts.push(elmo.forward(ids));
        }
        if parts.is_empty() {
            return Err(ModelError::NoEmbeddings);
        }
        Ok(Tensor::cat(parts, 2))
    }

    /// Word vectors only — the input CoVe reads.
    pub fn embed_words(&self, tokens: &TokenInput<B>) -> ModelResult<Tensor<B, 3>> {
        let words = self.words.as_ref().ok_or(ModelError::MissingTokens("words"))?;
        let ids = tokens.words.clone().ok_or(ModelError::MissingTokens("words"))?;
        Ok(words.forward(ids))
    }
}

// ─── build_embeddings ─────────────────────────────────────────────────────────

/// Everything the encoder builder needs from the embedding stage.
#[derive(Debug)]
pub struct EmbeddingBundle<B: Backend> {
    /// Total per-token width, CoVe included
    pub d_emb:    usize,
    pub embedder: TextFieldEmbedder<B>,
    pub cove:     Option<CoveEncoder<B>>,
    /// Padding id of the word and char namespaces
    pub pad:      usize,
}

pub fn build_embeddings<B: Backend>(
    cfg:        &ExperimentConfig,
    vocab:      &Vocabulary,
    pretrained: Option<Tensor<B, 2>>,
    store:      &PretrainedStore,
    device:     &B::Device,
) -> ModelResult<EmbeddingBundle<B>> {
    let mut d_emb = 0;
    let pad = vocab.padding_index();

    // ── Word embeddings ──
    let words = if cfg.word_embs != WordEmbs::None {
        let n_words = vocab.get_vocab_size(TOKENS);
        let matrix = match pretrained {
            Some(m) if cfg.word_embs.is_pretrained() && m.dims()[0] == n_words => {
                tracing::info!("Using {:?} word embeddings from {:?}", cfg.word_embs, cfg.word_embs_file);
                Some(m)
            }
            Some(m) if cfg.word_embs.is_pretrained() => {
                tracing::warn!(
                    "Pretrained matrix has {} rows but the vocabulary has {}, learning from scratch",
                    m.dims()[0],
                    n_words
                );
                None
            }
            _ => {
                tracing::info!("Learning word embeddings from scratch");
                None
            }
        };
        let embedder = WordEmbedder::new(n_words, cfg.d_word, matrix, pad, device);
        d_emb += embedder.d_word;
        Some(embedder)
    } else {
        tracing::info!("Not using word embeddings");
        None
    };

    // ── CoVe ──
    let cove = match (&words, cfg.cove) {
        (Some(w), true) => {
            match CoveEncoder::load(&CoveEncoderConfig::new(w.d_word), store, device) {
                Ok(cove) => {
                    tracing::info!("Using CoVe embeddings");
                    d_emb += COVE_DIM;
                    Some(cove)
                }
                Err(e) => {
                    tracing::warn!("Failed to load CoVe, continuing without it: {e}");
                    None
                }
            }
        }
        (None, true) => {
            tracing::warn!("CoVe reads word embeddings, which are disabled; continuing without it");
            None
        }
        _ => None,
    };

    // ── Character embeddings ──
    let chars = if cfg.char_embs {
        tracing::info!("Using character embeddings");
        let encoder = CnnEncoderConfig::new(cfg.d_char, cfg.n_char_filters, cfg.filter_sizes()?)
            .with_output_dim(Some(cfg.d_char))
            .init(device);
        d_emb += cfg.d_char;
        Some(CharEmbedder {
            embedding: EmbeddingConfig::new(vocab.get_vocab_size(CHARS), cfg.d_char).init(device),
            encoder,
            dropout:   DropoutConfig::new(cfg.dropout_embs).init(),
            d_char:    cfg.d_char,
        })
    } else {
        None
    };

    // ── Contextual embeddings ──
    let elmo = if cfg.elmo {
        let elmo_cfg = ContextualEmbedderConfig::new()
            .with_chars_only(cfg.elmo_chars_only)
            .with_dropout(cfg.dropout);
        tracing::info!(
            "Using contextual embeddings ({})",
            if cfg.elmo_chars_only { "character CNN only" } else { "full" }
        );
        d_emb += elmo_cfg.output_dim();
        Some(ContextualEmbedder::load(&elmo_cfg, store, device)?)
    } else {
        None
    };

    if d_emb == 0 {
        return Err(ModelError::NoEmbeddings);
    }

    let output_dim = d_emb - if cove.is_some() { COVE_DIM } else { 0 };
    Ok(EmbeddingBundle {
        d_emb,
        embedder: TextFieldEmbedder { words, chars, elmo, output_dim },
        cove,
        pad,
    })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn vocab() -> Vocabulary {
        Vocabulary::from_tokens(["a", "b", "c"], ["a", "b", "c"])
    }

    fn store() -> (tempfile::TempDir, PretrainedStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = PretrainedStore::new(dir.path());
        (dir, store)
    }

    fn small_config() -> ExperimentConfig {
        ExperimentConfig { d_word: 6, d_char: 4, n_char_filters: 3, ..ExperimentConfig::default() }
    }

    #[test]
    fn test_word_only_width() {
        let (_dir, store) = store();
        let bundle = build_embeddings::<TestBackend>(&small_config(), &vocab(), None, &store, &Default::default()).unwrap();
        assert_eq!(bundle.d_emb, 6);
        assert_eq!(bundle.embedder.output_dim, 6);
        assert!(bundle.cove.is_none());
    }

    #[test]
    fn test_all_sources_disabled_is_an_error() {
        let (_dir, store) = store();
        let cfg = ExperimentConfig { word_embs: WordEmbs::None, ..small_config() };
        let err = build_embeddings::<TestBackend>(&cfg, &vocab(), None, &store, &Default::default()).unwrap_err();
        assert!(matches!(err, ModelError::NoEmbeddings));
    }

    #[test]
    fn test_missing_cove_is_dropped_without_width() {
        let (_dir, store) = store();
        let cfg = ExperimentConfig { cove: true, char_embs: true, ..small_config() };
        let bundle = build_embeddings::<TestBackend>(&cfg, &vocab(), None, &store, &Default::default()).unwrap();
        assert!(bundle.cove.is_none());
        assert_eq!(bundle.d_emb, 6 + 4);
    }

    #[test]
    fn test_loaded_cove_adds_its_width() {
        let (_dir, store) = store();
        let device = Default::default();
        store
            .save_module(&CoveEncoderConfig::new(6).init::<TestBackend>(&device), &store.cove_path())
            .unwrap();

        let cfg = ExperimentConfig { cove: true, ..small_config() };
        let bundle = build_embeddings::<TestBackend>(&cfg, &vocab(), None, &store, &device).unwrap();
        assert!(bundle.cove.is_some());
        assert_eq!(bundle.d_emb, 6 + COVE_DIM);
        assert_eq!(bundle.embedder.output_dim, 6);
    }

    #[test]
    fn test_pretrained_matrix_used_only_when_rows_match() {
        let (_dir, store) = store();
        let device = Default::default();
        let cfg = ExperimentConfig { word_embs: WordEmbs::Glove, ..small_config() };

        // 5 rows = 3 words + 2 reserved entries
        let matrix = Tensor::<TestBackend, 2>::ones([5, 9], &device);
        let bundle = build_embeddings(&cfg, &vocab(), Some(matrix), &store, &device).unwrap();
        assert_eq!(bundle.d_emb, 9);

        let wrong = Tensor::<TestBackend, 2>::ones([4, 9], &device);
        let bundle = build_embeddings(&cfg, &vocab(), Some(wrong), &store, &device).unwrap();
        assert_eq!(bundle.d_emb, 6);
    }

    #[test]
    fn test_padding_row_is_zero() {
        let device = Default::default();
        let matrix = Tensor::<TestBackend, 2>::ones([4, 3], &device);
        let words = WordEmbedder::new(4, 3, Some(matrix), 0, &device);

        let ids = Tensor::<TestBackend, 1, Int>::from_ints([0, 2], &device).reshape([1, 2]);
        let out = words.forward(ids).into_data().convert::<f32>().to_vec::<f32>().unwrap();
        assert_eq!(out, vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_char_embedder_pads_short_words() {
        let (_dir, store) = store();
        let device = Default::default();
        let cfg = ExperimentConfig {
            word_embs: WordEmbs::None,
            char_embs: true,
            char_filter_sizes: "2,4".to_string(),
            ..small_config()
        };
        let bundle = build_embeddings::<TestBackend>(&cfg, &vocab(), None, &store, &device).unwrap();

        // Two chars per word, narrower than the width-4 filter
        let ids = Tensor::<TestBackend, 1, Int>::from_ints([2, 3, 4, 2, 0, 0], &device).reshape([1, 3, 2]);
        let tokens = TokenInput { words: None, chars: Some(ids), elmo: None };
        assert_eq!(bundle.embedder.forward(&tokens).unwrap().dims(), [1, 3, 4]);
    }
}
