// ============================================================
// Layer 5 — Task Head Builder
// ============================================================
// One head per task, registered on the container under the
// task name. Hyperparameters resolve "<task>_<attr>" first.
//
//   SingleClassification   Pooler(d_sent → d_proj) + Classifier
//   Pair*                  [PairAttention] + Pooler for each
//                          sentence + Classifier over
//                          [u ; v ; |u−v| ; u⊙v] (4·d_proj)
//   LanguageModeling       Linear d_sent → max_word_v_size
//   SequenceGeneration     LSTM decoder over the embedder
//                          + Linear d_hid_dec → max_word_v_size
//   Ranking                nothing
//
// With shared_pair_attn the first pair task decides whether
// the container gets an attention module; every later pair
// task reads that same instance.
//
// Word-predicting heads (LM, decoder) project onto
// max_word_v_size outputs, so a larger token vocabulary is
// rejected before anything is built.

use burn::{
    nn::{Linear, LinearConfig},
    prelude::*,
};

use crate::domain::config::{ExperimentConfig, TaskParams};
use crate::domain::error::{ModelError, ModelResult};
use crate::domain::task::{Task, TaskKind};
use crate::domain::vocab::{Vocabulary, TOKENS};
use crate::ml::embedding::TextFieldEmbedder;
use crate::ml::encoder::{decoder_encoder, SentenceEncoder};
use crate::ml::layers::{
    Classifier, ClassifierConfig, PairAttention, PairAttentionConfig, Pooler, PoolerConfig,
};
use crate::ml::model::MultiTaskModel;

// ─── Heads ────────────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct SingleClassifier<B: Backend> {
    pub pooler:     Pooler<B>,
    pub classifier: Classifier<B>,
}

impl<B: Backend> SingleClassifier<B> {
    /// [batch, seq, d_sent] → [batch, n_classes]
    pub fn forward(&self, sent: Tensor<B, 3>, mask: Tensor<B, 2, Bool>) -> Tensor<B, 2> {
        self.classifier.forward(self.pooler.forward(sent, mask))
    }
}

#[derive(Module, Debug)]
pub struct PairClassifier<B: Backend> {
    pub pooler:     Pooler<B>,
    pub classifier: Classifier<B>,
    /// Task-owned attention (unshared mode only)
    pub attn:       Option<PairAttention<B>>,
    /// Read the container's attention instead of `attn`
    pub shared:     bool,
}

impl<B: Backend> PairClassifier<B> {
    /// Two encoded sentences → [batch, n_classes]
    pub fn forward(
        &self,
        s1:     Tensor<B, 3>,
        s2:     Tensor<B, 3>,
        mask1:  Tensor<B, 2, Bool>,
        mask2:  Tensor<B, 2, Bool>,
        shared: Option<&PairAttention<B>>,
    ) -> Tensor<B, 2> {
        let attn = if self.shared { shared } else { self.attn.as_ref() };
        let (s1, s2) = match attn {
            Some(attn) => attn.forward(s1, s2, mask1.clone(), mask2.clone()),
            None => (s1, s2),
        };

        let u = self.pooler.forward(s1, mask1);
        let v = self.pooler.forward(s2, mask2);
        let features = Tensor::cat(
            vec![u.clone(), v.clone(), (u.clone() - v.clone()).abs(), u * v],
            1,
        );
        self.classifier.forward(features)
    }
}

/// Decoder for sequence generation.
#[derive(Module, Debug)]
pub struct SequenceDecoder<B: Backend> {
    pub decoder: SentenceEncoder<B>,
    pub hid2voc: Linear<B>,
}

/// What the container registers for one task.
#[derive(Module, Debug)]
pub enum TaskHead<B: Backend> {
    Single(SingleClassifier<B>),
    Pair(PairClassifier<B>),
    LanguageModel(Linear<B>),
    Decoder(SequenceDecoder<B>),
}

impl<B: Backend> TaskHead<B> {
    pub fn kind_name(&self) -> &'static str {
        match self {
            TaskHead::Single(_)        => "single-sentence",
            TaskHead::Pair(_)          => "sentence-pair",
            TaskHead::LanguageModel(_) => "language-model",
            TaskHead::Decoder(_)       => "decoder",
        }
    }
}

// ─── Builders ─────────────────────────────────────────────────────────────────

/// Build every task's head and register it on `model`.
pub fn build_modules<B: Backend>(
    tasks:    &[Task],
    model:    &mut MultiTaskModel<B>,
    d_sent:   usize,
    embedder: &TextFieldEmbedder<B>,
    cfg:      &ExperimentConfig,
    device:   &B::Device,
) -> ModelResult<()> {
    check_output_vocab(tasks, model.vocab(), cfg.max_word_v_size)?;

    let mut shared_decided = false;
    for task in tasks {
        let params = cfg.task_params(task.name())?;
        let head = match task.kind() {
            TaskKind::SingleClassification => {
                TaskHead::Single(build_single_sentence_module(task, d_sent, &params, device))
            }
            TaskKind::PairClassification | TaskKind::PairRegression | TaskKind::PairOrdinalRegression => {
                if params.shared_pair_attn && !shared_decided {
                    shared_decided = true;
                    if let Some(attn) = pair_attention(d_sent, &params, device) {
                        tracing::debug!("Task '{}' creates the shared pair attention", task.name());
                        model.set_shared_pair_attn(attn);
                    }
                }
                TaskHead::Pair(build_pair_sentence_module(task, d_sent, model.shared_pair_attn(), &params, device))
            }
            TaskKind::LanguageModeling => {
                TaskHead::LanguageModel(LinearConfig::new(d_sent, cfg.max_word_v_size).init(device))
            }
            TaskKind::SequenceGeneration => {
                TaskHead::Decoder(build_decoder(embedder, cfg, model.vocab().padding_index(), device))
            }
            TaskKind::Ranking => {
                tracing::debug!("Task '{}' is a ranking task, no head", task.name());
                continue;
            }
        };
        tracing::debug!("Built {} head for task '{}'", head.kind_name(), task.name());
        model.add_head(task.name(), head)?;
    }
    Ok(())
}

/// Every token id must be a valid output of a word-predicting head.
pub fn check_output_vocab(tasks: &[Task], vocab: &Vocabulary, max_word_v_size: usize) -> ModelResult<()> {
    let predicts_words = tasks
        .iter()
        .any(|t| matches!(t.kind(), TaskKind::LanguageModeling | TaskKind::SequenceGeneration));
    let size = vocab.get_vocab_size(TOKENS);
    if predicts_words && size > max_word_v_size {
        return Err(ModelError::Config(format!(
            "vocabulary has {size} words but max_word_v_size is {max_word_v_size}; word-level heads cannot predict every id"
        )));
    }
    Ok(())
}

fn build_single_sentence_module<B: Backend>(
    task:   &Task,
    d_inp:  usize,
    params: &TaskParams,
    device: &B::Device,
) -> SingleClassifier<B> {
    SingleClassifier {
        pooler:     pooler_config(d_inp, params).init(device),
        classifier: classifier_config(params.d_proj, task.n_classes(), params).init(device),
    }
}

fn build_pair_sentence_module<B: Backend>(
    task:   &Task,
    d_inp:  usize,
    shared: Option<&PairAttention<B>>,
    params: &TaskParams,
    device: &B::Device,
) -> PairClassifier<B> {
    let (attn, d_pooled) = if params.shared_pair_attn {
        (None, shared.map_or(d_inp, |a| a.output_dim))
    } else {
        let attn = pair_attention(d_inp, params, device);
        let d = attn.as_ref().map_or(d_inp, |a| a.output_dim);
        (attn, d)
    };

    // Regression-style tasks have a single output
    let n_classes = if task.kind().is_regression() { 1 } else { task.n_classes() };
    PairClassifier {
        pooler:     pooler_config(d_pooled, params).init(device),
        classifier: classifier_config(4 * params.d_proj, n_classes, params).init(device),
        attn,
        shared:     params.shared_pair_attn,
    }
}

fn pair_attention<B: Backend>(d_inp: usize, params: &TaskParams, device: &B::Device) -> Option<PairAttention<B>> {
    params
        .attn
        .then(|| PairAttentionConfig::new(d_inp).with_dropout(params.dropout).init(device))
}

fn build_decoder<B: Backend>(
    embedder: &TextFieldEmbedder<B>,
    cfg:      &ExperimentConfig,
    pad:      usize,
    device:   &B::Device,
) -> SequenceDecoder<B> {
    SequenceDecoder {
        decoder: decoder_encoder(embedder.clone(), cfg.d_hid_dec, cfg.n_layers_dec, pad, device),
        hid2voc: LinearConfig::new(cfg.d_hid_dec, cfg.max_word_v_size).init(device),
    }
}

fn pooler_config(d_inp: usize, params: &TaskParams) -> PoolerConfig {
    PoolerConfig::new(d_inp, params.d_proj).with_pool_type(params.pool_type)
}

fn classifier_config(d_inp: usize, n_classes: usize, params: &TaskParams) -> ClassifierConfig {
    ClassifierConfig::new(d_inp, n_classes, params.cls_type)
        .with_d_hidden(params.d_hid)
        .with_dropout(params.dropout)
}
