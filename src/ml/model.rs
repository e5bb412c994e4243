// ============================================================
// Layer 5 — Multi-Task Model & Forward Dispatcher
// ============================================================
// The container owns:
//   - the shared sentence encoder (one instance)
//   - the sentence combine method (pooling rule)
//   - the vocabulary (for the padding id)
//   - the optional shared pair attention, installed at build
//     time when the first shared pair task asks for one
//   - the task heads plus an explicit task name → head index
//
// The whole graph is one burn Module: records, devices,
// autodiff and optimizers see every parameter.
//
// forward(task, batch) looks the category up in a handler
// table and runs that routine:
//
//   SingleClassification   encode input1 → head → CE loss
//   Pair*                  encode input1, input2 with the same
//                          encoder → head → CE or MSE loss
//   LanguageModeling       encode input (+ input_bwd) → zero
//                          padding → vocab logits → CE that
//                          ignores the padding id
//   SequenceGeneration     encode inputs; no loss yet
//   Ranking                always an Unimplemented error
//
// Scorers are only updated when the batch carries labels,
// except for LM tasks, whose primary scorer records the loss
// on every call. Class labels must lie in 0..n_classes and
// are checked before the loss. Correlations are computed on
// host copies.

use std::{collections::BTreeMap, fmt::Write as _};

use burn::{module::Ignored, prelude::*};

use crate::data::batcher::{Batch, TokenInput};
use crate::domain::config::PoolType;
use crate::domain::error::{ModelError, ModelResult};
use crate::domain::task::{ScoreMode, Task, TaskKind};
use crate::domain::traits::Observation;
use crate::domain::vocab::Vocabulary;
use crate::infra::metrics::{argmax_rows, matthews_corrcoef, mean_squared_error, pearson, spearman};
use crate::ml::encoder::SharedEncoder;
use crate::ml::heads::TaskHead;
use crate::ml::layers::{pool_sequence, zero_padding, PairAttention};
use crate::ml::loss::{cross_entropy, lm_cross_entropy, mse, scalar, to_host};

// ─── TaskOutput ───────────────────────────────────────────────────────────────

/// Result of one forward call.
#[derive(Debug, Clone)]
pub struct TaskOutput<B: Backend> {
    /// [batch, n_classes]; LM tasks: [directions·batch·seq, vocab]
    pub logits: Option<Tensor<B, 2>>,
    /// Present whenever the batch had labels (LM: always)
    pub loss:   Option<Tensor<B, 1>>,
}

impl<B: Backend> TaskOutput<B> {
    pub fn empty() -> Self {
        Self { logits: None, loss: None }
    }

    fn with_logits(logits: Tensor<B, 2>) -> Self {
        Self { logits: Some(logits), loss: None }
    }
}

/// One forward routine per task category.
pub type Handler<B> = fn(&MultiTaskModel<B>, &mut Task, &Batch<B>) -> ModelResult<TaskOutput<B>>;

// ─── MultiTaskModel ───────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct MultiTaskModel<B: Backend> {
    sent_encoder:   SharedEncoder<B>,
    pair_attn:      Option<PairAttention<B>>,
    heads:          Vec<TaskHead<B>>,
    head_index:     Ignored<BTreeMap<String, usize>>,
    combine_method: Ignored<PoolType>,
    vocab:          Ignored<Vocabulary>,
}

impl<B: Backend> MultiTaskModel<B> {
    pub fn new(sent_encoder: SharedEncoder<B>, combine_method: PoolType, vocab: Vocabulary) -> Self {
        Self {
            sent_encoder,
            pair_attn:      None,
            heads:          Vec::new(),
            head_index:     Ignored(BTreeMap::new()),
            combine_method: Ignored(combine_method),
            vocab:          Ignored(vocab),
        }
    }

    pub fn sent_encoder(&self) -> &SharedEncoder<B> {
        &self.sent_encoder
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab.0
    }

    pub fn combine_method(&self) -> PoolType {
        self.combine_method.0
    }

    // ── heads ──

    /// Register the head for a task; names must be unique.
    pub fn add_head(&mut self, task: &str, head: TaskHead<B>) -> ModelResult<()> {
        if self.head_index.0.contains_key(task) {
            return Err(ModelError::DuplicateHead(task.to_string()));
        }
        self.head_index.0.insert(task.to_string(), self.heads.len());
        self.heads.push(head);
        Ok(())
    }

    pub fn head(&self, task: &str) -> ModelResult<&TaskHead<B>> {
        self.head_index
            .0
            .get(task)
            .and_then(|&i| self.heads.get(i))
            .ok_or_else(|| ModelError::MissingHead(task.to_string()))
    }

    pub fn has_head(&self, task: &str) -> bool {
        self.head_index.0.contains_key(task)
    }

    pub fn head_names(&self) -> impl Iterator<Item = &str> {
        self.head_index.0.keys().map(String::as_str)
    }

    /// Install the attention module every shared pair task reads.
    pub fn set_shared_pair_attn(&mut self, attn: PairAttention<B>) {
        self.pair_attn = Some(attn);
    }

    /// The shared pair attention, if one was created.
    pub fn shared_pair_attn(&self) -> Option<&PairAttention<B>> {
        self.pair_attn.as_ref()
    }

    /// The attention module a pair task actually runs through.
    pub fn pair_attention_for(&self, task: &str) -> Option<&PairAttention<B>> {
        match self.head(task) {
            Ok(TaskHead::Pair(head)) if head.shared => self.shared_pair_attn(),
            Ok(TaskHead::Pair(head)) => head.attn.as_ref(),
            _ => None,
        }
    }

    // ── dispatch ──

    /// Run one batch for one task. Updates the task's scorers as a side effect.
    pub fn forward(&self, task: &mut Task, batch: &Batch<B>) -> ModelResult<TaskOutput<B>> {
        let handler = Self::handler(task.kind());
        handler(self, task, batch)
    }

    fn handler(kind: TaskKind) -> Handler<B> {
        match kind {
            TaskKind::SingleClassification => single_sentence_forward,
            TaskKind::PairClassification
            | TaskKind::PairRegression
            | TaskKind::PairOrdinalRegression => pair_sentence_forward,
            TaskKind::LanguageModeling => lm_forward,
            TaskKind::SequenceGeneration => seq_gen_forward,
            TaskKind::Ranking => ranking_forward,
        }
    }

    /// Encode and pool one sentence batch with the combine method — [batch, d_sent]
    pub fn sentence_vector(&self, tokens: &TokenInput<B>) -> ModelResult<Tensor<B, 2>> {
        let (sent, mask) = self.sent_encoder.encode(tokens)?;
        Ok(pool_sequence(sent, mask, self.combine_method.0))
    }

    /// Multi-line summary of the module graph.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "MultiTaskModel ({} parameters)", self.num_params());
        let _ = writeln!(
            out,
            "  encoder: {} [{} params], combine = {:?}",
            self.sent_encoder.describe(),
            self.sent_encoder.num_params(),
            self.combine_method.0
        );
        if let Some(attn) = self.shared_pair_attn() {
            let _ = writeln!(out, "  shared pair attention [{} params]", attn.num_params());
        }
        for (name, &i) in &self.head_index.0 {
            if let Some(head) = self.heads.get(i) {
                let _ = writeln!(out, "  {name}: {} head [{} params]", head.kind_name(), head.num_params());
            }
        }
        out
    }
}

// ─── Handlers ─────────────────────────────────────────────────────────────────

fn require<'a, T>(task: &Task, field: Option<&'a T>, name: &'static str) -> ModelResult<&'a T> {
    field.ok_or_else(|| ModelError::MissingField { task: task.name().to_string(), field: name })
}

fn mismatch<B: Backend>(task: &Task, expected: &'static str, found: &TaskHead<B>) -> ModelError {
    ModelError::HeadMismatch {
        task: task.name().to_string(),
        expected,
        found: found.kind_name(),
    }
}

/// Class labels index the logits, so each must be a whole number below `n_classes`.
fn check_class_labels(task: &Task, labels: &[f32]) -> ModelResult<()> {
    let n_classes = task.n_classes();
    match labels
        .iter()
        .find(|&&l| !(l >= 0.0 && l.fract() == 0.0 && (l as usize) < n_classes))
    {
        Some(&label) => Err(ModelError::InvalidLabel { task: task.name().to_string(), label, n_classes }),
        None => Ok(()),
    }
}

/// Feed logits to the primary scorer and, if present, the secondary one.
fn observe_logits(task: &mut Task, logits: &[f32], labels: &[f32]) {
    let n_classes = task.n_classes();
    let obs = Observation::Logits { logits, n_classes, labels };
    task.scorer1_mut().observe(obs);
    if let Some(scorer2) = task.scorer2_mut() {
        scorer2.observe(obs);
    }
}

fn single_sentence_forward<B: Backend>(
    model: &MultiTaskModel<B>,
    task:  &mut Task,
    batch: &Batch<B>,
) -> ModelResult<TaskOutput<B>> {
    let input = require(task, batch.input1.as_ref(), "input1")?;
    let (sent, mask) = model.sent_encoder.encode(input)?;

    let head = match model.head(task.name())? {
        TaskHead::Single(head) => head,
        other => return Err(mismatch(task, "single-sentence", other)),
    };
    let logits = head.forward(sent, mask);
    let mut out = TaskOutput::with_logits(logits.clone());

    if let Some(labels) = &batch.labels {
        let host_labels = to_host(labels.clone())?;
        check_class_labels(task, &host_labels)?;
        out.loss = Some(cross_entropy(logits.clone(), labels.clone().int()));

        let host_logits = to_host(logits)?;
        match task.score_mode() {
            ScoreMode::Matthews => {
                let n_classes = task.n_classes();
                if let Some(scorer2) = task.scorer2_mut() {
                    scorer2.observe(Observation::Logits { logits: &host_logits, n_classes, labels: &host_labels });
                }
                let preds = argmax_rows(&host_logits, n_classes);
                let gold: Vec<usize> = host_labels.iter().map(|&l| l as usize).collect();
                task.scorer1_mut().observe(Observation::Value(matthews_corrcoef(&gold, &preds, n_classes)));
            }
            ScoreMode::Logits => observe_logits(task, &host_logits, &host_labels),
        }
    }
    Ok(out)
}

fn pair_sentence_forward<B: Backend>(
    model: &MultiTaskModel<B>,
    task:  &mut Task,
    batch: &Batch<B>,
) -> ModelResult<TaskOutput<B>> {
    let input1 = require(task, batch.input1.as_ref(), "input1")?;
    let input2 = require(task, batch.input2.as_ref(), "input2")?;
    let (sent1, mask1) = model.sent_encoder.encode(input1)?;
    let (sent2, mask2) = model.sent_encoder.encode(input2)?;

    let head = match model.head(task.name())? {
        TaskHead::Pair(head) => head,
        other => return Err(mismatch(task, "sentence-pair", other)),
    };
    let logits = head.forward(sent1, sent2, mask1, mask2, model.shared_pair_attn());
    let mut out = TaskOutput::with_logits(logits.clone());

    let Some(labels) = &batch.labels else {
        return Ok(out);
    };

    if task.kind().is_regression() {
        let [batch_size, _] = logits.dims();
        let pred = logits.reshape([batch_size]);
        out.loss = Some(mse(pred.clone(), labels.clone()));

        let pred = to_host(pred)?;
        let gold = to_host(labels.clone())?;
        let primary = match task.kind() {
            TaskKind::PairOrdinalRegression => mean_squared_error(&pred, &gold),
            _ => pearson(&pred, &gold),
        };
        task.scorer1_mut().observe(Observation::Value(primary));
        if let Some(scorer2) = task.scorer2_mut() {
            scorer2.observe(Observation::Value(spearman(&pred, &gold)));
        }
    } else {
        let host_labels = to_host(labels.clone())?;
        check_class_labels(task, &host_labels)?;
        out.loss = Some(cross_entropy(logits.clone(), labels.clone().int()));
        observe_logits(task, &to_host(logits)?, &host_labels);
    }
    Ok(out)
}

fn lm_forward<B: Backend>(
    model: &MultiTaskModel<B>,
    task:  &mut Task,
    batch: &Batch<B>,
) -> ModelResult<TaskOutput<B>> {
    let input = require(task, batch.input.as_ref(), "input")?;
    let targs = require(task, batch.targs.as_ref(), "targs")?;
    let [batch_size, seq_len] = input.dims()?;
    check_targets(targs, [batch_size, seq_len])?;

    let hid2voc = match model.head(task.name())? {
        TaskHead::LanguageModel(linear) => linear,
        other => return Err(mismatch(task, "language-model", other)),
    };
    let project = |hidden: Tensor<B, 3>| {
        let logits = hid2voc.forward(hidden);
        let [_, _, vocab] = logits.dims();
        logits.reshape([batch_size * seq_len, vocab])
    };
    let flat = |t: &Tensor<B, 2, Int>| t.clone().reshape([batch_size * seq_len]);

    let (logits, targets) = match &model.sent_encoder {
        SharedEncoder::BiLm(encoder) => {
            let input_bwd = require(task, batch.input_bwd.as_ref(), "input_bwd")?;
            let targs_b = require(task, batch.targs_b.as_ref(), "targs_b")?;
            check_targets(targs_b, [batch_size, seq_len])?;

            let (sent, mask) = encoder.forward(input, input_bwd)?;
            let sent = zero_padding(sent, mask);
            let split = encoder.output_dim / 2;
            let fwd = project(sent.clone().narrow(2, 0, split));
            let bwd = project(sent.narrow(2, split, split));
            (Tensor::cat(vec![fwd, bwd], 0), Tensor::cat(vec![flat(targs), flat(targs_b)], 0))
        }
        SharedEncoder::Sentence(encoder) => {
            let (sent, mask) = encoder.forward(input)?;
            (project(zero_padding(sent, mask)), flat(targs))
        }
    };

    let loss = lm_cross_entropy(logits.clone(), targets, model.vocab().padding_index());
    task.scorer1_mut().observe(Observation::Value(scalar(&loss)));
    Ok(TaskOutput { logits: Some(logits), loss: Some(loss) })
}

fn check_targets<B: Backend>(targs: &Tensor<B, 2, Int>, expected: [usize; 2]) -> ModelResult<()> {
    let actual = targs.dims();
    if actual != expected {
        return Err(ModelError::ShapeMismatch {
            what:     "language-model targets",
            expected: expected.to_vec(),
            actual:   actual.to_vec(),
        });
    }
    Ok(())
}

fn seq_gen_forward<B: Backend>(
    model: &MultiTaskModel<B>,
    task:  &mut Task,
    batch: &Batch<B>,
) -> ModelResult<TaskOutput<B>> {
    let inputs = require(task, batch.inputs.as_ref(), "inputs")?;
    let (_sent, _mask) = model.sent_encoder.encode(inputs)?;

    match model.head(task.name())? {
        TaskHead::Decoder(_) => {}
        other => return Err(mismatch(task, "decoder", other)),
    }
    // TODO: run the decoder over `targs` with the encoded source once decoding is designed
    if batch.targs.is_some() {
        tracing::debug!("Task '{}': target sequences given, decoding is not implemented yet", task.name());
    }
    Ok(TaskOutput::empty())
}

fn ranking_forward<B: Backend>(
    _model: &MultiTaskModel<B>,
    task:   &mut Task,
    _batch: &Batch<B>,
) -> ModelResult<TaskOutput<B>> {
    Err(ModelError::Unimplemented { task: task.name().to_string(), kind: task.kind() })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    use crate::data::batcher::SentenceBatcher;
    use crate::data::sample::SentenceSample;
    use crate::domain::config::ExperimentConfig;
    use crate::infra::metrics::{Average, CategoricalAccuracy};
    use crate::infra::pretrained::PretrainedStore;
    use crate::ml::builder::build_model;
    use crate::ml::layers::PairAttentionConfig;

    type TestBackend = NdArray;

    fn vocab(n_words: usize) -> Vocabulary {
        Vocabulary::from_tokens((0..n_words - 2).map(|i| format!("w{i}")), Vec::<String>::new())
    }

    fn config() -> ExperimentConfig {
        ExperimentConfig {
            d_word: 6,
            d_hid: 4,
            d_proj: 4,
            classifier_hid_dim: 5,
            max_word_v_size: 50,
            ..ExperimentConfig::default()
        }
    }

    fn build(cfg: &ExperimentConfig, vocab: &Vocabulary, tasks: &[Task]) -> MultiTaskModel<TestBackend> {
        let dir = tempfile::tempdir().unwrap();
        build_model(cfg, vocab, None, tasks, &PretrainedStore::new(dir.path()), &Default::default()).unwrap()
    }

    fn sample(words: &[usize]) -> SentenceSample {
        SentenceSample { words: words.to_vec(), chars: Vec::new(), text: Vec::new() }
    }

    fn batcher() -> SentenceBatcher<TestBackend> {
        SentenceBatcher::new(Default::default())
    }

    fn accuracy_task(name: &str, kind: TaskKind, n_classes: usize) -> Task {
        Task::new(name, kind, n_classes, Box::new(CategoricalAccuracy::new()))
    }

    #[test]
    fn test_single_sentence_logits_and_loss() {
        let vocab = vocab(100);
        let mut tasks = [accuracy_task("sst", TaskKind::SingleClassification, 3)];
        let model = build(&config(), &vocab, &tasks);

        let batch = batcher().single(&[sample(&[5, 17, 42]), sample(&[9, 3])], Some(&[0.0, 2.0]));
        let out = model.forward(&mut tasks[0], &batch).unwrap();

        assert_eq!(out.logits.unwrap().dims(), [2, 3]);
        let loss = scalar(&out.loss.unwrap());
        assert!(loss.is_finite() && loss >= 0.0);
        assert!((0.0..=1.0).contains(&tasks[0].scorer1().value()));
    }

    #[test]
    fn test_no_labels_means_no_loss_and_no_scoring() {
        let vocab = vocab(20);
        let mut tasks = [accuracy_task("sst", TaskKind::SingleClassification, 2)];
        let model = build(&config(), &vocab, &tasks);

        let batch = batcher().single(&[sample(&[5, 6])], None);
        let out = model.forward(&mut tasks[0], &batch).unwrap();
        assert!(out.loss.is_none());
        assert!(out.logits.is_some());
        assert_eq!(tasks[0].scorer1().value(), 0.0);
    }

    #[test]
    fn test_matthews_scored_task_feeds_both_scorers() {
        let vocab = vocab(20);
        let mut tasks = [Task::new("cola", TaskKind::SingleClassification, 2, Box::new(Average::new("mcc")))
            .with_secondary(Box::new(CategoricalAccuracy::new()))
            .with_score_mode(ScoreMode::Matthews)];
        let model = build(&config(), &vocab, &tasks);

        let batch = batcher().single(&[sample(&[5, 6]), sample(&[7]), sample(&[8, 9, 10])], Some(&[0.0, 1.0, 1.0]));
        model.forward(&mut tasks[0], &batch).unwrap();

        let mcc = tasks[0].scorer1().value();
        assert!((-1.0..=1.0).contains(&mcc));
        let acc = tasks[0].scorer2().unwrap().value();
        assert!((0.0..=1.0).contains(&acc));
    }

    #[test]
    fn test_pair_classification_without_shared_attention() {
        let vocab = vocab(30);
        let cfg = ExperimentConfig { shared_pair_attn: false, ..config() };
        let mut tasks = [accuracy_task("mnli", TaskKind::PairClassification, 2)];
        let model = build(&cfg, &vocab, &tasks);
        assert!(model.pair_attention_for("mnli").is_some());

        let first = [sample(&[5, 6, 7]), sample(&[8]), sample(&[9, 10])];
        let second = [sample(&[11]), sample(&[12, 13, 14, 15]), sample(&[16, 17])];
        let batch = batcher().pair(&first, &second, Some(&[1.0, 0.0, 1.0]));
        let out = model.forward(&mut tasks[0], &batch).unwrap();

        assert_eq!(out.logits.unwrap().dims(), [3, 2]);
        assert!(scalar(&out.loss.unwrap()).is_finite());
    }

    #[test]
    fn test_pair_regression_uses_correlation_scorers() {
        let vocab = vocab(30);
        let mut tasks = [Task::new("sts-b", TaskKind::PairRegression, 1, Box::new(Average::new("pearson")))
            .with_secondary(Box::new(Average::new("spearman")))];
        let model = build(&config(), &vocab, &tasks);

        let first = [sample(&[5, 6]), sample(&[7]), sample(&[8, 9, 10])];
        let second = [sample(&[11]), sample(&[12, 13]), sample(&[14])];
        let batch = batcher().pair(&first, &second, Some(&[0.5, 4.0, 2.5]));
        let out = model.forward(&mut tasks[0], &batch).unwrap();

        assert_eq!(out.logits.unwrap().dims(), [3, 1]);
        let loss = scalar(&out.loss.unwrap());
        assert!(loss.is_finite() && loss >= 0.0);
    }

    #[test]
    fn test_bidirectional_lm_logits_cover_both_directions() {
        let vocab = vocab(50);
        let mut tasks = [Task::new("wiki", TaskKind::LanguageModeling, 50, Box::new(Average::new("loss")))];
        let model = build(&config(), &vocab, &tasks);
        assert!(matches!(model.sent_encoder(), SharedEncoder::BiLm(_)));

        // Two sentences, the second one padded
        let batch = batcher().language_model(&[sample(&[2, 3, 4, 5, 6, 7]), sample(&[8, 9, 10])]);
        let out = model.forward(&mut tasks[0], &batch).unwrap();

        assert_eq!(out.logits.unwrap().dims(), [2 * 2 * 5, 50]);
        let loss = scalar(&out.loss.unwrap());
        assert!(loss.is_finite() && loss > 0.0);
        assert!((tasks[0].scorer1().value() - loss).abs() < 1e-9);
    }

    #[test]
    fn test_lm_requires_backward_fields_for_bilm() {
        let vocab = vocab(50);
        let mut tasks = [Task::new("wiki", TaskKind::LanguageModeling, 50, Box::new(Average::new("loss")))];
        let model = build(&config(), &vocab, &tasks);

        let mut batch = batcher().language_model(&[sample(&[2, 3, 4])]);
        batch.input_bwd = None;
        match model.forward(&mut tasks[0], &batch) {
            Err(ModelError::MissingField { field, .. }) => assert_eq!(field, "input_bwd"),
            other => panic!("expected MissingField, got {other:?}"),
        }
    }

    #[test]
    fn test_lm_targets_must_match_input() {
        let vocab = vocab(50);
        let cfg = ExperimentConfig { bidirectional: false, ..config() };
        let mut tasks = [Task::new("wiki", TaskKind::LanguageModeling, 50, Box::new(Average::new("loss")))];
        let model = build(&cfg, &vocab, &tasks);

        let mut batch = batcher().language_model(&[sample(&[2, 3, 4, 5])]);
        batch.targs = batcher().language_model(&[sample(&[2, 3])]).targs;
        assert!(matches!(
            model.forward(&mut tasks[0], &batch),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_ranking_is_unimplemented() {
        let vocab = vocab(20);
        let mut tasks = [Task::new("coco", TaskKind::Ranking, 1, Box::new(Average::new("score")))];
        let model = build(&config(), &vocab, &tasks);

        let err = model.forward(&mut tasks[0], &Batch::default()).unwrap_err();
        assert!(err.is_unimplemented());
    }

    #[test]
    fn test_sequence_generation_returns_no_outputs() {
        let vocab = vocab(20);
        let cfg = ExperimentConfig { d_hid_dec: 3, ..config() };
        let mut tasks = [Task::new("wmt", TaskKind::SequenceGeneration, 1, Box::new(Average::new("bleu")))];
        let model = build(&cfg, &vocab, &tasks);

        let batch = batcher().generation(&[sample(&[4, 5])], Some(&[sample(&[6, 7, 8])]));
        let out = model.forward(&mut tasks[0], &batch).unwrap();
        assert!(out.logits.is_none() && out.loss.is_none());
    }

    #[test]
    fn test_missing_head_and_wrong_head_are_errors() {
        let vocab = vocab(20);
        let tasks = [accuracy_task("sst", TaskKind::SingleClassification, 2)];
        let model = build(&config(), &vocab, &tasks);
        let batch = batcher().pair(&[sample(&[5])], &[sample(&[6])], None);

        let mut unknown = accuracy_task("qqp", TaskKind::PairClassification, 2);
        assert!(matches!(model.forward(&mut unknown, &batch), Err(ModelError::MissingHead(_))));

        // Same name as the single-sentence head, different category
        let mut wrong = accuracy_task("sst", TaskKind::PairClassification, 2);
        assert!(matches!(model.forward(&mut wrong, &batch), Err(ModelError::HeadMismatch { .. })));
    }

    #[test]
    fn test_sentence_vector_uses_combine_method() {
        let vocab = vocab(20);
        let model = build(&config(), &vocab, &[]);
        let tokens = batcher().tokens(&[sample(&[5, 6, 7]), sample(&[8])]);
        assert_eq!(model.sentence_vector(&tokens).unwrap().dims(), [2, 8]);
        assert_eq!(model.combine_method(), PoolType::Max);
    }

    #[test]
    fn test_to_device_keeps_the_graph() {
        let vocab = vocab(20);
        let cfg = ExperimentConfig { shared_pair_attn: true, ..config() };
        let tasks = [accuracy_task("rte", TaskKind::PairClassification, 2)];
        let model = build(&cfg, &vocab, &tasks);
        let before = model.num_params();

        let model = model.to_device(&Default::default());
        assert_eq!(model.num_params(), before);
        assert!(model.shared_pair_attn().is_some());
        assert!(model.has_head("rte"));
    }

    fn pair_head<'a>(model: &'a MultiTaskModel<TestBackend>, task: &str) -> &'a crate::ml::heads::PairClassifier<TestBackend> {
        match model.head(task).unwrap() {
            TaskHead::Pair(head) => head,
            other => panic!("unexpected head {}", other.kind_name()),
        }
    }

    fn first_row(out: TaskOutput<TestBackend>) -> Vec<f32> {
        to_host(out.logits.unwrap().narrow(0, 0, 1)).unwrap()
    }

    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-5, "{a:?} vs {b:?}");
        }
    }

    #[test]
    fn test_single_sentence_logits_ignore_batch_padding() {
        let vocab = vocab(30);
        let mut tasks = [accuracy_task("sst", TaskKind::SingleClassification, 3)];
        let model = build(&config(), &vocab, &tasks);

        let short = sample(&[5, 6]);
        let alone = batcher().single(&[short.clone()], None);
        let padded = batcher().single(&[short, sample(&[7, 8, 9, 10, 11, 12, 13])], None);

        let a = first_row(model.forward(&mut tasks[0], &alone).unwrap());
        let b = first_row(model.forward(&mut tasks[0], &padded).unwrap());
        assert_close(&a, &b);
    }

    #[test]
    fn test_pair_logits_with_attention_ignore_batch_padding() {
        let vocab = vocab(30);
        let mut tasks = [accuracy_task("mnli", TaskKind::PairClassification, 3)];
        let model = build(&config(), &vocab, &tasks);
        assert!(model.pair_attention_for("mnli").is_some());

        let (s1, s2) = (sample(&[5, 6]), sample(&[8, 9, 4]));
        let alone = batcher().pair(&[s1.clone()], &[s2.clone()], None);
        let padded = batcher().pair(
            &[s1, sample(&[7, 8, 9, 10, 11, 12])],
            &[s2, sample(&[10, 11, 12, 13, 14, 15, 16])],
            None,
        );

        let a = first_row(model.forward(&mut tasks[0], &alone).unwrap());
        let b = first_row(model.forward(&mut tasks[0], &padded).unwrap());
        assert_close(&a, &b);
    }

    #[test]
    fn test_shared_attention_drives_every_pair_task_after_moving() {
        let vocab = vocab(30);
        let cfg = ExperimentConfig { shared_pair_attn: true, ..config() };
        let mut tasks = [
            accuracy_task("rte", TaskKind::PairClassification, 2),
            accuracy_task("mrpc", TaskKind::PairClassification, 2),
        ];
        let device = Default::default();
        let model = build(&cfg, &vocab, &tasks).to_device(&device);
        let shared = model.shared_pair_attn().unwrap();
        let other = PairAttentionConfig::new(model.sent_encoder().output_dim()).init::<TestBackend>(&device);

        let batch = batcher().pair(&[sample(&[5, 6, 7]), sample(&[8])], &[sample(&[9]), sample(&[10, 11])], None);
        let (s1, m1) = model.sent_encoder().encode(batch.input1.as_ref().unwrap()).unwrap();
        let (s2, m2) = model.sent_encoder().encode(batch.input2.as_ref().unwrap()).unwrap();

        for task in tasks.iter_mut() {
            let name = task.name().to_string();
            assert!(std::ptr::eq(model.pair_attention_for(&name).unwrap(), shared));

            let head = pair_head(&model, &name);
            let logits = to_host(model.forward(task, &batch).unwrap().logits.unwrap()).unwrap();
            let via_shared = head.forward(s1.clone(), s2.clone(), m1.clone(), m2.clone(), Some(shared));
            let via_other = head.forward(s1.clone(), s2.clone(), m1.clone(), m2.clone(), Some(&other));

            assert_close(&logits, &to_host(via_shared).unwrap());
            assert_ne!(logits, to_host(via_other).unwrap());
        }
    }

    #[test]
    fn test_gradient_step_reaches_heads_and_shared_attention() {
        use burn::backend::Autodiff;
        use burn::optim::{AdamConfig, GradientsParams, Optimizer};
        type Ad = Autodiff<NdArray>;

        let vocab = vocab(30);
        let cfg = ExperimentConfig { shared_pair_attn: true, ..config() };
        let mut tasks = [accuracy_task("rte", TaskKind::PairClassification, 2)];
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let model: MultiTaskModel<Ad> =
            build_model(&cfg, &vocab, None, &tasks, &PretrainedStore::new(dir.path()), &device).unwrap();

        let attn_weight = |m: &MultiTaskModel<Ad>| m.shared_pair_attn().unwrap().modeling.fwd.input_gate.input_transform.weight.val();
        let pooler_weight = |m: &MultiTaskModel<Ad>| match m.head("rte").unwrap() {
            TaskHead::Pair(head) => head.pooler.project.weight.val(),
            other => panic!("unexpected head {}", other.kind_name()),
        };
        let (attn_before, pooler_before) = (attn_weight(&model), pooler_weight(&model));

        let batch = SentenceBatcher::<Ad>::new(device).pair(
            &[sample(&[5, 6, 7]), sample(&[8])],
            &[sample(&[9]), sample(&[10, 11])],
            Some(&[1.0, 0.0]),
        );
        let loss = model.forward(&mut tasks[0], &batch).unwrap().loss.unwrap();
        assert!(scalar(&loss).is_finite());

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        let mut optim = AdamConfig::new().init::<Ad, MultiTaskModel<Ad>>();
        let model = optim.step(1e-2, model, grads);

        let moved = |before: Tensor<Ad, 2>, after: Tensor<Ad, 2>| scalar(&(after - before).abs().sum()) > 0.0;
        assert!(moved(attn_before, attn_weight(&model)));
        assert!(moved(pooler_before, pooler_weight(&model)));
    }

    #[test]
    fn test_checkpoint_restores_every_head() {
        let vocab = vocab(30);
        let cfg = ExperimentConfig { shared_pair_attn: true, ..config() };
        let mut tasks = [
            accuracy_task("sst", TaskKind::SingleClassification, 2),
            accuracy_task("rte", TaskKind::PairClassification, 2),
        ];
        let dir = tempfile::tempdir().unwrap();
        let store = PretrainedStore::new(dir.path());
        let path = dir.path().join("model");

        let trained = build(&cfg, &vocab, &tasks);
        store.save_module::<TestBackend, _>(&trained, &path).unwrap();
        let restored = store
            .load_into::<TestBackend, _>(build(&cfg, &vocab, &tasks), &path, &Default::default())
            .unwrap();

        let single = batcher().single(&[sample(&[5, 6]), sample(&[7])], None);
        let pair = batcher().pair(&[sample(&[5, 6])], &[sample(&[7, 8])], None);
        for (task, batch) in tasks.iter_mut().zip([&single, &pair]) {
            let a = to_host(trained.forward(task, batch).unwrap().logits.unwrap()).unwrap();
            let b = to_host(restored.forward(task, batch).unwrap().logits.unwrap()).unwrap();
            assert_close(&a, &b);
        }
    }

    #[test]
    fn test_out_of_range_labels_are_rejected_before_scoring() {
        let vocab = vocab(20);
        let mut tasks = [Task::new("cola", TaskKind::SingleClassification, 2, Box::new(Average::new("mcc")))
            .with_secondary(Box::new(CategoricalAccuracy::new()))
            .with_score_mode(ScoreMode::Matthews)];
        let model = build(&config(), &vocab, &tasks);

        let batch = batcher().single(&[sample(&[5, 6]), sample(&[7])], Some(&[0.0, 1e9]));
        match model.forward(&mut tasks[0], &batch) {
            Err(ModelError::InvalidLabel { n_classes, .. }) => assert_eq!(n_classes, 2),
            other => panic!("expected InvalidLabel, got {:?}", other.map(|o| o.loss.is_some())),
        }
        assert_eq!(tasks[0].scorer1().value(), 0.0);
        assert_eq!(tasks[0].scorer2().unwrap().value(), 0.0);
    }

    #[test]
    fn test_pair_labels_must_be_whole_class_ids() {
        let vocab = vocab(20);
        let mut tasks = [accuracy_task("rte", TaskKind::PairClassification, 2)];
        let model = build(&config(), &vocab, &tasks);

        for bad in [-1.0, 0.5, 2.0] {
            let batch = batcher().pair(&[sample(&[5])], &[sample(&[6])], Some(&[bad]));
            assert!(matches!(
                model.forward(&mut tasks[0], &batch),
                Err(ModelError::InvalidLabel { .. })
            ));
        }
        let batch = batcher().pair(&[sample(&[5])], &[sample(&[6])], Some(&[1.0]));
        assert!(model.forward(&mut tasks[0], &batch).is_ok());
    }
}
