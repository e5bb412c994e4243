// ============================================================
// Layer 2 — ProbeUseCase
// ============================================================
// Builds the model like BuildUseCase, then sends one random
// batch through every task:
//
//   Step 1: Load config, vocabulary, tasks  (BuildUseCase)
//   Step 2: Build the model on the device   (BuildUseCase)
//   Step 3: For each task, draw a batch of
//           the shape its category expects  (Layer 4 - data)
//   Step 4: forward(task, batch)            (Layer 5 - ml)
//   Step 5: Append loss + scorer values to
//           {metrics_dir}/task_metrics.csv  (Layer 6 - infra)
//
// A task whose category cannot run forward yet (ranking) is
// reported and skipped; any other error stops the probe.

use anyhow::{Context, Result};
use burn::prelude::*;

use crate::application::build_use_case::{BuildInputs, BuildUseCase};
use crate::data::batcher::{Batch, SentenceBatcher};
use crate::data::synthetic::SyntheticCorpus;
use crate::domain::task::{Task, TaskKind};
use crate::domain::vocab::Vocabulary;
use crate::infra::metrics::{MetricsLogger, TaskMetrics};
use crate::ml::builder::{gpu_device, CpuBackend, GpuBackend};
use crate::ml::loss::scalar;

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub config_path: String,
    pub vocab_path:  Option<String>,
    pub batch_size:  usize,
    pub seq_len:     usize,
    pub metrics_dir: String,
    pub seed:        u64,
}

pub struct ProbeUseCase {
    config: ProbeConfig,
}

impl ProbeUseCase {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    /// Run the probe; returns one metrics row per task that ran.
    pub fn execute(&self) -> Result<Vec<TaskMetrics>> {
        let builder = BuildUseCase::new(self.config.config_path.clone(), self.config.vocab_path.clone())
            .with_seed(self.config.seed);
        let inputs = builder.load()?;

        if inputs.cfg.cuda < 0 {
            self.run::<CpuBackend>(&builder, inputs, &Default::default())
        } else {
            let device = gpu_device(inputs.cfg.cuda);
            self.run::<GpuBackend>(&builder, inputs, &device)
        }
    }

    fn run<B: Backend>(&self, builder: &BuildUseCase, inputs: BuildInputs, device: &B::Device) -> Result<Vec<TaskMetrics>> {
        let model = builder.build::<B>(&inputs, device)?;
        let BuildInputs { cfg, vocab, mut tasks } = inputs;

        let batcher = SentenceBatcher::<B>::from_config(&cfg, device.clone()).context("Invalid char filter sizes")?;
        let logger = MetricsLogger::new(self.config.metrics_dir.clone())?;
        let mut corpus = SyntheticCorpus::new(self.config.seed);

        let mut rows = Vec::new();
        for task in tasks.iter_mut() {
            let batch = self.synthetic_batch(task, &vocab, &batcher, &mut corpus);
            let out = match model.forward(task, &batch) {
                Ok(out) => out,
                Err(e) if e.is_unimplemented() => {
                    tracing::warn!("Skipping task '{}': {e}", task.name());
                    continue;
                }
                Err(e) => return Err(e).with_context(|| format!("Forward failed for task '{}'", task.name())),
            };

            let row = TaskMetrics {
                task:      task.name().to_string(),
                kind:      task.kind().to_string(),
                loss:      out.loss.as_ref().map(scalar),
                primary:   task.scorer1().value(),
                secondary: task.scorer2().map(|s| s.value()),
            };
            tracing::info!(
                "{:<12} loss={:>8} {}",
                row.task,
                row.loss.map_or_else(|| "-".to_string(), |l| format!("{l:.4}")),
                task.metrics()
                    .iter()
                    .map(|(name, value)| format!("{name}={value:.4}"))
                    .collect::<Vec<_>>()
                    .join(" ")
            );
            logger.log(&row)?;
            rows.push(row);
        }

        tracing::info!("Metrics written to '{}'", logger.csv_path().display());
        Ok(rows)
    }

    /// One batch with exactly the fields the task's category reads.
    fn synthetic_batch<B: Backend>(
        &self,
        task:    &Task,
        vocab:   &Vocabulary,
        batcher: &SentenceBatcher<B>,
        corpus:  &mut SyntheticCorpus,
    ) -> Batch<B> {
        let n = self.config.batch_size.max(1);
        let len = self.config.seq_len.max(1);

        match task.kind() {
            TaskKind::SingleClassification => {
                let sents = corpus.sentences(vocab, n, len);
                let labels = corpus.class_labels(n, task.n_classes());
                batcher.single(&sents, Some(&labels))
            }
            kind if kind.is_pair() => {
                let first = corpus.sentences(vocab, n, len);
                let second = corpus.sentences(vocab, n, len);
                let labels = if kind.is_regression() {
                    corpus.scores(n)
                } else {
                    corpus.class_labels(n, task.n_classes())
                };
                batcher.pair(&first, &second, Some(&labels))
            }
            // One extra word so the shifted input is `len` long
            TaskKind::LanguageModeling => batcher.language_model(&corpus.sentences_between(vocab, n, 2, len + 1)),
            TaskKind::SequenceGeneration => {
                let sources = corpus.sentences(vocab, n, len);
                let targets = corpus.sentences(vocab, n, len);
                batcher.generation(&sources, Some(&targets))
            }
            _ => Batch::default(),
        }
    }
}
