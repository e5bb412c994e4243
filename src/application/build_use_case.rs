// ============================================================
// Layer 2 — BuildUseCase
// ============================================================
// Gathers everything the model builder reads, then builds:
//
//   Step 1: Read the JSON config            (Layer 3 - domain)
//   Step 2: Load the vocabulary, or make a
//           synthetic one of at most
//           max_word_v_size words           (Layer 3 / 4)
//   Step 3: Turn task specs into tasks      (Layer 2)
//   Step 4: Read pretrained word vectors
//           for glove / fastText configs    (Layer 6 - infra)
//   Step 5: build_model on the device       (Layer 5 - ml)
//
// Reference: Rust Book §9 (anyhow context)

use anyhow::{Context, Result};
use burn::prelude::*;

use crate::application::task_factory::tasks_from_specs;
use crate::data::synthetic::SyntheticCorpus;
use crate::domain::config::ExperimentConfig;
use crate::domain::task::Task;
use crate::domain::vocab::Vocabulary;
use crate::infra::pretrained::PretrainedStore;
use crate::ml::builder::{build_model, gpu_device, CpuBackend, GpuBackend};
use crate::ml::model::MultiTaskModel;

/// Size cap for a generated vocabulary
const SYNTHETIC_VOCAB_WORDS: usize = 1000;

/// Everything read from disk before the model is built.
#[derive(Debug)]
pub struct BuildInputs {
    pub cfg:   ExperimentConfig,
    pub vocab: Vocabulary,
    pub tasks: Vec<Task>,
}

pub struct BuildUseCase {
    config_path: String,
    vocab_path:  Option<String>,
    seed:        u64,
}

impl BuildUseCase {
    pub fn new(config_path: impl Into<String>, vocab_path: Option<String>) -> Self {
        Self { config_path: config_path.into(), vocab_path, seed: 42 }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Build the model graph on the configured device and return its summary.
    pub fn execute(&self) -> Result<String> {
        let inputs = self.load()?;
        let summary = if inputs.cfg.cuda < 0 {
            self.build::<CpuBackend>(&inputs, &Default::default())?.describe()
        } else {
            self.build::<GpuBackend>(&inputs, &gpu_device(inputs.cfg.cuda))?.describe()
        };
        Ok(summary)
    }

    /// Steps 1–3.
    pub fn load(&self) -> Result<BuildInputs> {
        let cfg = ExperimentConfig::from_file(&self.config_path)
            .with_context(|| format!("Failed to read config '{}'", self.config_path))?;
        tracing::info!("Loaded config '{}' with {} tasks", self.config_path, cfg.tasks.len());

        let vocab = match &self.vocab_path {
            Some(path) => Vocabulary::from_file(path).with_context(|| format!("Failed to read vocabulary '{path}'"))?,
            None => {
                let n_words = cfg.max_word_v_size.min(SYNTHETIC_VOCAB_WORDS).saturating_sub(2).max(1);
                tracing::info!("No vocabulary given, generating {} synthetic words", n_words);
                SyntheticCorpus::new(self.seed).vocabulary(n_words)
            }
        };

        let tasks = tasks_from_specs(&cfg.tasks, &cfg).context("Invalid task list")?;

        Ok(BuildInputs { cfg, vocab, tasks })
    }

    /// Steps 4–5.
    pub fn build<B: Backend>(&self, inputs: &BuildInputs, device: &B::Device) -> Result<MultiTaskModel<B>> {
        let cfg = &inputs.cfg;
        let store = PretrainedStore::new(&cfg.pretrained_dir);

        let pretrained = match (&cfg.word_embs_file, cfg.word_embs.is_pretrained()) {
            (Some(path), true) => Some(
                store
                    .word_matrix::<B>(path, device)
                    .with_context(|| format!("Failed to read word vectors '{path}'"))?,
            ),
            (None, true) => {
                tracing::warn!("word_embs = {:?} but no word_embs_file, learning from scratch", cfg.word_embs);
                None
            }
            _ => None,
        };

        build_model(cfg, &inputs.vocab, pretrained, &inputs.tasks, &store, device)
            .context("Failed to build the multi-task model")
    }
}
