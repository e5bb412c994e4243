// ============================================================
// Layer 3 — Task Descriptors
// ============================================================
// A Task is built once, before the model, and read-only after
// that except for its scorers, which the forward dispatcher
// updates in place.
//
// The category set is closed. Each category decides:
//   - which head the builder creates for the task
//   - which forward routine the dispatcher runs
//   - which loss and metric updates happen
//
//   SingleClassification  → pooler + classifier, CE loss
//   PairClassification    → pair head, CE loss
//   PairRegression        → pair head, MSE loss, Pearson/Spearman
//   PairOrdinalRegression → pair head, MSE loss, MSE/Spearman
//   LanguageModeling      → hidden→vocab projection, CE (pad ignored)
//   SequenceGeneration    → decoder + projection, no loss yet
//   Ranking               → no head, forward is unimplemented

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::domain::error::ModelError;
use crate::domain::traits::Scorer;

// ─── TaskKind ─────────────────────────────────────────────────────────────────

/// Closed set of task categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    SingleClassification,
    PairClassification,
    PairRegression,
    PairOrdinalRegression,
    LanguageModeling,
    SequenceGeneration,
    Ranking,
}

impl TaskKind {
    pub const ALL: [TaskKind; 7] = [
        TaskKind::SingleClassification,
        TaskKind::PairClassification,
        TaskKind::PairRegression,
        TaskKind::PairOrdinalRegression,
        TaskKind::LanguageModeling,
        TaskKind::SequenceGeneration,
        TaskKind::Ranking,
    ];

    /// The snake_case name used in config files.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::SingleClassification  => "single_classification",
            TaskKind::PairClassification    => "pair_classification",
            TaskKind::PairRegression        => "pair_regression",
            TaskKind::PairOrdinalRegression => "pair_ordinal_regression",
            TaskKind::LanguageModeling      => "language_modeling",
            TaskKind::SequenceGeneration    => "sequence_generation",
            TaskKind::Ranking               => "ranking",
        }
    }

    /// Tasks whose batches carry two sentences.
    pub fn is_pair(self) -> bool {
        matches!(
            self,
            TaskKind::PairClassification | TaskKind::PairRegression | TaskKind::PairOrdinalRegression
        )
    }

    /// Pair tasks trained with a mean-squared-error objective.
    pub fn is_regression(self) -> bool {
        matches!(self, TaskKind::PairRegression | TaskKind::PairOrdinalRegression)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// How the primary metric of a single-sentence task is fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreMode {
    /// Raw logits go to the scorers
    #[default]
    Logits,
    /// Matthews correlation is the primary metric, accuracy the secondary
    Matthews,
}

// ─── TaskSpec ─────────────────────────────────────────────────────────────────

/// Serialisable description of a task, as found in the config file.
/// `kind` stays a string here so an unknown category is reported
/// against the task name instead of as a generic JSON error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub n_classes: Option<usize>,
    #[serde(default)]
    pub score_mode: ScoreMode,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            name:       name.into(),
            kind:       kind.as_str().to_string(),
            n_classes:  None,
            score_mode: ScoreMode::Logits,
        }
    }

    pub fn with_n_classes(mut self, n_classes: usize) -> Self {
        self.n_classes = Some(n_classes);
        self
    }

    pub fn with_score_mode(mut self, score_mode: ScoreMode) -> Self {
        self.score_mode = score_mode;
        self
    }

    /// Parse the category, failing with the task name attached.
    pub fn task_kind(&self) -> Result<TaskKind, ModelError> {
        self.kind.parse().map_err(|kind| ModelError::UnknownTaskKind {
            task: self.name.clone(),
            kind,
        })
    }
}

// ─── Task ─────────────────────────────────────────────────────────────────────

/// A task descriptor with its metric accumulators.
#[derive(Debug)]
pub struct Task {
    name:       String,
    kind:       TaskKind,
    n_classes:  usize,
    score_mode: ScoreMode,
    scorer1:    Box<dyn Scorer>,
    scorer2:    Option<Box<dyn Scorer>>,
}

impl Task {
    /// `n_classes` is the output cardinality (1 for regression).
    pub fn new(name: impl Into<String>, kind: TaskKind, n_classes: usize, scorer1: Box<dyn Scorer>) -> Self {
        Self {
            name: name.into(),
            kind,
            n_classes,
            score_mode: ScoreMode::Logits,
            scorer1,
            scorer2: None,
        }
    }

    pub fn with_secondary(mut self, scorer: Box<dyn Scorer>) -> Self {
        self.scorer2 = Some(scorer);
        self
    }

    pub fn with_score_mode(mut self, score_mode: ScoreMode) -> Self {
        self.score_mode = score_mode;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn score_mode(&self) -> ScoreMode {
        self.score_mode
    }

    pub fn scorer1(&self) -> &dyn Scorer {
        self.scorer1.as_ref()
    }

    pub fn scorer2(&self) -> Option<&dyn Scorer> {
        self.scorer2.as_deref()
    }

    pub fn scorer1_mut(&mut self) -> &mut dyn Scorer {
        self.scorer1.as_mut()
    }

    pub fn scorer2_mut(&mut self) -> Option<&mut (dyn Scorer + 'static)> {
        self.scorer2.as_deref_mut()
    }

    /// (metric name, value) for every attached scorer, primary first.
    pub fn metrics(&self) -> Vec<(String, f64)> {
        let mut out = vec![(format!("{}_{}", self.name, self.scorer1.name()), self.scorer1.value())];
        if let Some(s2) = &self.scorer2 {
            out.push((format!("{}_{}", self.name, s2.name()), s2.value()));
        }
        out
    }

    pub fn reset_metrics(&mut self) {
        self.scorer1.reset();
        if let Some(s2) = self.scorer2.as_mut() {
            s2.reset();
        }
    }
}
