// ============================================================
// Layer 3 — Error Taxonomy
// ============================================================
// Every builder and the forward dispatcher return ModelError.
// The application and CLI layers wrap it in anyhow::Error
// with extra context.
//
// Three families of failure exist:
//
//   Configuration — fatal. All embeddings disabled, unknown
//                   task category, missing head, Ranking
//                   forward, malformed values, missing batch
//                   fields, out-of-range class labels. Construction or the current
//                   forward call is aborted.
//
//   Optional dependency — never surfaces here. A CoVe load
//                   failure is logged by the embedding builder
//                   and the feature is dropped.
//
//   Tensor / IO  — host-side conversion of tensor data, or
//                   reading config, vocabulary and weight files.

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::task::TaskKind;

/// Errors raised while building the module graph or dispatching a batch.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Generic configuration problem.
    #[error("configuration error: {0}")]
    Config(String),

    /// Every embedding source was switched off.
    #[error("all embedding sources are disabled; the embedding width would be zero")]
    NoEmbeddings,

    /// A config value could not be parsed or is out of range.
    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    /// A task spec names a category with no known head.
    #[error("unknown task category '{kind}' for task '{task}'")]
    UnknownTaskKind { task: String, kind: String },

    /// Two tasks share a name, so their heads would collide.
    #[error("a head is already registered for task '{0}'")]
    DuplicateHead(String),

    /// No head was registered under this task name.
    #[error("no head registered for task '{0}'")]
    MissingHead(String),

    /// The head registered under the task name belongs to another category.
    #[error("task '{task}' expects a {expected} head, found a {found} head")]
    HeadMismatch {
        task:     String,
        expected: &'static str,
        found:    &'static str,
    },

    /// Forward dispatch for a category that has no implementation.
    #[error("forward pass for {kind} task '{task}' is not implemented")]
    Unimplemented { task: String, kind: TaskKind },

    /// The batch lacks a field the task's forward routine reads.
    #[error("batch for task '{task}' is missing field '{field}'")]
    MissingField { task: String, field: &'static str },

    /// The token input lacks the ids an enabled embedder consumes.
    #[error("token input carries no '{0}' ids")]
    MissingTokens(&'static str),

    /// A class label is negative, fractional or not below the class count.
    #[error("task '{task}' got label {label}, expected an integer in 0..{n_classes}")]
    InvalidLabel { task: String, label: f32, n_classes: usize },

    /// Tensor shapes disagree (e.g. targets vs. encoder output).
    #[error("shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what:     &'static str,
        expected: Vec<usize>,
        actual:   Vec<usize>,
    },

    /// A pretrained artifact exists but could not be loaded.
    #[error("cannot load pretrained weights from '{path}': {reason}")]
    Pretrained { path: PathBuf, reason: String },

    /// Host-side conversion of tensor data failed.
    #[error("tensor data error: {0}")]
    Tensor(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used across the domain and ML layers.
pub type ModelResult<T> = Result<T, ModelError>;

impl ModelError {
    /// True for the explicit "not implemented" dispatch failure.
    pub fn is_unimplemented(&self) -> bool {
        matches!(self, ModelError::Unimplemented { .. })
    }
}
