// ============================================================
// Layer 3 — Experiment Configuration
// ============================================================
// A flat key-value configuration read from JSON. Every
// recognised key has a default, so a config file only needs
// the values it changes.
//
// Per-task overrides:
//   Any key of the form "<task>_<attr>" that is not itself a
//   recognised option lands in `overrides` (serde flatten).
//   When a head is built for task "sst", the classifier type
//   is read from "sst_classifier" if present, otherwise from
//   the global "classifier".
//
// Example:
//   {
//     "sent_enc": "rnn",
//     "d_hid": 256,
//     "classifier": "mlp",
//     "sts-b_classifier": "log_reg",
//     "tasks": [{ "name": "sts-b", "kind": "pair_regression" }]
//   }
//
// Reference: serde documentation (flatten, default)
//            Rust Book §9 (Error Handling)

use std::{collections::BTreeMap, fs, path::Path};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::domain::error::{ModelError, ModelResult};
use crate::domain::task::TaskSpec;

// ─── Enumerated options ───────────────────────────────────────────────────────

/// Which word embedding source to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WordEmbs {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "scratch")]
    Scratch,
    #[serde(rename = "glove")]
    Glove,
    #[serde(rename = "fastText")]
    FastText,
}

impl WordEmbs {
    /// Sources that come with a pretrained matrix.
    pub fn is_pretrained(self) -> bool {
        matches!(self, WordEmbs::Glove | WordEmbs::FastText)
    }
}

/// The shared sentence encoder architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentEncoderKind {
    Bow,
    Rnn,
    Transformer,
}

/// Classifier architecture on top of pooled vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    /// A single linear layer
    LogReg,
    /// One hidden tanh + layer-norm block
    Mlp,
    /// Two hidden tanh + layer-norm blocks
    FancyMlp,
}

/// How a variable-length sequence is reduced to one vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolType {
    Max,
    Mean,
    Final,
}

// ─── ExperimentConfig ─────────────────────────────────────────────────────────

/// All hyperparameters read by the embedding, encoder and head builders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    // ── embeddings ──
    pub word_embs:         WordEmbs,
    pub word_embs_file:    Option<String>,
    pub d_word:            usize,
    pub char_embs:         bool,
    pub d_char:            usize,
    /// Comma-separated CNN filter widths, e.g. "2,3,4,5"
    pub char_filter_sizes: String,
    pub n_char_filters:    usize,
    pub elmo:              bool,
    pub elmo_chars_only:   bool,
    pub cove:              bool,
    /// Local directory holding converted pretrained records
    pub pretrained_dir:    String,
    pub dropout_embs:      f64,

    // ── sentence encoder ──
    pub sent_enc:            SentEncoderKind,
    pub bidirectional:       bool,
    pub d_hid:               usize,
    pub d_tproj:             usize,
    pub d_ff:                usize,
    pub n_layers_enc:        usize,
    pub n_heads:             usize,
    pub n_layers_highway:    usize,
    pub dropout:             f64,
    pub skip_embs:           bool,
    pub sent_combine_method: PoolType,

    // ── task heads (global defaults, overridable per task) ──
    pub classifier:         ClassifierKind,
    pub classifier_hid_dim: usize,
    pub d_proj:             usize,
    pub pair_attn:          bool,
    pub classifier_dropout: f64,
    pub pool_type:          PoolType,
    pub shared_pair_attn:   bool,

    // ── decoders / LM ──
    pub d_hid_dec:       usize,
    pub n_layers_dec:    usize,
    pub max_word_v_size: usize,

    /// Accelerator selector: negative = CPU, otherwise a GPU index
    pub cuda: i32,

    /// Ordered task descriptions
    pub tasks: Vec<TaskSpec>,

    /// Every unrecognised key, consulted for "<task>_<attr>" overrides
    #[serde(flatten)]
    pub overrides: BTreeMap<String, Value>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            word_embs:         WordEmbs::Scratch,
            word_embs_file:    None,
            d_word:            300,
            char_embs:         false,
            d_char:            100,
            char_filter_sizes: "2,3,4,5".to_string(),
            n_char_filters:    100,
            elmo:              false,
            elmo_chars_only:   true,
            cove:              false,
            pretrained_dir:    "pretrained".to_string(),
            dropout_embs:      0.2,

            sent_enc:            SentEncoderKind::Rnn,
            bidirectional:       true,
            d_hid:               512,
            d_tproj:             64,
            d_ff:                2048,
            n_layers_enc:        1,
            n_heads:             8,
            n_layers_highway:    0,
            dropout:             0.2,
            skip_embs:           false,
            sent_combine_method: PoolType::Max,

            classifier:         ClassifierKind::Mlp,
            classifier_hid_dim: 512,
            d_proj:             512,
            pair_attn:          true,
            classifier_dropout: 0.0,
            pool_type:          PoolType::Max,
            shared_pair_attn:   false,

            d_hid_dec:       300,
            n_layers_dec:    1,
            max_word_v_size: 30000,

            cuda: -1,

            tasks:     Vec::new(),
            overrides: BTreeMap::new(),
        }
    }
}

/// Head hyperparameters after per-task override resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskParams {
    pub cls_type:         ClassifierKind,
    pub d_hid:            usize,
    pub d_proj:           usize,
    pub shared_pair_attn: bool,
    pub attn:             bool,
    pub dropout:          f64,
    pub pool_type:        PoolType,
}

impl ExperimentConfig {
    /// Read a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> ModelResult<Self> {
        let json = fs::read_to_string(path.as_ref())?;
        Self::from_json(&json)
    }

    /// Parse a JSON config string.
    pub fn from_json(json: &str) -> ModelResult<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        Ok(cfg)
    }

    /// Look up "<task>_<attr>" in the overrides, falling back to `global`.
    pub fn task_attr<T: DeserializeOwned>(&self, task: &str, attr: &str, global: T) -> ModelResult<T> {
        let key = format!("{task}_{attr}");
        match self.overrides.get(&key) {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| ModelError::InvalidValue { key, reason: e.to_string() }),
            None => Ok(global),
        }
    }

    /// Resolve every head hyperparameter for one task.
    ///
    /// With `shared_pair_attn` the attention switch and classifier
    /// dropout are global: one attention module serves every pair
    /// task, so per-task values would contradict each other.
    pub fn task_params(&self, task: &str) -> ModelResult<TaskParams> {
        let (attn, dropout) = if self.shared_pair_attn {
            (self.pair_attn, self.classifier_dropout)
        } else {
            (
                self.task_attr(task, "pair_attn", self.pair_attn)?,
                self.task_attr(task, "classifier_dropout", self.classifier_dropout)?,
            )
        };

        Ok(TaskParams {
            cls_type:         self.task_attr(task, "classifier", self.classifier)?,
            d_hid:            self.task_attr(task, "classifier_hid_dim", self.classifier_hid_dim)?,
            d_proj:           self.task_attr(task, "d_proj", self.d_proj)?,
            shared_pair_attn: self.shared_pair_attn,
            attn,
            dropout,
            pool_type:        self.task_attr(task, "pool_type", self.pool_type)?,
        })
    }

    /// Parse `char_filter_sizes` ("2,3,4,5") into widths.
    pub fn filter_sizes(&self) -> ModelResult<Vec<usize>> {
        let invalid = |reason: String| ModelError::InvalidValue {
            key: "char_filter_sizes".to_string(),
            reason,
        };

        let sizes = self
            .char_filter_sizes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<usize>().map_err(|e| invalid(format!("'{s}': {e}"))))
            .collect::<ModelResult<Vec<_>>>()?;

        if sizes.is_empty() || sizes.contains(&0) {
            return Err(invalid("expected a comma-separated list of positive widths".to_string()));
        }
        Ok(sizes)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_keys() {
        let cfg = ExperimentConfig::from_json(r#"{ "d_hid": 64 }"#).unwrap();
        assert_eq!(cfg.d_hid, 64);
        assert_eq!(cfg.sent_enc, SentEncoderKind::Rnn);
        assert!(cfg.overrides.is_empty());
    }

    #[test]
    fn test_task_override_wins_over_global() {
        let cfg = ExperimentConfig::from_json(
            r#"{ "classifier": "mlp", "d_proj": 32, "sst_classifier": "log_reg", "sst_d_proj": 8 }"#,
        )
        .unwrap();

        let sst = cfg.task_params("sst").unwrap();
        assert_eq!(sst.cls_type, ClassifierKind::LogReg);
        assert_eq!(sst.d_proj, 8);

        // A task without overrides keeps the global values
        let other = cfg.task_params("mnli").unwrap();
        assert_eq!(other.cls_type, ClassifierKind::Mlp);
        assert_eq!(other.d_proj, 32);
    }

    #[test]
    fn test_shared_pair_attn_ignores_task_attention_overrides() {
        let cfg = ExperimentConfig::from_json(
            r#"{ "shared_pair_attn": true, "pair_attn": true,
                 "rte_pair_attn": false, "rte_classifier_dropout": 0.5 }"#,
        )
        .unwrap();

        let rte = cfg.task_params("rte").unwrap();
        assert!(rte.attn);
        assert_eq!(rte.dropout, cfg.classifier_dropout);
    }

    #[test]
    fn test_malformed_override_is_reported_with_its_key() {
        let cfg = ExperimentConfig::from_json(r#"{ "sst_d_proj": "wide" }"#).unwrap();
        match cfg.task_params("sst") {
            Err(ModelError::InvalidValue { key, .. }) => assert_eq!(key, "sst_d_proj"),
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn test_filter_sizes_parsing() {
        let mut cfg = ExperimentConfig::default();
        cfg.char_filter_sizes = "2, 3,4".to_string();
        assert_eq!(cfg.filter_sizes().unwrap(), vec![2, 3, 4]);

        cfg.char_filter_sizes = "2,x".to_string();
        assert!(cfg.filter_sizes().is_err());

        cfg.char_filter_sizes = "0".to_string();
        assert!(cfg.filter_sizes().is_err());
    }
}
