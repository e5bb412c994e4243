// ============================================================
// Layer 6 — Pretrained Weight Store
// ============================================================
// Loads the fixed, frozen artifacts some embedders start from,
// using Burn's CompactRecorder (named MessagePack records, half precision).
//
// Artifacts:
//   1. Contextual (ELMo-style) encoder
//        identified upstream by an options URL and a weights
//        URL; the local record is named after the weights file:
//        {dir}/elmo_2x4096_512_2048cnn_2xhighway_weights.mpk
//   2. CoVe two-layer biLSTM
//        {dir}/cove_mtlstm.mpk
//   3. Pretrained word vectors (GloVe / fastText)
//        a JSON array of rows at `word_embs_file`
//
// The store never downloads anything. Converting the upstream
// artifacts into records is done once, offline; `save_module`
// writes a record in the layout `load_into` expects.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};

use crate::domain::error::{ModelError, ModelResult};

pub const ELMO_OPTIONS_URL: &str = "https://s3-us-west-2.amazonaws.com/allennlp/models/elmo/2x4096_512_2048cnn_2xhighway/elmo_2x4096_512_2048cnn_2xhighway_options.json";
pub const ELMO_WEIGHTS_URL: &str = "https://s3-us-west-2.amazonaws.com/allennlp/models/elmo/2x4096_512_2048cnn_2xhighway/elmo_2x4096_512_2048cnn_2xhighway_weights.hdf5";

const COVE_RECORD: &str = "cove_mtlstm";

/// Extension CompactRecorder appends to record paths
const RECORD_EXTENSION: &str = "mpk";

/// Resolves and loads pretrained records from one directory.
#[derive(Debug, Clone)]
pub struct PretrainedStore {
    dir: PathBuf,
}

impl PretrainedStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Record path (without extension) for the contextual encoder.
    pub fn contextual_path(&self) -> PathBuf {
        self.dir.join(record_stem(ELMO_WEIGHTS_URL))
    }

    /// Record path (without extension) for CoVe.
    pub fn cove_path(&self) -> PathBuf {
        self.dir.join(COVE_RECORD)
    }

    /// True when a record exists at `path` (the recorder adds the extension).
    pub fn has_record(&self, path: &Path) -> bool {
        with_extension(path).exists()
    }

    /// Load a record into `module`, replacing its parameters.
    pub fn load_into<B: Backend, M: Module<B>>(
        &self,
        module: M,
        path:   &Path,
        device: &B::Device,
    ) -> ModelResult<M> {
        let record = CompactRecorder::new()
            .load(path.to_path_buf(), device)
            .map_err(|e| ModelError::Pretrained {
                path:   with_extension(path),
                reason: e.to_string(),
            })?;

        tracing::debug!("Loaded pretrained record '{}'", with_extension(path).display());
        Ok(module.load_record(record))
    }

    /// Write `module` as a record at `path`.
    pub fn save_module<B: Backend, M: Module<B>>(&self, module: &M, path: &Path) -> ModelResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        CompactRecorder::new()
            .record(module.clone().into_record(), path.to_path_buf())
            .map_err(|e| ModelError::Pretrained {
                path:   with_extension(path),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Read a `[vocab, dim]` word matrix stored as a JSON array of rows.
    pub fn word_matrix<B: Backend>(&self, path: impl AsRef<Path>, device: &B::Device) -> ModelResult<Tensor<B, 2>> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        let rows: Vec<Vec<f32>> = serde_json::from_str(&json)?;

        let n_rows = rows.len();
        let dim = rows.first().map_or(0, Vec::len);
        if n_rows == 0 || dim == 0 || rows.iter().any(|r| r.len() != dim) {
            return Err(ModelError::InvalidValue {
                key:    "word_embs_file".to_string(),
                reason: format!("'{}' is not a non-empty rectangular matrix", path.display()),
            });
        }

        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        tracing::info!("Read pretrained word vectors: {} x {}", n_rows, dim);
        Ok(Tensor::from_data(TensorData::new(flat, [n_rows, dim]), device))
    }
}

/// "…/elmo_x_weights.hdf5" → "elmo_x_weights"
fn record_stem(url: &str) -> &str {
    let file = url.rsplit('/').next().unwrap_or(url);
    file.split('.').next().unwrap_or(file)
}

fn with_extension(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(RECORD_EXTENSION);
    PathBuf::from(name)
}
