use burn::{backend::wgpu::WgpuDevice, prelude::*};

use crate::domain::config::ExperimentConfig;
use crate::domain::error::ModelResult;
use crate::domain::task::Task;
use crate::domain::vocab::Vocabulary;
use crate::infra::pretrained::PretrainedStore;
use crate::ml::embedding::build_embeddings;
use crate::ml::encoder::build_sent_encoder;
use crate::ml::heads::build_modules;
use crate::ml::model::MultiTaskModel;

/// Backend for `cuda < 0`
pub type CpuBackend = burn::backend::NdArray;
/// Backend for `cuda >= 0`
pub type GpuBackend = burn::backend::Wgpu;

/// The accelerator selected by a non-negative `cuda` index.
pub fn gpu_device(index: i32) -> WgpuDevice {
    WgpuDevice::DiscreteGpu(index.max(0) as usize)
}

/// Assemble the full model: embeddings → shared encoder → container → heads.
///
/// `pretrained` is the word matrix for glove / fastText configs. Every
/// module is created directly on `device`.
pub fn build_model<B: Backend>(
    cfg:        &ExperimentConfig,
    vocab:      &Vocabulary,
    pretrained: Option<Tensor<B, 2>>,
    tasks:      &[Task],
    store:      &PretrainedStore,
    device:     &B::Device,
) -> ModelResult<MultiTaskModel<B>> {
    let bundle = build_embeddings(cfg, vocab, pretrained, store, device)?;
    tracing::info!("Embedding width d_emb = {}", bundle.d_emb);

    // The decoder heads read the same token embedder as the encoder
    let embedder = bundle.embedder.clone();
    let (sent_encoder, d_sent) = build_sent_encoder(cfg, bundle, tasks, device)?;

    let mut model = MultiTaskModel::new(sent_encoder, cfg.sent_combine_method, vocab.clone());
    build_modules(tasks, &mut model, d_sent, &embedder, cfg, device)?;

    tracing::info!("{}", model.describe());
    Ok(model)
}
