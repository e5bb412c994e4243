use burn::{
    nn::loss::{CrossEntropyLossConfig, MseLoss, Reduction},
    prelude::*,
    tensor::{activation::log_softmax, ElementConversion},
};

use crate::domain::error::{ModelError, ModelResult};

/// Mean cross-entropy of `logits` [n, classes] against class ids [n].
pub fn cross_entropy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    CrossEntropyLossConfig::new()
        .init(&logits.device())
        .forward(logits, targets)
}

/// Cross-entropy averaged over the targets that are not `pad`.
///
/// Padded rows contribute exactly zero, whatever their logits are.
/// With no real target at all the loss is 0.
pub fn lm_cross_entropy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>, pad: usize) -> Tensor<B, 1> {
    let [n, _] = logits.dims();
    let is_pad = targets.clone().equal_elem(pad as i32);

    let picked = log_softmax(logits, 1)
        .gather(1, targets.reshape([n, 1]))
        .reshape([n])
        .mask_fill(is_pad.clone(), 0.0);
    let count = is_pad.bool_not().float().sum().clamp_min(1.0);

    picked.sum().neg().div(count)
}

/// Mean squared error between predictions and gold values, both [n].
pub fn mse<B: Backend>(pred: Tensor<B, 1>, gold: Tensor<B, 1>) -> Tensor<B, 1> {
    MseLoss::new().forward(pred, gold, Reduction::Mean)
}

/// Copy a float tensor to a host vector.
pub fn to_host<B: Backend, const D: usize>(t: Tensor<B, D>) -> ModelResult<Vec<f32>> {
    t.into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| ModelError::Tensor(format!("{e:?}")))
}

/// The value of a one-element tensor.
pub fn scalar<B: Backend>(t: &Tensor<B, 1>) -> f64 {
    t.clone().into_scalar().elem::<f64>()
}
