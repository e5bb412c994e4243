// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// A task owns one or two metric accumulators ("scorers").
// The forward dispatcher feeds them after every labelled
// batch; the training loop that owns the model reads and
// resets them between epochs.
//
// Scorers see host-side numbers only — never tensors — so the
// domain layer stays free of Burn types. Two kinds of
// observation exist:
//
//   Logits — raw row-major logits plus gold labels; the scorer
//            derives whatever it measures (accuracy, F1, ...)
//   Value  — a number already computed by the dispatcher
//            (a correlation coefficient, an LM loss, ...)
//
// Implementations live in infra::metrics.

use std::fmt;

/// One update for a scorer.
#[derive(Debug, Clone, Copy)]
pub enum Observation<'a> {
    /// Row-major logits `[batch, n_classes]` and one gold label per row.
    Logits {
        logits:    &'a [f32],
        n_classes: usize,
        labels:    &'a [f32],
    },
    /// A pre-computed scalar.
    Value(f64),
}

/// A metric accumulator attached to a task.
pub trait Scorer: fmt::Debug + Send {
    /// Short metric name used in logs and CSV headers.
    fn name(&self) -> &str;

    /// Fold one observation into the running state.
    fn observe(&mut self, observation: Observation<'_>);

    /// Current value of the metric.
    fn value(&self) -> f64;

    /// Clear the running state.
    fn reset(&mut self);
}
