// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All Burn-specific code lives here. The domain layer only
// describes tasks, vocabularies and hyperparameters; this
// layer turns them into modules and runs them.
//
//   layers.rs      — highway, pooler, classifier, pair
//                    attention, masked pooling helpers
//   transformer.rs — stacked multi-head self-attention
//   contextual.rs  — character-CNN + biLSTM contextual
//                    embedder and the CoVe encoder
//   embedding.rs   — word / char / contextual embedders
//                    combined into one token embedder
//   encoder.rs     — the shared sentence encoder (bow, rnn,
//                    transformer, bidirectional LM)
//   heads.rs       — per-task heads and the head builder
//   model.rs       — the multi-task container and the
//                    per-category forward dispatcher
//   builder.rs     — build_model: everything above, in order
//   loss.rs        — cross-entropy / MSE helpers
//
// Reference: Burn Book §3 (Building Blocks)
//            Vaswani et al. (2017) Attention Is All You Need
//            Peters et al. (2018) Deep contextualized word representations

pub mod layers;
pub mod transformer;
pub mod contextual;
pub mod embedding;
pub mod encoder;
pub mod heads;
pub mod loss;

/// Multi-task container and forward dispatch
pub mod model;

/// End-to-end model assembly
pub mod builder;
