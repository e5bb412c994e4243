// ============================================================
// Layer 4 — Data Layer
// ============================================================
// Turns tokenised sentences into the tensor batches the model
// dispatcher consumes.
//
//   SentenceSample    → word ids, char ids, raw tokens
//       │
//       ▼
//   SentenceBatcher   → pads and stacks samples into a Batch
//       │                (input1/input2, input/input_bwd,
//       ▼                 inputs, labels, targs/targs_b)
//   MultiTaskModel::forward
//
// Building the vocabulary and iterating a dataset are the
// caller's job; SyntheticCorpus only exists so a built model
// can be probed end to end without any corpus on disk.

/// Tokenised sentences and contextual character ids
pub mod sample;

/// TokenInput / Batch tensors and the padding batcher
pub mod batcher;

/// Seeded random sentences, labels and vocabularies
pub mod synthetic;
