// ============================================================
// Layer 4 — Sentence Batcher
// ============================================================
// Converts tokenised sentences into the tensor batches the
// forward dispatcher reads.
//
// Token fields:
//   A TokenInput carries whichever id tensors the enabled
//   embedders consume:
//     words → [batch, seq]            word ids ("tokens")
//     chars → [batch, seq, n_chars]   char ids ("chars")
//     elmo  → [batch, seq, 50]        byte ids for the
//                                     contextual embedder
//   Sentences are right-padded with the vocabulary padding
//   id (0), so the padding mask is simply `ids != 0`.
//
// Batch fields, by task category:
//   single sentence   input1 (+ labels)
//   sentence pair     input1, input2 (+ labels)
//   language model    input, targs (+ input_bwd, targs_b)
//   generation        inputs (+ targs)
//
// Labels are always a float vector; classification losses
// cast them to class ids.
//
// Reference: Burn Book §4 (Batcher)

use burn::prelude::*;

use crate::data::sample::{elmo_char_ids, SentenceSample, ELMO_MAX_CHARS};
use crate::domain::config::{ExperimentConfig, WordEmbs};
use crate::domain::error::{ModelError, ModelResult};

// ─── TokenInput ───────────────────────────────────────────────────────────────
/// Id tensors for one padded batch of sentences.
#[derive(Debug, Clone)]
pub struct TokenInput<B: Backend> {
    /// Word ids — shape: [batch, seq]
    pub words: Option<Tensor<B, 2, Int>>,
    /// Char ids — shape: [batch, seq, n_chars]
    pub chars: Option<Tensor<B, 3, Int>>,
    /// Contextual byte ids — shape: [batch, seq, 50]
    pub elmo:  Option<Tensor<B, 3, Int>>,
}

impl<B: Backend> TokenInput<B> {
    pub fn from_words(words: Tensor<B, 2, Int>) -> Self {
        Self { words: Some(words), chars: None, elmo: None }
    }

    /// [batch, seq] of whichever id tensor is present.
    pub fn dims(&self) -> ModelResult<[usize; 2]> {
        if let Some(words) = &self.words {
            return Ok(words.dims());
        }
        self.char_like()
            .map(|t| {
                let [b, s, _] = t.dims();
                [b, s]
            })
            .ok_or(ModelError::MissingTokens("words"))
    }

    pub fn device(&self) -> ModelResult<B::Device> {
        if let Some(words) = &self.words {
            return Ok(words.device());
        }
        self.char_like()
            .map(|t| t.device())
            .ok_or(ModelError::MissingTokens("words"))
    }

    /// True at real tokens, false at padding — shape: [batch, seq]
    pub fn padding_mask(&self, pad: usize) -> ModelResult<Tensor<B, 2, Bool>> {
        if let Some(words) = &self.words {
            return Ok(words.clone().equal_elem(pad as i32).bool_not());
        }
        // A padded token has no characters at all, so every id is 0
        let ids = self.char_like().ok_or(ModelError::MissingTokens("words"))?;
        let [b, s, _] = ids.dims();
        Ok(ids.clone().sum_dim(2).reshape([b, s]).greater_elem(0))
    }

    fn char_like(&self) -> Option<&Tensor<B, 3, Int>> {
        self.elmo.as_ref().or(self.chars.as_ref())
    }
}

// ─── Batch ────────────────────────────────────────────────────────────────────
/// A batch for any task category. Only the fields the task's
/// forward routine reads need to be set.
#[derive(Debug, Clone)]
pub struct Batch<B: Backend> {
    pub input1:    Option<TokenInput<B>>,
    pub input2:    Option<TokenInput<B>>,
    pub input:     Option<TokenInput<B>>,
    pub input_bwd: Option<TokenInput<B>>,
    pub inputs:    Option<TokenInput<B>>,
    /// Gold labels — shape: [batch]
    pub labels:    Option<Tensor<B, 1>>,
    /// Next-token (or target sequence) ids — shape: [batch, seq]
    pub targs:     Option<Tensor<B, 2, Int>>,
    /// Previous-token ids for the backward LM — shape: [batch, seq]
    pub targs_b:   Option<Tensor<B, 2, Int>>,
}

impl<B: Backend> Default for Batch<B> {
    fn default() -> Self {
        Self {
            input1:    None,
            input2:    None,
            input:     None,
            input_bwd: None,
            inputs:    None,
            labels:    None,
            targs:     None,
            targs_b:   None,
        }
    }
}

// ─── SentenceBatcher ──────────────────────────────────────────────────────────
/// Pads sentences and creates id tensors on one device.
#[derive(Clone, Debug)]
pub struct SentenceBatcher<B: Backend> {
    pub device: B::Device,
    words:      bool,
    chars:      bool,
    elmo:       bool,
    /// Char rows are padded to at least the widest CNN filter
    min_chars:  usize,
}

impl<B: Backend> SentenceBatcher<B> {
    /// A batcher that emits word ids only.
    pub fn new(device: B::Device) -> Self {
        Self { device, words: true, chars: false, elmo: false, min_chars: 1 }
    }

    /// Emit exactly the id tensors the configured embedders consume.
    pub fn from_config(cfg: &ExperimentConfig, device: B::Device) -> ModelResult<Self> {
        let min_chars = if cfg.char_embs {
            cfg.filter_sizes()?.into_iter().max().unwrap_or(1)
        } else {
            1
        };
        Ok(Self {
            device,
            words: cfg.word_embs != WordEmbs::None,
            chars: cfg.char_embs,
            elmo: cfg.elmo,
            min_chars,
        })
    }

    /// Pad `samples` into one TokenInput.
    pub fn tokens(&self, samples: &[SentenceSample]) -> TokenInput<B> {
        let batch_size = samples.len();
        let seq_len = samples.iter().map(SentenceSample::len).max().unwrap_or(0).max(1);

        let words = self.words.then(|| {
            let rows: Vec<Vec<usize>> = samples.iter().map(|s| s.words.clone()).collect();
            self.id_matrix(&rows, seq_len)
        });

        let chars = self.chars.then(|| {
            let n_chars = samples
                .iter()
                .flat_map(|s| s.chars.iter().map(Vec::len))
                .max()
                .unwrap_or(0)
                .max(self.min_chars);

            let mut flat = vec![0i32; batch_size * seq_len * n_chars];
            for (b, sample) in samples.iter().enumerate() {
                for (t, word) in sample.chars.iter().take(seq_len).enumerate() {
                    let base = (b * seq_len + t) * n_chars;
                    for (c, &id) in word.iter().enumerate() {
                        flat[base + c] = id as i32;
                    }
                }
            }
            Tensor::<B, 1, Int>::from_ints(flat.as_slice(), &self.device)
                .reshape([batch_size, seq_len, n_chars])
        });

        let elmo = self.elmo.then(|| {
            let mut flat = vec![0i32; batch_size * seq_len * ELMO_MAX_CHARS];
            for (b, sample) in samples.iter().enumerate() {
                for (t, word) in sample.text.iter().take(seq_len).enumerate() {
                    let base = (b * seq_len + t) * ELMO_MAX_CHARS;
                    for (c, id) in elmo_char_ids(word).into_iter().enumerate() {
                        flat[base + c] = id as i32;
                    }
                }
            }
            Tensor::<B, 1, Int>::from_ints(flat.as_slice(), &self.device)
                .reshape([batch_size, seq_len, ELMO_MAX_CHARS])
        });

        TokenInput { words, chars, elmo }
    }

    /// input1 (+ labels)
    pub fn single(&self, samples: &[SentenceSample], labels: Option<&[f32]>) -> Batch<B> {
        Batch {
            input1: Some(self.tokens(samples)),
            labels: labels.map(|l| self.labels(l)),
            ..Batch::default()
        }
    }

    /// input1, input2 (+ labels)
    pub fn pair(
        &self,
        first:  &[SentenceSample],
        second: &[SentenceSample],
        labels: Option<&[f32]>,
    ) -> Batch<B> {
        Batch {
            input1: Some(self.tokens(first)),
            input2: Some(self.tokens(second)),
            labels: labels.map(|l| self.labels(l)),
            ..Batch::default()
        }
    }

    /// Shifted inputs and targets for both LM directions.
    ///
    /// Forward:  input = w0 .. w(n-2), targs   = w1 .. w(n-1)
    /// Backward: the same on the reversed sentence.
    pub fn language_model(&self, samples: &[SentenceSample]) -> Batch<B> {
        let shift = |s: &SentenceSample| {
            let n = s.len();
            (s.slice(0..n.saturating_sub(1)), s.words.get(1..).unwrap_or_default().to_vec())
        };

        let (fwd_in, fwd_targs): (Vec<_>, Vec<_>) = samples.iter().map(shift).unzip();
        let reversed: Vec<SentenceSample> = samples.iter().map(SentenceSample::reversed).collect();
        let (bwd_in, bwd_targs): (Vec<_>, Vec<_>) = reversed.iter().map(shift).unzip();

        let seq_len = fwd_targs.iter().map(Vec::len).max().unwrap_or(0).max(1);
        Batch {
            input:     Some(self.tokens(&fwd_in)),
            input_bwd: Some(self.tokens(&bwd_in)),
            targs:     Some(self.id_matrix(&fwd_targs, seq_len)),
            targs_b:   Some(self.id_matrix(&bwd_targs, seq_len)),
            ..Batch::default()
        }
    }

    /// inputs (+ targs) for a sequence-to-sequence task.
    pub fn generation(&self, sources: &[SentenceSample], targets: Option<&[SentenceSample]>) -> Batch<B> {
        let targs = targets.map(|t| {
            let rows: Vec<Vec<usize>> = t.iter().map(|s| s.words.clone()).collect();
            let seq_len = rows.iter().map(Vec::len).max().unwrap_or(0).max(1);
            self.id_matrix(&rows, seq_len)
        });
        Batch {
            inputs: Some(self.tokens(sources)),
            targs,
            ..Batch::default()
        }
    }

    fn labels(&self, labels: &[f32]) -> Tensor<B, 1> {
        Tensor::<B, 1>::from_floats(labels, &self.device)
    }

    /// Right-pad rows of ids with 0 into [rows, seq_len].
    fn id_matrix(&self, rows: &[Vec<usize>], seq_len: usize) -> Tensor<B, 2, Int> {
        let flat: Vec<i32> = rows
            .iter()
            .flat_map(|row| {
                row.iter()
                    .take(seq_len)
                    .map(|&id| id as i32)
                    .chain(std::iter::repeat(0))
                    .take(seq_len)
            })
            .collect();
        Tensor::<B, 1, Int>::from_ints(flat.as_slice(), &self.device).reshape([rows.len(), seq_len])
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn sample(words: &[usize]) -> SentenceSample {
        SentenceSample {
            words: words.to_vec(),
            chars: words.iter().map(|&w| vec![w; w % 3 + 1]).collect(),
            text:  words.iter().map(|w| format!("w{w}")).collect(),
        }
    }

    fn ints<const D: usize>(t: Tensor<TestBackend, D, Int>) -> Vec<i64> {
        t.into_data().convert::<i64>().to_vec::<i64>().unwrap()
    }

    #[test]
    fn test_tokens_pad_to_longest_sentence() {
        let batcher = SentenceBatcher::<TestBackend>::new(Default::default());
        let input = batcher.tokens(&[sample(&[4, 5, 6]), sample(&[7])]);

        let words = input.words.clone().unwrap();
        assert_eq!(words.dims(), [2, 3]);
        assert_eq!(ints(words), vec![4, 5, 6, 7, 0, 0]);

        let mask = input.padding_mask(0).unwrap().int();
        assert_eq!(ints(mask), vec![1, 1, 1, 1, 0, 0]);
    }

    #[test]
    fn test_char_rows_cover_the_widest_filter() {
        let mut cfg = ExperimentConfig::default();
        cfg.char_embs = true;
        cfg.char_filter_sizes = "2,5".to_string();
        let batcher = SentenceBatcher::<TestBackend>::from_config(&cfg, Default::default()).unwrap();

        let input = batcher.tokens(&[sample(&[2, 3])]);
        assert_eq!(input.chars.unwrap().dims(), [1, 2, 5]);
        assert!(input.elmo.is_none());
    }

    #[test]
    fn test_mask_from_contextual_ids_without_words() {
        let mut cfg = ExperimentConfig::default();
        cfg.word_embs = WordEmbs::None;
        cfg.elmo = true;
        let batcher = SentenceBatcher::<TestBackend>::from_config(&cfg, Default::default()).unwrap();

        let input = batcher.tokens(&[sample(&[4, 5]), sample(&[6])]);
        assert!(input.words.is_none());
        assert_eq!(input.dims().unwrap(), [2, 2]);
        assert_eq!(ints(input.padding_mask(0).unwrap().int()), vec![1, 1, 1, 0]);
    }

    #[test]
    fn test_language_model_shifts_both_directions() {
        let batcher = SentenceBatcher::<TestBackend>::new(Default::default());
        let batch = batcher.language_model(&[sample(&[2, 3, 4, 5])]);

        assert_eq!(ints(batch.input.unwrap().words.unwrap()), vec![2, 3, 4]);
        assert_eq!(ints(batch.targs.unwrap()), vec![3, 4, 5]);
        assert_eq!(ints(batch.input_bwd.unwrap().words.unwrap()), vec![5, 4, 3]);
        assert_eq!(ints(batch.targs_b.unwrap()), vec![4, 3, 2]);
    }

    #[test]
    fn test_single_and_pair_batches_carry_labels() {
        let batcher = SentenceBatcher::<TestBackend>::new(Default::default());
        let single = batcher.single(&[sample(&[2]), sample(&[3])], Some(&[0.0, 1.0]));
        assert_eq!(single.labels.unwrap().dims(), [2]);
        assert!(single.input2.is_none());

        let pair = batcher.pair(&[sample(&[2])], &[sample(&[3, 4])], None);
        assert_eq!(pair.input2.unwrap().words.unwrap().dims(), [1, 2]);
        assert!(pair.labels.is_none());
    }
}
