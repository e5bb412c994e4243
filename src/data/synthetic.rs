use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::data::sample::SentenceSample;
use crate::domain::vocab::{Vocabulary, CHARS, TOKENS};

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Random sentences and labels for probing a freshly built model.
///
/// Seeded, so a probe run is reproducible.
pub struct SyntheticCorpus {
    rng: StdRng,
}

impl SyntheticCorpus {
    pub fn new(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    /// A vocabulary of `n_words` random lowercase words plus the alphabet.
    pub fn vocabulary(&mut self, n_words: usize) -> Vocabulary {
        let mut vocab = Vocabulary::new();
        while vocab.get_vocab_size(TOKENS) < n_words + 2 {
            let word = self.word();
            vocab.add_token(&word, TOKENS);
        }
        for &c in LETTERS {
            vocab.add_token(&(c as char).to_string(), CHARS);
        }
        vocab
    }

    /// `n` sentences with lengths in `1..=max_len`, drawn from the vocabulary.
    pub fn sentences(&mut self, vocab: &Vocabulary, n: usize, max_len: usize) -> Vec<SentenceSample> {
        self.sentences_between(vocab, n, 1, max_len)
    }

    /// Like `sentences`, with at least `min_len` words each.
    pub fn sentences_between(
        &mut self,
        vocab:   &Vocabulary,
        n:       usize,
        min_len: usize,
        max_len: usize,
    ) -> Vec<SentenceSample> {
        let n_words = vocab.get_vocab_size(TOKENS);
        let min_len = min_len.max(1);
        (0..n)
            .map(|_| {
                let len = self.rng.gen_range(min_len..=max_len.max(min_len));
                let tokens: Vec<String> = (0..len)
                    .map(|_| {
                        // ids 0 and 1 are the reserved entries
                        let id = self.rng.gen_range(2..n_words.max(3));
                        vocab.get_token(id, TOKENS).map_or_else(|| self.word(), str::to_string)
                    })
                    .collect();
                SentenceSample::from_tokens(&tokens, vocab)
            })
            .collect()
    }

    /// Class ids in `0..n_classes`, as floats.
    pub fn class_labels(&mut self, n: usize, n_classes: usize) -> Vec<f32> {
        (0..n).map(|_| self.rng.gen_range(0..n_classes.max(1)) as f32).collect()
    }

    /// Similarity-style scores in `[0, 5)`.
    pub fn scores(&mut self, n: usize) -> Vec<f32> {
        (0..n).map(|_| self.rng.gen_range(0.0..5.0)).collect()
    }

    fn word(&mut self) -> String {
        let len = self.rng.gen_range(2..8);
        (0..len)
            .map(|_| LETTERS[self.rng.gen_range(0..LETTERS.len())] as char)
            .collect()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_size() {
        let vocab = SyntheticCorpus::new(7).vocabulary(40);
        assert_eq!(vocab.get_vocab_size(TOKENS), 42);
        assert_eq!(vocab.get_vocab_size(CHARS), 28);
    }

    #[test]
    fn test_sentences_use_known_words() {
        let mut corpus = SyntheticCorpus::new(7);
        let vocab = corpus.vocabulary(20);
        let sents = corpus.sentences(&vocab, 5, 6);

        assert_eq!(sents.len(), 5);
        for s in &sents {
            assert!((1..=6).contains(&s.len()));
            assert!(s.words.iter().all(|&id| id >= 2));
        }
    }

    #[test]
    fn test_minimum_sentence_length() {
        let mut corpus = SyntheticCorpus::new(11);
        let vocab = corpus.vocabulary(10);
        assert!(corpus.sentences_between(&vocab, 20, 3, 4).iter().all(|s| (3..=4).contains(&s.len())));
    }

    #[test]
    fn test_labels_in_range_and_reproducible() {
        let a = SyntheticCorpus::new(3).class_labels(50, 3);
        let b = SyntheticCorpus::new(3).class_labels(50, 3);
        assert_eq!(a, b);
        assert!(a.iter().all(|&l| (0.0..3.0).contains(&l)));
    }
}
