use serde::{Deserialize, Serialize};

use crate::domain::vocab::{Vocabulary, CHARS, TOKENS};

/// Longest word the contextual character mapper keeps (incl. BOW/EOW markers).
pub const ELMO_MAX_CHARS: usize = 50;

// Byte-level markers, before the +1 shift that frees id 0 for padding
const BEGINNING_OF_WORD: usize = 258;
const END_OF_WORD: usize = 259;
const PADDING_CHAR: usize = 260;

/// One tokenised sentence: word ids, per-word char ids and the raw tokens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentenceSample {
    pub words: Vec<usize>,
    pub chars: Vec<Vec<usize>>,
    pub text:  Vec<String>,
}

impl SentenceSample {
    /// Index `tokens` against the "tokens" and "chars" namespaces.
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S], vocab: &Vocabulary) -> Self {
        let words = tokens
            .iter()
            .map(|t| vocab.get_token_index(t.as_ref(), TOKENS))
            .collect();
        let chars = tokens
            .iter()
            .map(|t| {
                t.as_ref()
                    .chars()
                    .map(|c| vocab.get_token_index(c.encode_utf8(&mut [0; 4]), CHARS))
                    .collect()
            })
            .collect();
        let text = tokens.iter().map(|t| t.as_ref().to_string()).collect();
        Self { words, chars, text }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// The same sentence with its tokens in reverse order.
    pub fn reversed(&self) -> Self {
        let mut out = self.clone();
        out.words.reverse();
        out.chars.reverse();
        out.text.reverse();
        out
    }

    /// Tokens `range` of the sentence as a new sample.
    pub fn slice(&self, range: std::ops::Range<usize>) -> Self {
        let clamp = |len: usize| range.start.min(len)..range.end.min(len);
        Self {
            words: self.words[clamp(self.words.len())].to_vec(),
            chars: self.chars[clamp(self.chars.len())].to_vec(),
            text:  self.text[clamp(self.text.len())].to_vec(),
        }
    }
}

/// Byte-level character ids of one word for the contextual embedder.
///
/// Layout: BOW, up to 48 UTF-8 bytes, EOW, then padding chars, every id
/// shifted by one so that 0 marks a padded (non-existent) token.
pub fn elmo_char_ids(word: &str) -> [usize; ELMO_MAX_CHARS] {
    let mut ids = [PADDING_CHAR; ELMO_MAX_CHARS];
    ids[0] = BEGINNING_OF_WORD;

    let bytes = word.as_bytes();
    let kept = bytes.len().min(ELMO_MAX_CHARS - 2);
    for (slot, &b) in ids[1..=kept].iter_mut().zip(bytes) {
        *slot = b as usize;
    }
    ids[kept + 1] = END_OF_WORD;

    ids.map(|id| id + 1)
}
