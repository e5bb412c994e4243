// ============================================================
// Layer 3 — Vocabulary
// ============================================================
// Maps token strings to integer ids, separately per namespace:
//
//   "tokens" — word ids consumed by the word embedder and the
//              language-model / decoder output projections
//   "chars"  — character ids consumed by the char CNN
//
// Every namespace starts with two reserved entries:
//   id 0 → @@PADDING@@   (the zero-vector / ignored index)
//   id 1 → @@UNKNOWN@@   (out-of-vocabulary fallback)
//
// The model builders only READ the vocabulary. Building it
// from a corpus is the job of whoever prepares the data; here
// we only offer constructors from explicit token lists and
// from a JSON file of the form:
//   { "tokens": ["the", "cat", ...], "chars": ["a", "b", ...] }

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};

use crate::domain::error::ModelResult;

pub const PADDING_TOKEN: &str = "@@PADDING@@";
pub const OOV_TOKEN: &str = "@@UNKNOWN@@";

/// Word namespace
pub const TOKENS: &str = "tokens";
/// Character namespace
pub const CHARS: &str = "chars";

const PADDING_INDEX: usize = 0;
const OOV_INDEX: usize = 1;

#[derive(Debug, Clone)]
struct Namespace {
    index:  HashMap<String, usize>,
    tokens: Vec<String>,
}

impl Namespace {
    fn new() -> Self {
        let mut ns = Self { index: HashMap::new(), tokens: Vec::new() };
        ns.add(PADDING_TOKEN);
        ns.add(OOV_TOKEN);
        ns
    }

    fn add(&mut self, token: &str) -> usize {
        if let Some(&id) = self.index.get(token) {
            return id;
        }
        let id = self.tokens.len();
        self.index.insert(token.to_string(), id);
        self.tokens.push(token.to_string());
        id
    }
}

/// Namespaced token ↔ id mapping.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    namespaces: BTreeMap<String, Namespace>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from explicit word and character lists.
    /// Duplicates are ignored; order of first appearance decides ids.
    pub fn from_tokens<W, C>(words: W, chars: C) -> Self
    where
        W: IntoIterator,
        W::Item: AsRef<str>,
        C: IntoIterator,
        C::Item: AsRef<str>,
    {
        let mut vocab = Self::new();
        for w in words {
            vocab.add_token(w.as_ref(), TOKENS);
        }
        for c in chars {
            vocab.add_token(c.as_ref(), CHARS);
        }
        vocab
    }

    /// Load `{ "<namespace>": [tokens...] }` from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> ModelResult<Self> {
        let json = fs::read_to_string(path.as_ref())?;
        let raw: BTreeMap<String, Vec<String>> = serde_json::from_str(&json)?;

        let mut vocab = Self::new();
        for (namespace, tokens) in &raw {
            for token in tokens {
                vocab.add_token(token, namespace);
            }
        }
        tracing::debug!(
            "Loaded vocabulary from '{}': {} tokens, {} chars",
            path.as_ref().display(),
            vocab.get_vocab_size(TOKENS),
            vocab.get_vocab_size(CHARS),
        );
        Ok(vocab)
    }

    /// Add a token to a namespace, returning its id.
    pub fn add_token(&mut self, token: &str, namespace: &str) -> usize {
        self.namespaces
            .entry(namespace.to_string())
            .or_insert_with(Namespace::new)
            .add(token)
    }

    /// Number of entries in a namespace, reserved ids included.
    /// An unseen namespace still has its two reserved entries.
    pub fn get_vocab_size(&self, namespace: &str) -> usize {
        self.namespaces
            .get(namespace)
            .map(|ns| ns.tokens.len())
            .unwrap_or(2)
    }

    /// Id of a token, or the unknown id when absent.
    pub fn get_token_index(&self, token: &str, namespace: &str) -> usize {
        match token {
            PADDING_TOKEN => PADDING_INDEX,
            OOV_TOKEN => OOV_INDEX,
            _ => self
                .namespaces
                .get(namespace)
                .and_then(|ns| ns.index.get(token).copied())
                .unwrap_or(OOV_INDEX),
        }
    }

    /// Token string for an id.
    pub fn get_token(&self, index: usize, namespace: &str) -> Option<&str> {
        self.namespaces
            .get(namespace)
            .and_then(|ns| ns.tokens.get(index))
            .map(String::as_str)
    }

    /// Id of the padding token (identical across namespaces).
    pub fn padding_index(&self) -> usize {
        PADDING_INDEX
    }

    /// Id of the unknown token (identical across namespaces).
    pub fn oov_index(&self) -> usize {
        OOV_INDEX
    }
}
