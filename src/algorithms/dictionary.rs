use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sparse token-id → frequency vector, sorted by token id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BagOfWords(pub Vec<(usize, u32)>);

impl BagOfWords {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn total_count(&self) -> u64 {
        self.0.iter().map(|(_, count)| *count as u64).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(usize, u32)> {
        self.0.iter()
    }
}

/// Token ↔ id mapping built over a whole corpus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dictionary {
    token2id: HashMap<String, usize>,
    id2token: Vec<String>,
    /// Number of documents containing each token.
    doc_freqs: Vec<usize>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids are assigned in first-seen order so identical corpora get identical ids.
    pub fn from_documents<S: AsRef<str>>(documents: &[Vec<S>]) -> Self {
        let mut dictionary = Self::new();
        for document in documents {
            dictionary.add_document(document);
        }
        dictionary
    }

    pub fn add_document<S: AsRef<str>>(&mut self, tokens: &[S]) {
        let mut seen = std::collections::HashSet::new();
        for token in tokens {
            let token = token.as_ref();
            let id = match self.token2id.get(token) {
                Some(id) => *id,
                None => {
                    let id = self.id2token.len();
                    self.token2id.insert(token.to_string(), id);
                    self.id2token.push(token.to_string());
                    self.doc_freqs.push(0);
                    id
                }
            };
            if seen.insert(id) {
                self.doc_freqs[id] += 1;
            }
        }
    }

    /// Tokens missing from the dictionary are ignored.
    pub fn doc2bow<S: AsRef<str>>(&self, tokens: &[S]) -> BagOfWords {
        let mut counts: HashMap<usize, u32> = HashMap::new();
        for token in tokens {
            if let Some(id) = self.token2id.get(token.as_ref()) {
                *counts.entry(*id).or_insert(0) += 1;
            }
        }

        let mut bow: Vec<(usize, u32)> = counts.into_iter().collect();
        bow.sort_unstable_by_key(|(id, _)| *id);
        BagOfWords(bow)
    }

    pub fn len(&self) -> usize {
        self.id2token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id2token.is_empty()
    }

    pub fn token(&self, id: usize) -> Option<&str> {
        self.id2token.get(id).map(String::as_str)
    }

    pub fn id(&self, token: &str) -> Option<usize> {
        self.token2id.get(token).copied()
    }

    pub fn doc_freq(&self, id: usize) -> usize {
        self.doc_freqs.get(id).copied().unwrap_or(0)
    }
}
