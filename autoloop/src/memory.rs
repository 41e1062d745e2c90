//! Long-term memory contract used by the loop: put text, retrieve by similarity.

use std::collections::HashMap;

use anyhow::Result;

pub trait MemoryStore {
    fn put(&mut self, text: &str) -> Result<()>;

    /// Up to `k` stored texts most similar to `query`, best first.
    fn retrieve(&self, query: &str, k: usize) -> Result<Vec<String>>;
}

/// Process-local store ranking entries by bag-of-words cosine similarity.
///
/// Entries with no shared terms are never returned. Equal scores keep
/// insertion order.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Vec<Entry>,
}

#[derive(Debug)]
struct Entry {
    text: String,
    terms: HashMap<String, f64>,
    norm: f64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MemoryStore for InMemoryStore {
    fn put(&mut self, text: &str) -> Result<()> {
        let terms = term_frequencies(text);
        if terms.is_empty() {
            return Ok(());
        }
        let norm = norm(&terms);
        self.entries.push(Entry {
            text: text.to_string(),
            terms,
            norm,
        });
        Ok(())
    }

    fn retrieve(&self, query: &str, k: usize) -> Result<Vec<String>> {
        let query_terms = term_frequencies(query);
        if k == 0 || query_terms.is_empty() {
            return Ok(Vec::new());
        }
        let query_norm = norm(&query_terms);

        let mut scored: Vec<(f64, &Entry)> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let dot: f64 = query_terms
                    .iter()
                    .filter_map(|(term, weight)| entry.terms.get(term).map(|w| w * weight))
                    .sum();
                (dot > 0.0).then(|| (dot / (entry.norm * query_norm), entry))
            })
            .collect();
        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, entry)| entry.text.clone())
            .collect())
    }
}

fn term_frequencies(text: &str) -> HashMap<String, f64> {
    let mut terms = HashMap::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        *terms.entry(word.to_lowercase()).or_insert(0.0) += 1.0;
    }
    terms
}

fn norm(terms: &HashMap<String, f64>) -> f64 {
    terms.values().map(|w| w * w).sum::<f64>().sqrt()
}
