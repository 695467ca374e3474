//! Context selector: chooses which codebook entries ground a prompt.
//!
//! # Policy
//!
//! 1. If the codebook has at most `max_full_codebook` entries, all of them
//!    are used, in declaration order.
//! 2. Otherwise each entry is scored by the number of distinct response
//!    tokens that also appear in the entry's id, label, description, or
//!    examples.
//! 3. Entries are sorted by score (desc) with a stable sort, so ties keep
//!    declaration order, and the first `k` are kept.
//!
//! The same response, codebook, and parameters always yield the same
//! selection.

use std::collections::BTreeSet;

use crate::codebook::Codebook;
use crate::error::{CodingError, Result};
use crate::models::{CodebookEntry, PromptContext, ResponseRecord, SelectionStrategy};

/// Words that carry no signal for category matching.
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "have", "his", "how", "its", "may", "who", "did", "get", "got",
    "him", "she", "too", "use", "that", "this", "with", "from", "they", "them", "then", "than",
    "there", "their", "what", "when", "where", "which", "while", "will", "would", "could",
    "should", "been", "being", "were", "into", "also", "some", "very", "just", "about", "more",
    "most", "such", "only", "other", "over", "each", "does", "doing",
];

/// Shortest token that participates in overlap scoring.
const MIN_TOKEN_CHARS: usize = 3;

/// Selection tuning, decoupled from application config.
#[derive(Debug, Clone, Copy)]
pub struct SelectionParams {
    /// Number of entries kept when ranking.
    pub k: usize,
    /// Codebooks up to this size are included whole.
    pub max_full_codebook: usize,
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self {
            k: 8,
            max_full_codebook: 40,
        }
    }
}

/// Select grounding context for `response`.
///
/// # Errors
///
/// [`CodingError::Config`] if the codebook is empty or `k` is zero; either
/// would produce a prompt with no candidate codes.
pub fn select(
    response: &ResponseRecord,
    codebook: &Codebook,
    params: &SelectionParams,
) -> Result<PromptContext> {
    if codebook.is_empty() {
        return Err(CodingError::Config(
            "codebook is empty; at least one entry is required".to_string(),
        ));
    }
    if params.k == 0 {
        return Err(CodingError::Config(
            "context_selection.k must be >= 1".to_string(),
        ));
    }

    if codebook.len() <= params.max_full_codebook {
        return Ok(PromptContext {
            response_id: response.response_id.clone(),
            entries: codebook.entries().to_vec(),
            strategy: SelectionStrategy::Full,
        });
    }

    let response_tokens = tokenize(&response.raw_text);

    let mut scored: Vec<(usize, &CodebookEntry)> = codebook
        .entries()
        .iter()
        .map(|entry| (overlap(&response_tokens, entry), entry))
        .collect();

    // Stable: equal scores keep declaration order.
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    let entries = scored
        .into_iter()
        .take(params.k)
        .map(|(_, e)| e.clone())
        .collect();

    Ok(PromptContext {
        response_id: response.response_id.clone(),
        entries,
        strategy: SelectionStrategy::Ranked,
    })
}

fn overlap(response_tokens: &BTreeSet<String>, entry: &CodebookEntry) -> usize {
    if response_tokens.is_empty() {
        return 0;
    }
    let mut entry_tokens = tokenize(&entry.code_id);
    entry_tokens.extend(tokenize(&entry.label));
    entry_tokens.extend(tokenize(&entry.description));
    for ex in &entry.examples {
        entry_tokens.extend(tokenize(ex));
    }
    response_tokens.intersection(&entry_tokens).count()
}

/// Lowercased alphanumeric words, minus stop words and short tokens.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_TOKEN_CHARS)
        .map(|w| w.to_lowercase())
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}
