//! Codebook store.
//!
//! Holds the validated set of [`CodebookEntry`] values for a batch. Entries
//! keep their declaration order, which the context selector uses as its
//! tie-breaker.

use std::collections::HashMap;

use crate::error::{CodingError, Result};
use crate::models::CodebookEntry;

/// Validated, immutable codebook.
#[derive(Debug, Clone)]
pub struct Codebook {
    entries: Vec<CodebookEntry>,
    by_id: HashMap<String, usize>,
    /// Lowercased id → index, for tolerant matching of model output.
    by_folded_id: HashMap<String, usize>,
}

impl Codebook {
    /// Validate and index a list of entries.
    ///
    /// # Errors
    ///
    /// [`CodingError::Schema`] if an entry has a blank `code_id`, or if two
    /// entries share a `code_id` (exactly or ignoring case, since the parser
    /// matches case-insensitively).
    pub fn load(entries: Vec<CodebookEntry>) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(entries.len());
        let mut by_folded_id = HashMap::with_capacity(entries.len());

        for (idx, entry) in entries.iter().enumerate() {
            let id = entry.code_id.trim();
            if id.is_empty() {
                return Err(CodingError::Schema(format!(
                    "codebook entry {} is missing a code_id",
                    idx + 1
                )));
            }
            if id != entry.code_id {
                return Err(CodingError::Schema(format!(
                    "code_id '{}' has surrounding whitespace",
                    entry.code_id
                )));
            }
            if by_id.insert(id.to_string(), idx).is_some() {
                return Err(CodingError::Schema(format!("duplicate code_id '{}'", id)));
            }
            if by_folded_id.insert(id.to_lowercase(), idx).is_some() {
                return Err(CodingError::Schema(format!(
                    "code_id '{}' differs from another id only by case",
                    id
                )));
            }
        }

        Ok(Self {
            entries,
            by_id,
            by_folded_id,
        })
    }

    pub fn lookup(&self, code_id: &str) -> Option<&CodebookEntry> {
        self.by_id.get(code_id).map(|&i| &self.entries[i])
    }

    /// Map a model-emitted id to the codebook's spelling of it.
    pub fn resolve(&self, raw: &str) -> Option<&str> {
        let raw = raw.trim();
        self.lookup(raw)
            .or_else(|| {
                self.by_folded_id
                    .get(&raw.to_lowercase())
                    .map(|&i| &self.entries[i])
            })
            .map(|e| e.code_id.as_str())
    }

    pub fn contains(&self, code_id: &str) -> bool {
        self.by_id.contains_key(code_id)
    }

    /// Entries in declaration order.
    pub fn entries(&self) -> &[CodebookEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
