//! Prompt builder.
//!
//! [`build`] is a pure function of (response, context, instructions): the
//! same inputs always render byte-identical text, which is what makes a
//! recorded prompt reproducible from the audit log. [`prompt_hash`] gives
//! the SHA-256 fingerprint stored next to each prompt.
//!
//! # Answer Format
//!
//! The model is told to answer with a single line:
//!
//! ```text
//! codes: BUG-UI, LOGIN; evidence: "crashes when I log in"; ambiguous: no; rationale: crash on login
//! codes: NONE; ambiguous: no; rationale: off-topic
//! ```
//!
//! which is what [`crate::parse`] recognizes.

use sha2::{Digest, Sha256};

use crate::models::{PromptContext, ResponseRecord};

/// Token the model uses for "no code applies".
pub const NO_CODE_TOKEN: &str = "NONE";

const DEFAULT_PREAMBLE: &str = "You are a meticulous qualitative coding assistant for an academic \
study. Your job is to assign zero or more codes from a fixed codebook to a survey response.";

/// Coding instructions rendered at the top of every prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instructions {
    pub preamble: String,
}

impl Default for Instructions {
    fn default() -> Self {
        Self {
            preamble: DEFAULT_PREAMBLE.to_string(),
        }
    }
}

impl Instructions {
    pub fn new(preamble: impl Into<String>) -> Self {
        Self {
            preamble: preamble.into(),
        }
    }
}

/// Render the prompt for one response.
pub fn build(response: &ResponseRecord, context: &PromptContext, instructions: &Instructions) -> String {
    let mut out = String::new();

    out.push_str(instructions.preamble.trim());
    out.push_str("\n\n");

    out.push_str("Rules:\n");
    out.push_str("1. Choose codes ONLY from the CANDIDATE CODES section. Do not invent codes.\n");
    out.push_str("2. A response may receive more than one code when it expresses distinct ideas.\n");
    out.push_str(&format!(
        "3. If no code reasonably applies, answer with `codes: {}`. This is a valid answer.\n",
        NO_CODE_TOKEN
    ));
    out.push_str("4. Quote the shortest direct span of the response that supports your codes as evidence.\n");
    out.push_str(
        "5. If the best code is not obvious, choose the closest match and set `ambiguous: yes`.\n",
    );
    out.push_str("6. Keep the rationale to one short sentence grounded in the response text.\n\n");

    out.push_str("--- CANDIDATE CODES ---\n");
    for entry in &context.entries {
        out.push_str(&format!("- id: {}\n", entry.code_id));
        out.push_str(&format!("  label: {}\n", one_line(&entry.label)));
        out.push_str(&format!("  description: {}\n", one_line(&entry.description)));
        if !entry.examples.is_empty() {
            out.push_str("  examples:\n");
            for ex in &entry.examples {
                out.push_str(&format!("    - \"{}\"\n", one_line(ex)));
            }
        }
    }
    out.push('\n');

    out.push_str("--- ANSWER FORMAT ---\n");
    out.push_str("Reply with exactly one line and nothing else:\n");
    out.push_str(
        "codes: <code_id>, <code_id>; evidence: \"<quote>\"; ambiguous: <yes|no>; rationale: <one sentence>\n",
    );
    out.push_str("If no code applies, reply:\n");
    out.push_str(&format!(
        "codes: {}; ambiguous: no; rationale: <one sentence>\n\n",
        NO_CODE_TOKEN
    ));

    out.push_str("--- RESPONSE TO CODE ---\n");
    out.push_str("<<<\n");
    out.push_str(response.raw_text.trim());
    out.push_str("\n>>>\n");

    out
}

/// SHA-256 of the prompt text, hex encoded.
pub fn prompt_hash(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Collapse internal newlines so one field stays on one prompt line.
fn one_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
