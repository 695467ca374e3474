//! Response parser: raw model text → [`CodingAssignment`].
//!
//! The parser is a strict schema matcher that returns a tagged
//! [`ParseOutcome`] instead of an error, so an unrecognizable answer is
//! data that flows into the audit trail and error report.
//!
//! # Accepted Schemas
//!
//! | Schema | Example |
//! |--------|---------|
//! | key-value | `codes: BUG-UI; evidence: "it froze"; ambiguous: no; rationale: crash` |
//! | JSON object | `{"codes": ["BUG-UI"], "evidence": ["it froze"], "rationale": "crash"}` |
//! | JSON list | `[{"label": "BUG-UI", "span_evidence": "it froze", "ambiguous": false}]` |
//!
//! Key names are case-insensitive and `=` may replace `:`. In the key-value
//! schema a key only counts at the start of a line or right after `;`, so a
//! sentence such as "no suitable code: too vague" is not an answer. A
//! surrounding Markdown code fence is ignored. `NONE`, `NC`, `[]`, or an
//! empty list mean "no code applies", which is a successful parse with no
//! codes.
//!
//! Ids missing from the codebook are dropped with a warning. The remaining
//! ids are canonicalized to codebook spelling and deduplicated in order.
//! An answer whose every listed id is unknown is unparseable, never
//! "no code".

use serde_json::{Map, Value};

use crate::codebook::Codebook;
use crate::models::{CodingAssignment, ParseStatus};

/// Tokens that mean "no code applies".
const NO_CODE_TOKENS: &[&str] = &["none", "nc", "n/a", "no code", "no_code", "[]"];

/// Keys of the key-value schema.
const KV_KEYS: &[&str] = &["codes", "evidence", "span_evidence", "ambiguous", "rationale"];

/// Tagged parse result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// The answer followed a known schema. `code_ids` may be empty.
    Parsed(CodingAssignment),
    /// No usable answer. The assignment has no codes and carries the raw
    /// text as its rationale.
    Unparseable {
        assignment: CodingAssignment,
        reason: String,
    },
}

impl ParseOutcome {
    pub fn into_assignment(self) -> CodingAssignment {
        match self {
            ParseOutcome::Parsed(a) => a,
            ParseOutcome::Unparseable { assignment, .. } => assignment,
        }
    }
}

/// Raw fields pulled out of a recognized schema, before validation.
#[derive(Default)]
struct RawAnswer {
    codes: Vec<String>,
    rationale: String,
    evidence: Vec<String>,
    ambiguous: bool,
}

/// Parse a model answer against the codebook.
pub fn parse(response_id: &str, raw_text: &str, codebook: &Codebook) -> ParseOutcome {
    let body = strip_code_fence(raw_text.trim());

    let raw = match parse_json(body) {
        Some(answer) => Some(answer),
        None => parse_key_value(body),
    };

    let Some(raw) = raw else {
        return unparseable(
            response_id,
            raw_text,
            Vec::new(),
            "no recognizable answer schema in model output".to_string(),
        );
    };

    let mut code_ids: Vec<String> = Vec::new();
    let mut unknown: Vec<String> = Vec::new();

    for token in raw.codes {
        if is_no_code(&token) {
            continue;
        }
        match codebook.resolve(&token) {
            Some(id) => {
                if !code_ids.iter().any(|c| c == id) {
                    code_ids.push(id.to_string());
                }
            }
            None => unknown.push(token),
        }
    }

    let warnings: Vec<String> = unknown
        .iter()
        .map(|t| format!("dropped unknown code '{}'", t))
        .collect();

    if code_ids.is_empty() && !unknown.is_empty() {
        return unparseable(
            response_id,
            raw_text,
            warnings,
            format!("no listed code is in the codebook: {}", unknown.join(", ")),
        );
    }

    ParseOutcome::Parsed(CodingAssignment {
        response_id: response_id.to_string(),
        code_ids,
        rationale: raw.rationale,
        evidence: raw.evidence,
        ambiguous: raw.ambiguous,
        parse_status: ParseStatus::Ok,
        warnings,
    })
}

fn unparseable(response_id: &str, raw_text: &str, warnings: Vec<String>, reason: String) -> ParseOutcome {
    let mut assignment = CodingAssignment::uncoded(response_id, raw_text, ParseStatus::Unparseable);
    assignment.warnings = warnings;
    ParseOutcome::Unparseable { assignment, reason }
}

fn is_no_code(token: &str) -> bool {
    let t = token.trim().to_lowercase();
    NO_CODE_TOKENS.contains(&t.as_str())
}

/// Return the inside of the first fenced block, or the text unchanged.
fn strip_code_fence(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let after_open = &text[open + 3..];
    // Skip the info string (e.g. `json`) up to the end of the line.
    let content_start = after_open.find('\n').map(|i| i + 1).unwrap_or(after_open.len());
    let content = &after_open[content_start..];
    match content.find("```") {
        Some(close) => content[..close].trim(),
        None => text,
    }
}

fn parse_json(body: &str) -> Option<RawAnswer> {
    if !(body.starts_with('{') || body.starts_with('[')) {
        return None;
    }
    let value: Value = serde_json::from_str(body).ok()?;

    match value {
        Value::Object(map) => {
            let codes = json_field(&map, &["codes", "code"])?;
            let codes = match codes {
                Value::Array(items) => items.iter().filter_map(json_code).collect(),
                Value::String(s) => split_codes(s),
                Value::Null => Vec::new(),
                _ => return None,
            };
            let rationale = json_field(&map, &["rationale"])
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string();
            let mut evidence = Vec::new();
            if let Some(v) = json_field(&map, &["evidence", "span_evidence"]) {
                push_evidence(&mut evidence, v);
            }
            let ambiguous = json_field(&map, &["ambiguous"]).is_some_and(json_flag);
            Some(RawAnswer {
                codes,
                rationale,
                evidence,
                ambiguous,
            })
        }
        Value::Array(items) => {
            let mut raw = RawAnswer::default();
            let mut rationales = Vec::new();
            for item in &items {
                match item {
                    Value::String(s) => raw.codes.push(s.clone()),
                    Value::Object(obj) => {
                        let code = json_field(obj, &["label", "code"]).and_then(Value::as_str)?;
                        raw.codes.push(code.to_string());
                        if let Some(r) = json_field(obj, &["rationale"]).and_then(Value::as_str) {
                            let r = r.trim();
                            if !r.is_empty() {
                                rationales.push(r.to_string());
                            }
                        }
                        if let Some(v) = json_field(obj, &["span_evidence", "evidence"]) {
                            push_evidence(&mut raw.evidence, v);
                        }
                        raw.ambiguous |= json_field(obj, &["ambiguous"]).is_some_and(json_flag);
                    }
                    _ => return None,
                }
            }
            raw.rationale = rationales.join(" ");
            Some(raw)
        }
        _ => None,
    }
}

/// First of `names` present in `map`, ASCII case-insensitive.
fn json_field<'a>(map: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    })
}

fn json_code(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => json_field(obj, &["code", "label"])
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn json_flag(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::String(s) => parse_flag(s),
        _ => false,
    }
}

fn push_evidence(out: &mut Vec<String>, v: &Value) {
    match v {
        Value::String(s) => push_quote(out, s),
        Value::Array(items) => {
            for item in items.iter().filter_map(Value::as_str) {
                push_quote(out, item);
            }
        }
        _ => {}
    }
}

fn push_quote(out: &mut Vec<String>, quote: &str) {
    let quote = quote.trim();
    if !quote.is_empty() && !out.iter().any(|q| q == quote) {
        out.push(quote.to_string());
    }
}

fn parse_flag(s: &str) -> bool {
    matches!(
        s.trim().trim_matches('"').to_ascii_lowercase().as_str(),
        "yes" | "y" | "true" | "1"
    )
}

/// A `key:` or `key =` occurrence in the text.
struct KeyMatch {
    /// Byte offset where the key name starts.
    start: usize,
    /// Byte offset just past the separator.
    value_start: usize,
}

/// Find the first occurrence of `name` (ASCII case-insensitive) that sits at
/// the start of a line or after `;` and is followed by `:` or `=`.
fn find_key(text: &str, name: &str) -> Option<KeyMatch> {
    let folded = text.to_ascii_lowercase();
    let bytes = folded.as_bytes();

    let mut from = 0;
    while let Some(pos) = folded[from..].find(name) {
        let start = from + pos;
        let end = start + name.len();
        from = end;

        if !key_anchored(bytes, start) {
            continue;
        }
        let mut i = end;
        while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
            i += 1;
        }
        if i < bytes.len() && (bytes[i] == b':' || bytes[i] == b'=') {
            return Some(KeyMatch {
                start,
                value_start: i + 1,
            });
        }
    }
    None
}

/// Only whitespace, Markdown emphasis, or a list bullet may precede a key on
/// its line, unless a `;` separates it from the previous field.
fn key_anchored(bytes: &[u8], start: usize) -> bool {
    let mut i = start;
    while i > 0 {
        match bytes[i - 1] {
            b'\n' | b';' => return true,
            b' ' | b'\t' | b'\r' | b'`' | b'*' | b'-' | b'>' => i -= 1,
            _ => return false,
        }
    }
    true
}

fn parse_key_value(body: &str) -> Option<RawAnswer> {
    let mut keys: Vec<(&str, KeyMatch)> = KV_KEYS
        .iter()
        .filter_map(|name| find_key(body, name).map(|m| (*name, m)))
        .collect();
    if !keys.iter().any(|(name, _)| *name == "codes") {
        return None;
    }
    keys.sort_by_key(|(_, m)| m.start);

    let mut raw = RawAnswer::default();
    for (i, (name, key)) in keys.iter().enumerate() {
        let end = keys.get(i + 1).map(|(_, next)| next.start).unwrap_or(body.len());
        let value = &body[key.value_start..end];
        match *name {
            "codes" => {
                let line = &value[..value.find([';', '\n']).unwrap_or(value.len())];
                raw.codes = split_codes(line);
            }
            "evidence" | "span_evidence" => push_quote(&mut raw.evidence, &clean_value(value)),
            "ambiguous" => raw.ambiguous = parse_flag(&clean_value(value)),
            _ => raw.rationale = clean_value(value),
        }
    }
    Some(raw)
}

fn clean_value(value: &str) -> String {
    value
        .trim()
        .trim_end_matches(';')
        .trim()
        .trim_matches('"')
        .trim()
        .to_string()
}

fn split_codes(value: &str) -> Vec<String> {
    let value = value.trim();
    if is_no_code(value) {
        return Vec::new();
    }
    let value = value.trim_start_matches('[').trim_end_matches(']');
    value
        .split([',', '|'])
        .map(|t| t.trim().trim_matches(|c| matches!(c, '"' | '\'' | '`' | '*')).trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssignmentCategory, CodebookEntry};

    fn codebook() -> Codebook {
        Codebook::load(vec![
            CodebookEntry::new("BUG-UI", "UI bug report", "Crashes"),
            CodebookEntry::new("LOGIN", "Login problems", "Cannot sign in"),
            CodebookEntry::new("PRICE", "Pricing", "Costs"),
        ])
        .unwrap()
    }

    fn parsed(raw: &str) -> CodingAssignment {
        match parse("r1", raw, &codebook()) {
            ParseOutcome::Parsed(a) => a,
            other => panic!("expected parse, got {:?}", other),
        }
    }

    #[test]
    fn single_code_line() {
        let a = parsed("codes: BUG-UI; rationale: crash report");
        assert_eq!(a.code_ids, vec!["BUG-UI"]);
        assert_eq!(a.rationale, "crash report");
        assert_eq!(a.parse_status, ParseStatus::Ok);
        assert!(a.warnings.is_empty());
    }

    #[test]
    fn explicit_none_is_ok_with_no_codes() {
        let a = parsed("codes: NONE; rationale: off-topic");
        assert!(a.code_ids.is_empty());
        assert_eq!(a.rationale, "off-topic");
        assert_eq!(a.parse_status, ParseStatus::Ok);
    }

    #[test]
    fn tolerates_case_whitespace_and_equals() {
        let a = parsed("  CODES =  bug-ui ,Login ;   Rationale:  two issues  \n");
        assert_eq!(a.code_ids, vec!["BUG-UI", "LOGIN"]);
        assert_eq!(a.rationale, "two issues");
    }

    #[test]
    fn multiline_layout() {
        let a = parsed("Codes: PRICE | LOGIN\nRationale: mentions fees\nand sign-in");
        assert_eq!(a.code_ids, vec!["PRICE", "LOGIN"]);
        assert_eq!(a.rationale, "mentions fees\nand sign-in");
    }

    #[test]
    fn rationale_before_codes() {
        let a = parsed("rationale: crash; codes: BUG-UI");
        assert_eq!(a.code_ids, vec!["BUG-UI"]);
        assert_eq!(a.rationale, "crash");
    }

    #[test]
    fn code_fence_is_ignored() {
        let a = parsed("```\ncodes: `BUG-UI`; rationale: crash\n```");
        assert_eq!(a.code_ids, vec!["BUG-UI"]);
    }

    #[test]
    fn unknown_ids_dropped_with_warning() {
        let a = parsed("codes: BUG-UI, MADE-UP; rationale: r");
        assert_eq!(a.code_ids, vec!["BUG-UI"]);
        assert_eq!(a.warnings, vec!["dropped unknown code 'MADE-UP'"]);
        assert_eq!(a.parse_status, ParseStatus::Ok);
    }

    #[test]
    fn duplicates_collapse_in_order() {
        let a = parsed("codes: LOGIN, bug-ui, LOGIN, BUG-UI; rationale: r");
        assert_eq!(a.code_ids, vec!["LOGIN", "BUG-UI"]);
    }

    #[test]
    fn json_object_schema() {
        let a = parsed(r#"```json
{"codes": ["PRICE", "nope"], "rationale": "too expensive"}
```"#);
        assert_eq!(a.code_ids, vec!["PRICE"]);
        assert_eq!(a.rationale, "too expensive");
        assert_eq!(a.warnings.len(), 1);
    }

    #[test]
    fn json_list_schema() {
        let a = parsed(
            r#"[{"label": "LOGIN", "span_evidence": "can't log in", "rationale": "access"},
               {"label": "BUG-UI", "rationale": "crash"}]"#,
        );
        assert_eq!(a.code_ids, vec!["LOGIN", "BUG-UI"]);
        assert_eq!(a.rationale, "access crash");
        assert_eq!(a.evidence, vec!["can't log in"]);
        assert!(!a.ambiguous);
    }

    #[test]
    fn json_list_ambiguity_from_any_item() {
        let a = parsed(
            r#"[{"label": "PRICE", "span_evidence": "costs a lot", "ambiguous": false},
               {"label": "LOGIN", "span_evidence": "costs a lot", "ambiguous": true}]"#,
        );
        assert!(a.ambiguous);
        assert_eq!(a.evidence, vec!["costs a lot"]);
    }

    #[test]
    fn key_value_evidence_and_ambiguity() {
        let a = parsed(
            "codes: PRICE; evidence: \"way too expensive\"; ambiguous: yes; rationale: cost, maybe value",
        );
        assert_eq!(a.code_ids, vec!["PRICE"]);
        assert_eq!(a.evidence, vec!["way too expensive"]);
        assert!(a.ambiguous);
        assert_eq!(a.rationale, "cost, maybe value");
    }

    #[test]
    fn json_object_evidence_list() {
        let a = parsed(r#"{"codes": ["LOGIN"], "evidence": ["locked out", " "], "ambiguous": "no"}"#);
        assert_eq!(a.evidence, vec!["locked out"]);
        assert!(!a.ambiguous);
    }

    #[test]
    fn bulleted_keys_on_their_own_lines() {
        let a = parsed("Here is my answer.\n- codes: PRICE\n- rationale: fees");
        assert_eq!(a.code_ids, vec!["PRICE"]);
        assert_eq!(a.rationale, "fees");
    }

    #[test]
    fn prose_with_code_colon_is_not_no_code() {
        let outcome = parse(
            "r1",
            "I cannot pick a suitable code: the response is too vague.",
            &codebook(),
        );
        assert!(matches!(outcome, ParseOutcome::Unparseable { .. }));
        let a = outcome.into_assignment();
        assert_eq!(a.parse_status, ParseStatus::Unparseable);
        assert_ne!(a.category(), AssignmentCategory::NoCode);
    }

    #[test]
    fn key_in_the_middle_of_a_sentence_is_ignored() {
        let outcome = parse("r1", "The codes: BUG-UI might apply here", &codebook());
        assert!(matches!(outcome, ParseOutcome::Unparseable { .. }));
    }

    #[test]
    fn only_unknown_ids_is_unparseable() {
        let outcome = parse("r1", "codes: MADE-UP, OTHER; rationale: r", &codebook());
        match &outcome {
            ParseOutcome::Unparseable { reason, assignment } => {
                assert!(reason.contains("MADE-UP, OTHER"), "{reason}");
                assert_eq!(assignment.warnings.len(), 2);
                assert_eq!(assignment.category(), AssignmentCategory::Failed);
            }
            other => panic!("expected unparseable, got {:?}", other),
        }
    }

    #[test]
    fn empty_json_list_is_no_code() {
        let a = parsed("[]");
        assert!(a.code_ids.is_empty());
        assert_eq!(a.parse_status, ParseStatus::Ok);
    }

    #[test]
    fn malformed_text_is_unparseable() {
        let raw = "I think this response is about crashes.";
        let outcome = parse("r9", raw, &codebook());
        assert!(matches!(outcome, ParseOutcome::Unparseable { .. }));
        let a = outcome.into_assignment();
        assert_eq!(a.response_id, "r9");
        assert!(a.code_ids.is_empty());
        assert_eq!(a.parse_status, ParseStatus::Unparseable);
        assert_eq!(a.rationale, raw);
    }

    #[test]
    fn json_without_codes_key_is_unparseable() {
        let outcome = parse("r1", r#"{"answer": "BUG-UI"}"#, &codebook());
        assert!(matches!(outcome, ParseOutcome::Unparseable { .. }));
    }

    #[test]
    fn word_codes_without_separator_is_unparseable() {
        let outcome = parse("r1", "These codes apply BUG-UI", &codebook());
        assert!(matches!(outcome, ParseOutcome::Unparseable { .. }));
    }

    #[test]
    fn code_ids_always_subset_of_codebook() {
        let cb = codebook();
        for raw in [
            "codes: X, Y, Z; rationale: r",
            "codes: bug-ui, price, ???; rationale: r",
            r#"{"codes": ["LOGIN", 3, "login"]}"#,
        ] {
            let a = parse("r", raw, &cb).into_assignment();
            assert!(a.code_ids.iter().all(|id| cb.contains(id)), "{raw}");
        }
    }

    #[test]
    fn deterministic() {
        let raw = "codes: PRICE, BUG-UI; rationale: both";
        assert_eq!(parse("r", raw, &codebook()), parse("r", raw, &codebook()));
    }
}
