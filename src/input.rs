//! CSV loaders for the codebook and the responses to code.
//!
//! Both files are delimiter-separated with a header row. Column names come
//! from `[codebook]` and `[responses]` in the configuration. Structural
//! problems (missing columns, missing or duplicate ids, unknown example
//! labels) are reported as [`CodingError::Schema`] before any model call.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use csv::StringRecord;

use rag_coder_core::models::{CodebookEntry, ResponseRecord};
use rag_coder_core::{Codebook, CodingError};

use crate::config::{CodebookConfig, ResponsesConfig};

/// Separator between excerpts in the codebook's examples column.
const EXAMPLE_SEPARATOR: char = '|';

/// Load and validate the codebook described by `config`.
pub fn load_codebook(config: &CodebookConfig) -> Result<Codebook> {
    let mut reader = open(&config.path, config.delimiter)?;
    let headers = reader.headers()?.clone();

    let id_idx = column(&headers, &config.id_column, &config.path)?;
    let label_idx = column(&headers, &config.label_column, &config.path)?;
    let desc_idx = column(&headers, &config.description_column, &config.path)?;
    let examples_idx = match &config.examples_column {
        Some(name) => Some(column(&headers, name, &config.path)?),
        None => None,
    };

    let mut entries = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record =
            record.with_context(|| format!("{}: malformed row {}", config.path.display(), row + 2))?;
        let mut entry = CodebookEntry::new(
            field(&record, id_idx),
            field(&record, label_idx),
            field(&record, desc_idx),
        );
        if let Some(idx) = examples_idx {
            entry.examples = field(&record, idx)
                .split(EXAMPLE_SEPARATOR)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        entries.push(entry);
    }

    if let Some(path) = &config.examples_path {
        attach_examples(&mut entries, path, config.delimiter)?;
    }

    Ok(Codebook::load(entries)?)
}

/// Append already-coded excerpts (`response_text`, `label`) to the entries
/// they illustrate. Labels may name an entry by label or by code_id.
fn attach_examples(entries: &mut [CodebookEntry], path: &Path, delimiter: char) -> Result<()> {
    let mut reader = open(path, delimiter)?;
    let headers = reader.headers()?.clone();
    let text_idx = column(&headers, "response_text", path)?;
    let label_idx = column(&headers, "label", path)?;

    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("{}: malformed row {}", path.display(), row + 2))?;
        let text = field(&record, text_idx);
        let label = field(&record, label_idx);
        if text.is_empty() {
            continue;
        }
        let target = entries.iter_mut().find(|e| {
            e.label.eq_ignore_ascii_case(label) || e.code_id.eq_ignore_ascii_case(label)
        });
        match target {
            Some(entry) => entry.examples.push(text.to_string()),
            None => {
                return Err(CodingError::Schema(format!(
                    "{}: row {} refers to unknown label '{}'",
                    path.display(),
                    row + 2,
                    label
                ))
                .into())
            }
        }
    }
    Ok(())
}

/// Load the responses described by `config`, in file order.
///
/// Columns other than the id and text columns are kept as metadata.
pub fn load_responses(config: &ResponsesConfig) -> Result<Vec<ResponseRecord>> {
    let mut reader = open(&config.path, config.delimiter)?;
    let headers = reader.headers()?.clone();

    let id_idx = column(&headers, &config.id_column, &config.path)?;
    let text_idx = column(&headers, &config.text_column, &config.path)?;

    let mut seen = HashSet::new();
    let mut responses = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record =
            record.with_context(|| format!("{}: malformed row {}", config.path.display(), row + 2))?;
        let id = field(&record, id_idx);
        if id.is_empty() {
            return Err(CodingError::Schema(format!(
                "{}: row {} has no {}",
                config.path.display(),
                row + 2,
                config.id_column
            ))
            .into());
        }
        if !seen.insert(id.to_string()) {
            return Err(CodingError::Schema(format!("duplicate response_id '{}'", id)).into());
        }

        let metadata: BTreeMap<String, String> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != id_idx && *i != text_idx)
            .map(|(i, name)| (name.to_string(), record.get(i).unwrap_or("").to_string()))
            .collect();

        responses.push(ResponseRecord {
            response_id: id.to_string(),
            raw_text: record.get(text_idx).unwrap_or("").to_string(),
            metadata,
        });
    }
    Ok(responses)
}

fn open(path: &Path, delimiter: char) -> Result<csv::Reader<std::fs::File>> {
    let delimiter = u8::try_from(delimiter).map_err(|_| {
        CodingError::Config(format!("delimiter '{}' must be a single-byte character", delimiter))
    })?;
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))
}

fn column(headers: &StringRecord, name: &str, path: &Path) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| {
            CodingError::Schema(format!("{}: missing column '{}'", path.display(), name)).into()
        })
}

fn field(record: &StringRecord, idx: usize) -> &str {
    record.get(idx).map(str::trim).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn codebook_config(dir: &TempDir, content: &str) -> CodebookConfig {
        let path = dir.path().join("codebook.csv");
        fs::write(&path, content).unwrap();
        CodebookConfig {
            path,
            delimiter: ';',
            id_column: "code_id".into(),
            label_column: "label".into(),
            description_column: "description".into(),
            examples_column: None,
            examples_path: None,
        }
    }

    fn responses_config(dir: &TempDir, content: &str) -> ResponsesConfig {
        let path = dir.path().join("responses.csv");
        fs::write(&path, content).unwrap();
        ResponsesConfig {
            path,
            delimiter: ';',
            id_column: "response_id".into(),
            text_column: "response_text".into(),
        }
    }

    fn schema_message(err: anyhow::Error) -> String {
        match err.downcast::<CodingError>() {
            Ok(CodingError::Schema(msg)) => msg,
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn loads_codebook() {
        let dir = TempDir::new().unwrap();
        let cfg = codebook_config(
            &dir,
            "code_id;label;description\nBUG-UI;UI bug;Problems with screens\nPRICE;Pricing;Cost complaints\n",
        );
        let codebook = load_codebook(&cfg).unwrap();
        assert_eq!(codebook.len(), 2);
        assert_eq!(codebook.lookup("PRICE").unwrap().label, "Pricing");
    }

    #[test]
    fn examples_column_split_on_pipe() {
        let dir = TempDir::new().unwrap();
        let mut cfg = codebook_config(
            &dir,
            "code_id;label;description;examples\nBUG-UI;UI bug;Screens;button broken | layout off|\n",
        );
        cfg.examples_column = Some("examples".into());
        let codebook = load_codebook(&cfg).unwrap();
        assert_eq!(
            codebook.lookup("BUG-UI").unwrap().examples,
            vec!["button broken".to_string(), "layout off".to_string()]
        );
    }

    #[test]
    fn examples_file_attaches_by_label() {
        let dir = TempDir::new().unwrap();
        let examples = dir.path().join("examples.csv");
        fs::write(&examples, "response_text;label\nthe app crashed;UI bug\n").unwrap();
        let mut cfg = codebook_config(&dir, "code_id;label;description\nBUG-UI;UI bug;Screens\n");
        cfg.examples_path = Some(examples);
        let codebook = load_codebook(&cfg).unwrap();
        assert_eq!(codebook.lookup("BUG-UI").unwrap().examples, vec!["the app crashed"]);
    }

    #[test]
    fn examples_file_unknown_label_is_schema_error() {
        let dir = TempDir::new().unwrap();
        let examples = dir.path().join("examples.csv");
        fs::write(&examples, "response_text;label\ntoo pricey;Cost\n").unwrap();
        let mut cfg = codebook_config(&dir, "code_id;label;description\nBUG-UI;UI bug;Screens\n");
        cfg.examples_path = Some(examples);
        let msg = schema_message(load_codebook(&cfg).unwrap_err());
        assert!(msg.contains("unknown label 'Cost'"));
    }

    #[test]
    fn missing_column_is_schema_error() {
        let dir = TempDir::new().unwrap();
        let cfg = codebook_config(&dir, "id;label;description\nA;a;b\n");
        let msg = schema_message(load_codebook(&cfg).unwrap_err());
        assert!(msg.contains("missing column 'code_id'"));
    }

    #[test]
    fn duplicate_code_id_is_schema_error() {
        let dir = TempDir::new().unwrap();
        let cfg = codebook_config(&dir, "code_id;label;description\nA;a;x\nA;b;y\n");
        let msg = schema_message(load_codebook(&cfg).unwrap_err());
        assert!(msg.contains("duplicate"));
    }

    #[test]
    fn loads_responses_with_metadata() {
        let dir = TempDir::new().unwrap();
        let cfg = responses_config(
            &dir,
            "response_id;response_text;wave\nr1;The button is broken;2\nr2;;2\n",
        );
        let responses = load_responses(&cfg).unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].raw_text, "The button is broken");
        assert_eq!(responses[0].metadata.get("wave").map(String::as_str), Some("2"));
        assert!(responses[1].is_blank());
    }

    #[test]
    fn duplicate_response_id_is_schema_error() {
        let dir = TempDir::new().unwrap();
        let cfg = responses_config(&dir, "response_id;response_text\nr1;a\nr1;b\n");
        let msg = schema_message(load_responses(&cfg).unwrap_err());
        assert!(msg.contains("duplicate response_id 'r1'"));
    }

    #[test]
    fn missing_response_id_is_schema_error() {
        let dir = TempDir::new().unwrap();
        let cfg = responses_config(&dir, "response_id;response_text\n;orphan text\n");
        let msg = schema_message(load_responses(&cfg).unwrap_err());
        assert!(msg.contains("has no response_id"));
    }
}
