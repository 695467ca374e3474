//! Result writers: the coded CSV and the error report CSV.
//!
//! Both use the configured delimiter (`;` by default) and always write a
//! header row, so an empty batch still yields a well-formed file.

use std::path::Path;

use anyhow::{Context, Result};

use rag_coder_core::models::{CodingAssignment, ErrorReport};

/// Separator between multiple code ids in one cell.
const CODE_SEPARATOR: &str = "|";

fn writer(path: &Path, delimiter: u8) -> Result<csv::Writer<std::fs::File>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))
}

/// Write one row per assignment:
/// `response_id;outcome;code_ids;rationale;evidence;ambiguous;parse_status;warnings`.
pub fn write_assignments(
    path: &Path,
    delimiter: u8,
    assignments: &[CodingAssignment],
) -> Result<()> {
    let mut w = writer(path, delimiter)?;
    w.write_record([
        "response_id",
        "outcome",
        "code_ids",
        "rationale",
        "evidence",
        "ambiguous",
        "parse_status",
        "warnings",
    ])?;
    for a in assignments {
        w.write_record([
            a.response_id.as_str(),
            a.category().as_str(),
            &a.code_ids.join(CODE_SEPARATOR),
            a.rationale.as_str(),
            &a.evidence.join(CODE_SEPARATOR),
            if a.ambiguous { "true" } else { "false" },
            a.parse_status.as_str(),
            &a.warnings.join(CODE_SEPARATOR),
        ])?;
    }
    w.flush()?;
    Ok(())
}

/// Write the error report: `response_id;error_kind;message`.
pub fn write_error_report(path: &Path, delimiter: u8, report: &ErrorReport) -> Result<()> {
    let mut w = writer(path, delimiter)?;
    w.write_record(["response_id", "error_kind", "message"])?;
    for e in &report.entries {
        w.write_record([e.response_id.as_str(), e.error_kind.as_str(), e.message.as_str()])?;
    }
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_coder_core::models::{ErrorKind, ErrorReportEntry, ParseStatus};
    use tempfile::TempDir;

    #[test]
    fn assignments_csv_distinguishes_outcomes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/coded.csv");

        let coded = CodingAssignment {
            response_id: "r1".into(),
            code_ids: vec!["BUG-UI".into(), "PRICE".into()],
            rationale: "broken; and pricey".into(),
            evidence: vec!["it froze".into(), "costs a lot".into()],
            ambiguous: true,
            parse_status: ParseStatus::Ok,
            warnings: vec![],
        };
        let none = CodingAssignment {
            code_ids: vec![],
            response_id: "r2".into(),
            evidence: vec![],
            ambiguous: false,
            ..coded.clone()
        };
        let failed = CodingAssignment::model_failure("r3", "Timeout after 3 attempt(s)");

        write_assignments(&path, b';', &[coded, none, failed]).unwrap();

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .from_path(&path)
            .unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[0][1], "coded");
        assert_eq!(&rows[0][2], "BUG-UI|PRICE");
        assert_eq!(&rows[0][3], "broken; and pricey");
        assert_eq!(&rows[0][4], "it froze|costs a lot");
        assert_eq!(&rows[0][5], "true");
        assert_eq!(&rows[1][1], "no_code");
        assert_eq!(&rows[1][5], "false");
        assert_eq!(&rows[2][1], "failed");
        assert_eq!(&rows[2][6], "model_failure");
    }

    #[test]
    fn error_report_has_header_even_when_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("errors.csv");
        write_error_report(&path, b';', &ErrorReport::default()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim(), "response_id;error_kind;message");

        let mut report = ErrorReport::default();
        report
            .entries
            .push(ErrorReportEntry::model_failure("r9", ErrorKind::Auth, "401"));
        write_error_report(&path, b';', &report).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("r9;Auth;401"));
    }
}
