//! Result-table validation pass.
//!
//! Checks every row of the result table against the field list of a schema
//! document (the sidecar metadata) and reports per-row omissions. Each failure
//! category maps to a distinct exit code.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use crate::table::TableContents;

pub const RESULTS_PATH_ENV: &str = "RESULTS_FILE_PATH";
pub const SCHEMA_PATH_ENV: &str = "SCHEMA_FILE_PATH";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitCategory {
    Ok,
    MissingEnvConfig,
    UnreadableFile,
    MalformedSchema,
    RowOmissions,
}

impl ExitCategory {
    pub fn code(&self) -> i32 {
        match self {
            ExitCategory::Ok => 0,
            ExitCategory::MissingEnvConfig => 1,
            ExitCategory::UnreadableFile => 2,
            ExitCategory::MalformedSchema => 3,
            ExitCategory::RowOmissions => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    pub row: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub file_valid: bool,
    /// Schema fields with no column at all in the results file.
    pub missing_fields: Vec<String>,
    pub schema_errors: Vec<String>,
    pub row_errors: Vec<RowError>,
    pub valid_rows: usize,
    pub invalid_rows: usize,
}

impl ValidationReport {
    fn fail(mut self, message: String) -> Self {
        tracing::error!("{}", message);
        self.schema_errors.push(message);
        self
    }

    /// One-line operator summary for the given outcome.
    pub fn summary_line(&self, category: ExitCategory) -> String {
        match category {
            ExitCategory::Ok => "Validation succeeded. All rows valid.".to_string(),
            ExitCategory::RowOmissions => format!(
                "Validation completed with {} invalid rows.",
                self.invalid_rows
            ),
            _ => format!(
                "Validation failed: {}",
                self.schema_errors.last().map(String::as_str).unwrap_or("unknown error")
            ),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ValidationOptions {
    pub read_retries: u32,
    pub backoff_base: Duration,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            read_retries: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

pub fn validate_results(
    results_path: Option<&Path>,
    schema_path: Option<&Path>,
    options: ValidationOptions,
) -> (ValidationReport, ExitCategory) {
    let report = ValidationReport::default();

    let Some(results_path) = results_path else {
        let msg = format!("Missing {} environment variable.", RESULTS_PATH_ENV);
        return (report.fail(msg), ExitCategory::MissingEnvConfig);
    };
    let Some(schema_path) = schema_path else {
        let msg = format!("Missing {} environment variable.", SCHEMA_PATH_ENV);
        return (report.fail(msg), ExitCategory::MissingEnvConfig);
    };

    let results_raw = match read_with_retry(results_path, options) {
        Ok(raw) => raw,
        Err(msg) => return (report.fail(msg), ExitCategory::UnreadableFile),
    };
    let table = match TableContents::from_reader(results_raw.as_bytes()) {
        Ok(table) if table.columns.is_empty() => {
            let msg = format!("Results file is empty: {}", results_path.display());
            return (report.fail(msg), ExitCategory::UnreadableFile);
        }
        Ok(table) => table,
        Err(e) => {
            let msg = format!("Failed to read results file: {}", e);
            return (report.fail(msg), ExitCategory::UnreadableFile);
        }
    };

    let schema_raw = match read_with_retry(schema_path, options) {
        Ok(raw) => raw,
        Err(msg) => return (report.fail(msg), ExitCategory::UnreadableFile),
    };
    let required_fields = match parse_schema_fields(&schema_raw) {
        Ok(fields) => fields,
        Err(msg) => return (report.fail(msg), ExitCategory::MalformedSchema),
    };

    let mut report = report;
    report.missing_fields = required_fields
        .iter()
        .filter(|f| !table.columns.contains(f))
        .cloned()
        .collect();

    for index in 0..table.rows.len() {
        let errors: Vec<String> = required_fields
            .iter()
            .filter(|field| {
                table
                    .cell(index, field)
                    .map_or(true, |value| value.trim().is_empty())
            })
            .map(|field| format!("Missing {}", field))
            .collect();

        if errors.is_empty() {
            report.valid_rows += 1;
        } else {
            report.invalid_rows += 1;
            report.row_errors.push(RowError { row: index, errors });
        }
    }

    if report.invalid_rows > 0 {
        tracing::warn!(
            "Validation completed with {} invalid rows.",
            report.invalid_rows
        );
        return (report, ExitCategory::RowOmissions);
    }

    report.file_valid = true;
    tracing::info!("Validation succeeded. All rows valid.");
    (report, ExitCategory::Ok)
}

/// Required field names from a schema document: a JSON object with a
/// `fields` array of strings.
fn parse_schema_fields(raw: &str) -> Result<Vec<String>, String> {
    let schema: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| format!("Failed to parse schema document: {}", e))?;

    let fields = schema
        .get("fields")
        .and_then(|f| f.as_array())
        .ok_or_else(|| "Schema file missing required 'fields' key.".to_string())?;

    fields
        .iter()
        .map(|f| {
            f.as_str()
                .map(String::from)
                .ok_or_else(|| format!("Schema field is not a string: {}", f))
        })
        .collect()
}

fn read_with_retry(path: &Path, options: ValidationOptions) -> Result<String, String> {
    let attempts = options.read_retries.max(1);
    let mut attempt = 0;
    loop {
        match std::fs::read_to_string(path) {
            Ok(contents) => return Ok(contents),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(format!("File not found: {}", path.display()));
            }
            Err(e) if attempt + 1 >= attempts => {
                return Err(format!("Failed to read {}: {}", path.display(), e));
            }
            Err(e) => {
                tracing::warn!("Read of {} failed ({}), retrying", path.display(), e);
                std::thread::sleep(options.backoff_base * 2u32.saturating_pow(attempt));
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn fast() -> ValidationOptions {
        ValidationOptions {
            read_retries: 3,
            backoff_base: Duration::ZERO,
        }
    }

    const SCHEMA: &str = r#"{"schema_version":"v1.0","fields":["date","scenario","result"],"last_updated":"2025-07-31T00:00:00Z"}"#;

    fn setup(results: &str, schema: &str) -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let results_path = dir.path().join("results.csv");
        let schema_path = dir.path().join("results_metadata.json");
        fs::write(&results_path, results).unwrap();
        fs::write(&schema_path, schema).unwrap();
        (dir, results_path, schema_path)
    }

    #[test]
    fn test_missing_paths() {
        let (report, category) = validate_results(None, Some(Path::new("s.json")), fast());
        assert_eq!(category, ExitCategory::MissingEnvConfig);
        assert_eq!(category.code(), 1);
        assert!(report.schema_errors[0].contains(RESULTS_PATH_ENV));

        let (_, category) = validate_results(Some(Path::new("r.csv")), None, fast());
        assert_eq!(category, ExitCategory::MissingEnvConfig);
    }

    #[test]
    fn test_missing_results_file() {
        let (dir, _, schema) = setup("", SCHEMA);
        let missing = dir.path().join("nope.csv");
        let (report, category) = validate_results(Some(&missing), Some(&schema), fast());
        assert_eq!(category.code(), 2);
        assert!(!report.file_valid);
    }

    #[test]
    fn test_empty_results_file() {
        let (_dir, results, schema) = setup("", SCHEMA);
        let (report, category) = validate_results(Some(&results), Some(&schema), fast());
        assert_eq!(category, ExitCategory::UnreadableFile);
        assert!(report.schema_errors[0].contains("empty"));
    }

    #[test]
    fn test_results_directory_fails_after_retries() {
        let (dir, _, schema) = setup("", SCHEMA);
        let results = dir.path().join("as_dir.csv");
        fs::create_dir(&results).unwrap();
        let (report, category) = validate_results(Some(&results), Some(&schema), fast());
        assert_eq!(category, ExitCategory::UnreadableFile);
        assert!(report.schema_errors[0].starts_with("Failed to read"));
    }

    #[test]
    fn test_row_wider_than_header_is_unreadable() {
        let csv = "date,scenario,result\n2025-07-31,fade,hit,EXTRA\n";
        let (_dir, results, schema) = setup(csv, SCHEMA);
        let (report, category) = validate_results(Some(&results), Some(&schema), fast());
        assert_eq!(category.code(), 2);
        assert!(report.schema_errors[0].contains("4 cells"));
    }

    #[test]
    fn test_malformed_schema() {
        let (_dir, results, schema) = setup("date\n2025-07-31\n", "{not json");
        let (_, category) = validate_results(Some(&results), Some(&schema), fast());
        assert_eq!(category.code(), 3);

        let (_dir, results, schema) = setup("date\n2025-07-31\n", r#"{"schema_version":"v1.0"}"#);
        let (report, category) = validate_results(Some(&results), Some(&schema), fast());
        assert_eq!(category, ExitCategory::MalformedSchema);
        assert!(report.summary_line(category).contains("'fields'"));
    }

    #[test]
    fn test_row_omissions() {
        let csv = "date,scenario,result\n2025-07-30,fade,hit\n2025-07-31,,miss\n";
        let (_dir, results, schema) = setup(csv, SCHEMA);
        let (report, category) = validate_results(Some(&results), Some(&schema), fast());
        assert_eq!(category.code(), 4);
        assert_eq!(report.valid_rows, 1);
        assert_eq!(report.invalid_rows, 1);
        assert_eq!(
            report.row_errors,
            vec![RowError {
                row: 1,
                errors: vec!["Missing scenario".into()]
            }]
        );
    }

    #[test]
    fn test_absent_column_counts_as_missing_field() {
        let csv = "date,result\n2025-07-31,hit\n";
        let (_dir, results, schema) = setup(csv, SCHEMA);
        let (report, category) = validate_results(Some(&results), Some(&schema), fast());
        assert_eq!(category, ExitCategory::RowOmissions);
        assert_eq!(report.missing_fields, vec!["scenario".to_string()]);
    }

    #[test]
    fn test_all_rows_valid() {
        let csv = "date,symbol,scenario,result\n2025-07-30,/NQ,fade,hit\n2025-07-31,/NQ,range,miss\n";
        let (_dir, results, schema) = setup(csv, SCHEMA);
        let (report, category) = validate_results(Some(&results), Some(&schema), fast());
        assert_eq!(category, ExitCategory::Ok);
        assert!(report.file_valid);
        assert_eq!(report.valid_rows, 2);
        assert_eq!(report.summary_line(category), "Validation succeeded. All rows valid.");
    }
}
