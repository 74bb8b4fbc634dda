//! Append-only CSV result table.
//!
//! Every append rewrites the whole file through a temporary sibling that is
//! renamed into place, so a failed write leaves the previous history intact.

use forecast_core::EvaluationResult;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{RecordingError, RecordingResult};
use crate::metadata::SchemaMetadata;

/// Column names and rows as read from disk. Every row is padded to the
/// column count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableContents {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TableContents {
    /// Parse CSV text with a header row. Short rows are padded; a row wider
    /// than the header is an error, since its extra cells belong to no column.
    pub fn from_reader<R: std::io::Read>(reader: R) -> RecordingResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let columns: Vec<String> = reader.headers()?.iter().map(String::from).collect();
        let mut rows = Vec::new();
        for (index, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() > columns.len() {
                return Err(RecordingError::RowWiderThanHeader {
                    row: index + 1,
                    cells: record.len(),
                    columns: columns.len(),
                });
            }
            let mut row: Vec<String> = record.iter().map(String::from).collect();
            row.resize(columns.len(), String::new());
            rows.push(row);
        }

        Ok(TableContents { columns, rows })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in row `index`, if both exist.
    pub fn cell(&self, index: usize, column: &str) -> Option<&str> {
        let col = self.columns.iter().position(|c| c == column)?;
        self.rows.get(index)?.get(col).map(String::as_str)
    }

    fn push(&mut self, result: &EvaluationResult) {
        let values = result.to_columns();
        for (name, _) in &values {
            if !self.columns.iter().any(|c| c == name) {
                self.columns.push(name.to_string());
            }
        }
        let width = self.columns.len();
        for row in &mut self.rows {
            row.resize(width, String::new());
        }
        let row = self
            .columns
            .iter()
            .map(|column| {
                values
                    .iter()
                    .find(|(name, _)| name == column)
                    .map(|(_, value)| value.clone())
                    .unwrap_or_default()
            })
            .collect();
        self.rows.push(row);
    }
}

pub struct ResultTable {
    path: PathBuf,
}

impl ResultTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata_path(&self) -> PathBuf {
        SchemaMetadata::path_for(&self.path)
    }

    /// Read the table. A table that does not exist yet reads as empty.
    pub fn read(&self) -> RecordingResult<TableContents> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(TableContents::default()),
            Err(source) => {
                return Err(RecordingError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        TableContents::from_reader(raw.as_slice())
    }

    /// Append one evaluation result, then refresh the sidecar metadata.
    ///
    /// Columns already in the table keep their order; enrichment columns the
    /// result introduces are added at the end and left blank for older rows.
    /// Metadata failures are logged, not returned.
    pub fn append(&self, result: &EvaluationResult) -> RecordingResult<()> {
        let mut table = self.read()?;
        table.push(result);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| RecordingError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        self.write(&table)?;
        tracing::info!(
            "Recorded {} {} for {} ({} rows)",
            result.scenario,
            result.outcome,
            result.date,
            table.rows.len()
        );

        let metadata = SchemaMetadata::new(table.columns.clone());
        if let Err(e) = metadata.write(&self.metadata_path()) {
            tracing::error!("Error writing metadata: {}", e);
        }
        Ok(())
    }

    fn write(&self, table: &TableContents) -> RecordingResult<()> {
        let tmp = self.tmp_path();
        let written = Self::write_csv(&tmp, table).and_then(|()| {
            std::fs::rename(&tmp, &self.path).map_err(|source| RecordingError::Write {
                path: self.path.clone(),
                source,
            })
        });
        if written.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        written
    }

    fn write_csv(path: &Path, table: &TableContents) -> RecordingResult<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&table.columns)?;
        for row in &table.rows {
            writer.write_record(row)?;
        }
        writer.flush().map_err(|source| RecordingError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    fn tmp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "results.csv".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use forecast_core::{Outcome, Scenario, TensorOutput, SCHEMA_VERSION};

    fn result(day: u32, outcome: Outcome) -> EvaluationResult {
        EvaluationResult {
            date: NaiveDate::from_ymd_opt(2025, 7, day).unwrap(),
            symbol: "/NQ".into(),
            predicted: 23650.0,
            actual: Some(23500.0),
            scenario: Scenario::Breakout,
            outcome,
            schema_version: SCHEMA_VERSION.into(),
            tensor_output: None,
            summary: None,
        }
    }

    #[test]
    fn test_missing_table_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let table = ResultTable::new(dir.path().join("none.csv"));
        assert_eq!(table.read().unwrap(), TableContents::default());
    }

    #[test]
    fn test_append_creates_directory_table_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let table = ResultTable::new(dir.path().join("out/nested/eval.csv"));
        table.append(&result(30, Outcome::Hit)).unwrap();

        let contents = table.read().unwrap();
        assert_eq!(
            contents.columns,
            vec!["date", "symbol", "predicted", "actual", "scenario", "result", "version"]
        );
        assert_eq!(contents.cell(0, "date"), Some("2025-07-30"));
        assert_eq!(contents.cell(0, "result"), Some("hit"));
        assert_eq!(contents.cell(0, "version"), Some("v1.0"));

        let meta = SchemaMetadata::read(&table.metadata_path()).unwrap();
        assert_eq!(meta.schema_version, "v1.0");
        assert_eq!(meta.fields, contents.columns);
    }

    #[test]
    fn test_enrichment_columns_extend_existing_table() {
        let dir = tempfile::tempdir().unwrap();
        let table = ResultTable::new(dir.path().join("eval.csv"));
        table.append(&result(30, Outcome::Hit)).unwrap();

        let mut enriched = result(31, Outcome::Miss);
        enriched.tensor_output = Some(TensorOutput::Scalar(0.25));
        enriched.summary = Some("Price stalled, below resistance".into());
        table.append(&enriched).unwrap();

        let contents = table.read().unwrap();
        assert_eq!(contents.columns.len(), 9);
        assert_eq!(contents.columns[7], "tensor_output");
        assert_eq!(contents.columns[8], "summary");
        assert_eq!(contents.cell(0, "tensor_output"), Some(""));
        assert_eq!(contents.cell(1, "tensor_output"), Some("0.25"));
        assert_eq!(contents.cell(1, "summary"), Some("Price stalled, below resistance"));

        // plain rows after enriched ones leave the extra columns blank
        table.append(&result(29, Outcome::Hit)).unwrap();
        let contents = table.read().unwrap();
        assert_eq!(contents.rows.len(), 3);
        assert_eq!(contents.cell(2, "summary"), Some(""));
        assert_eq!(contents.cell(0, "date"), Some("2025-07-30"));
    }

    #[test]
    fn test_foreign_columns_keep_their_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eval.csv");
        std::fs::write(&path, "date,scenario,hit\n2025-07-01,fade,1\n").unwrap();

        let table = ResultTable::new(&path);
        table.append(&result(31, Outcome::Miss)).unwrap();

        let contents = table.read().unwrap();
        assert_eq!(&contents.columns[..3], &["date", "scenario", "hit"]);
        assert_eq!(contents.cell(0, "hit"), Some("1"));
        assert_eq!(contents.cell(0, "symbol"), Some(""));
        assert_eq!(contents.cell(1, "hit"), Some(""));
        assert_eq!(contents.cell(1, "scenario"), Some("breakout"));
    }

    #[test]
    fn test_row_wider_than_header_aborts_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eval.csv");
        let seeded = "date,scenario\n2025-07-01,fade,EXTRA_NOTE\n";
        std::fs::write(&path, seeded).unwrap();

        let table = ResultTable::new(&path);
        let err = table.append(&result(31, Outcome::Hit)).unwrap_err();
        assert!(matches!(
            err,
            RecordingError::RowWiderThanHeader {
                row: 1,
                cells: 3,
                columns: 2
            }
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), seeded);
        assert!(!table.metadata_path().exists());
    }

    #[test]
    fn test_short_rows_are_padded() {
        let contents =
            TableContents::from_reader("date,scenario,result\n2025-07-01,fade\n".as_bytes())
                .unwrap();
        assert_eq!(contents.rows, vec![vec!["2025-07-01", "fade", ""]]);
    }

    #[test]
    fn test_unreadable_table_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        // a directory where the table should be cannot be read as a file
        let path = dir.path().join("eval.csv");
        std::fs::create_dir(&path).unwrap();

        let table = ResultTable::new(&path);
        assert!(table.append(&result(31, Outcome::Hit)).is_err());
        assert!(path.is_dir());
        assert!(!table.metadata_path().exists());
    }
}
