use chrono::{DateTime, Utc};
use forecast_core::SCHEMA_VERSION;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RecordingError, RecordingResult};

/// Sidecar record describing the result table's current column set.
/// Rewritten after every append; only the latest state is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaMetadata {
    pub schema_version: String,
    pub fields: Vec<String>,
    pub last_updated: DateTime<Utc>,
}

impl SchemaMetadata {
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            fields,
            last_updated: Utc::now(),
        }
    }

    /// `results.csv` -> `results_metadata.json` in the same directory.
    pub fn path_for(table: &Path) -> PathBuf {
        let stem = table
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "results".to_string());
        table.with_file_name(format!("{}_metadata.json", stem))
    }

    pub fn write(&self, path: &Path) -> RecordingResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| RecordingError::Metadata(e.to_string()))?;
        std::fs::write(path, json)
            .map_err(|e| RecordingError::Metadata(format!("{}: {}", path.display(), e)))
    }

    pub fn read(path: &Path) -> RecordingResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RecordingError::Metadata(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&raw).map_err(|e| RecordingError::Metadata(e.to_string()))
    }
}
