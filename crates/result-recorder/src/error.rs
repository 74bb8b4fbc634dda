use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Error reading result table {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error writing result table {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Row {row} has {cells} cells but the header has {columns}")]
    RowWiderThanHeader {
        row: usize,
        cells: usize,
        columns: usize,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Metadata error: {0}")]
    Metadata(String),
}

pub type RecordingResult<T> = Result<T, RecordingError>;
