use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

/// Failures while retrieving a forecast or the actuals for a date.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Forecast directory not found: {}", .0.display())]
    ForecastDirectoryMissing(PathBuf),

    #[error("No forecast found for {0}")]
    ForecastNotFound(NaiveDate),

    #[error("Invalid forecast data for {date}: {reason}")]
    ForecastMalformed { date: NaiveDate, reason: String },

    #[error("Forecast schema validation failed for {date}: {reason}")]
    ForecastSchemaInvalid { date: NaiveDate, reason: String },

    #[error("No actuals found for {0}")]
    ActualsNotFound(NaiveDate),

    #[error("Invalid actuals data for {date}: {reason}")]
    ActualsMalformed { date: NaiveDate, reason: String },

    #[error("Unknown actuals_source type: {0}")]
    UnknownSourceKind(String),

    #[error("Live feed error: {0}")]
    Feed(String),

    #[error("I/O error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Raised by the scenario evaluator when an input lacks an operand the
/// scenario rule cannot default.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("scenario '{scenario}' requires actuals.{field}")]
    MissingOperand {
        scenario: String,
        field: &'static str,
    },
}

pub type SourceResult<T> = Result<T, SourceError>;
