use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::SourceError;

/// Schema version stamped on every recorded row and on the sidecar metadata.
pub const SCHEMA_VERSION: &str = "v1.0";

/// Symbol recorded when the configuration does not name one.
pub const DEFAULT_SYMBOL: &str = "/NQ";

/// Trading dates are UTC calendar dates, both for the default run date and
/// for bucketing live ticks.
pub fn utc_today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Named rule used to judge a forecast against the actuals.
///
/// Tags outside the recognized set are kept verbatim so the run can still
/// record them; the evaluator scores them as a miss.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Scenario {
    Breakout,
    Fade,
    Range,
    Trend,
    Reversal,
    Momentum,
    Unrecognized(String),
}

impl Scenario {
    pub fn as_str(&self) -> &str {
        match self {
            Scenario::Breakout => "breakout",
            Scenario::Fade => "fade",
            Scenario::Range => "range",
            Scenario::Trend => "trend",
            Scenario::Reversal => "reversal",
            Scenario::Momentum => "momentum",
            Scenario::Unrecognized(tag) => tag,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Scenario::Unrecognized(_))
    }
}

impl From<String> for Scenario {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "breakout" => Scenario::Breakout,
            "fade" => Scenario::Fade,
            "range" => Scenario::Range,
            "trend" => Scenario::Trend,
            "reversal" => Scenario::Reversal,
            "momentum" => Scenario::Momentum,
            _ => Scenario::Unrecognized(tag),
        }
    }
}

impl From<Scenario> for String {
    fn from(scenario: Scenario) -> Self {
        scenario.as_str().to_string()
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Predicted price scenario for one trading date. Unknown fields are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Forecast {
    pub scenario: Scenario,
    pub resistance: f64,
    #[serde(default)]
    pub support: Option<f64>,
    #[serde(default)]
    pub sigma_plus: Option<f64>,
    #[serde(default)]
    pub sigma_minus: Option<f64>,
}

/// Realized market readings for one trading date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Actuals {
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub close: Option<f64>,
    #[serde(default)]
    pub open: Option<f64>,
    #[serde(default)]
    pub prev_close: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Hit,
    Miss,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Hit => "hit",
            Outcome::Miss => "miss",
        }
    }
}

impl From<bool> for Outcome {
    fn from(hit: bool) -> Self {
        if hit {
            Outcome::Hit
        } else {
            Outcome::Miss
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the optional model inference step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TensorOutput {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl fmt::Display for TensorOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // JSON keeps the cell parseable for downstream readers
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => Err(fmt::Error),
        }
    }
}

/// One evaluated forecast, as appended to the result table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub date: NaiveDate,
    pub symbol: String,
    pub predicted: f64,
    pub actual: Option<f64>,
    pub scenario: Scenario,
    pub outcome: Outcome,
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tensor_output: Option<TensorOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl EvaluationResult {
    pub fn new(
        date: NaiveDate,
        symbol: impl Into<String>,
        forecast: &Forecast,
        actuals: &Actuals,
        outcome: Outcome,
    ) -> Self {
        Self {
            date,
            symbol: symbol.into(),
            predicted: forecast.resistance,
            actual: actuals.close,
            scenario: forecast.scenario.clone(),
            outcome,
            schema_version: SCHEMA_VERSION.to_string(),
            tensor_output: None,
            summary: None,
        }
    }

    /// Column/value pairs in table order. Enrichment columns appear only
    /// when the result carries them.
    pub fn to_columns(&self) -> Vec<(&'static str, String)> {
        let mut columns = vec![
            ("date", self.date.format("%Y-%m-%d").to_string()),
            ("symbol", self.symbol.clone()),
            ("predicted", self.predicted.to_string()),
            (
                "actual",
                self.actual.map(|a| a.to_string()).unwrap_or_default(),
            ),
            ("scenario", self.scenario.to_string()),
            ("result", self.outcome.to_string()),
            ("version", self.schema_version.clone()),
        ];
        if let Some(ref output) = self.tensor_output {
            columns.push(("tensor_output", output.to_string()));
        }
        if let Some(ref summary) = self.summary {
            columns.push(("summary", summary.clone()));
        }
        columns
    }
}

/// Which actuals source variant the factory should build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Stub,
    File,
    Live,
}

impl FromStr for SourceKind {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stub" => Ok(SourceKind::Stub),
            "file" => Ok(SourceKind::File),
            "live" => Ok(SourceKind::Live),
            other => Err(SourceError::UnknownSourceKind(other.to_string())),
        }
    }
}
