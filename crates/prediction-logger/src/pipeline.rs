//! Pipeline orchestrator.
//!
//! One run evaluates one date:
//!
//! ```text
//! Start -> ForecastLoaded -> ActualsLoaded -> Evaluated -> [Enriched] -> Recorded -> Done
//! ```
//!
//! A failing forecast, actuals, evaluation or recording step moves the run to
//! `Failed(stage)` and sends exactly one notification. Enrichment failures are
//! logged and the base result is still recorded.

use std::fmt;

use chrono::NaiveDate;
use forecast_core::{
    evaluate, Actuals, ActualsSource, EvaluationResult, Forecast, ForecastSource, Outcome,
    TensorOutput,
};
use ml_client::{feature_vector, EnrichmentError, InferenceModel, TextSummarizer};
use notification_service::Notifier;
use result_recorder::ResultTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Forecast,
    Actuals,
    Evaluation,
    Recording,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Forecast => "forecast",
            Stage::Actuals => "actuals",
            Stage::Evaluation => "evaluation",
            Stage::Recording => "recording",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Start,
    ForecastLoaded,
    ActualsLoaded,
    Evaluated,
    Enriched,
    Recorded,
    Done,
    Failed(Stage),
}

/// Outcome of a single run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub date: NaiveDate,
    pub state: RunState,
    /// Every state visited, starting with `Start`.
    pub transitions: Vec<RunState>,
    pub result: Option<EvaluationResult>,
    pub error: Option<String>,
}

impl RunReport {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            state: RunState::Start,
            transitions: vec![RunState::Start],
            result: None,
            error: None,
        }
    }

    fn advance(&mut self, next: RunState) {
        tracing::debug!(date = %self.date, "{:?} -> {:?}", self.state, next);
        self.state = next;
        self.transitions.push(next);
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunState::Done
    }
}

/// Optional fields produced by the enrichment stage. The pipeline only reads
/// the values; `errors` is kept for logging.
#[derive(Debug, Default)]
pub struct Enrichment {
    pub tensor_output: Option<TensorOutput>,
    pub summary: Option<String>,
    pub errors: Vec<EnrichmentError>,
}

pub struct Pipeline {
    forecasts: Box<dyn ForecastSource>,
    actuals: Box<dyn ActualsSource>,
    table: ResultTable,
    notifier: Notifier,
    model: Option<Box<dyn InferenceModel>>,
    summarizer: Option<Box<dyn TextSummarizer>>,
    symbol: String,
}

impl Pipeline {
    pub fn new(
        forecasts: Box<dyn ForecastSource>,
        actuals: Box<dyn ActualsSource>,
        table: ResultTable,
        notifier: Notifier,
    ) -> Self {
        Self {
            forecasts,
            actuals,
            table,
            notifier,
            model: None,
            summarizer: None,
            symbol: forecast_core::DEFAULT_SYMBOL.to_string(),
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self
    }

    pub fn with_model(mut self, model: Box<dyn InferenceModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Summaries are only produced when a model is also configured.
    pub fn with_summarizer(mut self, summarizer: Box<dyn TextSummarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub async fn run(&mut self, date: NaiveDate) -> RunReport {
        let mut report = RunReport::new(date);
        tracing::info!(%date, actuals = self.actuals.kind(), "Starting prediction run");

        let forecast = match self.forecasts.load(date).await {
            Ok(forecast) => forecast,
            Err(e) => return self.fail(report, Stage::Forecast, e.to_string()).await,
        };
        report.advance(RunState::ForecastLoaded);

        let actuals = match self.actuals.get_actuals(date).await {
            Ok(actuals) => actuals,
            Err(e) => return self.fail(report, Stage::Actuals, e.to_string()).await,
        };
        report.advance(RunState::ActualsLoaded);

        let hit = match evaluate(&forecast.scenario, &forecast, &actuals) {
            Ok(hit) => hit,
            Err(e) => return self.fail(report, Stage::Evaluation, e.to_string()).await,
        };
        report.advance(RunState::Evaluated);

        let mut result =
            EvaluationResult::new(date, &self.symbol, &forecast, &actuals, Outcome::from(hit));
        tracing::info!(
            %date,
            scenario = %result.scenario,
            predicted = result.predicted,
            "Evaluated forecast: {}",
            result.outcome
        );

        let enrichment = self.enrich(&forecast, &actuals).await;
        for error in &enrichment.errors {
            tracing::warn!(%date, "Enrichment skipped: {}", error);
        }
        if enrichment.tensor_output.is_some() {
            result.tensor_output = enrichment.tensor_output;
            result.summary = enrichment.summary;
            report.advance(RunState::Enriched);
        }

        if let Err(e) = self.table.append(&result) {
            return self.fail(report, Stage::Recording, e.to_string()).await;
        }
        report.advance(RunState::Recorded);

        tracing::info!(%date, "Recorded result to {}", self.table.path().display());
        report.result = Some(result);
        report.advance(RunState::Done);
        report
    }

    async fn enrich(&mut self, forecast: &Forecast, actuals: &Actuals) -> Enrichment {
        let mut enrichment = Enrichment::default();
        let Some(model) = self.model.as_mut() else {
            return enrichment;
        };

        if !model.is_loaded() {
            if let Err(e) = model.load() {
                enrichment.errors.push(e);
                return enrichment;
            }
        }
        match model.predict(&feature_vector(forecast, actuals)) {
            Ok(output) => enrichment.tensor_output = Some(output),
            Err(e) => {
                enrichment.errors.push(e);
                return enrichment;
            }
        }

        if let (Some(summarizer), Some(output)) =
            (self.summarizer.as_ref(), enrichment.tensor_output.as_ref())
        {
            match summarizer.summarize(output, forecast).await {
                Ok(summary) => enrichment.summary = Some(summary),
                Err(e) => enrichment.errors.push(e),
            }
        }
        enrichment
    }

    async fn fail(&self, mut report: RunReport, stage: Stage, error: String) -> RunReport {
        let date = report.date;
        tracing::error!(%date, %stage, "Prediction run failed: {}", error);

        let subject = format!("Prediction run failed ({})", stage);
        let message = format!(
            "Prediction run for {} failed at the {} stage: {}",
            date, stage, error
        );
        self.notifier.notify(message, Some(&subject)).await;

        report.advance(RunState::Failed(stage));
        report.error = Some(error);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Forecast.to_string(), "forecast");
        assert_eq!(Stage::Recording.to_string(), "recording");
    }

    #[test]
    fn test_report_tracks_transitions() {
        let date = NaiveDate::from_ymd_opt(2025, 7, 31).unwrap();
        let mut report = RunReport::new(date);
        report.advance(RunState::ForecastLoaded);
        report.advance(RunState::Failed(Stage::Actuals));
        assert_eq!(
            report.transitions,
            vec![
                RunState::Start,
                RunState::ForecastLoaded,
                RunState::Failed(Stage::Actuals)
            ]
        );
        assert!(!report.succeeded());
    }
}
