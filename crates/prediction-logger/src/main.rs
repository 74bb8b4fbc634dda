use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use forecast_core::utc_today;
use clap::{Args, Parser, Subcommand};
use ml_client::{ChatSummarizer, LinearModel};
use notification_service::{Notification, NotificationChannel, Notifier, WebhookNotifier};
use prediction_logger::config::{Config, ConfigCache, CONFIG_PATH_ENV, DEFAULT_CONFIG_FILE};
use prediction_logger::{actuals_source_from_config, check_forecast_path, JsonFileForecastSource, Pipeline};
use result_recorder::validation::{validate_results, RESULTS_PATH_ENV, SCHEMA_PATH_ENV};
use result_recorder::{ResultTable, ValidationOptions};

static CONFIG: ConfigCache = ConfigCache::new();

const DEFAULT_MODEL_PATH: &str = "model.json";
const VALIDATION_SUMMARY_FILE: &str = "validation_summary.json";

#[derive(Parser)]
#[command(name = "prediction-logger", version)]
#[command(about = "Evaluate a daily forecast against market actuals and record the result", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate one date (the default command)
    Run(RunArgs),
    /// Check every result row against the schema field list
    Validate(ValidateArgs),
    /// Verify a forecast file exists under the configured forecast folder
    CheckForecastPath {
        /// Forecast file name, e.g. 2025-07-31.json
        filename: String,

        #[command(flatten)]
        config: ConfigArg,
    },
}

#[derive(Args, Clone)]
struct ConfigArg {
    /// Path to the TOML config file
    #[arg(long = "config", env = CONFIG_PATH_ENV, default_value = DEFAULT_CONFIG_FILE)]
    path: PathBuf,
}

#[derive(Args, Clone)]
struct RunArgs {
    /// Date for the forecast (YYYY-MM-DD), defaults to today in UTC
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Preview without touching any source or writing outputs
    #[arg(long)]
    dry_run: bool,

    /// Enable model inference on the evaluation result
    #[arg(long)]
    tensor: bool,

    /// Add a narrative summary of the model output
    #[arg(long, requires = "tensor")]
    summarize: bool,

    /// Actuals source type (stub, file or live), overrides the config
    #[arg(long)]
    actuals: Option<String>,

    #[command(flatten)]
    config: ConfigArg,
}

#[derive(Args)]
struct ValidateArgs {
    /// Result table to validate
    #[arg(long, env = RESULTS_PATH_ENV)]
    results: Option<PathBuf>,

    /// Schema document with the required `fields`
    #[arg(long, env = SCHEMA_PATH_ENV)]
    schema: Option<PathBuf>,

    /// Also write the report to validation_summary.json
    #[arg(long)]
    json_report: bool,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Some(Command::Run(args)) => run(args).await,
        Some(Command::Validate(args)) => validate(args).await,
        Some(Command::CheckForecastPath { filename, config }) => {
            check_path(&filename, &config)
        }
        None => run(cli.run).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let date = args.date.unwrap_or_else(utc_today);
    tracing::debug!(
        %date,
        dry_run = args.dry_run,
        tensor = args.tensor,
        summarize = args.summarize,
        actuals = ?args.actuals,
        "CLI invoked"
    );
    if args.dry_run {
        tracing::info!(%date, "DRY RUN: exiting without changes");
        return Ok(ExitCode::SUCCESS);
    }

    let config = match CONFIG.get_or_load(&args.config.path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Configuration error: {}", e);
            return Err(e.into());
        }
    };
    let notifier = Notifier::from_config(&config.notification_config());
    tracing::debug!("Notification channels: {:?}", notifier.channel_names());

    let kind = args.actuals.as_deref().unwrap_or(&config.actuals_source);
    let actuals = match actuals_source_from_config(kind, &config) {
        Ok(actuals) => actuals,
        Err(e) => {
            tracing::error!("Critical failure in CLI: {}", e);
            notifier
                .notify(format!("Critical failure in CLI: {}", e), None)
                .await;
            return Err(e.into());
        }
    };

    let mut pipeline = Pipeline::new(
        Box::new(JsonFileForecastSource::new(&config.forecast_folder)),
        actuals,
        ResultTable::new(&config.output_table),
        notifier,
    )
    .with_symbol(config.symbol.clone());
    pipeline = with_enrichment(pipeline, &args, &config);

    let report = pipeline.run(date).await;
    if report.succeeded() {
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::info!(%date, state = ?report.state, "Run ended without recording");
        Ok(ExitCode::FAILURE)
    }
}

fn with_enrichment(mut pipeline: Pipeline, args: &RunArgs, config: &Config) -> Pipeline {
    if args.tensor {
        let path = config
            .model_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH));
        pipeline = pipeline.with_model(Box::new(LinearModel::new(path)));
    }
    if args.summarize {
        match ChatSummarizer::new(config.llm_config()) {
            Ok(summarizer) => pipeline = pipeline.with_summarizer(Box::new(summarizer)),
            Err(e) => tracing::warn!("Summaries disabled: {}", e),
        }
    }
    pipeline
}

async fn validate(args: ValidateArgs) -> anyhow::Result<ExitCode> {
    let ValidateArgs {
        results,
        schema,
        json_report,
    } = args;
    let (report, category) = tokio::task::spawn_blocking(move || {
        validate_results(
            results.as_deref(),
            schema.as_deref(),
            ValidationOptions::default(),
        )
    })
    .await
    .context("validation task panicked")?;

    let rendered = serde_json::to_string_pretty(&report)?;
    println!("{}", rendered);
    if json_report {
        std::fs::write(VALIDATION_SUMMARY_FILE, &rendered)
            .with_context(|| format!("failed to write {}", VALIDATION_SUMMARY_FILE))?;
        tracing::info!("Wrote {}", VALIDATION_SUMMARY_FILE);
    }

    if let Some(url) = std::env::var("SLACK_WEBHOOK").ok().filter(|u| !u.is_empty()) {
        let summary = report.summary_line(category);
        match WebhookNotifier::new("slack", url, Duration::from_secs(5)) {
            Ok(slack) => {
                if let Err(e) = slack.send(&Notification::new(summary, None)).await {
                    tracing::warn!("Failed to post validation summary: {}", e);
                }
            }
            Err(e) => tracing::warn!("Failed to post validation summary: {}", e),
        }
    }

    Ok(ExitCode::from(category.code() as u8))
}

fn check_path(filename: &str, config: &ConfigArg) -> anyhow::Result<ExitCode> {
    let config = CONFIG.get_or_load(&config.path)?;
    let path = check_forecast_path(&config.forecast_folder, filename)
        .with_context(|| format!("forecast file '{}' not usable", filename))?;

    println!("Forecast folder: {}", config.forecast_folder.display());
    println!("Forecast file:   {}", path.display());
    Ok(ExitCode::SUCCESS)
}
