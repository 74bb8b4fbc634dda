//! File-backed forecast source and the stub/file actuals sources.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use forecast_core::{
    Actuals, ActualsSource, Forecast, ForecastSource, SourceError, SourceKind, SourceResult,
};
use market_feed::LiveFeedActualsSource;

use crate::config::Config;

/// Resolve `folder` against the current working directory when relative.
pub fn resolve_folder(folder: &Path) -> PathBuf {
    if folder.is_absolute() {
        return folder.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(folder),
        Err(_) => folder.to_path_buf(),
    }
}

fn date_stem(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Reads `<folder>/<YYYY-MM-DD>.json`.
pub struct JsonFileForecastSource {
    folder: PathBuf,
}

impl JsonFileForecastSource {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        resolve_folder(&self.folder).join(format!("{}.json", date_stem(date)))
    }
}

#[async_trait]
impl ForecastSource for JsonFileForecastSource {
    async fn load(&self, date: NaiveDate) -> SourceResult<Forecast> {
        let folder = resolve_folder(&self.folder);
        if !folder.is_dir() {
            return Err(SourceError::ForecastDirectoryMissing(folder));
        }

        let path = self.path_for(date);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SourceError::ForecastNotFound(date))
            }
            Err(source) => return Err(SourceError::Io { path, source }),
        };

        // Syntax errors and shape errors are reported separately.
        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| SourceError::ForecastMalformed {
                date,
                reason: e.to_string(),
            })?;
        if !value.is_object() {
            return Err(SourceError::ForecastMalformed {
                date,
                reason: "expected a JSON object".to_string(),
            });
        }
        let forecast: Forecast =
            serde_json::from_value(value).map_err(|e| SourceError::ForecastSchemaInvalid {
                date,
                reason: e.to_string(),
            })?;

        tracing::info!(%date, scenario = %forecast.scenario, "Loaded forecast from {}", path.display());
        Ok(forecast)
    }
}

/// Fixed reading for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StubActualsSource;

impl StubActualsSource {
    pub fn reading() -> Actuals {
        Actuals {
            high: Some(23660.0),
            low: Some(23410.0),
            close: Some(23500.0),
            ..Actuals::default()
        }
    }
}

#[async_trait]
impl ActualsSource for StubActualsSource {
    async fn get_actuals(&self, date: NaiveDate) -> SourceResult<Actuals> {
        tracing::debug!(%date, "Using stub actuals");
        Ok(Self::reading())
    }

    fn kind(&self) -> &'static str {
        "stub"
    }
}

/// Reads `<folder>/<YYYY-MM-DD>.actuals.json`.
pub struct FileActualsSource {
    folder: PathBuf,
}

impl FileActualsSource {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        resolve_folder(&self.folder).join(format!("{}.actuals.json", date_stem(date)))
    }
}

#[async_trait]
impl ActualsSource for FileActualsSource {
    async fn get_actuals(&self, date: NaiveDate) -> SourceResult<Actuals> {
        let path = self.path_for(date);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(%date, "Actuals file not found: {}", path.display());
                return Err(SourceError::ActualsNotFound(date));
            }
            Err(source) => return Err(SourceError::Io { path, source }),
        };

        serde_json::from_str(&raw).map_err(|e| SourceError::ActualsMalformed {
            date,
            reason: e.to_string(),
        })
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}

/// Build the actuals source named by `kind` (`stub`, `file` or `live`).
///
/// The live variant spawns its listener on the current runtime and waits at
/// most the feed's connect timeout for a bar.
pub fn actuals_source_from_config(
    kind: &str,
    config: &Config,
) -> SourceResult<Box<dyn ActualsSource>> {
    let source: Box<dyn ActualsSource> = match kind.parse::<SourceKind>()? {
        SourceKind::Stub => Box::new(StubActualsSource),
        SourceKind::File => Box::new(FileActualsSource::new(&config.actuals_folder)),
        SourceKind::Live => Box::new(LiveFeedActualsSource::start(config.live_feed.clone())),
    };
    tracing::info!("Using {} actuals source", source.kind());
    Ok(source)
}

/// Verify that `filename` exists under the forecast folder and return its
/// full path.
pub fn check_forecast_path(folder: &Path, filename: &str) -> SourceResult<PathBuf> {
    let folder = resolve_folder(folder);
    if !folder.is_dir() {
        return Err(SourceError::ForecastDirectoryMissing(folder));
    }
    let path = folder.join(filename);
    if !path.is_file() {
        return Err(SourceError::Io {
            source: std::io::Error::new(ErrorKind::NotFound, "forecast file does not exist"),
            path,
        });
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use forecast_core::Scenario;
    use std::fs;

    fn jul31() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 31).unwrap()
    }

    fn forecast_dir(contents: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2025-07-31.json"), contents).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_load_forecast() {
        let dir = forecast_dir(r#"{"scenario": "fade", "resistance": 23650, "support": 23400}"#);
        let forecast = JsonFileForecastSource::new(dir.path())
            .load(jul31())
            .await
            .unwrap();
        assert_eq!(forecast.scenario, Scenario::Fade);
        assert_eq!(forecast.resistance, 23650.0);
        assert_eq!(forecast.support, Some(23400.0));
        assert_eq!(forecast.sigma_plus, None);
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = JsonFileForecastSource::new(&missing)
            .load(jul31())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::ForecastDirectoryMissing(p) if p == missing));
    }

    #[tokio::test]
    async fn test_missing_forecast_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = JsonFileForecastSource::new(dir.path())
            .load(jul31())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::ForecastNotFound(d) if d == jul31()));
    }

    #[tokio::test]
    async fn test_malformed_forecast() {
        let dir = forecast_dir("{scenario: fade");
        let err = JsonFileForecastSource::new(dir.path())
            .load(jul31())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::ForecastMalformed { .. }));

        let dir = forecast_dir("[1, 2]");
        let err = JsonFileForecastSource::new(dir.path())
            .load(jul31())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::ForecastMalformed { .. }));
    }

    #[tokio::test]
    async fn test_schema_violations() {
        for body in [
            r#"{"scenario": "breakout"}"#,
            r#"{"scenario": "breakout", "resistance": "high"}"#,
            r#"{"scenario": "breakout", "resistance": 23650, "symbol": "/NQ"}"#,
        ] {
            let dir = forecast_dir(body);
            let err = JsonFileForecastSource::new(dir.path())
                .load(jul31())
                .await
                .unwrap_err();
            assert!(
                matches!(err, SourceError::ForecastSchemaInvalid { .. }),
                "{} gave {:?}",
                body,
                err
            );
        }
    }

    #[tokio::test]
    async fn test_stub_actuals() {
        let actuals = StubActualsSource.get_actuals(jul31()).await.unwrap();
        assert_eq!(actuals.high, Some(23660.0));
        assert_eq!(actuals.low, Some(23410.0));
        assert_eq!(actuals.close, Some(23500.0));
        assert_eq!(actuals.open, None);
    }

    #[tokio::test]
    async fn test_file_actuals() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("2025-07-31.actuals.json"),
            r#"{"high": 23700, "low": 23380, "close": 23610, "open": 23450}"#,
        )
        .unwrap();
        let source = FileActualsSource::new(dir.path());
        let actuals = source.get_actuals(jul31()).await.unwrap();
        assert_eq!(actuals.open, Some(23450.0));
        assert_eq!(actuals.prev_close, None);

        let next = jul31().succ_opt().unwrap();
        assert!(matches!(
            source.get_actuals(next).await,
            Err(SourceError::ActualsNotFound(d)) if d == next
        ));
    }

    #[tokio::test]
    async fn test_file_actuals_malformed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2025-07-31.actuals.json"), "not json").unwrap();
        let err = FileActualsSource::new(dir.path())
            .get_actuals(jul31())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::ActualsMalformed { .. }));
    }

    #[test]
    fn test_check_forecast_path() {
        let dir = forecast_dir("{}");
        let path = check_forecast_path(dir.path(), "2025-07-31.json").unwrap();
        assert_eq!(path, dir.path().join("2025-07-31.json"));
        assert!(check_forecast_path(dir.path(), "2025-08-01.json").is_err());
        assert!(matches!(
            check_forecast_path(&dir.path().join("missing"), "x.json"),
            Err(SourceError::ForecastDirectoryMissing(_))
        ));
    }

    fn config_with_actuals_folder(folder: &Path) -> Config {
        let text = format!(
            r#"
forecast_folder = "./forecasts"
output_table = "./results.csv"
schedule_time = "16:15"
primary_notify_endpoint = "https://hooks.example.com/primary"
actuals_folder = "{}"

[live_feed_connection]
host = "feed.example.com"
port = 9443
"#,
            folder.display()
        );
        Config::from_toml_str(&text, &|_| None).unwrap()
    }

    #[tokio::test]
    async fn test_factory_selects_stub_and_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("2025-07-31.actuals.json"),
            r#"{"high": 23700, "low": 23400, "close": 23650}"#,
        )
        .unwrap();
        let config = config_with_actuals_folder(dir.path());

        let stub = actuals_source_from_config("stub", &config).unwrap();
        assert_eq!(stub.kind(), "stub");
        assert_eq!(stub.get_actuals(jul31()).await.unwrap(), StubActualsSource::reading());

        let file = actuals_source_from_config(" File ", &config).unwrap();
        assert_eq!(file.kind(), "file");
        assert_eq!(file.get_actuals(jul31()).await.unwrap().high, Some(23700.0));
    }

    #[test]
    fn test_factory_rejects_unknown_kind() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_actuals_folder(dir.path());
        match actuals_source_from_config("carrier-pigeon", &config) {
            Err(SourceError::UnknownSourceKind(kind)) => assert_eq!(kind, "carrier-pigeon"),
            Err(other) => panic!("expected UnknownSourceKind, got {}", other),
            Ok(source) => panic!("expected an error, got a {} source", source.kind()),
        }
    }
}
