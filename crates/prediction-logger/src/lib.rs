pub mod config;
pub mod pipeline;
pub mod sources;

pub use config::{Config, ConfigCache, ConfigError, ConfigResult};
pub use pipeline::{Enrichment, Pipeline, RunReport, RunState, Stage};
pub use sources::{
    actuals_source_from_config, check_forecast_path, FileActualsSource, JsonFileForecastSource,
    StubActualsSource,
};
