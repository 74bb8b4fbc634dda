use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{Actuals, Forecast, SourceResult};

/// Anything that can produce the forecast for a trading date.
#[async_trait]
pub trait ForecastSource: Send + Sync {
    async fn load(&self, date: NaiveDate) -> SourceResult<Forecast>;
}

/// Anything that can produce the realized market readings for a trading date.
///
/// Implementations must return (not hang) when data is unavailable: a
/// streaming source reports `ActualsNotFound` or `Feed` after a bounded wait.
#[async_trait]
pub trait ActualsSource: Send + Sync {
    async fn get_actuals(&self, date: NaiveDate) -> SourceResult<Actuals>;

    fn kind(&self) -> &'static str;
}
