//! Scenario evaluation: a pure mapping from (forecast, actuals) to hit/miss.
//!
//! Rules branch on the scenario tag only. Defaults for absent operands are
//! part of each rule:
//!
//! | scenario  | hit when |
//! |-----------|----------|
//! | breakout  | `high >= resistance` |
//! | fade      | `high <= support`, falling back to `resistance` |
//! | range     | `low >= support` (0 when absent) and `high <= resistance` |
//! | trend     | `close > open`, absent operands read as 0 |
//! | reversal  | `close < open`, absent operands read as 0 |
//! | momentum  | `prev_close` present and `close > prev_close` |
//!
//! Unrecognized tags are always a miss.

use crate::{Actuals, EvaluationError, Forecast, Scenario};

/// Judge `forecast` against `actuals` under `scenario`.
///
/// Errors only when a rule needs an actuals reading that has no declared
/// default (e.g. `high` for a breakout).
pub fn evaluate(
    scenario: &Scenario,
    forecast: &Forecast,
    actuals: &Actuals,
) -> Result<bool, EvaluationError> {
    let hit = match scenario {
        Scenario::Breakout => required(scenario, "high", actuals.high)? >= forecast.resistance,
        Scenario::Fade => {
            let reference = forecast.support.unwrap_or(forecast.resistance);
            required(scenario, "high", actuals.high)? <= reference
        }
        Scenario::Range => {
            let low = required(scenario, "low", actuals.low)?;
            let high = required(scenario, "high", actuals.high)?;
            // Floor is 0, not resistance as in fade. Pending product confirmation.
            low >= forecast.support.unwrap_or(0.0) && high <= forecast.resistance
        }
        Scenario::Trend => actuals.close.unwrap_or(0.0) > actuals.open.unwrap_or(0.0),
        Scenario::Reversal => actuals.close.unwrap_or(0.0) < actuals.open.unwrap_or(0.0),
        Scenario::Momentum => match actuals.prev_close {
            Some(prev_close) => actuals.close.unwrap_or(0.0) > prev_close,
            None => false,
        },
        Scenario::Unrecognized(tag) => {
            tracing::warn!("Unknown scenario '{}', scoring as miss", tag);
            false
        }
    };
    Ok(hit)
}

fn required(
    scenario: &Scenario,
    field: &'static str,
    value: Option<f64>,
) -> Result<f64, EvaluationError> {
    value.ok_or_else(|| EvaluationError::MissingOperand {
        scenario: scenario.to_string(),
        field,
    })
}
