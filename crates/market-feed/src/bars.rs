use chrono::{DateTime, NaiveDate, Utc};
use forecast_core::{utc_today, Actuals};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One price update from the feed. `timestamp` is epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl Tick {
    /// UTC date of the tick. Ticks without a usable timestamp count as today.
    pub fn date(&self) -> NaiveDate {
        self.timestamp
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|ts| ts.date_naive())
            .unwrap_or_else(utc_today)
    }
}

/// Number of most recent dates kept in a `BarBook`.
pub const RETAINED_DAYS: usize = 7;

/// Per-date OHLC bars built from ticks. Only the latest `RETAINED_DAYS`
/// dates are kept.
#[derive(Debug, Default)]
pub struct BarBook {
    bars: BTreeMap<NaiveDate, Actuals>,
}

impl BarBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a tick into its date's bar. The first tick of a date opens the
    /// bar and carries the previous date's close as `prev_close`.
    pub fn apply(&mut self, tick: &Tick) {
        let date = tick.date();
        let prev_close = self
            .bars
            .range(..date)
            .next_back()
            .and_then(|(_, bar)| bar.close);

        let bar = self.bars.entry(date).or_insert_with(|| Actuals {
            open: Some(tick.price),
            high: Some(tick.price),
            low: Some(tick.price),
            close: Some(tick.price),
            prev_close,
        });

        bar.high = Some(bar.high.map_or(tick.price, |h| h.max(tick.price)));
        bar.low = Some(bar.low.map_or(tick.price, |l| l.min(tick.price)));
        bar.close = Some(tick.price);

        while self.bars.len() > RETAINED_DAYS {
            self.bars.pop_first();
        }
    }

    pub fn get(&self, date: NaiveDate) -> Option<Actuals> {
        self.bars.get(&date).cloned()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2025-07-31 14:00:00 UTC
    const JUL31: i64 = 1_753_970_400_000;
    const DAY_MS: i64 = 86_400_000;

    fn tick(price: f64, timestamp: i64) -> Tick {
        Tick {
            symbol: "NQ".into(),
            price,
            timestamp: Some(timestamp),
        }
    }

    #[test]
    fn test_bar_tracks_open_high_low_close() {
        let mut book = BarBook::new();
        for (i, price) in [23500.0, 23660.0, 23410.0, 23520.0].iter().enumerate() {
            book.apply(&tick(*price, JUL31 + i as i64 * 1000));
        }
        let bar = book.get(NaiveDate::from_ymd_opt(2025, 7, 31).unwrap()).unwrap();
        assert_eq!(bar.open, Some(23500.0));
        assert_eq!(bar.high, Some(23660.0));
        assert_eq!(bar.low, Some(23410.0));
        assert_eq!(bar.close, Some(23520.0));
        assert_eq!(bar.prev_close, None);
    }

    #[test]
    fn test_next_day_carries_prev_close() {
        let mut book = BarBook::new();
        book.apply(&tick(23500.0, JUL31));
        book.apply(&tick(23550.0, JUL31 + 60_000));
        book.apply(&tick(23600.0, JUL31 + DAY_MS));

        let bar = book.get(NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()).unwrap();
        assert_eq!(bar.prev_close, Some(23550.0));
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn test_old_dates_are_evicted() {
        let mut book = BarBook::new();
        for day in 0..10 {
            book.apply(&tick(23500.0 + day as f64, JUL31 + day * DAY_MS));
        }
        assert_eq!(book.len(), RETAINED_DAYS);
        assert!(book.get(NaiveDate::from_ymd_opt(2025, 8, 2).unwrap()).is_none());

        let oldest = NaiveDate::from_ymd_opt(2025, 8, 3).unwrap();
        assert_eq!(book.get(oldest).unwrap().prev_close, Some(23502.0));
        let latest = book.get(NaiveDate::from_ymd_opt(2025, 8, 9).unwrap()).unwrap();
        assert_eq!(latest.prev_close, Some(23508.0));
    }

    #[test]
    fn test_tick_date_is_utc() {
        // 2025-07-31 23:30:00 UTC is still Jul 31 whatever the local zone
        let late = tick(23500.0, JUL31 + 9 * 3_600_000 + 30 * 60_000);
        assert_eq!(late.date(), NaiveDate::from_ymd_opt(2025, 7, 31).unwrap());

        let undated = Tick {
            symbol: "NQ".into(),
            price: 23500.0,
            timestamp: None,
        };
        assert_eq!(undated.date(), utc_today());
    }
}
