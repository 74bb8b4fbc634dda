//! Streaming market data for the live actuals source.
//!
//! A [`LiveFeed`] listens on a websocket, folds price ticks into one OHLC bar
//! per trading date, and exposes those bars through
//! [`LiveFeedActualsSource`], which implements the same `get_actuals`
//! contract as the file and stub sources.

mod bars;
mod websocket;

pub use bars::{BarBook, Tick};
pub use websocket::{FeedError, LiveFeed, LiveFeedActualsSource, LiveFeedConfig};
