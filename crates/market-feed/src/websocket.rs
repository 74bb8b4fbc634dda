use async_trait::async_trait;
use chrono::NaiveDate;
use forecast_core::{Actuals, ActualsSource, SourceError, SourceResult};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::bars::{BarBook, Tick};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("connect to {url} timed out after {timeout:?}")]
    ConnectTimeout { url: String, timeout: Duration },
    #[error("websocket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
}

#[derive(Debug, Clone)]
pub struct LiveFeedConfig {
    pub host: String,
    pub port: u16,
    pub use_ssl: bool,
    pub symbols: Vec<String>,
    pub connect_timeout: Duration,
}

impl LiveFeedConfig {
    pub fn url(&self) -> String {
        let scheme = if self.use_ssl { "wss" } else { "ws" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Long-lived websocket listener that aggregates ticks into daily bars.
pub struct LiveFeed {
    config: LiveFeedConfig,
    symbols: HashSet<String>,
    bars: RwLock<BarBook>,
    last_error: RwLock<Option<String>>,
    updated: Notify,
    shutdown: Notify,
}

impl LiveFeed {
    pub fn new(config: LiveFeedConfig) -> Self {
        let symbols = config.symbols.iter().map(|s| s.to_uppercase()).collect();
        Self {
            config,
            symbols,
            bars: RwLock::new(BarBook::new()),
            last_error: RwLock::new(None),
            updated: Notify::new(),
            shutdown: Notify::new(),
        }
    }

    /// Start the listener on the current runtime.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let feed = Arc::clone(self);
        tokio::spawn(async move { feed.run().await })
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Stream until shutdown, reconnecting after errors.
    pub async fn run(&self) {
        loop {
            match self.connect_and_stream().await {
                Ok(()) => {
                    tracing::info!("Live feed disconnected gracefully");
                    break;
                }
                Err(e) => {
                    tracing::error!("Live feed error: {}, reconnecting in {:?}", e, RECONNECT_DELAY);
                    self.set_last_error(e.to_string());
                    tokio::select! {
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {},
                        _ = self.shutdown.notified() => {
                            tracing::info!("Live feed shutdown requested");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn connect_and_stream(&self) -> Result<(), FeedError> {
        let url = self.config.url();
        let (ws_stream, _) = tokio::time::timeout(self.config.connect_timeout, connect_async(&url))
            .await
            .map_err(|_| FeedError::ConnectTimeout {
                url: url.clone(),
                timeout: self.config.connect_timeout,
            })??;
        let (mut write, mut read) = ws_stream.split();
        tracing::info!("Connected to live feed at {}", url);

        let sub_msg = serde_json::json!({"action": "subscribe", "symbols": self.config.symbols});
        write.send(Message::Text(sub_msg.to_string())).await?;
        tracing::info!("Subscribed to {} symbols", self.config.symbols.len());

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_message(&text);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!("Live feed connection closed");
                            return Ok(());
                        }
                        Some(Err(e)) => {
                            return Err(e.into());
                        }
                        _ => {}
                    }
                }
                _ = self.shutdown.notified() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }

    /// Apply a feed message: a single tick object or an array of them.
    /// Anything else is logged and dropped.
    pub fn handle_message(&self, text: &str) {
        let ticks: Vec<Tick> = match serde_json::from_str::<serde_json::Value>(text) {
            Ok(serde_json::Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| serde_json::from_value::<Tick>(item).ok())
                .collect(),
            Ok(value @ serde_json::Value::Object(_)) => {
                serde_json::from_value::<Tick>(value).into_iter().collect()
            }
            _ => {
                tracing::debug!("Ignoring non-tick feed message: {}", text);
                return;
            }
        };

        let mut applied = 0;
        {
            let mut bars = self.bars.write().unwrap_or_else(|e| e.into_inner());
            for tick in ticks.iter().filter(|t| self.accepts(&t.symbol)) {
                bars.apply(tick);
                applied += 1;
            }
        }
        if applied > 0 {
            tracing::debug!("Applied {} ticks", applied);
            self.updated.notify_waiters();
        }
    }

    fn accepts(&self, symbol: &str) -> bool {
        self.symbols.is_empty() || self.symbols.contains(&symbol.to_uppercase())
    }

    pub fn bar(&self, date: NaiveDate) -> Option<Actuals> {
        self.bars.read().unwrap_or_else(|e| e.into_inner()).get(date)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_last_error(&self, error: String) {
        *self.last_error.write().unwrap_or_else(|e| e.into_inner()) = Some(error);
    }

    /// Wait up to `wait` for the bar of `date` to appear.
    pub async fn wait_for_bar(&self, date: NaiveDate, wait: Duration) -> Option<Actuals> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let notified = self.updated.notified();
            if let Some(bar) = self.bar(date) {
                return Some(bar);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.bar(date);
            }
        }
    }
}

/// Actuals source backed by a running [`LiveFeed`].
pub struct LiveFeedActualsSource {
    feed: Arc<LiveFeed>,
    wait: Duration,
    listener: Option<JoinHandle<()>>,
}

impl LiveFeedActualsSource {
    /// Spawn the feed listener and wrap it as an actuals source. Lookups wait
    /// at most the configured connect timeout for the date's bar.
    pub fn start(config: LiveFeedConfig) -> Self {
        let wait = config.connect_timeout;
        let feed = Arc::new(LiveFeed::new(config));
        let listener = feed.spawn();
        Self {
            feed,
            wait,
            listener: Some(listener),
        }
    }

    /// Wrap an existing feed without spawning a listener.
    pub fn from_feed(feed: Arc<LiveFeed>, wait: Duration) -> Self {
        Self {
            feed,
            wait,
            listener: None,
        }
    }
}

impl Drop for LiveFeedActualsSource {
    fn drop(&mut self) {
        self.feed.shutdown();
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

#[async_trait]
impl ActualsSource for LiveFeedActualsSource {
    async fn get_actuals(&self, date: NaiveDate) -> SourceResult<Actuals> {
        match self.feed.wait_for_bar(date, self.wait).await {
            Some(bar) => Ok(bar),
            None => match self.feed.last_error() {
                Some(e) => Err(SourceError::Feed(e)),
                None => Err(SourceError::ActualsNotFound(date)),
            },
        }
    }

    fn kind(&self) -> &'static str {
        "live"
    }
}
