//! Configuration resolver.
//!
//! Settings come from a TOML document. Any string value written as
//! `${NAME:-default}` is replaced by the environment variable `NAME`, or by
//! `default` when the variable is unset. `${NAME}` with no default resolves to
//! the variable or is treated as absent.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use forecast_core::DEFAULT_SYMBOL;
use market_feed::LiveFeedConfig;
use ml_client::LlmConfig;
use notification_service::{EmailConfig, NotificationConfig, RetryPolicy};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use thiserror::Error;
use toml::{Table, Value};

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";
pub const CONFIG_PATH_ENV: &str = "PREDICTION_LOGGER_CONFIG";

const REQUIRED_KEYS: [&str; 5] = [
    "forecast_folder",
    "output_table",
    "schedule_time",
    "primary_notify_endpoint",
    "live_feed_connection",
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required config keys: {}", .0.join(", "))]
    MissingRequiredKeys(Vec<String>),

    #[error("Invalid value for '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone)]
pub struct Config {
    pub forecast_folder: PathBuf,
    pub output_table: PathBuf,
    /// Scheduling hint for the external scheduler. Not interpreted here.
    pub schedule_time: String,
    pub primary_notify_endpoint: String,
    pub secondary_notify_endpoint: Option<String>,
    pub live_feed: LiveFeedConfig,
    pub actuals_source: String,
    pub actuals_folder: PathBuf,
    pub symbol: String,
    pub model_path: Option<PathBuf>,
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub notify_timeout: Duration,
    pub email: Option<EmailConfig>,
}

impl Config {
    /// Load from `path`, resolving placeholders against the process environment.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::ConfigNotFound(path.to_path_buf()))
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let config = Self::from_toml_str(&text, &|name| std::env::var(name).ok())?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse a TOML document, resolving placeholders through `env`.
    pub fn from_toml_str(text: &str, env: &dyn Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let mut table: Table = text.parse()?;
        resolve_table(&mut table, env);

        let missing: Vec<String> = REQUIRED_KEYS
            .iter()
            .filter(|key| !is_present(table.get(**key)))
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingRequiredKeys(missing));
        }

        let file = ConfigFile::deserialize(Value::Table(table))?;
        file.try_into()
    }

    pub fn notification_config(&self) -> NotificationConfig {
        NotificationConfig {
            primary_webhook_url: Some(self.primary_notify_endpoint.clone()),
            secondary_webhook_url: self.secondary_notify_endpoint.clone(),
            email: self.email.clone(),
            timeout: self.notify_timeout,
            primary_retry: RetryPolicy::exponential(3),
        }
    }

    pub fn llm_config(&self) -> LlmConfig {
        let mut llm = LlmConfig::default();
        if let Some(ref base_url) = self.llm_base_url {
            llm.base_url = base_url.clone();
        }
        if let Some(ref model) = self.llm_model {
            llm.model = model.clone();
        }
        if self.llm_api_key.is_some() {
            llm.api_key = self.llm_api_key.clone();
        }
        llm
    }
}

/// Write-once holder for the process configuration. The first successful
/// load wins; later calls return the same `Arc` without touching the file.
#[derive(Debug, Default)]
pub struct ConfigCache {
    cell: OnceLock<Arc<Config>>,
}

impl ConfigCache {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    pub fn get_or_load(&self, path: &Path) -> ConfigResult<Arc<Config>> {
        if let Some(config) = self.cell.get() {
            return Ok(Arc::clone(config));
        }
        let loaded = Arc::new(Config::load(path)?);
        Ok(Arc::clone(self.cell.get_or_init(|| loaded)))
    }

    pub fn get(&self) -> Option<Arc<Config>> {
        self.cell.get().cloned()
    }
}

enum Resolved {
    Literal,
    Value(String),
    Unset,
}

fn resolve_placeholder(raw: &str, env: &dyn Fn(&str) -> Option<String>) -> Resolved {
    let Some(inner) = raw
        .trim()
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    else {
        return Resolved::Literal;
    };

    match inner.split_once(":-") {
        Some((name, default)) => Resolved::Value(
            env(name.trim())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string()),
        ),
        None => match env(inner.trim()) {
            Some(value) if !value.is_empty() => Resolved::Value(value),
            _ => Resolved::Unset,
        },
    }
}

fn resolve_table(table: &mut Table, env: &dyn Fn(&str) -> Option<String>) {
    let mut unset = Vec::new();
    for (key, value) in table.iter_mut() {
        if !resolve_value(value, env) {
            unset.push(key.clone());
        }
    }
    for key in unset {
        tracing::debug!("Config placeholder for '{}' is unset", key);
        table.remove(&key);
    }
}

/// Returns false when `value` was a placeholder with nothing to resolve to.
fn resolve_value(value: &mut Value, env: &dyn Fn(&str) -> Option<String>) -> bool {
    match value {
        Value::String(raw) => match resolve_placeholder(raw, env) {
            Resolved::Literal => true,
            Resolved::Value(resolved) => {
                *raw = resolved;
                true
            }
            Resolved::Unset => false,
        },
        Value::Array(items) => {
            items.retain_mut(|item| resolve_value(item, env));
            true
        }
        Value::Table(table) => {
            resolve_table(table, env);
            true
        }
        _ => true,
    }
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// On-disk shape of the config document, after placeholder resolution.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    forecast_folder: String,
    output_table: String,
    schedule_time: String,
    primary_notify_endpoint: String,
    secondary_notify_endpoint: Option<String>,
    live_feed_connection: FeedSection,
    actuals_source: Option<String>,
    actuals_folder: Option<String>,
    symbol: Option<String>,
    model_path: Option<String>,
    llm_base_url: Option<String>,
    llm_model: Option<String>,
    llm_api_key: Option<String>,
    #[serde(default = "default_timeout_secs", deserialize_with = "number_or_string")]
    notify_timeout_secs: u64,
    email: Option<EmailSection>,
}

#[derive(Debug, Deserialize)]
struct FeedSection {
    host: String,
    #[serde(deserialize_with = "number_or_string")]
    port: u16,
    #[serde(default, deserialize_with = "bool_or_string")]
    use_ssl: bool,
    symbols: Option<OneOrMany>,
    #[serde(default = "default_timeout_secs", deserialize_with = "number_or_string")]
    connect_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct EmailSection {
    to: Option<OneOrMany>,
    from: Option<String>,
    smtp_server: Option<String>,
    #[serde(default = "default_smtp_port", deserialize_with = "number_or_string")]
    smtp_port: u16,
    smtp_user: Option<String>,
    smtp_pass: Option<String>,
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BoolOrString {
    Bool(bool),
    Text(String),
}

/// A list, or one comma-separated string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<String>),
    One(String),
}

impl OneOrMany {
    fn into_list(self) -> Option<Vec<String>> {
        let items: Vec<String> = match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(joined) => joined.split(',').map(String::from).collect(),
        };
        let items: Vec<String> = items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        (!items.is_empty()).then_some(items)
    }
}

/// Placeholders always resolve to strings, so numeric fields accept both.
fn number_or_string<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64> + FromStr,
    <T as FromStr>::Err: fmt::Display,
{
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => T::try_from(n)
            .map_err(|_| de::Error::custom(format!("{} is out of range", n))),
        NumberOrString::Text(text) => text
            .trim()
            .parse()
            .map_err(|e| de::Error::custom(format!("'{}' is not a number: {}", text, e))),
    }
}

fn bool_or_string<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match BoolOrString::deserialize(deserializer)? {
        BoolOrString::Bool(b) => Ok(b),
        BoolOrString::Text(text) => match text.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" => Ok(false),
            other => Err(de::Error::custom(format!("'{}' is not a boolean", other))),
        },
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl TryFrom<ConfigFile> for Config {
    type Error = ConfigError;

    fn try_from(file: ConfigFile) -> ConfigResult<Self> {
        Ok(Self {
            forecast_folder: PathBuf::from(file.forecast_folder.trim()),
            output_table: PathBuf::from(file.output_table.trim()),
            schedule_time: file.schedule_time.trim().to_string(),
            primary_notify_endpoint: file.primary_notify_endpoint.trim().to_string(),
            secondary_notify_endpoint: non_blank(file.secondary_notify_endpoint),
            live_feed: file.live_feed_connection.try_into()?,
            actuals_source: non_blank(file.actuals_source).unwrap_or_else(|| "stub".into()),
            actuals_folder: non_blank(file.actuals_folder)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./actuals")),
            symbol: non_blank(file.symbol).unwrap_or_else(|| DEFAULT_SYMBOL.into()),
            model_path: non_blank(file.model_path).map(PathBuf::from),
            llm_base_url: non_blank(file.llm_base_url),
            llm_model: non_blank(file.llm_model),
            llm_api_key: non_blank(file.llm_api_key),
            notify_timeout: Duration::from_secs(file.notify_timeout_secs),
            email: file.email.and_then(EmailSection::into_config),
        })
    }
}

impl TryFrom<FeedSection> for LiveFeedConfig {
    type Error = ConfigError;

    fn try_from(feed: FeedSection) -> ConfigResult<Self> {
        let host = feed.host.trim().to_string();
        if host.is_empty() {
            return Err(invalid("live_feed_connection.host", "must not be empty"));
        }
        Ok(LiveFeedConfig {
            host,
            port: feed.port,
            use_ssl: feed.use_ssl,
            symbols: feed
                .symbols
                .and_then(OneOrMany::into_list)
                .unwrap_or_else(|| vec!["NQ".to_string()]),
            connect_timeout: Duration::from_secs(feed.connect_timeout_secs),
        })
    }
}

impl EmailSection {
    fn into_config(self) -> Option<EmailConfig> {
        let to = self.to.and_then(OneOrMany::into_list);
        let from = non_blank(self.from);
        let server = non_blank(self.smtp_server);

        let (Some(to), Some(from), Some(server)) = (to, from, server) else {
            tracing::warn!("Email settings incomplete (need to, from, smtp_server); email channel disabled");
            return None;
        };
        Some(EmailConfig {
            to,
            from,
            server,
            port: self.smtp_port,
            username: non_blank(self.smtp_user),
            password: non_blank(self.smtp_pass),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const BASE: &str = r#"
forecast_folder = "./forecasts"
output_table = "./results/results.csv"
schedule_time = "16:15"
primary_notify_endpoint = "https://hooks.example.com/primary"

[live_feed_connection]
host = "feed.example.com"
port = 9443
use_ssl = true
"#;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = Config::from_toml_str(BASE, &env_of(&[])).unwrap();
        assert_eq!(config.forecast_folder, PathBuf::from("./forecasts"));
        assert_eq!(config.actuals_source, "stub");
        assert_eq!(config.actuals_folder, PathBuf::from("./actuals"));
        assert_eq!(config.symbol, "/NQ");
        assert_eq!(config.notify_timeout, Duration::from_secs(5));
        assert!(config.email.is_none());
        assert_eq!(config.live_feed.url(), "wss://feed.example.com:9443");
        assert_eq!(config.live_feed.symbols, vec!["NQ".to_string()]);
    }

    #[test]
    fn test_placeholder_uses_env_then_default() {
        let text = format!(
            "symbol = \"${{SYMBOL:-/ES}}\"\n{}",
            BASE.replace("\"./forecasts\"", "\"${FORECAST_DIR:-./forecasts}\"")
        );

        let config = Config::from_toml_str(&text, &env_of(&[])).unwrap();
        assert_eq!(config.forecast_folder, PathBuf::from("./forecasts"));
        assert_eq!(config.symbol, "/ES");

        let env = env_of(&[("FORECAST_DIR", "/data/forecasts"), ("SYMBOL", "/NQ")]);
        let config = Config::from_toml_str(&text, &env).unwrap();
        assert_eq!(config.forecast_folder, PathBuf::from("/data/forecasts"));
        assert_eq!(config.symbol, "/NQ");
    }

    #[test]
    fn test_nested_placeholder_in_feed_table() {
        let text = BASE.replace("port = 9443", "port = \"${FEED_PORT:-9000}\"");
        let config = Config::from_toml_str(&text, &env_of(&[])).unwrap();
        assert_eq!(config.live_feed.port, 9000);

        let config = Config::from_toml_str(&text, &env_of(&[("FEED_PORT", "7001")])).unwrap();
        assert_eq!(config.live_feed.port, 7001);
    }

    #[test]
    fn test_numeric_fields_accept_strings() {
        let text = format!(
            "notify_timeout_secs = \"${{NOTIFY_SECS:-3}}\"\n{}connect_timeout_secs = \" 12 \"\nuse_ssl = \"no\"\nsymbols = [\"NQ\", \"ES\"]\n",
            BASE.replace("use_ssl = true\n", "")
        );
        let config = Config::from_toml_str(&text, &env_of(&[])).unwrap();
        assert_eq!(config.notify_timeout, Duration::from_secs(3));
        assert_eq!(config.live_feed.connect_timeout, Duration::from_secs(12));
        assert!(!config.live_feed.use_ssl);
        assert_eq!(config.live_feed.symbols, vec!["NQ".to_string(), "ES".to_string()]);
    }

    #[test]
    fn test_bad_port_is_a_parse_error() {
        let text = BASE.replace("port = 9443", "port = \"ninety\"");
        assert!(matches!(
            Config::from_toml_str(&text, &env_of(&[])),
            Err(ConfigError::Parse(_))
        ));

        let text = BASE.replace("port = 9443", "port = 70000");
        assert!(matches!(
            Config::from_toml_str(&text, &env_of(&[])),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_blank_feed_host_is_invalid() {
        let text = BASE.replace("\"feed.example.com\"", "\" \"");
        match Config::from_toml_str(&text, &env_of(&[])) {
            Err(ConfigError::Invalid { key, .. }) => assert_eq!(key, "live_feed_connection.host"),
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_required_keys_are_all_listed() {
        let text = r#"
forecast_folder = "./forecasts"
primary_notify_endpoint = "${PRIMARY_HOOK}"
"#;
        match Config::from_toml_str(text, &env_of(&[])) {
            Err(ConfigError::MissingRequiredKeys(keys)) => assert_eq!(
                keys,
                vec![
                    "output_table".to_string(),
                    "schedule_time".to_string(),
                    "primary_notify_endpoint".to_string(),
                    "live_feed_connection".to_string(),
                ]
            ),
            other => panic!("expected MissingRequiredKeys, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_string_counts_as_missing() {
        let text = BASE.replace("\"16:15\"", "\"\"");
        match Config::from_toml_str(&text, &env_of(&[])) {
            Err(ConfigError::MissingRequiredKeys(keys)) => {
                assert_eq!(keys, vec!["schedule_time".to_string()])
            }
            other => panic!("expected MissingRequiredKeys, got {:?}", other),
        }
    }

    #[test]
    fn test_email_table() {
        let text = format!(
            "{}\n[email]\nto = \"ops@example.com, desk@example.com\"\nfrom = \"logger@example.com\"\nsmtp_server = \"smtp.example.com\"\nsmtp_pass = \"${{SMTP_PASS}}\"\n",
            BASE
        );
        let config = Config::from_toml_str(&text, &env_of(&[])).unwrap();
        let email = config.email.unwrap();
        assert_eq!(email.to.len(), 2);
        assert_eq!(email.port, 587);
        assert!(email.password.is_none());
    }

    #[test]
    fn test_incomplete_email_disables_channel() {
        let text = format!("{}\n[email]\nto = \"ops@example.com\"\n", BASE);
        let config = Config::from_toml_str(&text, &env_of(&[])).unwrap();
        assert!(config.email.is_none());
    }

    #[test]
    fn test_notification_config_mapping() {
        let text = format!(
            "secondary_notify_endpoint = \"https://hooks.example.com/backup\"\nnotify_timeout_secs = 2\n{}",
            BASE
        );
        let config = Config::from_toml_str(&text, &env_of(&[])).unwrap();
        let notify = config.notification_config();
        assert_eq!(
            notify.primary_webhook_url.as_deref(),
            Some("https://hooks.example.com/primary")
        );
        assert_eq!(
            notify.secondary_webhook_url.as_deref(),
            Some("https://hooks.example.com/backup")
        );
        assert_eq!(notify.timeout, Duration::from_secs(2));
        assert_eq!(notify.primary_retry.max_attempts, 3);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::ConfigNotFound(p)) if p == path
        ));
    }

    #[test]
    fn test_cache_first_load_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, BASE).unwrap();

        let cache = ConfigCache::new();
        assert!(cache.get().is_none());
        let first = cache.get_or_load(&path).unwrap();

        std::fs::write(&path, BASE.replace("16:15", "09:30")).unwrap();
        let second = cache.get_or_load(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.schedule_time, "16:15");
    }
}
