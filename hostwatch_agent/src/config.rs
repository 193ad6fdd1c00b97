//! Agent configuration: loaded once at startup, immutable afterwards.
//!
//! The file (YAML, JSON or TOML, picked by extension) is merged with
//! `HOSTWATCH__SECTION__KEY` environment overrides, deserialized into a raw
//! document and then validated into [`AgentConfig`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::notify::AlertChannel;
use crate::types::MetricFamily;

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
pub const ENV_PREFIX: &str = "HOSTWATCH";

// Upper bound keeps the chrono window arithmetic far from overflow.
const MAX_COOLDOWN_MINUTES: u64 = 525_600;

// ---------- Raw document (as written in the file) ----------

#[derive(Debug, Deserialize)]
struct ConfigDocument {
    endpoint: EndpointDocument,
    interval_seconds: u64,
    thresholds: ThresholdConfig,
    #[serde(default)]
    alerts: AlertsDocument,
    #[serde(default)]
    metrics: MetricsSettings,
    #[serde(default)]
    logging: LoggingDocument,
    /// Flat spelling of `logging.level`; the nested key wins when both are set.
    #[serde(default)]
    log_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EndpointDocument {
    url: String,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default = "default_retry_delay")]
    retry_delay: f64,
    #[serde(default = "default_timeout")]
    timeout: f64,
}

#[derive(Debug, Deserialize)]
struct AlertsDocument {
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_cooldown_minutes")]
    cooldown_minutes: u64,
    #[serde(default = "default_channels")]
    channels: Vec<String>,
    #[serde(default)]
    slack_webhook_url: Option<String>,
}

impl Default for AlertsDocument {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_minutes: default_cooldown_minutes(),
            channels: default_channels(),
            slack_webhook_url: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoggingDocument {
    #[serde(default)]
    level: Option<String>,
    #[serde(default = "default_log_format")]
    format: String,
}

impl Default for LoggingDocument {
    fn default() -> Self {
        Self {
            level: None,
            format: default_log_format(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    5.0
}

fn default_timeout() -> f64 {
    10.0
}

fn default_true() -> bool {
    true
}

fn default_cooldown_minutes() -> u64 {
    5
}

fn default_channels() -> Vec<String> {
    vec!["log".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

// ---------- Validated configuration ----------

/// Alert thresholds in percent; a value strictly above the threshold breaches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
    pub swap: f64,
}

impl ThresholdConfig {
    pub fn get(&self, family: MetricFamily) -> f64 {
        match family {
            MetricFamily::Cpu => self.cpu,
            MetricFamily::Memory => self.memory,
            MetricFamily::Disk => self.disk,
            MetricFamily::Swap => self.swap,
        }
    }
}

/// `(max_retries, retry_delay, timeout)` governing delivery to the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointConfig {
    pub url: String,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertSettings {
    pub enabled: bool,
    pub cooldown_minutes: u64,
    pub channels: Vec<AlertChannel>,
    pub slack_webhook_url: Option<String>,
}

impl AlertSettings {
    pub fn cooldown_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cooldown_minutes as i64)
    }
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_minutes: default_cooldown_minutes(),
            channels: vec![AlertChannel::Log],
            slack_webhook_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSettings {
    #[serde(default = "default_true")]
    pub include_network: bool,
    // Accepted for compatibility; process listings are not collected.
    #[serde(default)]
    pub include_processes: bool,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            include_network: true,
            include_processes: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentConfig {
    pub endpoint: EndpointConfig,
    pub interval: Duration,
    pub thresholds: ThresholdConfig,
    pub alerts: AlertSettings,
    pub metrics: MetricsSettings,
    pub logging: LoggingSettings,
}

impl AgentConfig {
    /// Load from a file (format by extension) plus `HOSTWATCH__*` env overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let doc: ConfigDocument = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Self::validate(doc)
    }

    /// Parse an in-memory document; no environment overrides.
    pub fn parse(contents: &str, format: config::FileFormat) -> Result<Self, ConfigError> {
        let doc: ConfigDocument = config::Config::builder()
            .add_source(config::File::from_str(contents, format))
            .build()?
            .try_deserialize()?;
        Self::validate(doc)
    }

    fn validate(doc: ConfigDocument) -> Result<Self, ConfigError> {
        let url = doc.endpoint.url.trim().to_string();
        if url.is_empty() {
            return Err(ConfigError::invalid("endpoint.url", "must not be empty"));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::invalid(
                "endpoint.url",
                format!("`{url}` is not an http(s) URL"),
            ));
        }
        if doc.endpoint.max_retries == 0 {
            return Err(ConfigError::invalid("endpoint.max_retries", "must be at least 1"));
        }
        let retry_delay = seconds("endpoint.retry_delay", doc.endpoint.retry_delay, true)?;
        let timeout = seconds("endpoint.timeout", doc.endpoint.timeout, false)?;

        if doc.interval_seconds == 0 {
            return Err(ConfigError::invalid("interval_seconds", "must be at least 1"));
        }

        let t = doc.thresholds;
        for (field, v) in [
            ("thresholds.cpu", t.cpu),
            ("thresholds.memory", t.memory),
            ("thresholds.disk", t.disk),
            ("thresholds.swap", t.swap),
        ] {
            if !(v > 0.0 && v <= 100.0) {
                return Err(ConfigError::invalid(field, format!("{v} is outside (0, 100]")));
            }
        }

        if doc.alerts.cooldown_minutes > MAX_COOLDOWN_MINUTES {
            return Err(ConfigError::invalid(
                "alerts.cooldown_minutes",
                format!("must be at most {MAX_COOLDOWN_MINUTES}"),
            ));
        }
        let mut channels = Vec::with_capacity(doc.alerts.channels.len());
        for name in &doc.alerts.channels {
            let ch: AlertChannel = name.parse().map_err(|_| {
                ConfigError::invalid("alerts.channels", format!("unknown channel `{name}`"))
            })?;
            if !channels.contains(&ch) {
                channels.push(ch);
            }
        }
        let slack_webhook_url = doc
            .alerts
            .slack_webhook_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        if channels.contains(&AlertChannel::Slack) && slack_webhook_url.is_none() {
            return Err(ConfigError::invalid(
                "alerts.slack_webhook_url",
                "required when the slack channel is enabled",
            ));
        }

        let raw_level = doc
            .logging
            .level
            .or(doc.log_level)
            .unwrap_or_else(default_log_level);
        let level = raw_level.trim().to_ascii_lowercase();
        if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
            return Err(ConfigError::invalid(
                "logging.level",
                format!("unknown level `{raw_level}`"),
            ));
        }
        let format = match doc.logging.format.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" | "text" => LogFormat::Pretty,
            other => {
                return Err(ConfigError::invalid(
                    "logging.format",
                    format!("unknown format `{other}`"),
                ))
            }
        };

        Ok(Self {
            endpoint: EndpointConfig {
                url,
                retry: RetryPolicy {
                    max_retries: doc.endpoint.max_retries,
                    retry_delay,
                    timeout,
                },
            },
            interval: Duration::from_secs(doc.interval_seconds),
            thresholds: t,
            alerts: AlertSettings {
                enabled: doc.alerts.enabled,
                cooldown_minutes: doc.alerts.cooldown_minutes,
                channels,
                slack_webhook_url,
            },
            metrics: doc.metrics,
            logging: LoggingSettings { level, format },
        })
    }
}

fn seconds(field: &'static str, v: f64, allow_zero: bool) -> Result<Duration, ConfigError> {
    if !v.is_finite() || v < 0.0 || (!allow_zero && v == 0.0) {
        return Err(ConfigError::invalid(field, format!("{v} is not a valid number of seconds")));
    }
    Duration::try_from_secs_f64(v).map_err(|e| ConfigError::invalid(field, e.to_string()))
}
