//! Alert delivery channels.
//!
//! The evaluator only decides *when* to notify; [`AlertSink`] does the
//! delivery. [`ChannelNotifier`] is the production sink: `log` writes a
//! warning event, `slack` posts to an incoming webhook, `email` has no
//! transport in this agent and always reports itself unconfigured.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::error::AlertError;

const SLACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertChannel {
    Slack,
    Email,
    Log,
}

impl AlertChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Slack => "slack",
            Self::Email => "email",
            Self::Log => "log",
        }
    }
}

impl fmt::Display for AlertChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertChannel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slack" => Ok(Self::Slack),
            "email" => Ok(Self::Email),
            "log" => Ok(Self::Log),
            _ => Err(()),
        }
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, channel: AlertChannel, message: &str) -> Result<(), AlertError>;
}

pub struct ChannelNotifier {
    client: reqwest::Client,
    slack_webhook_url: Option<String>,
}

impl ChannelNotifier {
    pub fn new(slack_webhook_url: Option<String>) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder().timeout(SLACK_TIMEOUT).build()?;
        Ok(Self {
            client,
            slack_webhook_url,
        })
    }

    async fn post_slack(&self, url: &str, message: &str) -> Result<(), AlertError> {
        let body = serde_json::json!({ "text": format!("🚨 ALERT: {message}") });
        let resp = self.client.post(url).json(&body).send().await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(AlertError::Rejected(status.as_u16()))
        }
    }
}

#[async_trait]
impl AlertSink for ChannelNotifier {
    async fn notify(&self, channel: AlertChannel, message: &str) -> Result<(), AlertError> {
        match channel {
            AlertChannel::Log => {
                warn!(channel = "log", alert = %message, "ALERT: {message}");
                Ok(())
            }
            AlertChannel::Slack => match self.slack_webhook_url.as_deref() {
                Some(url) => self.post_slack(url, message).await,
                None => Err(AlertError::NotConfigured("slack")),
            },
            AlertChannel::Email => Err(AlertError::NotConfigured("email")),
        }
    }
}
