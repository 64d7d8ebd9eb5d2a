//! Outward alert delivery
//!
//! Notifiers receive pre-formatted text. Delivery results never feed back into
//! ledger or decision state.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::info;

use crate::error::{FeedError, FeedResult};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, message: &str) -> FeedResult<()>;
}

/// Writes alerts to the log. Used when no webhook is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &str) -> FeedResult<()> {
        info!(target: "chainpulse::alerts", "📣 {}", message);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
}

/// POSTs `{"text": message}` to a chat webhook
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    timeout_ms: u64,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            url: url.to_string(),
            timeout_ms,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, message: &str) -> FeedResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { text: message })
            .send()
            .await
            .map_err(|e| FeedError::from_http(e, self.timeout_ms))?;

        if !response.status().is_success() {
            return Err(FeedError::Unavailable(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
