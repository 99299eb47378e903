use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedImage {
    pub url: String,
}

/// The structured half of an alert: rendered as a rich embed downstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub image: EmbedImage,
    pub timestamp: DateTime<Utc>,
}

/// One outgoing alert: the text body (global template plus per-filter lines)
/// and its embed. Serializes directly as the webhook payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub content: String,
    pub embeds: Vec<Embed>,
}

/// Narrow seam to the delivery channel. Delivery failures are the caller's
/// to log; the pipeline never retries.
pub trait AlertSink: Send + Sync {
    fn deliver(&self, alert: Alert) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Delivers alerts by POSTing the payload to a webhook URL.
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("mystic-alerts/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl AlertSink for WebhookSink {
    async fn deliver(&self, alert: Alert) -> anyhow::Result<()> {
        let response = self.client.post(&self.url).json(&alert).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("webhook returned {}", response.status());
        }
        Ok(())
    }
}
