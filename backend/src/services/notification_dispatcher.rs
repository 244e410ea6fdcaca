//! Best-effort webhook alerts for suspicious session activity.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Anything that can deliver a JSON payload to a URL.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, url: &str, payload: Value) -> anyhow::Result<()>;
}

/// Posts payloads to a webhook endpoint.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http_client: Client,
}

impl WebhookNotifier {
    /// Creates a new WebhookNotifier instance.
    pub fn new() -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("session-backend/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, url: &str, payload: Value) -> anyhow::Result<()> {
        if url.is_empty() {
            return Ok(());
        }

        let response = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if response.status().is_success() {
            info!("Webhook notification sent successfully to {}", url);
        } else {
            warn!(
                "Webhook notification failed with status {}: {}",
                response.status(),
                url
            );
        }

        Ok(())
    }
}

/// Hands a payload to the notifier on a background task and returns at once.
///
/// Delivery errors are logged and otherwise dropped. An empty url sends
/// nothing.
pub fn dispatch(notifier: Arc<dyn Notifier>, url: String, payload: Value) {
    if url.is_empty() {
        return;
    }

    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&url, payload).await {
            error!("Failed to deliver webhook notification to {}: {}", url, e);
        }
    });
}
