//! Webhook trigger client.
//!
//! One outbound request per trigger; the response must name the event
//! stream that carries the run's progress.

pub mod http;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RelayConfig;
use crate::error::TriggerError;
use crate::types::{Agent, HttpMethod};
use crate::util::timeout::with_timeout;

/// Address of the event stream returned by a successful trigger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamAddress(String);

impl StreamAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Starts a remote run for an agent.
///
/// Implementations must not retry and must not touch session state; the
/// caller records the outcome.
#[async_trait]
pub trait Trigger: Send + Sync {
    async fn trigger(&self, agent: &Agent) -> Result<StreamAddress, TriggerError>;
}

/// [`Trigger`] backed by a real HTTP call to the agent's webhook.
#[derive(Debug, Clone)]
pub struct WebhookTrigger {
    client: reqwest::Client,
    source: String,
    timeout: Duration,
}

impl Default for WebhookTrigger {
    fn default() -> Self {
        Self::new(&RelayConfig::default())
    }
}

impl WebhookTrigger {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            client: http::trigger_client().clone(),
            source: config.trigger_source.clone(),
            timeout: config.trigger_timeout,
        }
    }

    /// Use a caller-supplied client (proxies, custom TLS roots).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn send(&self, agent: &Agent) -> Result<StreamAddress, TriggerError> {
        let body = http::trigger_body(&self.source, Utc::now(), agent.payload.as_deref());

        let request = match agent.method {
            HttpMethod::Post => self.client.post(&agent.webhook_url).json(&body),
            HttpMethod::Get => self
                .client
                .get(&agent.webhook_url)
                .query(&http::query_pairs(&body)),
        };

        let resp = request.headers(http::json_headers()).send().await?;

        let status = resp.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), "webhook rejected trigger");
            return Err(TriggerError::HttpStatus(status.as_u16()));
        }

        let text = resp.text().await?;
        let address = http::extract_stream_address(&agent.webhook_url, &text)?;
        Ok(StreamAddress::new(address))
    }
}

#[async_trait]
impl Trigger for WebhookTrigger {
    async fn trigger(&self, agent: &Agent) -> Result<StreamAddress, TriggerError> {
        debug!(
            agent_id = %agent.id,
            method = %agent.method,
            url = %agent.webhook_url,
            "triggering webhook"
        );
        with_timeout(self.timeout, self.send(agent)).await
    }
}
