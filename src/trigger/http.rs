//! HTTP clients, headers, and trigger body construction.

use std::sync::OnceLock;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::{Map, Value};

use crate::error::{TriggerError, STREAM_ADDRESS_FIELD};

static TRIGGER_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
static STREAM_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Client for webhook calls. Deadlines are applied per request.
pub fn trigger_client() -> &'static reqwest::Client {
    TRIGGER_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_default()
    })
}

/// Client for event streams. Deliberately has no overall or read timeout.
pub fn stream_client() -> &'static reqwest::Client {
    STREAM_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default()
    })
}

/// Headers sent with every trigger request.
pub fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers
}

/// Build the trigger body: `{source, timestamp}` plus the agent payload's
/// keys when the payload is a well-formed JSON object. Payload keys never
/// override the two reserved fields.
pub fn trigger_body(source: &str, at: DateTime<Utc>, payload: Option<&str>) -> Map<String, Value> {
    let mut body = Map::new();

    if let Some(raw) = payload.map(str::trim).filter(|raw| !raw.is_empty()) {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(fields)) => body.extend(fields),
            Ok(_) => tracing::warn!("ignoring trigger payload that is not a JSON object"),
            Err(err) => tracing::warn!(error = %err, "ignoring malformed trigger payload"),
        }
    }

    body.insert("source".into(), Value::String(source.to_string()));
    body.insert(
        "timestamp".into(),
        Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    body
}

/// Flatten a trigger body into query pairs for GET webhooks.
pub fn query_pairs(body: &Map<String, Value>) -> Vec<(String, String)> {
    body.iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}

/// Extract the follow-up stream address from a trigger response body,
/// resolving relative addresses against the webhook URL.
pub fn extract_stream_address(webhook_url: &str, body: &str) -> Result<String, TriggerError> {
    let value: Value = serde_json::from_str(body).map_err(|err| {
        TriggerError::missing_stream_address(format!("response body is not JSON: {err}"))
    })?;

    let address = match value.get(STREAM_ADDRESS_FIELD) {
        Some(Value::String(address)) if !address.trim().is_empty() => address.trim(),
        Some(Value::String(_)) => {
            return Err(TriggerError::missing_stream_address("field is empty"));
        }
        Some(_) => {
            return Err(TriggerError::missing_stream_address("field is not a string"));
        }
        None => {
            return Err(TriggerError::missing_stream_address("field is absent"));
        }
    };

    match reqwest::Url::parse(address) {
        Ok(url) => Ok(url.to_string()),
        Err(_) => reqwest::Url::parse(webhook_url)
            .and_then(|base| base.join(address))
            .map(|url| url.to_string())
            .map_err(|err| {
                TriggerError::missing_stream_address(format!(
                    "'{address}' is not a usable URL: {err}"
                ))
            }),
    }
}
