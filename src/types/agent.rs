//! Agent configuration as seen by the relay core.

use std::fmt;

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Stable agent identifier, assigned by whoever owns the agent configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// HTTP method used to call an agent's webhook.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
}

/// A configured remote workflow endpoint.
///
/// Agents are owned and edited by an external caller; the relay only reads
/// them. Hand the supervisor a fresh copy whenever the configuration changes.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub webhook_url: String,
    #[builder(default)]
    #[serde(default)]
    pub method: HttpMethod,
    /// Raw JSON text merged into the trigger body when it parses as an object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    /// A single future point in time at which the agent fires once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<DateTime<Utc>>,
}

impl Agent {
    /// Whether the agent has a schedule strictly after `now`.
    pub fn is_scheduled_after(&self, now: DateTime<Utc>) -> bool {
        self.schedule.is_some_and(|at| at > now)
    }
}
