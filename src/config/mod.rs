//! Configuration system (code > env > defaults).

pub mod agents;

pub use agents::{load_agents, parse_agents, AgentBook};

use std::time::Duration;

/// Default bound on the initial webhook call.
pub const DEFAULT_TRIGGER_TIMEOUT: Duration = Duration::from_secs(30);

/// Default value of the `source` field sent with every trigger.
pub const DEFAULT_TRIGGER_SOURCE: &str = "hookrelay";

/// Default per-subscriber buffer of the session notification channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

const ENV_TRIGGER_TIMEOUT_SECS: &str = "HOOKRELAY_TRIGGER_TIMEOUT_SECS";
const ENV_TRIGGER_SOURCE: &str = "HOOKRELAY_TRIGGER_SOURCE";
const ENV_EVENT_CAPACITY: &str = "HOOKRELAY_EVENT_CAPACITY";

/// Runtime configuration for the relay core.
///
/// The event stream itself has no read timeout; remote workflows may stay
/// silent for minutes between progress events.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Deadline for the trigger request, including reading its response body.
    pub trigger_timeout: Duration,
    /// Tag identifying this relay in trigger bodies.
    pub trigger_source: String,
    /// Buffer size for [`SessionEvent`](crate::store::SessionEvent) subscribers.
    pub event_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            trigger_timeout: DEFAULT_TRIGGER_TIMEOUT,
            trigger_source: DEFAULT_TRIGGER_SOURCE.to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl RelayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from environment variables (`HOOKRELAY_*`), reading `.env` first
    /// when present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to
    /// the defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_TRIGGER_TIMEOUT_SECS) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.trigger_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(
                    key = ENV_TRIGGER_TIMEOUT_SECS,
                    value = %raw,
                    "ignoring invalid trigger timeout"
                ),
            }
        }

        if let Some(source) = lookup(ENV_TRIGGER_SOURCE) {
            let source = source.trim();
            if !source.is_empty() {
                config.trigger_source = source.to_string();
            }
        }

        if let Some(raw) = lookup(ENV_EVENT_CAPACITY) {
            match raw.trim().parse::<usize>() {
                Ok(capacity) if capacity > 0 => config.event_capacity = capacity,
                _ => tracing::warn!(
                    key = ENV_EVENT_CAPACITY,
                    value = %raw,
                    "ignoring invalid event capacity"
                ),
            }
        }

        config
    }

    pub fn with_trigger_timeout(mut self, timeout: Duration) -> Self {
        self.trigger_timeout = timeout;
        self
    }

    pub fn with_trigger_source(mut self, source: impl Into<String>) -> Self {
        self.trigger_source = source.into();
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}
