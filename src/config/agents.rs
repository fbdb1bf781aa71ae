//! Agent book files.
//!
//! ```toml
//! [[agents]]
//! id = "nightly"
//! name = "Nightly report"
//! webhook_url = "https://flows.example.com/webhook/report"
//! method = "POST"
//! payload = '{"region": "eu"}'
//! schedule = "2026-11-01T06:00:00Z"
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::types::Agent;

/// Top-level shape of an agent book.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentBook {
    #[serde(default)]
    pub agents: Vec<Agent>,
}

/// Parse agent book contents.
pub fn parse_agents(contents: &str) -> Result<Vec<Agent>, RelayError> {
    let book: AgentBook = toml::from_str(contents)?;

    let mut seen = HashSet::new();
    for agent in &book.agents {
        if !seen.insert(agent.id.clone()) {
            return Err(RelayError::Configuration(format!(
                "duplicate agent id '{}'",
                agent.id
            )));
        }
        if agent.webhook_url.trim().is_empty() {
            return Err(RelayError::Configuration(format!(
                "agent '{}' has an empty webhook_url",
                agent.id
            )));
        }
    }

    Ok(book.agents)
}

/// Read and parse an agent book from disk.
pub fn load_agents(path: impl AsRef<Path>) -> Result<Vec<Agent>, RelayError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let agents = parse_agents(&contents)?;
    tracing::debug!(path = %path.display(), count = agents.len(), "loaded agent book");
    Ok(agents)
}
