//! hookrelay: webhook trigger and live-log relay core.
//!
//! Fires remote workflows over HTTP, follows their progress over a
//! server-sent event stream, and fans the events into per-run session logs.
//! Delayed triggers are armed by a scheduler that re-derives its timer set
//! whenever the agent configuration changes.
//!
//! # Quick Start
//!
//! ```no_run
//! use hookrelay::prelude::*;
//!
//! # async fn example() -> hookrelay::error::Result<()> {
//! let supervisor = RunSupervisor::from_config(RelayConfig::from_env());
//! let agent = Agent::builder()
//!     .id(AgentId::from("nightly-report"))
//!     .name("Nightly report".to_string())
//!     .webhook_url("https://flows.example.com/webhook/report".to_string())
//!     .build();
//! supervisor.upsert_agent(agent.clone());
//!
//! let session_id = supervisor.trigger(&agent.id).await?;
//! if let Some(session) = supervisor.session(session_id) {
//!     for entry in &session.logs {
//!         println!("[{}] {}", entry.level, entry.message);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod prelude;
pub mod scheduler;
pub mod store;
pub mod stream;
pub mod supervisor;
pub mod trigger;
pub mod types;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
