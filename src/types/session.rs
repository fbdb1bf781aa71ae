//! Run sessions, their log entries and lifecycle status.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::agent::AgentId;

/// Unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// The reserved session for system-level messages that belong to no run.
    pub const AMBIENT: SessionId = SessionId(Uuid::nil());

    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn is_ambient(&self) -> bool {
        *self == Self::AMBIENT
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Classification of a log line.
///
/// `Control` exists for completeness of the wire vocabulary; control events
/// are consumed by the stream consumer and never appended as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum LogLevel {
    Info,
    Success,
    Error,
    Control,
}

/// One line of a session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Success, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }
}

/// Session lifecycle status.
///
/// `Idle → Scheduled → Running → {Completed | Error | Cancelled}`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum Status {
    #[default]
    Idle,
    Scheduled,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl Status {
    /// Terminal statuses admit no further log entries or transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

/// Snapshot of one run instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    /// Originating agent; `None` for agent-less sessions such as the ambient one.
    pub agent_id: Option<AgentId>,
    pub name: String,
    pub logs: Vec<LogEntry>,
    pub status: Status,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(agent_id: Option<AgentId>, name: impl Into<String>) -> Self {
        Self {
            id: SessionId::new(),
            agent_id,
            name: name.into(),
            logs: Vec::new(),
            status: Status::Idle,
            created_at: Utc::now(),
        }
    }

    /// Timestamp of the newest log line, if any.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.logs.last().map(|entry| entry.timestamp)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
