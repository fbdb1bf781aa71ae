//! Convenience re-exports for common use.

pub use crate::config::RelayConfig;
pub use crate::error::{RelayError, Result, StreamError, TriggerError};
pub use crate::store::{SessionEvent, SessionStore};
pub use crate::stream::{EventSourceConnector, EventStreamConsumer, StreamConnector, StreamHandle};
pub use crate::supervisor::RunSupervisor;
pub use crate::trigger::{StreamAddress, Trigger, WebhookTrigger};
pub use crate::types::{
    Agent, AgentId, HttpMethod, LogEntry, LogLevel, Session, SessionId, Status,
};
