//! Run supervisor: the entry point external callers drive.
//!
//! - [`RunSupervisor::trigger`]: start a run for an agent
//! - [`RunSupervisor::stop`]: close a run's stream and mark it cancelled
//! - [`RunSupervisor::stop_latest_running`]: stop an agent's most active run
//! - [`RunSupervisor::delete_agent`]: remove an agent and everything tied to it
//! - [`RunSupervisor::agent_status`]: derived status for display
//!
//! The supervisor owns the agent table, the session store, the stream handle
//! registry (through its consumer) and the scheduler. Agent table mutations
//! and cascades run under the table's write lock; the read-side queries take
//! the read lock, so a cascade is observed either entirely or not at all.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::scheduler::{Rederivation, ScheduledFire, Scheduler};
use crate::store::{SessionEvent, SessionStore};
use crate::stream::{EventSourceConnector, EventStreamConsumer, StreamConnector};
use crate::trigger::{Trigger, WebhookTrigger};
use crate::types::{Agent, AgentId, LogEntry, LogLevel, Session, SessionId, Status};

/// First log line of a user-stopped session.
pub const STOP_MESSAGE: &str = "Terminal connection closed by user.";

/// Second log line of a user-stopped session.
pub const STOP_NOTE: &str =
    "Closing the connection does not stop the remote workflow; it may still be running.";

/// Log line of a session whose trigger call was abandoned by its caller.
pub const ABANDONED_MESSAGE: &str =
    "Trigger abandoned before the webhook answered; the remote workflow may or may not have started.";

/// Why a run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    Manual,
    Scheduled,
}

struct Inner {
    config: RelayConfig,
    store: Arc<SessionStore>,
    trigger: Arc<dyn Trigger>,
    consumer: EventStreamConsumer,
    scheduler: Arc<Scheduler>,
    agents: RwLock<Vec<Agent>>,
}

/// Orchestrates triggers, event streams, sessions, and schedules.
///
/// Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct RunSupervisor {
    inner: Arc<Inner>,
}

impl RunSupervisor {
    /// Build a supervisor with the HTTP webhook trigger and SSE transport.
    ///
    /// Must be called within a Tokio runtime.
    pub fn from_config(config: RelayConfig) -> Self {
        let trigger = Arc::new(WebhookTrigger::new(&config));
        let connector = Arc::new(EventSourceConnector::new());
        Self::new(config, trigger, connector)
    }

    /// Build a supervisor around custom collaborators.
    ///
    /// Must be called within a Tokio runtime; scheduled fires are dispatched
    /// from a background task that lives as long as the supervisor.
    pub fn new(
        config: RelayConfig,
        trigger: Arc<dyn Trigger>,
        connector: Arc<dyn StreamConnector>,
    ) -> Self {
        let store = Arc::new(SessionStore::with_event_capacity(config.event_capacity));
        let consumer = EventStreamConsumer::new(store.clone(), connector);
        let (scheduler, fire_rx) = Scheduler::new();

        let inner = Arc::new(Inner {
            config,
            store,
            trigger,
            consumer,
            scheduler,
            agents: RwLock::new(Vec::new()),
        });
        tokio::spawn(dispatch_scheduled(Arc::downgrade(&inner), fire_rx));

        Self { inner }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// Direct access to the session store.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.inner.store
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.inner.scheduler
    }

    pub fn consumer(&self) -> &EventStreamConsumer {
        &self.inner.consumer
    }

    /// Subscribe to session change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.store.subscribe()
    }

    // -- Agent table --

    /// Replace the whole agent table and re-derive schedules.
    pub fn set_agents(&self, agents: Vec<Agent>) -> Rederivation {
        let mut table = self.agents_mut();
        *table = agents;
        self.reschedule(&table)
    }

    /// Insert or replace one agent and re-derive schedules.
    pub fn upsert_agent(&self, agent: Agent) -> Rederivation {
        let mut table = self.agents_mut();
        match table.iter_mut().find(|existing| existing.id == agent.id) {
            Some(existing) => *existing = agent,
            None => table.push(agent),
        }
        self.reschedule(&table)
    }

    pub fn agent(&self, agent_id: &AgentId) -> Option<Agent> {
        self.agents().iter().find(|agent| &agent.id == agent_id).cloned()
    }

    pub fn list_agents(&self) -> Vec<Agent> {
        self.agents().clone()
    }

    /// Remove an agent, cancel its pending timer, close its streams and
    /// remove its sessions. Returns whether the agent existed.
    pub fn delete_agent(&self, agent_id: &AgentId) -> bool {
        let mut table = self.agents_mut();
        let before = table.len();
        table.retain(|agent| &agent.id != agent_id);
        let existed = table.len() != before;

        self.inner.scheduler.cancel(agent_id);
        let registry = self.inner.consumer.registry();
        for session in self.inner.store.list_for_agent(agent_id) {
            if let Some(handle) = registry.take(session.id) {
                handle.close();
            }
        }
        let removed = self.inner.store.remove_for_agent(agent_id);
        self.reschedule(&table);

        info!(%agent_id, existed, sessions = removed.len(), "agent deleted");
        existed
    }

    // -- Runs --

    /// Start a run for `agent_id`.
    ///
    /// The session is created in `Running` before the webhook is called, so
    /// a failed trigger remains visible as a short-lived errored session.
    /// Trigger failures are recorded in the session, not returned.
    pub async fn trigger(&self, agent_id: &AgentId) -> Result<SessionId, RelayError> {
        self.trigger_with_reason(agent_id, TriggerReason::Manual)
            .await
    }

    pub async fn trigger_with_reason(
        &self,
        agent_id: &AgentId,
        reason: TriggerReason,
    ) -> Result<SessionId, RelayError> {
        let store = &self.inner.store;

        // Lookup and session creation share the read lock so a concurrent
        // `delete_agent` either runs first or sees the new session.
        let (agent, session_id) = {
            let table = self.agents();
            let agent = table
                .iter()
                .find(|agent| &agent.id == agent_id)
                .cloned()
                .ok_or_else(|| RelayError::UnknownAgent(agent_id.clone()))?;
            let session_id =
                store.open(Some(agent.id.clone()), agent.name.clone(), Status::Running);
            (agent, session_id)
        };

        let opening = match reason {
            TriggerReason::Manual => format!("Triggering {}...", agent.name),
            TriggerReason::Scheduled => format!("Scheduled trigger for {}...", agent.name),
        };
        store.append_log(session_id, LogEntry::info(opening));
        info!(%agent_id, %session_id, ?reason, "triggering agent");

        let in_flight = InFlightTrigger::new(store, session_id);
        let outcome = self.inner.trigger.trigger(&agent).await;
        in_flight.disarm();

        match outcome {
            Ok(address) => {
                if store.status(session_id) != Some(Status::Running) {
                    debug!(%session_id, "session ended while the trigger was in flight");
                    return Ok(session_id);
                }
                store.append_log(
                    session_id,
                    LogEntry::info(format!("Webhook accepted; following events at {address}.")),
                );
                let handle = self.inner.consumer.attach(session_id, address);
                if !store.contains(session_id) {
                    handle.close();
                }
            }
            Err(err) => {
                warn!(%agent_id, %session_id, error = %err, "trigger failed");
                store.conclude(
                    session_id,
                    vec![LogEntry::error(format!("Trigger failed: {err}"))],
                    Status::Error,
                );
            }
        }

        Ok(session_id)
    }

    /// Close a session's stream and mark it cancelled.
    ///
    /// Returns `false` without any effect when the session has no live
    /// stream, which makes repeated calls harmless.
    pub fn stop(&self, session_id: SessionId) -> bool {
        let Some(handle) = self.inner.consumer.registry().take(session_id) else {
            return false;
        };
        if !handle.close() {
            // A terminal event won the race and already ended the session.
            return false;
        }

        info!(%session_id, "run stopped by user");
        self.inner.store.conclude(
            session_id,
            vec![LogEntry::info(STOP_MESSAGE), LogEntry::info(STOP_NOTE)],
            Status::Cancelled,
        )
    }

    /// Stop the running session of `agent_id` with the most recent log
    /// activity. Ties, including sessions with no log lines yet, go to the
    /// most recently created session.
    pub fn stop_latest_running(&self, agent_id: &AgentId) -> Option<SessionId> {
        let target = latest_running(&self.inner.store.list_for_agent(agent_id))?;
        self.stop(target).then_some(target)
    }

    /// Stop every session with a live stream. Returns the stopped sessions.
    pub fn stop_all(&self) -> Vec<SessionId> {
        let mut stopped = Vec::new();
        for session in self.inner.store.list() {
            if session.status == Status::Running && self.stop(session.id) {
                stopped.push(session.id);
            }
        }
        stopped
    }

    /// Explicit user close: tear down the stream, then forget the session.
    pub fn close_session(&self, session_id: SessionId) -> Option<Session> {
        let _table = self.agents_mut();
        if let Some(handle) = self.inner.consumer.registry().take(session_id) {
            handle.close();
        }
        self.inner.store.remove(session_id)
    }

    // -- Queries --

    pub fn session(&self, session_id: SessionId) -> Option<Session> {
        let _table = self.agents();
        self.inner.store.get(session_id)
    }

    pub fn list_sessions(&self) -> Vec<Session> {
        let _table = self.agents();
        self.inner.store.list()
    }

    /// Whether a stream is currently attached to the session.
    pub fn is_streaming(&self, session_id: SessionId) -> bool {
        self.inner.consumer.registry().contains(session_id)
    }

    /// Derived agent status: `Running` if any of its sessions runs, else
    /// `Scheduled` if a timer is pending, else the status of its most recent
    /// session, else `Idle`.
    pub fn agent_status(&self, agent_id: &AgentId) -> Status {
        let _table = self.agents();
        let sessions = self.inner.store.list_for_agent(agent_id);
        if sessions.iter().any(|s| s.status == Status::Running) {
            return Status::Running;
        }
        if self.inner.scheduler.is_pending(agent_id) {
            return Status::Scheduled;
        }
        sessions.last().map(|s| s.status).unwrap_or_default()
    }

    /// Write a system-level message to the ambient session.
    pub fn log_ambient(&self, level: LogLevel, message: impl Into<String>) {
        self.inner
            .store
            .append_log(SessionId::AMBIENT, LogEntry::new(level, message));
    }

    // -- Internal helpers --

    fn reschedule(&self, agents: &[Agent]) -> Rederivation {
        let outcome = self.inner.scheduler.rederive(agents);
        for agent_id in &outcome.demoted {
            let name = agents
                .iter()
                .find(|agent| &agent.id == agent_id)
                .map(|agent| agent.name.as_str())
                .unwrap_or(agent_id.as_str());
            self.log_ambient(
                LogLevel::Info,
                format!("Schedule for {name} passed before it could fire; it is idle again."),
            );
        }
        outcome
    }

    async fn run_scheduled(&self, fire: ScheduledFire) {
        match self
            .trigger_with_reason(&fire.agent_id, TriggerReason::Scheduled)
            .await
        {
            Ok(session_id) => debug!(agent_id = %fire.agent_id, %session_id, "scheduled run started"),
            Err(err) => {
                warn!(agent_id = %fire.agent_id, error = %err, "scheduled trigger skipped");
                self.log_ambient(LogLevel::Error, format!("Scheduled trigger skipped: {err}"));
            }
        }
        let table = self.agents();
        self.reschedule(&table);
    }

    fn agents(&self) -> RwLockReadGuard<'_, Vec<Agent>> {
        self.inner
            .agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn agents_mut(&self) -> RwLockWriteGuard<'_, Vec<Agent>> {
        self.inner
            .agents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ends the session if the trigger future is dropped before the webhook
/// answers, so an abandoned call never leaves a run stuck in `Running`.
struct InFlightTrigger<'a> {
    store: &'a SessionStore,
    session_id: SessionId,
    armed: bool,
}

impl<'a> InFlightTrigger<'a> {
    fn new(store: &'a SessionStore, session_id: SessionId) -> Self {
        Self {
            store,
            session_id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightTrigger<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(session_id = %self.session_id, "trigger abandoned before the webhook answered");
        self.store.conclude(
            self.session_id,
            vec![LogEntry::info(ABANDONED_MESSAGE)],
            Status::Cancelled,
        );
    }
}

/// Pick the running session with the greatest last-activity timestamp;
/// ties go to the later-created session.
fn latest_running(sessions: &[Session]) -> Option<SessionId> {
    sessions
        .iter()
        .enumerate()
        .filter(|(_, session)| session.status == Status::Running)
        .max_by_key(|(created, session)| {
            (
                session.last_activity().unwrap_or(DateTime::<Utc>::MIN_UTC),
                *created,
            )
        })
        .map(|(_, session)| session.id)
}

async fn dispatch_scheduled(inner: Weak<Inner>, mut fire_rx: mpsc::UnboundedReceiver<ScheduledFire>) {
    while let Some(fire) = fire_rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let supervisor = RunSupervisor { inner };
        tokio::spawn(async move { supervisor.run_scheduled(fire).await });
    }
}
