//! In-memory session registry.
//!
//! Every mutation of a session happens under that session's own lock, and
//! change notifications are broadcast while the lock is still held, so a
//! subscriber observes one session's entries in append order. Readers get
//! cloned snapshots and never hold a lock across an await point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::types::{AgentId, LogEntry, Session, SessionId, Status};

/// Display name of the reserved ambient session.
pub const AMBIENT_SESSION_NAME: &str = "System";

const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Change notification emitted by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Created {
        session_id: SessionId,
        agent_id: Option<AgentId>,
        name: String,
        status: Status,
    },
    LogAppended {
        session_id: SessionId,
        entry: LogEntry,
    },
    StatusChanged {
        session_id: SessionId,
        status: Status,
    },
    Removed {
        session_id: SessionId,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::Created { session_id, .. }
            | Self::LogAppended { session_id, .. }
            | Self::StatusChanged { session_id, .. }
            | Self::Removed { session_id } => *session_id,
        }
    }
}

struct Slot {
    agent_id: Option<AgentId>,
    session: Mutex<Session>,
}

#[derive(Default)]
struct Registry {
    order: Vec<SessionId>,
    slots: HashMap<SessionId, Arc<Slot>>,
}

/// Registry of run sessions with append-only logs.
pub struct SessionStore {
    registry: RwLock<Registry>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create a store whose notification channel buffers `capacity` events
    /// per lagging subscriber.
    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        let mut ambient = Session::new(None, AMBIENT_SESSION_NAME);
        ambient.id = SessionId::AMBIENT;

        let mut registry = Registry::default();
        registry.order.push(SessionId::AMBIENT);
        registry.slots.insert(
            SessionId::AMBIENT,
            Arc::new(Slot {
                agent_id: None,
                session: Mutex::new(ambient),
            }),
        );

        Self {
            registry: RwLock::new(registry),
            events,
        }
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Change notifications as a stream; lagged notifications are skipped.
    pub fn watch(&self) -> impl tokio_stream::Stream<Item = SessionEvent> + Send + 'static {
        BroadcastStream::new(self.events.subscribe()).filter_map(|event| event.ok())
    }

    /// Create an `Idle` session and return its id.
    pub fn create(&self, agent_id: Option<AgentId>, name: impl Into<String>) -> SessionId {
        self.open(agent_id, name, Status::Idle)
    }

    /// Create a session that starts in `status`.
    pub fn open(
        &self,
        agent_id: Option<AgentId>,
        name: impl Into<String>,
        status: Status,
    ) -> SessionId {
        let mut session = Session::new(agent_id.clone(), name);
        session.status = status;
        let id = session.id;
        let name = session.name.clone();

        let mut registry = self.write();
        registry.order.push(id);
        registry.slots.insert(
            id,
            Arc::new(Slot {
                agent_id: agent_id.clone(),
                session: Mutex::new(session),
            }),
        );
        self.emit(SessionEvent::Created {
            session_id: id,
            agent_id,
            name,
            status,
        });
        drop(registry);

        tracing::debug!(session_id = %id, %status, "session created");
        id
    }

    /// Append a log line. Returns `false` when the session is unknown or
    /// already terminal; the entry is dropped in that case.
    ///
    /// The stored timestamp is clamped so it never precedes the previous entry.
    pub fn append_log(&self, id: SessionId, entry: LogEntry) -> bool {
        let Some(slot) = self.slot(id) else {
            return false;
        };
        let mut session = lock(&slot.session);
        if session.is_terminal() {
            tracing::debug!(session_id = %id, "dropping log entry for terminal session");
            return false;
        }
        self.push_entry(&mut session, entry);
        true
    }

    /// Change the status. Returns `false` when the session is unknown,
    /// already terminal, or the ambient session, whose status never changes.
    pub fn set_status(&self, id: SessionId, status: Status) -> bool {
        if id.is_ambient() {
            return false;
        }
        let Some(slot) = self.slot(id) else {
            return false;
        };
        let mut session = lock(&slot.session);
        if session.is_terminal() {
            return false;
        }
        self.apply_status(&mut session, status);
        true
    }

    /// Append `entries` and move to `status` as one step.
    ///
    /// Returns `true` only for the caller that performed the transition, so
    /// concurrent finishers of the same session cannot both win. The ambient
    /// session never concludes.
    pub fn conclude(&self, id: SessionId, entries: Vec<LogEntry>, status: Status) -> bool {
        if id.is_ambient() {
            return false;
        }
        let Some(slot) = self.slot(id) else {
            return false;
        };
        let mut session = lock(&slot.session);
        if session.is_terminal() {
            return false;
        }
        for entry in entries {
            self.push_entry(&mut session, entry);
        }
        self.apply_status(&mut session, status);
        true
    }

    pub fn get(&self, id: SessionId) -> Option<Session> {
        let slot = self.slot(id)?;
        let session = lock(&slot.session).clone();
        Some(session)
    }

    pub fn status(&self, id: SessionId) -> Option<Status> {
        let slot = self.slot(id)?;
        let status = lock(&slot.session).status;
        Some(status)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.read().slots.contains_key(&id)
    }

    /// Remove a session regardless of its status. The ambient session cannot
    /// be removed.
    pub fn remove(&self, id: SessionId) -> Option<Session> {
        if id.is_ambient() {
            return None;
        }
        let mut registry = self.write();
        let slot = registry.slots.remove(&id)?;
        registry.order.retain(|existing| *existing != id);
        self.emit(SessionEvent::Removed { session_id: id });
        drop(registry);

        let session = lock(&slot.session).clone();
        Some(session)
    }

    /// Remove every session that references `agent_id` in a single step.
    pub fn remove_for_agent(&self, agent_id: &AgentId) -> Vec<Session> {
        let mut registry = self.write();
        let doomed: Vec<SessionId> = registry
            .order
            .iter()
            .filter(|id| {
                registry
                    .slots
                    .get(*id)
                    .is_some_and(|slot| slot.agent_id.as_ref() == Some(agent_id))
            })
            .copied()
            .collect();

        let mut removed = Vec::with_capacity(doomed.len());
        for id in &doomed {
            if let Some(slot) = registry.slots.remove(id) {
                removed.push(lock(&slot.session).clone());
            }
        }
        registry.order.retain(|id| !doomed.contains(id));
        for id in doomed {
            self.emit(SessionEvent::Removed { session_id: id });
        }
        removed
    }

    /// All sessions in creation order, the ambient session first.
    pub fn list(&self) -> Vec<Session> {
        let slots: Vec<Arc<Slot>> = {
            let registry = self.read();
            registry
                .order
                .iter()
                .filter_map(|id| registry.slots.get(id).cloned())
                .collect()
        };
        slots
            .iter()
            .map(|slot| lock(&slot.session).clone())
            .collect()
    }

    /// Sessions that reference `agent_id`, in creation order.
    pub fn list_for_agent(&self, agent_id: &AgentId) -> Vec<Session> {
        let slots: Vec<Arc<Slot>> = {
            let registry = self.read();
            registry
                .order
                .iter()
                .filter_map(|id| registry.slots.get(id))
                .filter(|slot| slot.agent_id.as_ref() == Some(agent_id))
                .cloned()
                .collect()
        };
        slots
            .iter()
            .map(|slot| lock(&slot.session).clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push_entry(&self, session: &mut Session, mut entry: LogEntry) {
        if let Some(last) = session.last_activity() {
            if entry.timestamp < last {
                entry.timestamp = last;
            }
        }
        session.logs.push(entry.clone());
        self.emit(SessionEvent::LogAppended {
            session_id: session.id,
            entry,
        });
    }

    fn apply_status(&self, session: &mut Session, status: Status) {
        if session.status == status {
            return;
        }
        session.status = status;
        tracing::debug!(session_id = %session.id, %status, "session status changed");
        self.emit(SessionEvent::StatusChanged {
            session_id: session.id,
            status,
        });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn slot(&self, id: SessionId) -> Option<Arc<Slot>> {
        self.read().slots.get(&id).cloned()
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn new_store_holds_only_the_ambient_session() {
        let store = SessionStore::new();
        let sessions = store.list();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, SessionId::AMBIENT);
        assert_eq!(sessions[0].name, AMBIENT_SESSION_NAME);
        assert!(sessions[0].agent_id.is_none());
    }

    #[test]
    fn ambient_session_cannot_be_removed() {
        let store = SessionStore::new();
        assert!(store.remove(SessionId::AMBIENT).is_none());
        assert!(store.contains(SessionId::AMBIENT));
    }

    #[test]
    fn ambient_session_never_turns_terminal() {
        let store = SessionStore::new();
        assert!(!store.set_status(SessionId::AMBIENT, Status::Completed));
        assert!(!store.conclude(
            SessionId::AMBIENT,
            vec![LogEntry::info("done")],
            Status::Cancelled
        ));
        assert_eq!(store.status(SessionId::AMBIENT), Some(Status::Idle));

        assert!(store.append_log(SessionId::AMBIENT, LogEntry::info("still listening")));
        assert_eq!(store.get(SessionId::AMBIENT).unwrap().logs.len(), 1);
    }

    #[test]
    fn list_preserves_insertion_order() {
        let store = SessionStore::new();
        let a = store.create(None, "a");
        let b = store.create(Some(AgentId::from("x")), "b");
        let c = store.create(None, "c");
        let ids: Vec<_> = store.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![SessionId::AMBIENT, a, b, c]);

        store.remove(b);
        let ids: Vec<_> = store.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![SessionId::AMBIENT, a, c]);
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let store = SessionStore::new();
        let id = store.open(None, "run", Status::Running);
        let mut late = LogEntry::info("first");
        late.timestamp += Duration::seconds(5);
        let mut early = LogEntry::info("second");
        early.timestamp -= Duration::seconds(5);

        store.append_log(id, late.clone());
        store.append_log(id, early);

        let logs = store.get(id).unwrap().logs;
        assert_eq!(logs[0].message, "first");
        assert_eq!(logs[1].message, "second");
        assert_eq!(logs[1].timestamp, late.timestamp);
    }

    #[test]
    fn terminal_sessions_ignore_appends_and_transitions() {
        let store = SessionStore::new();
        let id = store.open(None, "run", Status::Running);
        assert!(store.set_status(id, Status::Completed));

        let before = store.get(id).unwrap();
        assert!(!store.append_log(id, LogEntry::info("late")));
        assert!(!store.set_status(id, Status::Running));
        assert!(!store.conclude(id, vec![LogEntry::error("late")], Status::Error));
        assert_eq!(store.get(id).unwrap(), before);
    }

    #[test]
    fn conclude_has_a_single_winner() {
        let store = SessionStore::new();
        let id = store.open(None, "run", Status::Running);
        assert!(store.conclude(id, vec![LogEntry::success("done")], Status::Completed));
        assert!(!store.conclude(id, vec![LogEntry::error("boom")], Status::Error));
        let session = store.get(id).unwrap();
        assert_eq!(session.status, Status::Completed);
        assert_eq!(session.logs.len(), 1);
    }

    #[test]
    fn unknown_sessions_are_ignored() {
        let store = SessionStore::new();
        let missing = SessionId::new();
        assert!(!store.append_log(missing, LogEntry::info("x")));
        assert!(!store.set_status(missing, Status::Running));
        assert!(store.get(missing).is_none());
        assert!(store.remove(missing).is_none());
    }

    #[test]
    fn remove_for_agent_only_touches_that_agent() {
        let store = SessionStore::new();
        let agent = AgentId::from("doomed");
        let keep = store.create(Some(AgentId::from("other")), "keep");
        store.create(Some(agent.clone()), "one");
        store.create(Some(agent.clone()), "two");

        let removed = store.remove_for_agent(&agent);
        assert_eq!(removed.len(), 2);
        let ids: Vec<_> = store.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![SessionId::AMBIENT, keep]);
    }

    #[tokio::test]
    async fn subscribers_see_changes_in_order() {
        let store = SessionStore::new();
        let mut rx = store.subscribe();
        let id = store.open(None, "run", Status::Running);
        store.append_log(id, LogEntry::info("hello"));
        store.conclude(id, vec![LogEntry::success("bye")], Status::Completed);

        let kinds: Vec<String> = (0..4)
            .map(|_| match rx.try_recv().unwrap() {
                SessionEvent::Created { .. } => "created".to_string(),
                SessionEvent::LogAppended { entry, .. } => entry.message,
                SessionEvent::StatusChanged { status, .. } => status.to_string(),
                SessionEvent::Removed { .. } => "removed".to_string(),
            })
            .collect();
        assert_eq!(kinds, vec!["created", "hello", "bye", "Completed"]);
    }
}
