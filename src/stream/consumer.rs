//! Attaches event streams to sessions.
//!
//! Each attached stream runs on its own task. A [`StreamHandle`] owns a
//! single `live` flag; whoever flips it from `true` to `false` first (the
//! task on a terminal event or transport failure, or a caller via
//! [`StreamHandle::close`]) is the only party allowed to end the session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StreamError;
use crate::store::SessionStore;
use crate::trigger::StreamAddress;
use crate::types::{LogEntry, SessionId, Status};

use super::event::{classify, Classified};
use super::{StreamConnector, StreamFrame};

/// Handle to one attached event stream.
///
/// Clones share state; closing any clone closes the stream.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    session_id: SessionId,
    address: StreamAddress,
    live: Arc<AtomicBool>,
    cancel: CancellationToken,
    finished: CancellationToken,
}

impl StreamHandle {
    fn new(session_id: SessionId, address: StreamAddress) -> Self {
        Self {
            session_id,
            address,
            live: Arc::new(AtomicBool::new(true)),
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn address(&self) -> &StreamAddress {
        &self.address
    }

    /// Terminate the connection without logging anything.
    ///
    /// Returns `true` if this call released a live handle, `false` if it was
    /// already closed (by an earlier call or by a terminal event).
    pub fn close(&self) -> bool {
        let released = self.release();
        self.cancel.cancel();
        released
    }

    /// Whether the handle has been released.
    pub fn is_closed(&self) -> bool {
        !self.live.load(Ordering::Acquire)
    }

    /// Whether the stream task has exited and dropped its connection.
    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Wait until the stream task has exited.
    pub async fn finished(&self) {
        self.finished.cancelled().await;
    }

    fn release(&self) -> bool {
        self.live
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn same_stream(&self, other: &StreamHandle) -> bool {
        Arc::ptr_eq(&self.live, &other.live)
    }
}

/// Open stream handles keyed by session. A handle stays registered exactly
/// as long as its stream task is alive.
#[derive(Debug, Clone, Default)]
pub struct HandleRegistry {
    handles: Arc<Mutex<HashMap<SessionId, StreamHandle>>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: SessionId) -> Option<StreamHandle> {
        self.lock().get(&session_id).cloned()
    }

    pub fn contains(&self, session_id: SessionId) -> bool {
        self.lock().contains_key(&session_id)
    }

    /// Remove and return the handle for a session.
    pub fn take(&self, session_id: SessionId) -> Option<StreamHandle> {
        self.lock().remove(&session_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Register `handle`, returning any handle it displaced.
    fn insert(&self, handle: StreamHandle) -> Option<StreamHandle> {
        self.lock().insert(handle.session_id, handle)
    }

    /// Unregister `handle` unless a newer stream replaced it.
    fn release(&self, handle: &StreamHandle) {
        let mut handles = self.lock();
        if handles
            .get(&handle.session_id)
            .is_some_and(|current| current.same_stream(handle))
        {
            handles.remove(&handle.session_id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, StreamHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Feeds event streams into session logs.
#[derive(Clone)]
pub struct EventStreamConsumer {
    store: Arc<SessionStore>,
    connector: Arc<dyn StreamConnector>,
    registry: HandleRegistry,
}

impl EventStreamConsumer {
    pub fn new(store: Arc<SessionStore>, connector: Arc<dyn StreamConnector>) -> Self {
        Self {
            store,
            connector,
            registry: HandleRegistry::new(),
        }
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    /// Attach a stream to `session_id` and start consuming it.
    ///
    /// Must be called within a Tokio runtime. A stream already attached to
    /// the same session is closed first.
    pub fn attach(&self, session_id: SessionId, address: StreamAddress) -> StreamHandle {
        let handle = StreamHandle::new(session_id, address);
        if let Some(previous) = self.registry.insert(handle.clone()) {
            debug!(%session_id, "replacing existing stream handle");
            previous.close();
        }

        let task = StreamTask {
            store: self.store.clone(),
            connector: self.connector.clone(),
            registry: self.registry.clone(),
            handle: handle.clone(),
        };
        tokio::spawn(task.run());
        handle
    }
}

struct StreamTask {
    store: Arc<SessionStore>,
    connector: Arc<dyn StreamConnector>,
    registry: HandleRegistry,
    handle: StreamHandle,
}

impl StreamTask {
    async fn run(self) {
        let session_id = self.handle.session_id;
        let address = self.handle.address.clone();
        debug!(%session_id, url = %address, "attaching event stream");

        let connected = tokio::select! {
            biased;
            _ = self.handle.cancel.cancelled() => None,
            result = self.connector.connect(&address) => Some(result),
        };

        match connected {
            None => debug!(%session_id, "stream closed before it connected"),
            Some(Err(err)) => self.lost(err),
            Some(Ok(mut stream)) => loop {
                let frame = tokio::select! {
                    biased;
                    _ = self.handle.cancel.cancelled() => {
                        debug!(%session_id, "stream closed by caller");
                        break;
                    }
                    frame = stream.next() => frame,
                };

                match frame {
                    Some(Ok(StreamFrame::Open)) => {
                        info!(%session_id, url = %address, "event stream connected");
                        self.append(LogEntry::info(format!(
                            "Connected to event stream at {address}."
                        )));
                    }
                    Some(Ok(StreamFrame::Message(data))) => {
                        if self.dispatch(&data) {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        self.lost(err);
                        break;
                    }
                    None => {
                        self.lost(StreamError::Transport("the stream ended".into()));
                        break;
                    }
                }
            },
        }

        self.registry.release(&self.handle);
        self.handle.finished.cancel();
        debug!(%session_id, "event stream task finished");
    }

    /// Apply one event. Returns `true` once the stream should stop.
    fn dispatch(&self, data: &str) -> bool {
        match classify(data) {
            Classified::Log { level, message } => {
                self.append(LogEntry::new(level, message));
                false
            }
            Classified::Malformed { raw } => {
                warn!(session_id = %self.handle.session_id, "malformed stream event");
                self.append(LogEntry::error(
                    StreamError::Parse { raw }.to_string(),
                ));
                false
            }
            Classified::Ignored => false,
            Classified::Complete => {
                self.finish(LogEntry::success("Run completed."), Status::Completed);
                true
            }
            Classified::Failed => {
                self.finish(
                    LogEntry::error("Run failed: the remote workflow reported an error."),
                    Status::Error,
                );
                true
            }
        }
    }

    fn append(&self, entry: LogEntry) {
        if !self.handle.is_closed() {
            self.store.append_log(self.handle.session_id, entry);
        }
    }

    fn finish(&self, entry: LogEntry, status: Status) {
        if self.handle.release() {
            info!(session_id = %self.handle.session_id, %status, "run finished");
            self.store
                .conclude(self.handle.session_id, vec![entry], status);
        }
    }

    fn lost(&self, err: StreamError) {
        warn!(session_id = %self.handle.session_id, error = %err, "event stream lost");
        self.finish(
            LogEntry::error(format!(
                "{err}. The connection was lost before the run reported an outcome; \
                 its completion is unknown."
            )),
            Status::Error,
        );
    }
}
