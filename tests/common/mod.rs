//! Shared test helpers: fake trigger, channel-backed stream connector.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use hookrelay::config::RelayConfig;
use hookrelay::error::{StreamError, TriggerError};
use hookrelay::stream::{EventStream, StreamConnector, StreamFrame};
use hookrelay::supervisor::RunSupervisor;
use hookrelay::trigger::{StreamAddress, Trigger};
use hookrelay::types::{Agent, AgentId};

pub type FrameResult = Result<StreamFrame, StreamError>;

/// A trigger that returns queued outcomes and records which agents it saw.
#[derive(Default)]
pub struct FakeTrigger {
    outcomes: Mutex<VecDeque<Result<StreamAddress, TriggerError>>>,
    calls: Mutex<Vec<AgentId>>,
    stall: Mutex<Option<Duration>>,
}

impl FakeTrigger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a successful trigger yielding `address`.
    pub fn queue_stream(&self, address: &str) {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(Ok(StreamAddress::new(address)));
    }

    pub fn queue_error(&self, error: TriggerError) {
        self.outcomes.lock().unwrap().push_back(Err(error));
    }

    /// Make every subsequent call wait `delay` before answering.
    pub fn stall_for(&self, delay: Duration) {
        *self.stall.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<AgentId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Trigger for FakeTrigger {
    async fn trigger(&self, agent: &Agent) -> Result<StreamAddress, TriggerError> {
        self.calls.lock().unwrap().push(agent.id.clone());
        let stall = *self.stall.lock().unwrap();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(StreamAddress::new(format!("stream://{}", agent.id))))
    }
}

/// Test side of one fake event stream.
#[derive(Clone)]
pub struct StreamFeed {
    tx: mpsc::UnboundedSender<FrameResult>,
}

impl StreamFeed {
    pub fn open(&self) -> bool {
        self.tx.send(Ok(StreamFrame::Open)).is_ok()
    }

    pub fn event(&self, value: serde_json::Value) -> bool {
        self.raw(&value.to_string())
    }

    pub fn raw(&self, data: &str) -> bool {
        self.tx.send(Ok(StreamFrame::Message(data.to_string()))).is_ok()
    }

    pub fn fail(&self, detail: &str) -> bool {
        self.tx
            .send(Err(StreamError::Transport(detail.to_string())))
            .is_ok()
    }

    pub fn log(&self, level: &str, message: &str) -> bool {
        self.event(serde_json::json!({"type": level, "message": message}))
    }

    pub fn control(&self, message: &str) -> bool {
        self.event(serde_json::json!({"type": "control", "message": message}))
    }
}

#[derive(Default)]
struct Channels {
    feeds: HashMap<String, StreamFeed>,
    receivers: HashMap<String, mpsc::UnboundedReceiver<FrameResult>>,
}

/// A connector whose streams are fed by the test through [`StreamFeed`]s.
#[derive(Default)]
pub struct ChannelConnector {
    channels: Mutex<Channels>,
    connected: Mutex<Vec<String>>,
    refuse: Mutex<Option<String>>,
}

impl ChannelConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The feed for `address`, created on first use.
    pub fn feed(&self, address: &str) -> StreamFeed {
        let mut channels = self.channels.lock().unwrap();
        if let Some(feed) = channels.feeds.get(address) {
            return feed.clone();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let feed = StreamFeed { tx };
        channels.feeds.insert(address.to_string(), feed.clone());
        channels.receivers.insert(address.to_string(), rx);
        feed
    }

    /// End the stream for `address` as if the server hung up.
    pub fn hang_up(&self, address: &str) {
        self.channels.lock().unwrap().feeds.remove(address);
    }

    /// Make every subsequent connect fail with `detail`.
    pub fn refuse(&self, detail: &str) {
        *self.refuse.lock().unwrap() = Some(detail.to_string());
    }

    pub fn connected(&self) -> Vec<String> {
        self.connected.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamConnector for ChannelConnector {
    async fn connect(&self, address: &StreamAddress) -> Result<EventStream, StreamError> {
        self.connected
            .lock()
            .unwrap()
            .push(address.as_str().to_string());
        if let Some(detail) = self.refuse.lock().unwrap().clone() {
            return Err(StreamError::Connect(detail));
        }

        self.feed(address.as_str());
        let rx = self
            .channels
            .lock()
            .unwrap()
            .receivers
            .remove(address.as_str())
            .expect("stream for address already consumed");
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

pub fn agent(id: &str) -> Agent {
    Agent::builder()
        .id(AgentId::from(id))
        .name(format!("Agent {id}"))
        .webhook_url(format!("http://hooks.test/{id}"))
        .build()
}

pub fn supervisor(
    trigger: Arc<FakeTrigger>,
    connector: Arc<ChannelConnector>,
) -> RunSupervisor {
    RunSupervisor::new(RelayConfig::default(), trigger, connector)
}

/// Poll `condition` until it holds, panicking after two seconds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Await `future`, panicking after two seconds.
pub async fn within<T>(what: &str, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}
