//! Event stream transport and consumer.

pub mod consumer;
pub mod event;
pub mod eventsource;

pub use consumer::{EventStreamConsumer, HandleRegistry, StreamHandle};
pub use event::{classify, Classified};
pub use eventsource::EventSourceConnector;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::StreamError;
use crate::trigger::StreamAddress;

/// One item read off an event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// The connection is established.
    Open,
    /// The data of one event, unparsed.
    Message(String),
}

/// A live event stream. It ends after yielding an error or when the server
/// closes it; dropping it closes the connection.
pub type EventStream = BoxStream<'static, Result<StreamFrame, StreamError>>;

/// Opens event streams. Implementations must not impose a read timeout.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, address: &StreamAddress) -> Result<EventStream, StreamError>;
}
