//! Server-sent events transport backed by `reqwest-eventsource`.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{retry::Never, Error as SourceError, Event, EventSource};

use crate::error::StreamError;
use crate::trigger::http::stream_client;
use crate::trigger::StreamAddress;

use super::{EventStream, StreamConnector, StreamFrame};

/// Connects to `text/event-stream` endpoints.
///
/// Reconnection is disabled: a dropped stream means the run's outcome is
/// unknown, and that is reported rather than papered over.
#[derive(Debug, Clone)]
pub struct EventSourceConnector {
    client: reqwest::Client,
}

impl Default for EventSourceConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSourceConnector {
    pub fn new() -> Self {
        Self {
            client: stream_client().clone(),
        }
    }

    /// Use a caller-supplied client. It must not set a read timeout.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StreamConnector for EventSourceConnector {
    async fn connect(&self, address: &StreamAddress) -> Result<EventStream, StreamError> {
        let builder = self.client.get(address.as_str());
        let mut source =
            EventSource::new(builder).map_err(|err| StreamError::Connect(err.to_string()))?;
        source.set_retry_policy(Box::new(Never));

        let url = address.to_string();
        let stream = async_stream::stream! {
            let mut opened = false;
            while let Some(event) = source.next().await {
                match event {
                    Ok(Event::Open) => {
                        opened = true;
                        yield Ok(StreamFrame::Open);
                    }
                    Ok(Event::Message(message)) => {
                        yield Ok(StreamFrame::Message(message.data));
                    }
                    Err(SourceError::StreamEnded) => {
                        tracing::debug!(url = %url, "event stream ended by server");
                        yield Err(StreamError::Transport("the server closed the stream".into()));
                        break;
                    }
                    Err(err) => {
                        tracing::debug!(url = %url, error = %err, opened, "event stream failed");
                        yield Err(if opened {
                            StreamError::Transport(err.to_string())
                        } else {
                            StreamError::Connect(err.to_string())
                        });
                        break;
                    }
                }
            }
            source.close();
        };

        Ok(Box::pin(stream))
    }
}
