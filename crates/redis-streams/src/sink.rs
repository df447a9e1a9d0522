/*!
 * StreamSink — the producer half of the core.
 *
 * Resolves a target stream per message (an explicit override, falling back
 * to the sink's configured default), calls `XADD`, and classifies failures
 * so a caller can decide whether to retry.
 */

use tracing::{instrument, warn};

use crate::client::RedisClient;
use crate::config::SinkConfig;
use crate::error::{Result, StreamsError};

/// One outbound message: a logical type, a payload, and an optional stream
/// override.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub type_name: String,
    pub payload: Vec<u8>,
    /// Overrides [`SinkConfig::default_stream`] for this message only.
    pub stream_override: Option<String>,
}

impl OutboundMessage {
    pub fn new(type_name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            type_name: type_name.into(),
            payload,
            stream_override: None,
        }
    }

    pub fn to_stream(mut self, stream: impl Into<String>) -> Self {
        self.stream_override = Some(stream.into());
        self
    }
}

/// Write path: wraps a [`RedisClient`] and a [`SinkConfig`].
pub struct StreamSink {
    client: RedisClient,
    config: SinkConfig,
}

impl StreamSink {
    pub fn new(client: RedisClient, config: SinkConfig) -> Self {
        Self { client, config }
    }

    fn resolve_stream(&self, message: &OutboundMessage) -> String {
        message
            .stream_override
            .clone()
            .unwrap_or_else(|| self.config.default_stream.clone())
    }

    /// Write one message, returning the id Redis assigned.
    ///
    /// Connection-level errors are retriable (the caller may redial and
    /// call again); anything else — encoder failures in particular — is
    /// not, since retrying with the same payload will fail identically.
    #[instrument(skip(self, message), fields(stream))]
    pub async fn send(&mut self, message: OutboundMessage) -> Result<String> {
        let stream = self.resolve_stream(&message);
        tracing::Span::current().record("stream", stream.as_str());

        let result = self
            .client
            .x_add(
                &message.type_name,
                &stream,
                &message.payload,
                None,
                self.config.max_stream_length,
            )
            .await;

        if let Err(ref e) = result {
            warn!(stream = %stream, error = %e, "failed to publish message");
        }
        result
    }

    /// Write a batch sequentially, short-circuiting on the first failure.
    /// Messages already written are not rolled back — Redis has no
    /// multi-stream transaction that would make that possible here.
    pub async fn send_all(
        &mut self,
        messages: impl IntoIterator<Item = OutboundMessage>,
    ) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for message in messages {
            ids.push(self.send(message).await?);
        }
        Ok(ids)
    }

    /// Ensure the consumer group used by a paired [`crate::source::StreamSource`]
    /// exists, creating the stream via `MKSTREAM` if necessary. Producers
    /// occasionally own this responsibility when they run before any
    /// consumer has started (spec §4.2).
    pub async fn ensure_consumer_group(
        &mut self,
        stream: &str,
        group: &str,
        start_id: &crate::config::ConsumerGroupStartId,
    ) -> Result<()> {
        self.client
            .x_group_create(stream, group, start_id, true)
            .await
            .map(|_| ())
    }
}

/// True when `error` represents a condition worth retrying the same send.
/// Per spec §4.2, only protocol-parse and aggregate errors are non-retriable
/// — everything else (including connection loss, which the outer framework
/// handles by redialing and calling again) is retriable.
pub fn is_retriable(error: &StreamsError) -> bool {
    !matches!(error, StreamsError::Protocol(_))
}
