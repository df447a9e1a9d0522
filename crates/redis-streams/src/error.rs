//! Error taxonomy for the Redis Streams core.
//!
//! Mirrors the classification in the design doc: connection failures,
//! protocol-level parse failures, the benign "group already exists" case,
//! malformed stream entries, codec failures, and failures surfaced from the
//! downstream dispatcher's release event.

use thiserror::Error;

/// Errors produced by [`crate::client::RedisClient`], [`crate::sink::StreamSink`]
/// and [`crate::source::StreamSource`].
#[derive(Debug, Error)]
pub enum StreamsError {
    /// Connection-level failure: socket errors, reconnects, abrupt close.
    /// Fatal for the in-flight operation; the caller should treat the
    /// source/sink as needing a restart.
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    /// A Redis reply did not have the shape a command is documented to
    /// return (e.g. XREADGROUP returning something other than a bulk array
    /// of streams). Non-retriable.
    #[error("Redis protocol error: {0}")]
    Protocol(String),

    /// A stream entry that is missing the payload field. Callers should
    /// auto-ack it to clear the PEL and move on; this is not propagated as
    /// a fatal error to the dispatcher.
    #[error("Malformed stream entry {message_id} on stream {stream}: missing field {field}")]
    MalformedEntry {
        stream: String,
        message_id: String,
        field: &'static str,
    },

    /// Failure from the pluggable encoder/decoder.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Failure signalled by the downstream dispatcher's release event.
    /// Carries no redis state; the entry is left in the PEL.
    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    /// A consumer group create/delete/claim/ack call failed for a reason
    /// other than BUSYGROUP.
    #[error("Consumer group operation failed: {0}")]
    ConsumerGroup(String),
}

impl StreamsError {
    /// True when this represents a `BUSYGROUP` response to `XGROUP CREATE`,
    /// i.e. the group already exists. Callers that set
    /// `suppress_already_exists` never see this — it's swallowed inside
    /// [`crate::client::RedisClient::x_group_create`] — but the classifier
    /// is exposed so integrations that bypass the suppression can still
    /// recognize it.
    pub fn is_group_already_exists(&self) -> bool {
        match self {
            Self::Connection(e) => e.to_string().contains("BUSYGROUP"),
            Self::ConsumerGroup(s) => s.contains("BUSYGROUP"),
            _ => false,
        }
    }

    /// True for a `NOGROUP` response — the consumer group (or stream) was
    /// deleted out from under a live consumer.
    pub fn is_missing_group(&self) -> bool {
        match self {
            Self::Connection(e) => e.to_string().contains("NOGROUP"),
            Self::ConsumerGroup(s) => s.contains("NOGROUP"),
            _ => false,
        }
    }

    /// True when this looks like a transport-level failure (closed
    /// connection, reset, refused) rather than a well-formed Redis error
    /// reply. Used to decide whether to back off before retrying.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection(e) => {
                let s = e.to_string().to_lowercase();
                s.contains("connection")
                    || s.contains("broken pipe")
                    || s.contains("reset by peer")
                    || s.contains("refused")
                    || s.contains("eof")
                    || s.contains("io error")
            }
            _ => false,
        }
    }
}

/// Errors from the pluggable [`crate::codec::MessageEncoder`].
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode payload for type {type_name}: {source}")]
    Encode {
        type_name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to decode payload for type {type_name}: {source}")]
    Decode {
        type_name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

pub type Result<T> = std::result::Result<T, StreamsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_busygroup() {
        let err = StreamsError::ConsumerGroup("BUSYGROUP Consumer Group name already exists".into());
        assert!(err.is_group_already_exists());
        assert!(!err.is_missing_group());
    }

    #[test]
    fn classifies_nogroup() {
        let err = StreamsError::ConsumerGroup(
            "NOGROUP No such key 's' or consumer group 'g' in XREADGROUP".into(),
        );
        assert!(err.is_missing_group());
        assert!(!err.is_group_already_exists());
    }
}
