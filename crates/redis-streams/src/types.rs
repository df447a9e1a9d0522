//! Wire-level and in-memory data model.
//!
//! `StreamEntry` is what Redis actually stores; `DecodedMessage` is what the
//! dispatcher sees after the configured encoder has run. `PendingEntry` is
//! the PEL record returned by `XPENDING`.

use std::collections::HashMap;

/// Names of the two fields every stream entry carries, shared by producer
/// and consumer. Mismatched keys between the two sides produce malformed
/// entries (see [`crate::error::StreamsError::MalformedEntry`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldKeys {
    pub payload: String,
    pub type_name: String,
}

impl Default for FieldKeys {
    fn default() -> Self {
        Self {
            payload: "redis.stream.key".to_string(),
            type_name: "redis.stream.type".to_string(),
        }
    }
}

/// A single logical record as stored in a Redis stream: an assigned
/// `messageId`, the stream it lives in, and the raw field map.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub message_id: String,
    pub stream_name: String,
    pub fields: HashMap<String, Vec<u8>>,
}

/// The typed, in-memory view handed to the dispatcher after decoding.
#[derive(Debug, Clone)]
pub struct DecodedMessage {
    pub message_id: String,
    pub stream_name: String,
    pub type_name: String,
    pub payload: Vec<u8>,
}

/// A PEL record as returned by `XPENDING stream group - + count`.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub message_id: String,
    pub owner_consumer_id: String,
    pub idle_millis: i64,
    pub delivery_count: i64,
}
