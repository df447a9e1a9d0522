//! # Conduit Redis Streams
//!
//! A Redis Streams consumer/producer core: consumer groups, PEL reclaim,
//! and at-least-once delivery on top of `redis`'s async connection
//! manager.
//!
//! - [`client::RedisClient`] — typed protocol wrapper (`GET`/`SET`,
//!   `XADD`, `XGROUP CREATE`, `XREADGROUP`, `XACK`, `XPENDING`, `XCLAIM`).
//! - [`sink::StreamSink`] — outbound adapter.
//! - [`source::StreamSource`] — the input-side state machine: drain this
//!   consumer's own PEL, periodically reclaim idle entries from others,
//!   blocking-read new messages.
//! - [`codec`] — pluggable payload encoding (`MessageEncoder`,
//!   `TypeNameMapper`); message serialization is always supplied by the
//!   embedding application.
//!
//! This crate does not own process lifecycle, retries, or dispatch — the
//! embedding application drives [`source::StreamSource::recv`] in its own
//! loop and decides what to do with each [`source::MessageRef`].

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod sink;
pub mod source;
pub mod types;

pub use client::RedisClient;
pub use codec::{JsonEncoder, MessageEncoder, PassthroughEncoder, TypeNameMapper};
pub use config::{
    ConnectionConfig, ConsumerGroupStartId, ConsumerIdentity, SinkConfig, SourceConfig, WireConfig,
};
pub use error::{CodecError, Result, StreamsError};
pub use sink::{OutboundMessage, StreamSink};
pub use source::{MessageRef, Phase, ReleaseOutcome, StopHandle, StreamSource};
pub use types::{DecodedMessage, FieldKeys, PendingEntry, StreamEntry};
