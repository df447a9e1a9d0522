//! Configuration and consumer identity.
//!
//! Defaults match the option table in the design doc exactly: port 6379,
//! db 0, base64 on, block 100ms, idle 30_000ms, reclaim interval 60_000ms,
//! batch 10, payload-key `redis.stream.key`, type-key `redis.stream.type`,
//! consumer-group-start-id `$`.

use std::env;
use std::time::Duration;

use conduit_common::{Error, Result};
use uuid::Uuid;

use crate::types::FieldKeys;

/// Connection-level configuration shared by [`crate::client::RedisClient`],
/// [`crate::sink::StreamSink`] and [`crate::source::StreamSource`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
}

impl ConnectionConfig {
    /// Build a `redis://` connection URL.
    ///
    /// Mirrors `ProcessorConfig::redis_url` in the service this core was
    /// extracted from: password embedded as userinfo when present.
    pub fn redis_url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// Load from environment variables.
    ///
    /// Required: `REDIS_HOST`. Optional: `REDIS_PORT` (default 6379),
    /// `REDIS_DB` (default 0), `REDIS_PASSWORD`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let host = env::var("REDIS_HOST").map_err(|_| Error::Config("REDIS_HOST not set".into()))?;
        let port = env::var("REDIS_PORT")
            .ok()
            .map(|s| {
                s.parse::<u16>()
                    .map_err(|_| Error::Config("REDIS_PORT must be a valid port number".into()))
            })
            .transpose()?
            .unwrap_or(6379);
        let db = env::var("REDIS_DB")
            .ok()
            .map(|s| {
                s.parse::<i64>()
                    .map_err(|_| Error::Config("REDIS_DB must be a valid integer".into()))
            })
            .transpose()?
            .unwrap_or(0);
        let password = env::var("REDIS_PASSWORD").ok();

        Ok(Self {
            host,
            port,
            db,
            password,
        })
    }
}

/// Encoding/field-layout options shared by producer and consumer. The two
/// sides must agree on these or every entry looks malformed (see spec §6).
#[derive(Debug, Clone)]
pub struct WireConfig {
    pub base64_encode: bool,
    pub field_keys: FieldKeys,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            base64_encode: true,
            field_keys: FieldKeys::default(),
        }
    }
}

/// Where a freshly created consumer group should start reading from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerGroupStartId {
    /// `$` — only messages produced after the group existed.
    New,
    /// `0` — from the beginning of the stream.
    Beginning,
    /// A literal message id.
    Explicit(String),
}

impl Default for ConsumerGroupStartId {
    fn default() -> Self {
        Self::New
    }
}

impl ConsumerGroupStartId {
    pub fn as_redis_arg(&self) -> &str {
        match self {
            Self::New => "$",
            Self::Beginning => "0",
            Self::Explicit(id) => id,
        }
    }
}

/// `(group, consumer)` identity. Exactly one live process should read
/// under a given pair — two processes sharing a consumer id corrupts PEL
/// semantics (spec §3).
#[derive(Debug, Clone)]
pub struct ConsumerIdentity {
    pub group: String,
    pub consumer: String,
}

impl ConsumerIdentity {
    /// Stable identity: the caller supplied a consumer id, so restarts
    /// resume this consumer's own PEL in Phase A.
    pub fn stable(group: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            consumer: consumer.into(),
        }
    }

    /// Fresh identity: a unique id generated per process start. The
    /// previous PEL (if any) is orphaned and must be reclaimed by another
    /// consumer via the periodic reclaim pass.
    pub fn auto(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            consumer: format!("consumer-{}", Uuid::new_v4()),
        }
    }

    /// Load from `CONSUMER_GROUP` (required) and `CONSUMER_ID` (optional;
    /// auto-generated when unset).
    pub fn from_env() -> Result<Self> {
        let group =
            env::var("CONSUMER_GROUP").map_err(|_| Error::Config("CONSUMER_GROUP not set".into()))?;
        match env::var("CONSUMER_ID").ok() {
            Some(id) => Ok(Self::stable(group, id)),
            None => Ok(Self::auto(group)),
        }
    }
}

/// Source-side tuning knobs.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub streams: Vec<String>,
    pub consumer_group_start_id: ConsumerGroupStartId,
    pub batch_size: usize,
    pub block_timeout: Duration,
    pub idle_timeout: Duration,
    /// `None` disables the reclaim sub-step entirely (spec §4.4).
    pub reclaim_message_interval: Option<Duration>,
}

impl SourceConfig {
    pub fn new(streams: Vec<String>) -> Self {
        Self {
            streams,
            consumer_group_start_id: ConsumerGroupStartId::default(),
            batch_size: 10,
            block_timeout: Duration::from_millis(100),
            idle_timeout: Duration::from_millis(30_000),
            reclaim_message_interval: Some(Duration::from_millis(60_000)),
        }
    }
}

/// Sink-side configuration: default target stream and optional cap.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub default_stream: String,
    pub max_stream_length: Option<usize>,
}

impl SinkConfig {
    pub fn new(default_stream: impl Into<String>) -> Self {
        Self {
            default_stream: default_stream.into(),
            max_stream_length: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_url_without_password() {
        let config = ConnectionConfig {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            password: None,
        };
        assert_eq!(config.redis_url(), "redis://localhost:6379/0");
    }

    #[test]
    fn redis_url_with_password() {
        let config = ConnectionConfig {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            password: Some("secret".to_string()),
        };
        assert_eq!(config.redis_url(), "redis://:secret@localhost:6379/0");
    }

    #[test]
    fn source_config_defaults_match_spec() {
        let config = SourceConfig::new(vec!["events".to_string()]);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.block_timeout, Duration::from_millis(100));
        assert_eq!(config.idle_timeout, Duration::from_millis(30_000));
        assert_eq!(
            config.reclaim_message_interval,
            Some(Duration::from_millis(60_000))
        );
        assert_eq!(config.consumer_group_start_id, ConsumerGroupStartId::New);
    }

    #[test]
    fn consumer_group_start_id_redis_args() {
        assert_eq!(ConsumerGroupStartId::New.as_redis_arg(), "$");
        assert_eq!(ConsumerGroupStartId::Beginning.as_redis_arg(), "0");
        assert_eq!(
            ConsumerGroupStartId::Explicit("5-0".to_string()).as_redis_arg(),
            "5-0"
        );
    }

    #[test]
    fn identity_auto_generates_unique_consumers() {
        let a = ConsumerIdentity::auto("group");
        let b = ConsumerIdentity::auto("group");
        assert_ne!(a.consumer, b.consumer);
        assert_eq!(a.group, "group");
    }
}
