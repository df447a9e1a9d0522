/*!
 * RedisClient — thin, typed protocol wrapper over a Redis connection.
 *
 * Translates the typed operations in the design doc (§4.1) into Redis
 * commands and back: `GET`/`SET`, `XADD`, `XGROUP CREATE`, `XREADGROUP`,
 * `XACK`, `XPENDING`, `XCLAIM`. Every operation starts a tracing span and
 * finishes a success/error counter, the way `StreamConsumer` does in the
 * service this core was distilled from.
 */

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use tracing::{debug, error, info, instrument, warn};

use crate::codec::{MessageEncoder, TypeNameMapper};
use crate::config::{ConnectionConfig, ConsumerGroupStartId, WireConfig};
use crate::error::{Result, StreamsError};
use crate::metrics;
use crate::types::{DecodedMessage, PendingEntry};

fn base64_engine() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

/// Typed Redis protocol wrapper. Owns exactly one connection; operations
/// serialize through it (no pipelining assumed — see design doc §5).
pub struct RedisClient {
    conn: ConnectionManager,
    encoder: Arc<dyn MessageEncoder>,
    wire: WireConfig,
    type_name_mapper: Option<Arc<dyn TypeNameMapper>>,
}

impl RedisClient {
    /// Connect to Redis and wrap the connection.
    pub async fn connect(
        connection: &ConnectionConfig,
        encoder: Arc<dyn MessageEncoder>,
        wire: WireConfig,
    ) -> Result<Self> {
        let url = connection.redis_url();
        info!("connecting to redis at {}:{}", connection.host, connection.port);

        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!("redis connection established");
        Ok(Self {
            conn,
            encoder,
            wire,
            type_name_mapper: None,
        })
    }

    /// Attach a type-name mapper consulted by [`RedisClient::put_object`]
    /// and [`RedisClient::x_add`] to resolve a caller-supplied type hint
    /// into the logical type name stamped on the wire (spec §1: the core
    /// only calls `encode`/`decode` and a type-name mapper). Optional —
    /// callers that already pass the logical type name directly don't need
    /// one.
    pub fn with_type_name_mapper(mut self, mapper: Arc<dyn TypeNameMapper>) -> Self {
        self.type_name_mapper = Some(mapper);
        self
    }

    fn resolve_type_name(&self, type_hint: &str) -> String {
        resolve_type_name_with(self.type_name_mapper.as_deref(), type_hint)
    }

    fn record(operation: &'static str, stream: &str, result: &'static str, started: Instant) {
        metrics::REDIS_OP_TOTAL
            .with_label_values(&[operation, stream, result])
            .inc();
        metrics::REDIS_OP_DURATION
            .with_label_values(&[operation])
            .observe(started.elapsed().as_secs_f64());
    }

    fn encode_field(&self, type_name: &str, payload: &[u8]) -> Result<Vec<u8>> {
        let encoded = self.encoder.encode(type_name, payload)?;
        if self.wire.base64_encode {
            Ok(base64_engine().encode(encoded).into_bytes())
        } else {
            Ok(encoded)
        }
    }

    fn decode_field(&self, type_name: &str, bytes: &[u8]) -> Result<Vec<u8>> {
        let raw = if self.wire.base64_encode {
            base64_engine()
                .decode(bytes)
                .map_err(crate::error::CodecError::from)?
        } else {
            bytes.to_vec()
        };
        Ok(self.encoder.decode(type_name, &raw)?)
    }

    /// `SET key <encoded payload>` (`putObject` in the design doc).
    #[instrument(skip(self, body), fields(stream = "none"))]
    pub async fn put_object(&mut self, type_name: &str, body: &[u8], key: &str) -> Result<()> {
        let started = Instant::now();
        let type_name = self.resolve_type_name(type_name);
        let encoded = self.encode_field(&type_name, body)?;
        let result: std::result::Result<(), redis::RedisError> =
            self.conn.set(key, encoded).await;
        match result {
            Ok(()) => {
                Self::record("put_object", "none", "success", started);
                Ok(())
            }
            Err(e) => {
                Self::record("put_object", "none", "error", started);
                Err(e.into())
            }
        }
    }

    /// `GET key`, decoded. Returns `None` when the key is missing.
    #[instrument(skip(self), fields(stream = "none"))]
    pub async fn get_object(&mut self, type_name: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let started = Instant::now();
        let result: std::result::Result<Option<Vec<u8>>, redis::RedisError> =
            self.conn.get(key).await;
        match result {
            Ok(Some(bytes)) => {
                Self::record("get_object", "none", "success", started);
                Ok(Some(self.decode_field(type_name, &bytes)?))
            }
            Ok(None) => {
                Self::record("get_object", "none", "success", started);
                Ok(None)
            }
            Err(e) => {
                Self::record("get_object", "none", "error", started);
                Err(e.into())
            }
        }
    }

    /// `XADD stream [MAXLEN ~ N] <id> payloadKey <bytes> typeNameKey <type>`.
    /// Returns the id Redis assigned.
    #[instrument(skip(self, body), fields(stream = %stream))]
    pub async fn x_add(
        &mut self,
        type_name: &str,
        stream: &str,
        body: &[u8],
        id: Option<&str>,
        max_len: Option<usize>,
    ) -> Result<String> {
        let started = Instant::now();
        let type_name = self.resolve_type_name(type_name);
        let encoded = self.encode_field(&type_name, body)?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream);
        if let Some(max_len) = max_len {
            cmd.arg("MAXLEN").arg("~").arg(max_len);
        }
        cmd.arg(id.unwrap_or("*"));
        cmd.arg(&self.wire.field_keys.payload).arg(encoded);
        cmd.arg(&self.wire.field_keys.type_name).arg(&type_name);

        let result: std::result::Result<String, redis::RedisError> =
            cmd.query_async(&mut self.conn).await;

        match result {
            Ok(assigned_id) => {
                Self::record("x_add", stream, "success", started);
                Ok(assigned_id)
            }
            Err(e) => {
                Self::record("x_add", stream, "error", started);
                error!(stream, error = %e, "XADD failed");
                Err(e.into())
            }
        }
    }

    /// `XGROUP CREATE stream group start-id MKSTREAM`, idempotent by
    /// default: BUSYGROUP is swallowed and counted separately, not surfaced
    /// as an error.
    #[instrument(skip(self), fields(stream = %stream))]
    pub async fn x_group_create(
        &mut self,
        stream: &str,
        group: &str,
        start_id: &ConsumerGroupStartId,
        suppress_already_exists: bool,
    ) -> Result<&'static str> {
        let started = Instant::now();
        let result: std::result::Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg(start_id.as_redis_arg())
            .arg("MKSTREAM")
            .query_async(&mut self.conn)
            .await;

        match result {
            Ok(_) => {
                Self::record("x_group_create", stream, "success", started);
                info!(stream, group, "created consumer group");
                Ok("OK")
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                Self::record("x_group_create", stream, "already_exists", started);
                debug!(stream, group, "consumer group already exists");
                if suppress_already_exists {
                    Ok("OK")
                } else {
                    Err(StreamsError::ConsumerGroup(e.to_string()))
                }
            }
            Err(e) => {
                Self::record("x_group_create", stream, "error", started);
                Err(e.into())
            }
        }
    }

    /// `XACK stream group id`.
    #[instrument(skip(self), fields(stream = %stream))]
    pub async fn x_ack(&mut self, stream: &str, group: &str, message_id: &str) -> Result<i64> {
        let started = Instant::now();
        let result: std::result::Result<i64, redis::RedisError> = self
            .conn
            .xack(stream, group, &[message_id])
            .await;

        match result {
            Ok(acked) => {
                Self::record("x_ack", stream, "success", started);
                Ok(acked)
            }
            Err(e) => {
                Self::record("x_ack", stream, "error", started);
                Err(e.into())
            }
        }
    }

    /// `XREADGROUP GROUP group consumer COUNT n BLOCK ms STREAMS s1 .. id1 ..`.
    ///
    /// `streams` pairs a stream name with the id to read from: `">"` means
    /// "new messages never delivered to this consumer"; any other id means
    /// "this consumer's own pending entries after that id" (spec §4.1).
    #[instrument(skip(self, streams))]
    pub async fn x_read_group(
        &mut self,
        streams: &[(String, String)],
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<DecodedMessage>> {
        if streams.is_empty() {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let stream_names: Vec<&str> = streams.iter().map(|(s, _)| s.as_str()).collect();
        let ids: Vec<&str> = streams.iter().map(|(_, id)| id.as_str()).collect();

        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block.as_millis() as usize);

        let result: std::result::Result<StreamReadReply, redis::RedisError> = self
            .conn
            .xread_options(&stream_names, &ids, &opts)
            .await;

        match result {
            Ok(reply) => {
                let messages = self.decode_reply(reply, group).await?;
                for stream in &stream_names {
                    Self::record("x_read_group", stream, "success", started);
                }
                Ok(messages)
            }
            Err(e) if is_block_timeout(&e) => {
                for stream in &stream_names {
                    Self::record("x_read_group", stream, "success", started);
                }
                Ok(Vec::new())
            }
            Err(e) => {
                for stream in &stream_names {
                    Self::record("x_read_group", stream, "error", started);
                }
                Err(e.into())
            }
        }
    }

    /// `XPENDING stream group - + count`. Queries the full range.
    #[instrument(skip(self), fields(stream = %stream))]
    pub async fn x_pending_range(
        &mut self,
        stream: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>> {
        let started = Instant::now();

        type XPendingRow = (String, String, i64, i64);
        let result: std::result::Result<Vec<XPendingRow>, redis::RedisError> = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut self.conn)
            .await;

        match result {
            Ok(rows) => {
                Self::record("x_pending_range", stream, "success", started);
                Ok(rows
                    .into_iter()
                    .map(|(message_id, owner_consumer_id, idle_millis, delivery_count)| {
                        PendingEntry {
                            message_id,
                            owner_consumer_id,
                            idle_millis,
                            delivery_count,
                        }
                    })
                    .collect())
            }
            Err(e) => {
                Self::record("x_pending_range", stream, "error", started);
                Err(e.into())
            }
        }
    }

    /// `XCLAIM stream group consumer min-idle id1 id2 ..`. Empty `ids`
    /// short-circuits without a round trip.
    #[instrument(skip(self, ids), fields(stream = %stream))]
    pub async fn x_claim(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: i64,
        ids: &[String],
    ) -> Result<Vec<DecodedMessage>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(stream).arg(group).arg(consumer).arg(min_idle_ms);
        for id in ids {
            cmd.arg(id);
        }

        let result: std::result::Result<redis::Value, redis::RedisError> =
            cmd.query_async(&mut self.conn).await;

        match result {
            Ok(value) => {
                let messages = self.decode_claim_reply(value, stream, group).await?;
                Self::record("x_claim", stream, "success", started);
                Ok(messages)
            }
            Err(e) => {
                Self::record("x_claim", stream, "error", started);
                Err(e.into())
            }
        }
    }

    /// Decode a `StreamReadReply` into typed messages, auto-acking and
    /// dropping any entry whose payload field is missing (spec §4.1:
    /// malformed entries self-heal).
    async fn decode_reply(
        &mut self,
        reply: StreamReadReply,
        group: &str,
    ) -> Result<Vec<DecodedMessage>> {
        let mut out = Vec::new();
        for stream_key in reply.keys {
            let stream_name = stream_key.key.clone();
            for entry in stream_key.ids {
                let fields: HashMap<String, Vec<u8>> = entry
                    .map
                    .into_iter()
                    .filter_map(|(k, v)| redis_value_to_bytes(v).map(|b| (k, b)))
                    .collect();

                match self.decode_one(&stream_name, &entry.id, fields, group).await? {
                    Some(msg) => out.push(msg),
                    None => continue,
                }
            }
        }
        Ok(out)
    }

    /// Decode the raw `XCLAIM` reply (array of `[id, field-map]` pairs).
    async fn decode_claim_reply(
        &mut self,
        value: redis::Value,
        stream: &str,
        group: &str,
    ) -> Result<Vec<DecodedMessage>> {
        let redis::Value::Array(entries) = value else {
            return Err(StreamsError::Protocol(
                "XCLAIM reply was not an array".to_string(),
            ));
        };

        let mut out = Vec::new();
        for entry in entries {
            let redis::Value::Array(parts) = entry else {
                continue;
            };
            if parts.len() < 2 {
                continue;
            }
            let id = match &parts[0] {
                redis::Value::BulkString(bytes) => String::from_utf8_lossy(bytes).to_string(),
                redis::Value::SimpleString(s) => s.clone(),
                _ => continue,
            };
            let redis::Value::Array(field_pairs) = &parts[1] else {
                continue;
            };

            let mut fields = HashMap::new();
            for chunk in field_pairs.chunks(2) {
                if let [key, value] = chunk {
                    if let (Some(key), Some(value)) = (
                        redis_value_to_bytes(key.clone()),
                        redis_value_to_bytes(value.clone()),
                    ) {
                        fields.insert(String::from_utf8_lossy(&key).to_string(), value);
                    }
                }
            }

            if let Some(msg) = self.decode_one(stream, &id, fields, group).await? {
                out.push(msg);
            }
        }
        Ok(out)
    }

    async fn decode_one(
        &mut self,
        stream: &str,
        message_id: &str,
        mut fields: HashMap<String, Vec<u8>>,
        group: &str,
    ) -> Result<Option<DecodedMessage>> {
        let payload_key = self.wire.field_keys.payload.clone();
        let type_key = self.wire.field_keys.type_name.clone();

        let Some(payload_bytes) = fields.remove(&payload_key) else {
            warn!(
                stream,
                message_id, "malformed stream entry: missing payload field, auto-acking"
            );
            metrics::MALFORMED_ENTRIES_TOTAL
                .with_label_values(&[stream])
                .inc();
            // Auto-ack to unblock the PEL; errors here are logged but not
            // propagated — the entry is already unusable either way.
            if let Err(e) = self.x_ack(stream, group, message_id).await {
                error!(stream, message_id, error = %e, "failed to auto-ack malformed entry");
            }
            return Ok(None);
        };

        let type_name = fields
            .remove(&type_key)
            .map(|b| String::from_utf8_lossy(&b).to_string())
            .unwrap_or_default();

        let payload = self.decode_field(&type_name, &payload_bytes)?;

        Ok(Some(DecodedMessage {
            message_id: message_id.to_string(),
            stream_name: stream.to_string(),
            type_name,
            payload,
        }))
    }
}

/// Resolve a caller-supplied type hint through an optional mapper,
/// defaulting to passing the hint through unchanged when none is attached.
fn resolve_type_name_with(mapper: Option<&dyn TypeNameMapper>, type_hint: &str) -> String {
    match mapper {
        Some(mapper) => mapper.type_name_for(type_hint),
        None => type_hint.to_string(),
    }
}

fn redis_value_to_bytes(value: redis::Value) -> Option<Vec<u8>> {
    match value {
        redis::Value::BulkString(bytes) => Some(bytes),
        redis::Value::SimpleString(s) => Some(s.into_bytes()),
        redis::Value::Int(i) => Some(i.to_string().into_bytes()),
        _ => None,
    }
}

/// A `BLOCK`-timeout response from `XREADGROUP` surfaces as a nil reply
/// from `redis-rs`, not as a transport failure. Classify it as an empty
/// read rather than letting it bubble up as a connection error.
fn is_block_timeout(e: &redis::RedisError) -> bool {
    let s = e.to_string().to_lowercase();
    s.contains("response was nil") || (s.contains("timed out") && !s.contains("connection"))
}
