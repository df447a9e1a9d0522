/*!
 * StreamSource — the input-side state machine.
 *
 * Runs three phases against a single consumer group: drain this consumer's
 * own PEL once at startup, then alternate between periodically reclaiming
 * idle entries from other consumers and blocking-reading new messages.
 * Every yielded [`MessageRef`] carries the right to ack or leave its entry
 * in the PEL, exercised through an explicit release call rather than a
 * destructor — acking is a fallible I/O operation, not cleanup.
 */

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{Span, field, info, info_span, warn};

use crate::client::RedisClient;
use crate::codec::MessageEncoder;
use crate::config::{ConnectionConfig, ConsumerIdentity, SourceConfig, WireConfig};
use crate::error::Result;
use crate::metrics;
use crate::types::DecodedMessage;

/// Phase of the per-process input state machine (design doc §4.3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Replaying this consumer's own pending entries after a restart.
    DrainOwnPel,
    /// Steady-state blocking read of never-delivered messages.
    ReadNew,
    /// Periodic sweep of other consumers' idle PEL entries.
    ReclaimOthers,
}

/// In-memory state of [`StreamSource`] between suspension points.
struct SourceCursor {
    phase: Phase,
    /// Last id yielded per stream during Phase A; `"0"` until then.
    per_stream_catchup_cursor: HashMap<String, String>,
    last_reclaim_at: Option<Instant>,
}

/// Outcome reported back through a [`MessageRef::release`] call.
#[derive(Debug, Clone)]
pub enum ReleaseOutcome {
    /// Processing succeeded: ack the entry.
    Ack,
    /// Processing failed: leave the entry in the PEL for reclaim. The
    /// string is recorded on the span and in logs, not interpreted.
    Nack(String),
}

/// A one-shot handle to a decoded message. Owns the right to ack the
/// underlying stream entry; the entry stays in the PEL until `release` is
/// called with [`ReleaseOutcome::Ack`], reclaimed later, or forgotten
/// (in which case it is reclaimed after the configured idle timeout).
pub struct MessageRef {
    message: DecodedMessage,
    group: String,
    client: Arc<Mutex<RedisClient>>,
    fired: Arc<AtomicBool>,
    span: Span,
}

impl MessageRef {
    pub fn message(&self) -> &DecodedMessage {
        &self.message
    }

    pub fn stream_name(&self) -> &str {
        &self.message.stream_name
    }

    pub fn message_id(&self) -> &str {
        &self.message.message_id
    }

    /// The consumer group, exposed as `redis.consumerId` metadata in the
    /// design doc's terms (the group, not the per-process consumer id —
    /// the dispatcher does not need the latter to route work).
    pub fn consumer_group(&self) -> &str {
        &self.group
    }

    /// Release this message back to the source. Fires the ack (success)
    /// or leaves the entry in the PEL (failure). Safe to call more than
    /// once — only the first call has any effect — though the contract is
    /// single-fire and callers should not rely on the guard.
    pub async fn release(&self, outcome: ReleaseOutcome) -> Result<()> {
        if self.fired.swap(true, Ordering::SeqCst) {
            warn!(
                message_id = %self.message.message_id,
                stream = %self.message.stream_name,
                "release called more than once on the same message, ignoring"
            );
            return Ok(());
        }

        let _entered = self.span.enter();
        match outcome {
            ReleaseOutcome::Ack => {
                let mut client = self.client.lock().await;
                let stream = self.message.stream_name.clone();
                let group = self.group.clone();
                let message_id = self.message.message_id.clone();
                drop(_entered);
                client.x_ack(&stream, &group, &message_id).await?;
                metrics::MSG_PROCESSED_TOTAL
                    .with_label_values(&[&stream, "success"])
                    .inc();
                info!(message_id = %message_id, stream = %stream, "message acked");
                Ok(())
            }
            ReleaseOutcome::Nack(reason) => {
                self.span.record("error", field::display(&reason));
                metrics::MSG_PROCESSED_TOTAL
                    .with_label_values(&[&self.message.stream_name, "error"])
                    .inc();
                warn!(
                    message_id = %self.message.message_id,
                    stream = %self.message.stream_name,
                    reason = %reason,
                    "message processing failed, leaving in PEL for reclaim"
                );
                Ok(())
            }
        }
    }
}

/// A stoppable handle, clonable independently of the [`StreamSource`]
/// itself, so an owner can request shutdown from another task while the
/// source's `recv` loop runs in its own.
#[derive(Clone)]
pub struct StopHandle {
    done: Arc<AtomicBool>,
}

impl StopHandle {
    /// Request graceful shutdown. The next loop iteration observes this
    /// and returns `Ok(None)`; any in-flight blocking read still returns
    /// once the server-side block timer elapses.
    pub fn stop(&self) {
        self.done.store(true, Ordering::SeqCst);
    }
}

/// Cap on the exponential backoff applied between retried loop iterations
/// after a non-fatal Redis error (not a connection loss, not NOGROUP).
const MAX_BACKOFF_SECS: u64 = 30;

/// Input-side state machine. Pull-driven: callers repeatedly await
/// [`StreamSource::recv`] and process one message at a time; there is no
/// internal queue beyond the batch most recently read from Redis.
pub struct StreamSource {
    client: Arc<Mutex<RedisClient>>,
    config: SourceConfig,
    identity: ConsumerIdentity,
    cursor: SourceCursor,
    pending: VecDeque<DecodedMessage>,
    done: Arc<AtomicBool>,
    consecutive_errors: u32,
}

impl StreamSource {
    /// Connect and prepare a source. Does not create consumer groups yet
    /// — call [`StreamSource::initialize`] before the first `recv`.
    pub async fn connect(
        connection: &ConnectionConfig,
        config: SourceConfig,
        identity: ConsumerIdentity,
        encoder: Arc<dyn MessageEncoder>,
        wire: WireConfig,
    ) -> Result<Self> {
        let client = RedisClient::connect(connection, encoder, wire).await?;
        let mut per_stream_catchup_cursor = HashMap::new();
        for stream in &config.streams {
            per_stream_catchup_cursor.insert(stream.clone(), "0".to_string());
        }

        Ok(Self {
            client: Arc::new(Mutex::new(client)),
            config,
            identity,
            cursor: SourceCursor {
                phase: Phase::DrainOwnPel,
                per_stream_catchup_cursor,
                last_reclaim_at: None,
            },
            pending: VecDeque::new(),
            done: Arc::new(AtomicBool::new(false)),
            consecutive_errors: 0,
        })
    }

    /// Create the consumer group on every configured stream (§4.3.1).
    /// Idempotent — safe to call on every process start.
    pub async fn initialize(&mut self) -> Result<()> {
        let mut client = self.client.lock().await;
        for stream in &self.config.streams {
            client
                .x_group_create(
                    stream,
                    &self.identity.group,
                    &self.config.consumer_group_start_id,
                    true,
                )
                .await?;
        }
        Ok(())
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            done: self.done.clone(),
        }
    }

    /// Close the underlying connection. Any operation already in flight at
    /// the time this is called observes a connection error.
    pub async fn dispose(self) {
        drop(self.client);
    }

    fn to_message_ref(&self, message: DecodedMessage) -> MessageRef {
        let span = info_span!(
            "stream_message",
            message_id = %message.message_id,
            stream = %message.stream_name,
            consumer_group = %self.identity.group,
            consumer = %self.identity.consumer,
            error = field::Empty,
        );
        MessageRef {
            message,
            group: self.identity.group.clone(),
            client: self.client.clone(),
            fired: Arc::new(AtomicBool::new(false)),
            span,
        }
    }

    fn reclaim_due(&self) -> bool {
        match self.config.reclaim_message_interval {
            None => false,
            Some(interval) => match self.cursor.last_reclaim_at {
                None => true,
                Some(last) => Instant::now() >= last + interval,
            },
        }
    }

    /// Pull the next message, driving the phase machine as needed. Returns
    /// `Ok(None)` once `stop()` has been observed.
    ///
    /// Errors from a phase step are classified before being handled: a
    /// missing consumer group (`NOGROUP`) triggers a recreate-and-continue,
    /// a connection-level failure propagates immediately (the outer
    /// framework is expected to restart the source), and anything else is
    /// retried after an exponential backoff capped at
    /// [`MAX_BACKOFF_SECS`] — the same shape as a crash-looping reclaim
    /// pass elsewhere in the stack.
    pub async fn recv(&mut self) -> Result<Option<MessageRef>> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                self.cursor
                    .per_stream_catchup_cursor
                    .insert(message.stream_name.clone(), message.message_id.clone());
                return Ok(Some(self.to_message_ref(message)));
            }

            if self.done.load(Ordering::SeqCst) {
                return Ok(None);
            }

            let step_result = match self.cursor.phase {
                Phase::DrainOwnPel => self.step_drain_own_pel().await,
                Phase::ReadNew => self.step_read_new().await,
                Phase::ReclaimOthers => self.step_reclaim_others().await,
            };

            match step_result {
                Ok(()) => {
                    self.consecutive_errors = 0;
                }
                Err(e) if e.is_missing_group() => {
                    warn!(
                        consumer_group = %self.identity.group,
                        error = %e,
                        "consumer group missing, recreating"
                    );
                    self.initialize().await?;
                }
                Err(e) if e.is_connection_error() => {
                    return Err(e);
                }
                Err(e) => {
                    self.consecutive_errors = self.consecutive_errors.saturating_add(1);
                    let backoff =
                        Duration::from_secs(2u64.pow(self.consecutive_errors.min(5)).min(MAX_BACKOFF_SECS));
                    warn!(
                        error = %e,
                        consecutive_errors = self.consecutive_errors,
                        backoff_secs = backoff.as_secs(),
                        "stream read error, backing off before retry"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn step_drain_own_pel(&mut self) -> Result<()> {
        let streams_with_ids: Vec<(String, String)> = self
            .config
            .streams
            .iter()
            .map(|s| {
                let cursor = self
                    .cursor
                    .per_stream_catchup_cursor
                    .get(s)
                    .cloned()
                    .unwrap_or_else(|| "0".to_string());
                (s.clone(), cursor)
            })
            .collect();

        let batch = {
            let mut client = self.client.lock().await;
            client
                .x_read_group(
                    &streams_with_ids,
                    &self.identity.group,
                    &self.identity.consumer,
                    self.config.batch_size,
                    self.config.block_timeout,
                )
                .await?
        };

        if batch.is_empty() {
            info!(
                consumer_group = %self.identity.group,
                "own PEL drained, switching to steady state"
            );
            self.cursor.phase = Phase::ReadNew;
        } else {
            self.pending.extend(batch);
        }
        Ok(())
    }

    async fn step_read_new(&mut self) -> Result<()> {
        if self.reclaim_due() {
            self.cursor.phase = Phase::ReclaimOthers;
            return Ok(());
        }

        let streams_with_ids: Vec<(String, String)> = self
            .config
            .streams
            .iter()
            .map(|s| (s.clone(), ">".to_string()))
            .collect();

        let batch = {
            let mut client = self.client.lock().await;
            client
                .x_read_group(
                    &streams_with_ids,
                    &self.identity.group,
                    &self.identity.consumer,
                    self.config.batch_size,
                    self.config.block_timeout,
                )
                .await?
        };

        for stream in &self.config.streams {
            let count = batch.iter().filter(|m| &m.stream_name == stream).count();
            metrics::INCOMING_BATCH_SIZE
                .with_label_values(&[stream])
                .set(count as i64);
        }

        if !batch.is_empty() {
            self.pending.extend(batch);
        }
        Ok(())
    }

    async fn step_reclaim_others(&mut self) -> Result<()> {
        let mut any_pending = false;
        let mut claimed = Vec::new();

        for stream in self.config.streams.clone() {
            let pending_entries = {
                let mut client = self.client.lock().await;
                client
                    .x_pending_range(&stream, &self.identity.group, self.config.batch_size)
                    .await?
            };

            metrics::PEL_SIZE
                .with_label_values(&[stream.as_str()])
                .set(pending_entries.len() as i64);

            if pending_entries.is_empty() {
                continue;
            }
            any_pending = true;

            let ids: Vec<String> = pending_entries
                .into_iter()
                .map(|entry| entry.message_id)
                .collect();

            let mut client = self.client.lock().await;
            let messages = client
                .x_claim(
                    &stream,
                    &self.identity.group,
                    &self.identity.consumer,
                    self.config.idle_timeout.as_millis() as i64,
                    &ids,
                )
                .await?;
            claimed.extend(messages);
        }

        if any_pending {
            // Backlog remains; retry the reclaim pass next cycle instead
            // of advancing the timer.
        } else {
            self.cursor.last_reclaim_at = Some(Instant::now());
        }

        self.cursor.phase = Phase::ReadNew;
        if !claimed.is_empty() {
            self.pending.extend(claimed);
        }
        Ok(())
    }
}
