/*!
 * Prometheus metrics for the Redis Streams core.
 *
 * Registered the same way `message-processor`/`webhook-delivery` register
 * theirs: `lazy_static` + the `prometheus` crate, one `/metrics` endpoint
 * rendered via [`render_metrics`].
 */

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder, opts, register_histogram_vec,
    register_int_counter_vec, register_int_gauge_vec,
};

lazy_static! {
    /// Every RedisClient operation, tagged by operation name, stream, and
    /// outcome ("success", "error", "already_exists").
    pub static ref REDIS_OP_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!(
            "redis_streams_operation_total",
            "Total number of Redis Streams client operations"
        ),
        &["operation", "stream", "result"]
    )
    .expect("metric can be created");

    /// Duration of each RedisClient operation.
    pub static ref REDIS_OP_DURATION: HistogramVec = register_histogram_vec!(
        "redis_streams_operation_duration_seconds",
        "Redis Streams client operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("metric can be created");

    /// Messages yielded to the dispatcher, tagged by the outcome reported
    /// through the release event.
    pub static ref MSG_PROCESSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!(
            "redis_streams_msg_processed_total",
            "Total number of messages released back to the source, by result"
        ),
        &["stream", "result"]
    )
    .expect("metric can be created");

    /// Size of a stream's PEL, sampled during the reclaim sub-step.
    pub static ref PEL_SIZE: IntGaugeVec = register_int_gauge_vec!(
        opts!("redis_streams_pel_size", "Pending entry list size per stream"),
        &["stream"]
    )
    .expect("metric can be created");

    /// Size of the most recent batch read via XREADGROUP.
    pub static ref INCOMING_BATCH_SIZE: IntGaugeVec = register_int_gauge_vec!(
        opts!(
            "redis_streams_incoming_batch_size",
            "Number of messages returned by the most recent XREADGROUP call"
        ),
        &["stream"]
    )
    .expect("metric can be created");

    /// Malformed entries auto-acked and skipped.
    pub static ref MALFORMED_ENTRIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!(
            "redis_streams_malformed_entries_total",
            "Total number of malformed stream entries auto-acked and skipped"
        ),
        &["stream"]
    )
    .expect("metric can be created");
}

/// Render all registered metrics in Prometheus text exposition format.
pub fn render_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
