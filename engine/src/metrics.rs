//! Process-wide metrics registry (§6).
//!
//! Built on the `metrics` facade: this module only records through the
//! globally installed recorder, it never installs one itself. Wiring a
//! `metrics-exporter-prometheus` recorder at process start is the binary
//! entrypoint's job, not this crate's.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

const ACK_LATENCY: &str = "audio_ingest_ack_latency_seconds";
const VALIDATION_DURATION: &str = "audio_ingest_validation_duration_seconds";
const PROCESSING_DURATION: &str = "audio_ingest_processing_duration_seconds";
const CHECKSUM_DURATION: &str = "audio_ingest_checksum_duration_seconds";
const DOWNLOAD_BYTES: &str = "audio_ingest_download_bytes";
const SEGMENTS_PER_CONVERSATION: &str = "audio_ingest_segments_per_conversation";
const PARTICIPANTS_PER_CONVERSATION: &str = "audio_ingest_participants_per_conversation";

const FAILURES_TOTAL: &str = "audio_ingest_failures_total";
const RETRIES_TOTAL: &str = "audio_ingest_retries_total";
const DLQ_PUBLISHES_TOTAL: &str = "audio_ingest_dlq_publishes_total";
const NLP_MODE_TOTAL: &str = "audio_ingest_nlp_mode_total";
const TRACE_ID_PRESENCE_TOTAL: &str = "audio_ingest_trace_id_presence_total";
const SUCCESS_TOTAL: &str = "audio_ingest_success_total";
const MESSAGES_IN_FLIGHT: &str = "audio_ingest_messages_in_flight";

pub fn record_ack_latency(d: Duration) {
    histogram!(ACK_LATENCY).record(d.as_secs_f64());
}

pub fn record_validation_duration(d: Duration) {
    histogram!(VALIDATION_DURATION).record(d.as_secs_f64());
}

pub fn record_processing_duration(d: Duration) {
    histogram!(PROCESSING_DURATION).record(d.as_secs_f64());
}

pub fn record_checksum_duration(d: Duration) {
    histogram!(CHECKSUM_DURATION).record(d.as_secs_f64());
}

pub fn record_download_bytes(bytes: u64) {
    histogram!(DOWNLOAD_BYTES).record(bytes as f64);
}

pub fn record_segments_per_conversation(count: usize) {
    histogram!(SEGMENTS_PER_CONVERSATION).record(count as f64);
}

pub fn record_participants_per_conversation(count: usize) {
    histogram!(PARTICIPANTS_PER_CONVERSATION).record(count as f64);
}

pub fn record_failure(reason: &'static str) {
    counter!(FAILURES_TOTAL, "reason" => reason).increment(1);
}

pub fn record_retry(retry_count: u32) {
    counter!(RETRIES_TOTAL, "retry_count" => retry_count.to_string()).increment(1);
}

pub fn record_dlq_publish(error_code: &'static str) {
    counter!(DLQ_PUBLISHES_TOTAL, "error_code" => error_code).increment(1);
}

/// NLP mode label: `"enriched"`, `"legacy"`, or `"skipped"` (§4.6).
pub fn record_nlp_mode(mode: &'static str) {
    counter!(NLP_MODE_TOTAL, "mode" => mode).increment(1);
}

pub fn record_trace_id_presence(present: bool) {
    let label = if present { "true" } else { "false" };
    counter!(TRACE_ID_PRESENCE_TOTAL, "present" => label).increment(1);
}

pub fn record_success() {
    counter!(SUCCESS_TOTAL).increment(1);
}

pub fn set_messages_in_flight(count: i64) {
    gauge!(MESSAGES_IN_FLIGHT).set(count as f64);
}

pub fn increment_in_flight() {
    gauge!(MESSAGES_IN_FLIGHT).increment(1.0);
}

pub fn decrement_in_flight() {
    gauge!(MESSAGES_IN_FLIGHT).decrement(1.0);
}
