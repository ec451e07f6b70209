//! Error Router (cross-cutting): classifies failures and decides the ack policy.
//!
//! This is the only place in the repository that inspects an error's
//! display text for routing purposes — every other component returns a
//! typed error and lets this module translate it.

use ingest_types::{classify_error_text, ErrorCode};

/// Correlation fields carried alongside a failure, used to build the DLQ
/// entry's context and to decide whether this attempt has exhausted retries.
#[derive(Debug, Clone, Default)]
pub struct FailureContext {
    pub stable_event_id: Option<String>,
    pub trace_id: Option<String>,
    pub job_id: Option<i64>,
    pub package_uri: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutedFailure {
    pub code: ErrorCode,
    /// True if the orchestrator should ack the message after publishing to
    /// the DLQ (terminal codes, or a retryable code whose retries are
    /// exhausted). False means leave the message unacked so the broker's
    /// pending-entries mechanism redelivers it.
    pub should_ack: bool,
}

/// Classify `error_message` and decide the ack policy given the job's
/// current retry bookkeeping.
#[must_use]
pub fn route_failure(error_message: &str, ctx: &FailureContext) -> RoutedFailure {
    let code = classify_error_text(error_message);
    let exhausted = ctx.retry_count >= ctx.max_retries;
    let should_ack = !code.is_retryable() || exhausted;
    RoutedFailure { code, should_ack }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_code_acks_immediately() {
        let routed = route_failure(
            "validation failed: missing field",
            &FailureContext {
                retry_count: 0,
                max_retries: 3,
                ..Default::default()
            },
        );
        assert_eq!(routed.code, ErrorCode::ValidationError);
        assert!(routed.should_ack);
    }

    #[test]
    fn retryable_code_stays_unacked_while_retries_remain() {
        let routed = route_failure(
            "checksum mismatch detected",
            &FailureContext {
                retry_count: 0,
                max_retries: 1,
                ..Default::default()
            },
        );
        assert_eq!(routed.code, ErrorCode::ChecksumMismatch);
        assert!(!routed.should_ack);
    }

    #[test]
    fn retryable_code_acks_once_retries_exhausted() {
        let routed = route_failure(
            "checksum mismatch detected",
            &FailureContext {
                retry_count: 1,
                max_retries: 1,
                ..Default::default()
            },
        );
        assert!(routed.should_ack);
    }
}
