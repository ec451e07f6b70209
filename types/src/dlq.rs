//! [`DlqEntry`]: the immutable record written to the dead-letter stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error_code::ErrorCode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqRemediation {
    pub hint: &'static str,
    pub retryable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DlqContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_uri: Option<String>,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqMetadata {
    pub stream: String,
    pub published_at: DateTime<Utc>,
    pub source: &'static str,
}

/// An immutable record in the dead-letter stream, carrying the original
/// message verbatim alongside the classified error, remediation, and
/// correlation context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub original_message: serde_json::Value,
    pub error: DlqError,
    pub remediation: DlqRemediation,
    pub context: DlqContext,
    pub dlq_metadata: DlqMetadata,
    /// Denormalised top-level index fields for cheap filtering (stream
    /// consumers that only want to grep by error code or event id
    /// shouldn't need to parse the nested payload).
    pub error_code: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl DlqEntry {
    #[must_use]
    pub fn new(
        original_message: serde_json::Value,
        code: ErrorCode,
        message: String,
        stack: Option<String>,
        timestamp: DateTime<Utc>,
        context: DlqContext,
        stream: String,
    ) -> Self {
        let stable_event_id = context.stable_event_id.clone();
        let trace_id = context.trace_id.clone();
        Self {
            original_message,
            error: DlqError {
                code,
                message,
                stack,
                timestamp,
            },
            remediation: DlqRemediation {
                hint: code.remediation_hint(),
                retryable: code.is_retryable(),
            },
            context,
            dlq_metadata: DlqMetadata {
                stream,
                published_at: timestamp,
                source: "ingestion-worker",
            },
            error_code: code,
            stable_event_id,
            trace_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_carries_fixed_remediation_for_its_code() {
        let entry = DlqEntry::new(
            serde_json::json!({"stable_event_id": "rec-x"}),
            ErrorCode::ChecksumMismatch,
            "checksum mismatch".to_string(),
            None,
            Utc::now(),
            DlqContext {
                stable_event_id: Some("rec-x".to_string()),
                retry_count: 1,
                ..Default::default()
            },
            "audio.ingestion.deadletter".to_string(),
        );
        assert_eq!(
            entry.remediation.hint,
            "rebuild archive with correct checksums and republish"
        );
        assert!(entry.remediation.retryable);
        assert_eq!(entry.error_code, ErrorCode::ChecksumMismatch);
    }
}
