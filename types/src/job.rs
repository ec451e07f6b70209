//! [`IngestionJob`] and the status state machine (C5 entity + invariant).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error_code::ErrorCode;
use crate::ids::{Checksum, StableEventId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Pending,
    Downloading,
    Validating,
    Embedding,
    Completed,
    Failed,
}

impl IngestionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Validating => "validating",
            Self::Embedding => "embedding",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// True once a job can no longer transition (redeliveries are no-ops).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::str::FromStr for IngestionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "downloading" => Ok(Self::Downloading),
            "validating" => Ok(Self::Validating),
            "embedding" => Ok(Self::Embedding),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown ingestion status: {0:?}")]
pub struct UnknownStatus(String);

/// Whether a transition from `from` to `to` is permitted by the state machine:
///
/// ```text
/// pending → downloading → validating → embedding → completed
///                      ↘          ↘            ↘
///                       failed ← failed ← failed
/// failed → downloading (only on retry)
/// completed is terminal
/// ```
#[must_use]
pub fn is_transition_allowed(from: IngestionStatus, to: IngestionStatus) -> bool {
    use IngestionStatus::*;
    matches!(
        (from, to),
        (Pending, Downloading)
            | (Downloading, Validating)
            | (Validating, Embedding)
            | (Embedding, Completed)
            | (Downloading, Failed)
            | (Validating, Failed)
            | (Embedding, Failed)
            | (Failed, Downloading)
    )
}

/// Durable job ledger row, keyed by `stable_event_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: i64,
    pub stable_event_id: StableEventId,
    pub source_bucket: String,
    pub source_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    pub status: IngestionStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_stack: Option<String>,
    pub processing_metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_duration_ms: Option<i64>,
}

impl IngestionJob {
    /// Whether a redelivered notification for this job should simply be
    /// acked without doing any further work (it has already reached a
    /// terminal outcome for the current attempt).
    #[must_use]
    pub fn is_redelivery_noop(&self) -> bool {
        self.status == IngestionStatus::Completed
            || (self.status == IngestionStatus::Failed && self.retry_count >= self.max_retries)
    }
}
