//! The closed set of ingestion error codes, their remediation hints, and retryability.

use std::fmt;

/// Closed set of error codes that may be attached to a failed job or a DLQ entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ValidationError,
    InvalidAudioFormat,
    MissingRequiredField,
    InvalidSchemaVersion,
    ChecksumMismatch,
    ChecksumFormatInvalid,
    DuplicateEvent,
    ProcessingFailure,
    IngestionTimeout,
    StorageError,
    DatabaseError,
    MinioDownloadFailed,
    RedisPublishFailed,
    QdrantError,
    PayloadExpired,
    InternalServerError,
}

impl ErrorCode {
    /// All codes in the closed set, used by tests that assert exhaustiveness.
    pub const ALL: [ErrorCode; 16] = [
        ErrorCode::ValidationError,
        ErrorCode::InvalidAudioFormat,
        ErrorCode::MissingRequiredField,
        ErrorCode::InvalidSchemaVersion,
        ErrorCode::ChecksumMismatch,
        ErrorCode::ChecksumFormatInvalid,
        ErrorCode::DuplicateEvent,
        ErrorCode::ProcessingFailure,
        ErrorCode::IngestionTimeout,
        ErrorCode::StorageError,
        ErrorCode::DatabaseError,
        ErrorCode::MinioDownloadFailed,
        ErrorCode::RedisPublishFailed,
        ErrorCode::QdrantError,
        ErrorCode::PayloadExpired,
        ErrorCode::InternalServerError,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "validation_error",
            Self::InvalidAudioFormat => "invalid_audio_format",
            Self::MissingRequiredField => "missing_required_field",
            Self::InvalidSchemaVersion => "invalid_schema_version",
            Self::ChecksumMismatch => "checksum_mismatch",
            Self::ChecksumFormatInvalid => "checksum_format_invalid",
            Self::DuplicateEvent => "duplicate_event",
            Self::ProcessingFailure => "processing_failure",
            Self::IngestionTimeout => "ingestion_timeout",
            Self::StorageError => "storage_error",
            Self::DatabaseError => "database_error",
            Self::MinioDownloadFailed => "minio_download_failed",
            Self::RedisPublishFailed => "redis_publish_failed",
            Self::QdrantError => "qdrant_error",
            Self::PayloadExpired => "payload_expired",
            Self::InternalServerError => "internal_server_error",
        }
    }

    /// Once-retryable and retryable codes, per the error handling design.
    ///
    /// `checksum_mismatch` is retryable exactly once; the job store's retry
    /// counter (not this predicate) is what turns the second failure terminal.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::ProcessingFailure
                | Self::IngestionTimeout
                | Self::StorageError
                | Self::DatabaseError
                | Self::MinioDownloadFailed
                | Self::RedisPublishFailed
                | Self::QdrantError
                | Self::ChecksumMismatch
        )
    }

    /// The fixed remediation hint bound to this code.
    #[must_use]
    pub fn remediation_hint(self) -> &'static str {
        match self {
            Self::ValidationError
            | Self::InvalidAudioFormat
            | Self::MissingRequiredField
            | Self::InvalidSchemaVersion => "fix payload and republish within 24h",
            Self::ChecksumMismatch | Self::ChecksumFormatInvalid => {
                "rebuild archive with correct checksums and republish"
            }
            Self::DuplicateEvent => "investigate duplication; resend only if new transcript",
            Self::ProcessingFailure | Self::IngestionTimeout => "automatic retry will occur",
            Self::StorageError
            | Self::DatabaseError
            | Self::MinioDownloadFailed
            | Self::RedisPublishFailed
            | Self::QdrantError => "platform team investigating infrastructure issue",
            Self::PayloadExpired => "archive older than 72h; produce fresh drop",
            Self::InternalServerError => "contact support with trace_id",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a raised error's display text into one of the closed-set codes.
///
/// Mirrors the Error Router's substring classification: case-insensitive
/// fragment matching on the exception's message, never on its type name,
/// so this function is the *only* place in the repository allowed to look
/// at error text for routing purposes.
#[must_use]
pub fn classify_error_text(message: &str) -> ErrorCode {
    let lower = message.to_ascii_lowercase();

    if lower.contains("validation") {
        ErrorCode::ValidationError
    } else if lower.contains("checksum") && lower.contains("mismatch") {
        ErrorCode::ChecksumMismatch
    } else if lower.contains("duplicate") || lower.contains("already exists") {
        ErrorCode::DuplicateEvent
    } else if lower.contains("minio") || lower.contains("s3") {
        ErrorCode::MinioDownloadFailed
    } else if lower.contains("qdrant") {
        ErrorCode::QdrantError
    } else if lower.contains("database") || lower.contains("integrity") || lower.contains("operational") {
        ErrorCode::DatabaseError
    } else if lower.contains("timeout") {
        ErrorCode::IngestionTimeout
    } else {
        ErrorCode::ProcessingFailure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_code_has_exactly_one_remediation_hint() {
        for code in ErrorCode::ALL {
            assert!(!code.remediation_hint().is_empty());
        }
    }

    #[test]
    fn classify_checksum_mismatch() {
        assert_eq!(
            classify_error_text("Checksum MISMATCH: expected abc got def"),
            ErrorCode::ChecksumMismatch
        );
    }

    #[test]
    fn classify_falls_back_to_processing_failure() {
        assert_eq!(
            classify_error_text("the gremlins ate the bytes"),
            ErrorCode::ProcessingFailure
        );
    }

    #[test]
    fn classify_prefers_validation_over_incidental_checksum_mention() {
        assert_eq!(
            classify_error_text(
                "validation failed: manifest checksum field had a mismatch in field name casing"
            ),
            ErrorCode::ValidationError
        );
    }

    #[test]
    fn classify_duplicate_event() {
        assert_eq!(
            classify_error_text("record already exists"),
            ErrorCode::DuplicateEvent
        );
    }

    #[test]
    fn retryable_set_matches_spec() {
        assert!(ErrorCode::ProcessingFailure.is_retryable());
        assert!(ErrorCode::ChecksumMismatch.is_retryable());
        assert!(!ErrorCode::ValidationError.is_retryable());
        assert!(!ErrorCode::DuplicateEvent.is_retryable());
    }
}
