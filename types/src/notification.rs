//! Wire-Message Codec (C1): decodes a raw stream message into a [`DropNotification`].

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use uuid::Uuid;

use crate::ids::{Checksum, StableEventId};

/// Raw stream-message fields: a mapping of field name to decoded UTF-8 value.
/// The broker transport deals in bytes; by the time a message reaches the
/// codec it has already been decoded to UTF-8 strings.
pub type RawFields = HashMap<String, String>;

static SCHEMA_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\.(\d+)$").expect("schema version pattern is valid"));

/// Default freshness threshold: a notification older than this at decode
/// time is rejected with [`WireDecodeError::PayloadExpired`].
pub const DEFAULT_FRESHNESS_THRESHOLD: ChronoDuration = ChronoDuration::hours(72);

pub const MAX_WIRE_RETRY_COUNT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
}

impl SchemaVersion {
    #[must_use]
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// True for the legacy v1.0 format (no per-segment annotations expected).
    #[must_use]
    pub fn is_legacy(self) -> bool {
        self.major == 1 && self.minor == 0
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl std::str::FromStr for SchemaVersion {
    type Err = WireDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = SCHEMA_VERSION_RE
            .captures(s)
            .ok_or_else(|| WireDecodeError::malformed("schema_version", s))?;
        let major = caps[1]
            .parse()
            .map_err(|_| WireDecodeError::malformed("schema_version", s))?;
        let minor = caps[2]
            .parse()
            .map_err(|_| WireDecodeError::malformed("schema_version", s))?;
        Ok(Self { major, minor })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

impl std::str::FromStr for Priority {
    type Err = WireDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(Self::Normal),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            other => Err(WireDecodeError::malformed("priority", other)),
        }
    }
}

/// `minio://<bucket>/<key>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageUri {
    pub bucket: String,
    pub key: String,
}

impl fmt::Display for PackageUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "minio://{}/{}", self.bucket, self.key)
    }
}

impl std::str::FromStr for PackageUri {
    type Err = WireDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("minio://")
            .ok_or_else(|| WireDecodeError::malformed("package_uri", s))?;
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| WireDecodeError::malformed("package_uri", s))?;
        if bucket.is_empty() || key.is_empty() {
            return Err(WireDecodeError::malformed("package_uri", s));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Producer {
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// The decoded stream message. Output of the Wire-Message Codec (C1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropNotification {
    pub stable_event_id: StableEventId,
    pub package_uri: PackageUri,
    pub checksum: Checksum,
    pub schema_version: SchemaVersion,
    pub retry_count: u32,
    pub produced_at: DateTime<Utc>,
    pub priority: Priority,
    pub producer: Option<Producer>,
    pub trace_id: Option<Uuid>,
}

impl DropNotification {
    /// Named predicate reused by the orchestrator to log priority-aware
    /// warnings on slow batches. Does not affect delivery order.
    #[must_use]
    pub fn is_high_priority(&self) -> bool {
        self.priority == Priority::High
    }
}

/// `retry_count < max_retries`, shared by the orchestrator's redelivery
/// check and the codec's own tests so both sides agree on the boundary.
#[must_use]
pub fn should_retry(retry_count: u32, max_retries: u32) -> bool {
    retry_count < max_retries
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireDecodeError {
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("malformed field {field}: {value:?}")]
    Malformed { field: String, value: String },
    #[error("unknown field inside nested object {object}: {field}")]
    UnknownNestedField { object: String, field: String },
    #[error("notification produced_at {produced_at} exceeds freshness threshold")]
    PayloadExpired { produced_at: DateTime<Utc> },
}

impl WireDecodeError {
    fn malformed(field: &str, value: &str) -> Self {
        Self::Malformed {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

fn required<'a>(fields: &'a RawFields, name: &str) -> Result<&'a str, WireDecodeError> {
    fields
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| WireDecodeError::MissingField(name.to_string()))
}

/// Decode raw stream fields into a [`DropNotification`].
///
/// `now` and `freshness_threshold` are passed explicitly rather than read
/// from the wall clock so the codec stays a pure function; the orchestrator
/// supplies [`Utc::now`] and [`DEFAULT_FRESHNESS_THRESHOLD`] in production.
pub fn decode(
    fields: &RawFields,
    now: DateTime<Utc>,
    freshness_threshold: ChronoDuration,
) -> Result<DropNotification, WireDecodeError> {
    let stable_event_id = StableEventId::new(required(fields, "stable_event_id")?)
        .map_err(|e| WireDecodeError::malformed("stable_event_id", &e.to_string()))?;

    let package_uri: PackageUri = required(fields, "package_uri")?.parse()?;

    let checksum = Checksum::new(required(fields, "checksum")?)
        .map_err(|e| WireDecodeError::malformed("checksum", &e.to_string()))?;

    let schema_version: SchemaVersion = required(fields, "schema_version")?.parse()?;

    let retry_count_raw = required(fields, "retry_count")?;
    let retry_count: u32 = retry_count_raw
        .parse()
        .map_err(|_| WireDecodeError::malformed("retry_count", retry_count_raw))?;
    if retry_count > MAX_WIRE_RETRY_COUNT {
        return Err(WireDecodeError::malformed("retry_count", retry_count_raw));
    }

    let produced_at_raw = required(fields, "produced_at")?;
    let produced_at = DateTime::parse_from_rfc3339(produced_at_raw)
        .map_err(|_| WireDecodeError::malformed("produced_at", produced_at_raw))?
        .with_timezone(&Utc);

    let priority: Priority = fields
        .get("priority")
        .map(String::as_str)
        .unwrap_or("")
        .parse()?;

    let producer = match fields.get("producer").map(String::as_str) {
        None | Some("") => None,
        Some(raw) => Some(parse_producer(raw)?),
    };

    let trace_id = match fields.get("metadata").map(String::as_str) {
        None | Some("") => None,
        Some(raw) => parse_metadata_trace_id(raw)?,
    };

    if now.signed_duration_since(produced_at) > freshness_threshold {
        return Err(WireDecodeError::PayloadExpired { produced_at });
    }

    Ok(DropNotification {
        stable_event_id,
        package_uri,
        checksum,
        schema_version,
        retry_count,
        produced_at,
        priority,
        producer,
        trace_id,
    })
}

fn parse_producer(raw: &str) -> Result<Producer, WireDecodeError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|_| WireDecodeError::malformed("producer", raw))?;
    let obj = value
        .as_object()
        .ok_or_else(|| WireDecodeError::malformed("producer", raw))?;
    for key in obj.keys() {
        if key != "service" && key != "instance" {
            return Err(WireDecodeError::UnknownNestedField {
                object: "producer".to_string(),
                field: key.clone(),
            });
        }
    }
    let service = obj
        .get("service")
        .and_then(|v| v.as_str())
        .ok_or_else(|| WireDecodeError::malformed("producer.service", raw))?
        .to_string();
    let instance = obj
        .get("instance")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    Ok(Producer { service, instance })
}

/// `metadata` is a nested JSON object carrying `trace_id` plus whatever
/// other fields the producer wants to attach; unlike `producer`, unknown
/// keys are tolerated here.
fn parse_metadata_trace_id(raw: &str) -> Result<Option<Uuid>, WireDecodeError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|_| WireDecodeError::malformed("metadata", raw))?;
    let obj = value
        .as_object()
        .ok_or_else(|| WireDecodeError::malformed("metadata", raw))?;
    match obj.get("trace_id").and_then(|v| v.as_str()) {
        None => Ok(None),
        Some(raw_trace_id) => Uuid::parse_str(raw_trace_id)
            .map(Some)
            .map_err(|_| WireDecodeError::malformed("metadata.trace_id", raw_trace_id)),
    }
}

/// Best-effort `trace_id` extraction from raw wire fields, used where a
/// notification failed to decode (or hasn't been decoded yet) but log
/// correlation and DLQ context still want a trace id when one is present.
/// Never errors: any malformed `metadata` simply yields `None`.
#[must_use]
pub fn peek_trace_id(fields: &RawFields) -> Option<Uuid> {
    fields
        .get("metadata")
        .filter(|raw| !raw.is_empty())
        .and_then(|raw| parse_metadata_trace_id(raw).ok().flatten())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_fields() -> RawFields {
        let mut f = RawFields::new();
        f.insert(
            "stable_event_id".into(),
            "rec-20251003T091500Z-3f9c4241".into(),
        );
        f.insert(
            "package_uri".into(),
            "minio://ingestion/drop/2025/10/03/rec-20251003T091500Z-3f9c4241.tar.gz".into(),
        );
        f.insert("checksum".into(), format!("sha256:{}", "a".repeat(64)));
        f.insert("schema_version".into(), "1.1".into());
        f.insert("retry_count".into(), "0".into());
        f.insert("produced_at".into(), "2025-10-03T09:16:00Z".into());
        f
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-10-03T09:20:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn decodes_minimal_valid_message() {
        let notif = decode(&base_fields(), now(), DEFAULT_FRESHNESS_THRESHOLD).unwrap();
        assert_eq!(notif.stable_event_id.as_str(), "rec-20251003T091500Z-3f9c4241");
        assert_eq!(notif.package_uri.bucket, "ingestion");
        assert_eq!(notif.priority, Priority::Normal);
        assert_eq!(notif.retry_count, 0);
        assert!(notif.trace_id.is_none());
    }

    #[test]
    fn rejects_missing_required_field() {
        let mut fields = base_fields();
        fields.remove("checksum");
        assert_eq!(
            decode(&fields, now(), DEFAULT_FRESHNESS_THRESHOLD),
            Err(WireDecodeError::MissingField("checksum".to_string()))
        );
    }

    #[test]
    fn rejects_retry_count_above_ten() {
        let mut fields = base_fields();
        fields.insert("retry_count".into(), "11".into());
        assert!(decode(&fields, now(), DEFAULT_FRESHNESS_THRESHOLD).is_err());
    }

    #[test]
    fn rejects_malformed_package_uri() {
        let mut fields = base_fields();
        fields.insert("package_uri".into(), "s3://bucket/key".into());
        assert!(decode(&fields, now(), DEFAULT_FRESHNESS_THRESHOLD).is_err());
    }

    #[test]
    fn parses_nested_producer_json() {
        let mut fields = base_fields();
        fields.insert(
            "producer".into(),
            r#"{"service":"recorder","instance":"pod-7"}"#.into(),
        );
        let notif = decode(&fields, now(), DEFAULT_FRESHNESS_THRESHOLD).unwrap();
        let producer = notif.producer.unwrap();
        assert_eq!(producer.service, "recorder");
        assert_eq!(producer.instance.as_deref(), Some("pod-7"));
    }

    #[test]
    fn parses_trace_id_from_nested_metadata() {
        let mut fields = base_fields();
        fields.insert(
            "metadata".into(),
            r#"{"trace_id":"550e8400-e29b-41d4-a716-446655440000"}"#.into(),
        );
        let notif = decode(&fields, now(), DEFAULT_FRESHNESS_THRESHOLD).unwrap();
        assert_eq!(
            notif.trace_id,
            Some(Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap())
        );
    }

    #[test]
    fn tolerates_unknown_fields_inside_nested_metadata() {
        let mut fields = base_fields();
        fields.insert(
            "metadata".into(),
            r#"{"trace_id":"550e8400-e29b-41d4-a716-446655440000","region":"eu"}"#.into(),
        );
        assert!(decode(&fields, now(), DEFAULT_FRESHNESS_THRESHOLD).is_ok());
    }

    #[test]
    fn rejects_unknown_field_inside_nested_producer() {
        let mut fields = base_fields();
        fields.insert(
            "producer".into(),
            r#"{"service":"recorder","region":"eu"}"#.into(),
        );
        assert!(decode(&fields, now(), DEFAULT_FRESHNESS_THRESHOLD).is_err());
    }

    #[test]
    fn tolerates_unknown_top_level_fields() {
        let mut fields = base_fields();
        fields.insert("some_future_field".into(), "whatever".into());
        assert!(decode(&fields, now(), DEFAULT_FRESHNESS_THRESHOLD).is_ok());
    }

    #[test]
    fn rejects_payload_older_than_freshness_threshold() {
        let fields = base_fields();
        let far_future = now() + ChronoDuration::hours(73);
        assert_eq!(
            decode(&fields, far_future, DEFAULT_FRESHNESS_THRESHOLD),
            Err(WireDecodeError::PayloadExpired {
                produced_at: DateTime::parse_from_rfc3339("2025-10-03T09:16:00Z")
                    .unwrap()
                    .with_timezone(&Utc)
            })
        );
    }

    #[test]
    fn should_retry_boundary() {
        assert!(should_retry(2, 3));
        assert!(!should_retry(3, 3));
    }
}
