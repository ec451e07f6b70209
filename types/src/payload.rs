//! The canonical `conversation.json` payload (C4 input/output shape).
//!
//! Structural strictness (no unknown fields inside nested known objects) is
//! enforced by `serde(deny_unknown_fields)` here; cross-reference and
//! business-rule validation live in the payload validator, not in this type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::StableEventId;
use crate::notification::SchemaVersion;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConversationPayload {
    #[serde(with = "schema_version_str")]
    pub schema_version: SchemaVersion,
    pub stable_event_id: StableEventId,
    pub source_system: String,
    pub created_at: DateTime<Utc>,
    pub meeting_metadata: MeetingMetadata,
    pub participants: Vec<Participant>,
    pub segments: Vec<Segment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_flags: Option<QualityFlags>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<serde_json::Value>,
}

mod schema_version_str {
    use super::SchemaVersion;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &SchemaVersion, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SchemaVersion, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MeetingMetadata {
    pub scheduled_start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agenda: Option<String>,
}

impl MeetingMetadata {
    /// Duration in whole minutes, from `duration_sec` or `end_at - scheduled_start`.
    #[must_use]
    pub fn duration_minutes(&self) -> Option<i64> {
        if let Some(secs) = self.duration_sec {
            return Some(i64::from(secs) / 60);
        }
        let end_at = self.end_at?;
        let delta = end_at.signed_duration_since(self.scheduled_start);
        Some(delta.num_seconds().max(0) / 60)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Participant {
    pub speaker_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Opaque; may carry `voice_matches`, which MUST round-trip byte-for-byte
    /// through storage. Kept as a raw JSON value rather than a typed field so
    /// nothing here can lossily re-serialise it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Participant {
    #[must_use]
    pub fn voice_matches(&self) -> Option<&serde_json::Value> {
        self.metadata.as_ref()?.get("voice_matches")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Segment {
    pub segment_id: String,
    pub speaker_id: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
    pub language: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Annotations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<Entity>>,
}

impl Annotations {
    /// True when this segment carries enough annotation to be considered
    /// "enriched" by the dispatcher (a sentiment label or a non-empty
    /// entity list).
    #[must_use]
    pub fn is_enriched(&self) -> bool {
        self.sentiment.is_some() || self.entities.as_ref().is_some_and(|e| !e.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    VeryPositive,
    Positive,
    Neutral,
    Negative,
    VeryNegative,
    Mixed,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Sentiment {
    pub label: SentimentLabel,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stars: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Person,
    Org,
    Loc,
    Date,
    Time,
    Money,
    Misc,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_char: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_char: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct QualityFlags {
    pub low_confidence: bool,
    pub missing_audio: bool,
    pub overlapping_speech: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> serde_json::Value {
        serde_json::json!({
            "schema_version": "1.1",
            "stable_event_id": "rec-20251003T091500Z-3f9c4241",
            "source_system": "recorder-01",
            "created_at": "2025-10-03T09:16:00Z",
            "meeting_metadata": {
                "scheduled_start": "2025-10-03T09:15:00Z",
                "duration_sec": 600
            },
            "participants": [
                {"speaker_id": "spkA", "display_name": "Alice", "metadata": {"voice_matches": [{"id": "v1", "score": 0.9}]}},
                {"speaker_id": "spkB", "display_name": "Bob"}
            ],
            "segments": [
                {"segment_id": "s1", "speaker_id": "spkA", "start_ms": 0, "end_ms": 1000, "text": "hi", "language": "en", "confidence": 0.9}
            ]
        })
    }

    #[test]
    fn round_trips_through_serde() {
        let payload: ConversationPayload = serde_json::from_value(sample_json()).unwrap();
        assert_eq!(payload.participants.len(), 2);
        assert_eq!(payload.schema_version, SchemaVersion::new(1, 1));
    }

    #[test]
    fn preserves_voice_matches_verbatim() {
        let payload: ConversationPayload = serde_json::from_value(sample_json()).unwrap();
        let voice_matches = payload.participants[0].voice_matches().unwrap();
        assert_eq!(
            voice_matches,
            &serde_json::json!([{"id": "v1", "score": 0.9}])
        );
    }

    #[test]
    fn rejects_unknown_field_in_nested_object() {
        let mut json = sample_json();
        json["meeting_metadata"]["bogus_field"] = serde_json::json!("nope");
        let result: Result<ConversationPayload, _> = serde_json::from_value(json);
        assert!(result.is_err());
    }

    #[test]
    fn duration_minutes_from_duration_sec() {
        let payload: ConversationPayload = serde_json::from_value(sample_json()).unwrap();
        assert_eq!(payload.meeting_metadata.duration_minutes(), Some(10));
    }
}
