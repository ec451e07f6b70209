//! Payload Validator (C4): structural schema, cross-references, business rules.

use std::collections::HashSet;

use thiserror::Error;

use ingest_types::{ConversationPayload, StableEventId};

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("stable_event_id mismatch: notification has {expected}, payload has {actual}")]
    EventIdMismatch { expected: String, actual: String },
    #[error("participants must be non-empty")]
    NoParticipants,
    #[error("segments must be non-empty")]
    NoSegments,
    #[error(
        "meeting_metadata must carry duration_sec (1..=86400) or end_at"
    )]
    MissingDuration,
    #[error("duration_sec out of range: {0}")]
    DurationOutOfRange(u32),
    #[error("location lat/lon out of range: ({lat}, {lon})")]
    LocationOutOfRange { lat: f64, lon: f64 },
    #[error("duplicate speaker_id within payload: {0}")]
    DuplicateSpeakerId(String),
    #[error("duplicate segment_id within payload: {0}")]
    DuplicateSegmentId(String),
    #[error("segment {segment_id} has end_ms ({end_ms}) < start_ms ({start_ms})")]
    SegmentTimingInvalid {
        segment_id: String,
        start_ms: u64,
        end_ms: u64,
    },
    #[error("segment {segment_id} text is empty")]
    EmptySegmentText { segment_id: String },
    #[error("segment {segment_id} confidence out of range: {confidence}")]
    ConfidenceOutOfRange { segment_id: String, confidence: f64 },
    #[error("segment {segment_id} references unknown speaker_id {speaker_id}")]
    UnresolvedSpeaker {
        segment_id: String,
        speaker_id: String,
    },
}

/// Summary extracted from a validated payload, used by the job store for
/// bookkeeping. `voice_matches` is carried opaquely so nothing downstream
/// can lossily re-serialise it.
#[derive(Debug, Clone)]
pub struct PayloadSummary {
    pub segment_count: usize,
    pub participant_count: usize,
    pub duration_minutes: Option<i64>,
    pub quality_flags_low_confidence: bool,
    pub voice_matches: Vec<(String, serde_json::Value)>,
}

/// Run all three validation layers and extract the bookkeeping summary.
///
/// Layers 1 (structural) and 2 (cross-reference) are fatal on failure;
/// layer 3 (business rules) only ever produces warnings.
pub fn validate_and_extract(
    payload: &ConversationPayload,
    expected_event_id: &StableEventId,
) -> Result<(PayloadSummary, Vec<String>), ValidationError> {
    validate_structural(payload, expected_event_id)?;
    validate_cross_references(payload)?;
    let warnings = validate_business_rules(payload);

    let voice_matches = payload
        .participants
        .iter()
        .filter_map(|p| p.voice_matches().map(|vm| (p.speaker_id.clone(), vm.clone())))
        .collect();

    let quality_flags_low_confidence = payload
        .quality_flags
        .as_ref()
        .is_some_and(|q| q.low_confidence);

    Ok((
        PayloadSummary {
            segment_count: payload.segments.len(),
            participant_count: payload.participants.len(),
            duration_minutes: payload.meeting_metadata.duration_minutes(),
            quality_flags_low_confidence,
            voice_matches,
        },
        warnings,
    ))
}

fn validate_structural(
    payload: &ConversationPayload,
    expected_event_id: &StableEventId,
) -> Result<(), ValidationError> {
    if payload.stable_event_id != *expected_event_id {
        return Err(ValidationError::EventIdMismatch {
            expected: expected_event_id.to_string(),
            actual: payload.stable_event_id.to_string(),
        });
    }

    if payload.participants.is_empty() {
        return Err(ValidationError::NoParticipants);
    }
    if payload.segments.is_empty() {
        return Err(ValidationError::NoSegments);
    }

    let mm = &payload.meeting_metadata;
    match mm.duration_sec {
        Some(secs) if !(1..=86400).contains(&secs) => {
            return Err(ValidationError::DurationOutOfRange(secs));
        }
        None if mm.end_at.is_none() => return Err(ValidationError::MissingDuration),
        _ => {}
    }

    if let Some(loc) = &mm.location
        && (!(-90.0..=90.0).contains(&loc.lat) || !(-180.0..=180.0).contains(&loc.lon))
    {
        return Err(ValidationError::LocationOutOfRange {
            lat: loc.lat,
            lon: loc.lon,
        });
    }

    for segment in &payload.segments {
        if segment.end_ms < segment.start_ms {
            return Err(ValidationError::SegmentTimingInvalid {
                segment_id: segment.segment_id.clone(),
                start_ms: segment.start_ms,
                end_ms: segment.end_ms,
            });
        }
        if segment.text.trim().is_empty() {
            return Err(ValidationError::EmptySegmentText {
                segment_id: segment.segment_id.clone(),
            });
        }
        if !(0.0..=1.0).contains(&segment.confidence) {
            return Err(ValidationError::ConfidenceOutOfRange {
                segment_id: segment.segment_id.clone(),
                confidence: segment.confidence,
            });
        }
    }

    Ok(())
}

fn validate_cross_references(payload: &ConversationPayload) -> Result<(), ValidationError> {
    let mut speaker_ids = HashSet::new();
    for participant in &payload.participants {
        if !speaker_ids.insert(participant.speaker_id.as_str()) {
            return Err(ValidationError::DuplicateSpeakerId(
                participant.speaker_id.clone(),
            ));
        }
    }

    let mut segment_ids = HashSet::new();
    for segment in &payload.segments {
        if !segment_ids.insert(segment.segment_id.as_str()) {
            return Err(ValidationError::DuplicateSegmentId(
                segment.segment_id.clone(),
            ));
        }
        if !speaker_ids.contains(segment.speaker_id.as_str()) {
            return Err(ValidationError::UnresolvedSpeaker {
                segment_id: segment.segment_id.clone(),
                speaker_id: segment.speaker_id.clone(),
            });
        }
    }

    Ok(())
}

/// Business-rule layer: never fatal, only ever contributes warnings.
fn validate_business_rules(payload: &ConversationPayload) -> Vec<String> {
    let mut warnings = Vec::new();

    let mut ordered: Vec<_> = payload.segments.iter().collect();
    ordered.sort_by_key(|s| s.start_ms);
    for pair in ordered.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b.start_ms < a.end_ms {
            warnings.push(format!(
                "segments {} and {} overlap chronologically",
                a.segment_id, b.segment_id
            ));
        }
    }

    if let Some(primary) = &payload.primary_language {
        let appears = payload.segments.iter().any(|s| &s.language == primary);
        if !appears {
            warnings.push(format!(
                "primary_language {primary} does not appear among segment languages"
            ));
        }
    }

    if let Some(flags) = &payload.quality_flags
        && flags.low_confidence
    {
        let has_low = payload.segments.iter().any(|s| s.confidence < 0.7);
        if !has_low {
            warnings.push(
                "quality_flags.low_confidence is set but no segment has confidence < 0.7"
                    .to_string(),
            );
        }
    }

    warnings
}
