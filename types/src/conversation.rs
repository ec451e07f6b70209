//! [`Conversation`] and [`ConversationTurn`] (C5 entities derived from a payload).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationType {
    Monologue,
    OneToOne,
    SmallGroup,
    Meeting,
}

impl ConversationType {
    /// 1 participant → monologue, 2 → one-to-one, 3-5 → small group, >5 → meeting.
    #[must_use]
    pub fn from_participant_count(count: usize) -> Self {
        match count {
            0 | 1 => Self::Monologue,
            2 => Self::OneToOne,
            3..=5 => Self::SmallGroup,
            _ => Self::Meeting,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub title: Option<String>,
    pub date: DateTime<Utc>,
    pub duration_minutes: Option<i64>,
    pub language: Option<String>,
    pub conversation_type: ConversationType,
    pub transcript: String,
    pub participants: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_gps: Option<(f64, f64)>,
    pub confidence_score: f64,
    pub main_topics: Vec<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Mean of `confidences`, defaulting to 1.0 when empty (per the invariant
/// that a conversation without any segment confidence is assumed trustworthy).
#[must_use]
pub fn mean_confidence(confidences: &[f64]) -> f64 {
    if confidences.is_empty() {
        return 1.0;
    }
    confidences.iter().sum::<f64>() / confidences.len() as f64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub conversation_id: i64,
    pub turn_index: u32,
    pub speaker: String,
    pub text: String,
    pub timestamp_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_type_boundaries() {
        assert_eq!(
            ConversationType::from_participant_count(1),
            ConversationType::Monologue
        );
        assert_eq!(
            ConversationType::from_participant_count(2),
            ConversationType::OneToOne
        );
        assert_eq!(
            ConversationType::from_participant_count(5),
            ConversationType::SmallGroup
        );
        assert_eq!(
            ConversationType::from_participant_count(6),
            ConversationType::Meeting
        );
    }

    #[test]
    fn mean_confidence_defaults_to_one() {
        assert_eq!(mean_confidence(&[]), 1.0);
        assert!((mean_confidence(&[0.8, 1.0]) - 0.9).abs() < 1e-9);
    }
}
