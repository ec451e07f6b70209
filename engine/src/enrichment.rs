//! Enrichment Dispatcher (C6): chooses enriched vs. legacy annotation
//! sourcing and produces `main_topics` plus a `processing_metadata` patch.
//!
//! Enrichment is always best-effort: every path here returns an
//! [`EnrichmentOutcome`], never a fatal error. A failed or skipped
//! enrichment leaves the conversation intact; it only degrades the derived
//! topics and metadata.

use std::collections::HashSet;

use thiserror::Error;

use ingest_providers::{NlpClient, TurnPayload};
use ingest_types::{Annotations, ConversationPayload, EntityType, SentimentLabel};

use crate::metrics;

#[derive(Debug, Error)]
enum EnrichmentError {
    #[error("analytics.{0} is present but not an object")]
    MalformedAnalytics(&'static str),
    #[error("nlp collaborator call failed: {0}")]
    NlpClient(#[from] ingest_providers::NlpClientError),
}

pub struct EnrichmentOutcome {
    pub main_topics: Vec<String>,
    pub processing_metadata: serde_json::Value,
}

/// Dispatch enrichment for a validated payload. `conversation_id` is the
/// already-persisted conversation row (legacy mode needs it to tag the
/// external NLP request); `nlp_client` is `None` when no local collaborator
/// is configured.
pub async fn dispatch(
    payload: &ConversationPayload,
    conversation_id: i64,
    nlp_client: Option<&NlpClient>,
) -> EnrichmentOutcome {
    let is_enriched = payload
        .segments
        .first()
        .and_then(|s| s.annotations.as_ref())
        .is_some_and(Annotations::is_enriched);

    if is_enriched {
        return dispatch_enriched(payload, conversation_id, nlp_client).await;
    }
    dispatch_legacy(payload, conversation_id, nlp_client).await
}

async fn dispatch_enriched(
    payload: &ConversationPayload,
    conversation_id: i64,
    nlp_client: Option<&NlpClient>,
) -> EnrichmentOutcome {
    match extract_enriched(payload) {
        Ok((main_topics, processing_metadata)) => {
            metrics::record_nlp_mode("enriched");
            EnrichmentOutcome {
                main_topics,
                processing_metadata,
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "enriched enrichment path raised, falling back");
            let Some(client) = nlp_client else {
                metrics::record_nlp_mode("skipped");
                return EnrichmentOutcome {
                    main_topics: Vec::new(),
                    processing_metadata: serde_json::json!({
                        "nlp_source": "skipped",
                        "nlp_partial": true,
                    }),
                };
            };
            match call_legacy(payload, conversation_id, client).await {
                Ok((main_topics, mut processing_metadata)) => {
                    processing_metadata["nlp_partial"] = serde_json::json!(true);
                    metrics::record_nlp_mode("legacy");
                    EnrichmentOutcome {
                        main_topics,
                        processing_metadata,
                    }
                }
                Err(fallback_err) => {
                    tracing::warn!(error = %fallback_err, "legacy fallback also failed");
                    metrics::record_nlp_mode("skipped");
                    EnrichmentOutcome {
                        main_topics: Vec::new(),
                        processing_metadata: serde_json::json!({
                            "nlp_source": "skipped",
                            "nlp_partial": true,
                        }),
                    }
                }
            }
        }
    }
}

async fn dispatch_legacy(
    payload: &ConversationPayload,
    conversation_id: i64,
    nlp_client: Option<&NlpClient>,
) -> EnrichmentOutcome {
    let Some(client) = nlp_client else {
        metrics::record_nlp_mode("skipped");
        return EnrichmentOutcome {
            main_topics: Vec::new(),
            processing_metadata: serde_json::json!({ "nlp_source": "skipped" }),
        };
    };

    match call_legacy(payload, conversation_id, client).await {
        Ok((main_topics, processing_metadata)) => {
            metrics::record_nlp_mode("legacy");
            EnrichmentOutcome {
                main_topics,
                processing_metadata,
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "legacy enrichment failed");
            metrics::record_nlp_mode("skipped");
            EnrichmentOutcome {
                main_topics: Vec::new(),
                processing_metadata: serde_json::json!({
                    "nlp_source": "skipped",
                    "nlp_partial": true,
                }),
            }
        }
    }
}

/// Aggregate per-segment sentiment and entities, and read through any
/// conversation-level `analytics` summaries. Top-five unique PERSON
/// entities (in first-seen order) become `main_topics`.
fn extract_enriched(
    payload: &ConversationPayload,
) -> Result<(Vec<String>, serde_json::Value), EnrichmentError> {
    let mut sentiment_counts: std::collections::HashMap<&'static str, u32> =
        std::collections::HashMap::new();
    let mut entity_counts: std::collections::HashMap<&'static str, u32> =
        std::collections::HashMap::new();
    let mut seen_persons = HashSet::new();
    let mut persons = Vec::new();

    for segment in &payload.segments {
        let Some(annotations) = &segment.annotations else {
            continue;
        };
        if let Some(sentiment) = &annotations.sentiment {
            *sentiment_counts.entry(sentiment_label_str(sentiment.label)).or_insert(0) += 1;
        }
        if let Some(entities) = &annotations.entities {
            for entity in entities {
                *entity_counts.entry(entity_type_str(entity.entity_type)).or_insert(0) += 1;
                if entity.entity_type == EntityType::Person && seen_persons.insert(entity.text.clone()) {
                    persons.push(entity.text.clone());
                }
            }
        }
    }

    let mut metadata = serde_json::json!({
        "nlp_source": "upstream_transcript",
        "sentiment_distribution": sentiment_counts,
        "entity_distribution": entity_counts,
    });

    if let Some(analytics) = &payload.analytics {
        if let Some(summary) = analytics.get("sentiment_summary") {
            if !summary.is_object() {
                return Err(EnrichmentError::MalformedAnalytics("sentiment_summary"));
            }
            metadata["analytics_sentiment_summary"] = summary.clone();
        }
        if let Some(summary) = analytics.get("entities_summary") {
            if !summary.is_object() {
                return Err(EnrichmentError::MalformedAnalytics("entities_summary"));
            }
            metadata["analytics_entities_summary"] = summary.clone();
        }
    }

    let main_topics: Vec<String> = persons.into_iter().take(5).collect();
    Ok((main_topics, metadata))
}

async fn call_legacy(
    payload: &ConversationPayload,
    conversation_id: i64,
    client: &NlpClient,
) -> Result<(Vec<String>, serde_json::Value), EnrichmentError> {
    let turns: Vec<TurnPayload> = payload
        .segments
        .iter()
        .map(|segment| TurnPayload {
            speaker: segment.speaker_id.clone(),
            text: segment.text.clone(),
            timestamp_ms: segment.start_ms,
        })
        .collect();

    let metadata = serde_json::json!({ "source_system": payload.source_system });
    let result = client
        .process_conversation(conversation_id, &turns, metadata)
        .await?;

    let main_topics: Vec<String> = result.persons.iter().take(5).cloned().collect();
    let processing_metadata = serde_json::json!({
        "nlp_source": "local",
        "num_chunks": result.num_chunks,
        "num_embeddings": result.num_embeddings,
        "avg_sentiment_stars": result.sentiment_analysis.stats.avg_stars,
        "persons": result.persons,
        "processing_time_ms": result.processing_time_ms,
    });
    Ok((main_topics, processing_metadata))
}

fn sentiment_label_str(label: SentimentLabel) -> &'static str {
    match label {
        SentimentLabel::VeryPositive => "very_positive",
        SentimentLabel::Positive => "positive",
        SentimentLabel::Neutral => "neutral",
        SentimentLabel::Negative => "negative",
        SentimentLabel::VeryNegative => "very_negative",
        SentimentLabel::Mixed => "mixed",
    }
}

fn entity_type_str(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Person => "PERSON",
        EntityType::Org => "ORG",
        EntityType::Loc => "LOC",
        EntityType::Date => "DATE",
        EntityType::Time => "TIME",
        EntityType::Money => "MONEY",
        EntityType::Misc => "MISC",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ingest_types::{Entity, MeetingMetadata, Participant, Segment, Sentiment};

    fn base_payload() -> ConversationPayload {
        ConversationPayload {
            schema_version: "1.1".parse().unwrap(),
            stable_event_id: ingest_types::StableEventId::new("rec-20251003T091500Z-3f9c4241")
                .unwrap(),
            source_system: "recorder".to_string(),
            created_at: Utc::now(),
            meeting_metadata: MeetingMetadata {
                scheduled_start: Utc::now(),
                title: None,
                duration_sec: Some(600),
                end_at: None,
                location: None,
                timezone: None,
                organizer: None,
                agenda: None,
            },
            participants: vec![Participant {
                speaker_id: "spkA".to_string(),
                display_name: "Alice".to_string(),
                email: None,
                role: None,
                company: None,
                phone: None,
                metadata: None,
            }],
            segments: vec![],
            quality_flags: None,
            analytics: None,
            tags: None,
            primary_language: None,
            attachments: None,
        }
    }

    fn enriched_segment(text: &str, persons: &[&str]) -> Segment {
        Segment {
            segment_id: "s1".to_string(),
            speaker_id: "spkA".to_string(),
            start_ms: 0,
            end_ms: 1000,
            text: text.to_string(),
            language: "en".to_string(),
            confidence: 0.9,
            channel: None,
            duration_ms: None,
            offset_ms: None,
            speaker_label: None,
            annotations: Some(Annotations {
                sentiment: Some(Sentiment {
                    label: SentimentLabel::Positive,
                    score: 0.8,
                    stars: None,
                }),
                entities: Some(
                    persons
                        .iter()
                        .map(|p| Entity {
                            entity_type: EntityType::Person,
                            text: (*p).to_string(),
                            start_char: None,
                            end_char: None,
                            confidence: None,
                        })
                        .collect(),
                ),
            }),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn enriched_path_extracts_unique_persons_in_order() {
        let mut payload = base_payload();
        payload.segments = vec![
            enriched_segment("hi", &["Alice", "Bob"]),
            enriched_segment("hey", &["Bob", "Carol"]),
        ];
        let outcome = dispatch(&payload, 1, None).await;
        assert_eq!(outcome.main_topics, vec!["Alice", "Bob", "Carol"]);
        assert_eq!(
            outcome.processing_metadata["nlp_source"],
            serde_json::json!("upstream_transcript")
        );
    }

    #[tokio::test]
    async fn malformed_analytics_falls_back_to_skipped_without_local_nlp() {
        let mut payload = base_payload();
        payload.segments = vec![enriched_segment("hi", &["Alice"])];
        payload.analytics = Some(serde_json::json!({ "sentiment_summary": "not an object" }));
        let outcome = dispatch(&payload, 1, None).await;
        assert_eq!(
            outcome.processing_metadata["nlp_source"],
            serde_json::json!("skipped")
        );
        assert_eq!(outcome.processing_metadata["nlp_partial"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn legacy_mode_with_no_nlp_collaborator_is_skipped() {
        let mut payload = base_payload();
        payload.segments = vec![Segment {
            segment_id: "s1".to_string(),
            speaker_id: "spkA".to_string(),
            start_ms: 0,
            end_ms: 1000,
            text: "hi".to_string(),
            language: "en".to_string(),
            confidence: 0.9,
            channel: None,
            duration_ms: None,
            offset_ms: None,
            speaker_label: None,
            annotations: None,
            metadata: None,
        }];
        let outcome = dispatch(&payload, 1, None).await;
        assert_eq!(outcome.main_topics, Vec::<String>::new());
        assert_eq!(
            outcome.processing_metadata["nlp_source"],
            serde_json::json!("skipped")
        );
        assert!(outcome.processing_metadata.get("nlp_partial").is_none());
    }
}
