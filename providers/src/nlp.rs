//! External NLP collaborator client, used by the Enrichment Dispatcher's
//! legacy path (§4.6, §6). Failures are caught by the caller and never
//! fail ingestion.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::{send_with_retry, RetryConfig, RetryOutcome};

#[derive(Debug, Error)]
pub enum NlpClientError {
    #[error("nlp collaborator returned an error response: {0}")]
    HttpError(String),
    #[error("nlp collaborator response could not be parsed: {0}")]
    Malformed(String),
    #[error("nlp collaborator request failed: {0}")]
    RequestFailed(String),
}

#[derive(Debug, Serialize)]
struct ProcessConversationRequest<'a> {
    conversation_id: i64,
    turns: &'a [TurnPayload],
    metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct TurnPayload {
    pub speaker: String,
    pub text: String,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SentimentStats {
    pub avg_stars: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SentimentAnalysis {
    pub stats: SentimentStats,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NlpResult {
    pub num_chunks: u32,
    pub num_embeddings: u32,
    pub entities: std::collections::HashMap<String, Vec<String>>,
    pub persons: Vec<String>,
    pub sentiment_analysis: SentimentAnalysis,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone)]
pub struct NlpClient {
    http: reqwest::Client,
    base_url: String,
    retry_config: RetryConfig,
}

impl NlpClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            retry_config: RetryConfig::default(),
        }
    }

    pub async fn process_conversation(
        &self,
        conversation_id: i64,
        turns: &[TurnPayload],
        metadata: serde_json::Value,
    ) -> Result<NlpResult, NlpClientError> {
        let url = format!("{}/process_conversation", self.base_url);
        let body = ProcessConversationRequest {
            conversation_id,
            turns,
            metadata,
        };

        let outcome = send_with_retry(
            || self.http.post(&url).json(&body),
            &self.retry_config,
        )
        .await;

        let response = match outcome {
            RetryOutcome::Success(response) => response,
            other => {
                return Err(NlpClientError::HttpError(
                    other.into_response().err().unwrap_or_default(),
                ))
            }
        };

        response
            .json::<NlpResult>()
            .await
            .map_err(|e| NlpClientError::Malformed(e.to_string()))
    }
}
