//! Object store client: retrieves archive bytes by bucket/key over HTTP
//! against a MinIO-compatible endpoint (§6).

use thiserror::Error;

use crate::retry::{send_with_retry, RetryConfig, RetryOutcome};

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },
    #[error("minio request failed: {0}")]
    RequestFailed(String),
}

#[derive(Debug, Clone)]
pub struct ObjectStoreClient {
    http: reqwest::Client,
    base_url: String,
    retry_config: RetryConfig,
}

/// A downloaded object, with its size recorded for metrics (§4.3).
pub struct FetchedObject {
    pub bytes: Vec<u8>,
    pub size_bytes: u64,
}

impl ObjectStoreClient {
    #[must_use]
    pub fn new(endpoint: &str, use_tls: bool) -> Self {
        let scheme = if use_tls { "https" } else { "http" };
        Self {
            http: reqwest::Client::new(),
            base_url: format!("{scheme}://{endpoint}"),
            retry_config: RetryConfig::default(),
        }
    }

    /// `get_object(bucket, key) -> byte stream`, collected into memory.
    pub async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<FetchedObject, ObjectStoreError> {
        let url = format!("{}/{bucket}/{key}", self.base_url);
        let outcome = send_with_retry(|| self.http.get(&url), &self.retry_config).await;

        let response = match outcome {
            RetryOutcome::Success(response) => response,
            RetryOutcome::HttpError(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                return Err(ObjectStoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                });
            }
            other => return Err(ObjectStoreError::RequestFailed(
                other.into_response().err().unwrap_or_default(),
            )),
        };

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ObjectStoreError::RequestFailed(e.to_string()))?;
        let size_bytes = bytes.len() as u64;
        Ok(FetchedObject {
            bytes: bytes.to_vec(),
            size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetches_object_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ingestion/drop/x.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"archive-bytes".to_vec()))
            .mount(&server)
            .await;

        let client = ObjectStoreClient {
            http: reqwest::Client::new(),
            base_url: server.uri(),
            retry_config: RetryConfig {
                max_retries: 0,
                ..RetryConfig::default()
            },
        };

        let fetched = client.get_object("ingestion", "drop/x.tar.gz").await.unwrap();
        assert_eq!(fetched.bytes, b"archive-bytes");
        assert_eq!(fetched.size_bytes, 13);
    }

    #[tokio::test]
    async fn missing_object_reports_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ingestion/drop/missing.tar.gz"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = ObjectStoreClient {
            http: reqwest::Client::new(),
            base_url: server.uri(),
            retry_config: RetryConfig {
                max_retries: 0,
                ..RetryConfig::default()
            },
        };

        let err = client
            .get_object("ingestion", "drop/missing.tar.gz")
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectStoreError::NotFound { .. }));
    }
}
