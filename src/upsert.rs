//! Batch upsert client for the retrieval API.
//!
//! Sends every document of a cycle in one `POST {endpoint}/upsert` call with
//! bearer auth. The response carries `ids`, one external id per submitted
//! document, in submission order.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::UpsertConfig;
use crate::models::Document;

/// Result of a successful load step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The batch was empty; no request was sent.
    NothingToDo,
    /// External ids, index-aligned with the submitted documents.
    Upserted(Vec<String>),
}

/// Why a load step failed.
#[derive(Debug)]
pub enum UpsertError {
    /// The API answered with something other than 200.
    Rejected { status: u16, body: String },
    /// The request never produced a response.
    Transport(String),
    /// A 200 response whose body is not `{"ids": [...]}`.
    Decode(String),
    /// A 200 response with a different number of ids than documents sent.
    CountMismatch { sent: usize, returned: usize },
}

impl std::fmt::Display for UpsertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpsertError::Rejected { status, body } => {
                write!(f, "Upsert failed with status {}: {}", status, body)
            }
            UpsertError::Transport(e) => write!(f, "Upsert request failed: {}", e),
            UpsertError::Decode(e) => write!(f, "Upsert response could not be decoded: {}", e),
            UpsertError::CountMismatch { sent, returned } => write!(
                f,
                "Upsert returned {} ids for {} documents; refusing to pair them",
                returned, sent
            ),
        }
    }
}

impl std::error::Error for UpsertError {}

/// Destination for document batches.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn upsert(&self, documents: &[Document]) -> Result<UpsertOutcome, UpsertError>;
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    documents: &'a [Document],
}

#[derive(Deserialize)]
struct UpsertResponse {
    ids: Vec<String>,
}

/// HTTP client for the upsert endpoint.
pub struct UpsertClient {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl UpsertClient {
    pub fn new(config: &UpsertConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            url: config.upsert_url(),
            token: config.token.clone().unwrap_or_default(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DocumentSink for UpsertClient {
    async fn upsert(&self, documents: &[Document]) -> Result<UpsertOutcome, UpsertError> {
        if documents.is_empty() {
            return Ok(UpsertOutcome::NothingToDo);
        }

        tracing::debug!(url = %self.url, documents = documents.len(), "posting upsert batch");

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&UpsertRequest { documents })
            .send()
            .await
            .map_err(|e| UpsertError::Transport(e.to_string()))?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(UpsertError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: UpsertResponse = resp
            .json()
            .await
            .map_err(|e| UpsertError::Decode(e.to_string()))?;

        if parsed.ids.len() != documents.len() {
            return Err(UpsertError::CountMismatch {
                sent: documents.len(),
                returned: parsed.ids.len(),
            });
        }

        Ok(UpsertOutcome::Upserted(parsed.ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> UpsertClient {
        // Nothing listens here; any request would fail with a transport error.
        UpsertClient::new(&UpsertConfig {
            endpoint: "http://127.0.0.1:9/".to_string(),
            token: Some("t".to_string()),
            timeout_secs: Some(1),
        })
        .unwrap()
    }

    #[test]
    fn test_url_joins_upsert_path() {
        assert_eq!(client().url(), "http://127.0.0.1:9/upsert");
    }

    #[tokio::test]
    async fn test_empty_batch_short_circuits() {
        let outcome = client().upsert(&[]).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::NothingToDo);
    }

    #[test]
    fn test_rejected_message_carries_status_and_body() {
        let err = UpsertError::Rejected {
            status: 503,
            body: "busy".to_string(),
        };
        assert_eq!(err.to_string(), "Upsert failed with status 503: busy");
    }

    #[test]
    fn test_request_body_shape() {
        let doc = Document {
            id: "kA1".to_string(),
            text: "Pregunta: q. Respuesta: a".to_string(),
            metadata: crate::transform::to_document(&crate::models::SourceRecord {
                id: "ka1".to_string(),
                ..Default::default()
            })
            .metadata,
        };
        let body = serde_json::to_value(UpsertRequest {
            documents: std::slice::from_ref(&doc),
        })
        .unwrap();
        assert_eq!(body["documents"][0]["id"], "kA1");
        assert_eq!(body["documents"][0]["metadata"]["Id"], "ka1");
    }
}
