//! HTTP client for submitting runs to the classification/training service
//! and opening their streamed progress responses.

use std::time::Duration;

use exoscope_types::RunMode;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;

use crate::error::StreamError;

/// Configuration for the remote service client.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub base_url: String,
    pub connect_timeout_ms: u64,
}

/// Request body for a submission. `data` carries inline records, `file` an
/// uploaded batch; the input builders that construct them guarantee exactly
/// one is present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainRequest {
    pub mode: RunMode,
    pub dataset: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hyperparameters: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct ServiceClient {
    client: reqwest::Client,
    config: ServiceConfig,
}

impl ServiceClient {
    pub fn new(config: ServiceConfig) -> Result<Self, StreamError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        // Only the connection attempt is bounded. A whole-request timeout
        // would abort healthy runs that stay silent while the remote service
        // computes.
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms.max(1)))
            .build()?;

        Ok(Self { client, config })
    }

    fn train_url(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if base.ends_with("/train") {
            return base.to_string();
        }
        format!("{base}/train")
    }

    /// Submits a run and returns the open streaming response. Non-success
    /// status or a declared empty body is fatal for the run.
    pub async fn submit(&self, request: &TrainRequest) -> Result<reqwest::Response, StreamError> {
        let response = self.client.post(self.train_url()).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(StreamError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        if response.content_length() == Some(0) {
            return Err(StreamError::EmptyBody);
        }

        Ok(response)
    }
}
