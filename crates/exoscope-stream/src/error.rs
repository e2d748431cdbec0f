use thiserror::Error;

/// Errors surfaced by the streaming ingestion engine. Only transport-level
/// failures abort a run; reassembly and shape problems are absorbed locally.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("classification service returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("classification service returned an empty response body")]
    EmptyBody,
    #[error("invalid UTF-8 in streaming response: {0}")]
    InvalidUtf8(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
