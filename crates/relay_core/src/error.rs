use shared::{domain::ElementId, error::ApiException};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("source element '{0}' is not in the document")]
    MissingSource(ElementId),
    #[error("failed to encode event props: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server rejected event: {0}")]
    Rejected(#[source] ApiException),
    #[error("server responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed update payload: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("attaching requires a running tokio runtime")]
    NoRuntime,
}

impl RelayError {
    pub fn is_parse(&self) -> bool {
        matches!(self, RelayError::Parse(_))
    }
}
