use async_trait::async_trait;
use reqwest::Client;
use shared::{error::ApiError, protocol::EventPayload};
use url::Url;

use crate::error::RelayError;

pub const EVENT_ROUTE: &str = "/";

/// Carries one relayed event to the server and hands back the raw body.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn post_event(&self, payload: &EventPayload) -> Result<String, RelayError>;
}

/// Form-encoded `POST /` over reqwest. No timeout and no retry.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: Client,
    endpoint: Url,
}

impl HttpTransport {
    pub fn new(server_url: &str) -> Result<Self, url::ParseError> {
        Self::with_client(Client::new(), server_url)
    }

    pub fn with_client(http: Client, server_url: &str) -> Result<Self, url::ParseError> {
        let endpoint = Url::parse(server_url)?.join(EVENT_ROUTE)?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl RelayTransport for HttpTransport {
    async fn post_event(&self, payload: &EventPayload) -> Result<String, RelayError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .form(payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            return Ok(body);
        }

        match serde_json::from_str::<ApiError>(&body) {
            Ok(api_error) => Err(RelayError::Rejected(api_error.into())),
            Err(_) => Err(RelayError::Status {
                status: status.as_u16(),
                body,
            }),
        }
    }
}
