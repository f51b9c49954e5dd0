//! HTTP hook: POST the request JSON, read the response JSON

use async_trait::async_trait;
use reqwest::Client;

use super::{FulfillmentError, FulfillmentHook, HookRequest, HookResponse};

/// Posts each invocation to a handler endpoint
#[derive(Debug, Clone)]
pub struct HttpHook {
    client: Client,
    url: String,
}

impl HttpHook {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), url)
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> FulfillmentError {
        match status.as_u16() {
            500..=599 => FulfillmentError::handler(format!("Handler error {status}: {body}")),
            _ => FulfillmentError::transport(format!("HTTP {status}: {body}")),
        }
    }
}

#[async_trait]
impl FulfillmentHook for HttpHook {
    async fn handle(&self, request: &HookRequest) -> Result<HookResponse, FulfillmentError> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FulfillmentError::timeout(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    FulfillmentError::transport(format!("Connection failed: {e}"))
                } else {
                    FulfillmentError::transport(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FulfillmentError::transport(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(Self::classify_status(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            FulfillmentError::invalid_response(format!(
                "Failed to parse response: {e} - body: {body}"
            ))
        })
    }
}
