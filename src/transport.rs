//! HTTP transport for outbound deliveries.
//!
//! The delivery manager sends requests through the [`DeliveryTransport`]
//! trait so tests can script responses without a network. The production
//! implementation is [`ReqwestTransport`].

use crate::error::HookworkError;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

/// Response observed by the transport, regardless of status code.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code returned by the receiver
    pub status_code: u16,
    /// Response body, possibly truncated
    pub body: Option<String>,
}

impl TransportResponse {
    /// Whether the status code is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Failure to obtain any HTTP response. Always retryable.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("request failed: {0}")]
    Request(String),
}

/// How delivery requests reach the receiver.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// POST `body` to `url` with the given headers.
    ///
    /// Returns a [`TransportResponse`] whenever the receiver answered, even
    /// with an error status; `Err` means no response was obtained at all.
    async fn deliver(
        &self,
        url: &str,
        body: &str,
        headers: &HashMap<String, String>,
        request_timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;
}

/// [`DeliveryTransport`] backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    max_response_body_size: usize,
}

impl ReqwestTransport {
    /// Build a transport with its own HTTP client.
    pub fn new(user_agent: &str) -> crate::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|err| HookworkError::Delivery {
                message: format!("failed to build HTTP client: {}", err),
            })?;

        Ok(Self {
            client,
            max_response_body_size: 64 * 1024,
        })
    }

    /// Cap how much of the response body is retained
    pub fn with_max_response_body_size(mut self, max: usize) -> Self {
        self.max_response_body_size = max;
        self
    }

    fn truncate_body(&self, body: String) -> String {
        if body.len() > self.max_response_body_size {
            let mut end = self.max_response_body_size;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... [truncated]", &body[..end])
        } else {
            body
        }
    }
}

#[async_trait]
impl DeliveryTransport for ReqwestTransport {
    async fn deliver(
        &self,
        url: &str,
        body: &str,
        headers: &HashMap<String, String>,
        request_timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let mut request = self.client.post(url);
        for (key, value) in headers {
            request = request.header(key, value);
        }
        request = request.body(body.to_string());

        match timeout(request_timeout, request.send()).await {
            Ok(Ok(response)) => {
                let status_code = response.status().as_u16();
                let body = match response.text().await {
                    Ok(text) => Some(self.truncate_body(text)),
                    Err(_) => None,
                };
                Ok(TransportResponse { status_code, body })
            }
            Ok(Err(err)) if err.is_timeout() => Err(TransportError::Timeout(request_timeout)),
            Ok(Err(err)) if err.is_connect() => Err(TransportError::Connection(err.to_string())),
            Ok(Err(err)) => Err(TransportError::Request(err.to_string())),
            Err(_) => Err(TransportError::Timeout(request_timeout)),
        }
    }
}
