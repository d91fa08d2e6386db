//! Delivery of scraped batches to the remote endpoint.
//!
//! One POST per run. Failures are reported, never retried.

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::http::{error_chain, HttpClient, HttpError, HttpOptions, HttpRequest, RequestBody};
use crate::models::{DeliveryPayload, RunBatch, RunMetadata};

/// Immutable delivery settings for one run.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub endpoint: String,
    /// Wrap the batch in a `DeliveryPayload`; otherwise post the bare record array.
    pub include_metadata: bool,
    /// Extra headers sent with the POST.
    pub headers: BTreeMap<String, String>,
    /// Bearer token for the `Authorization` header.
    pub auth_token: Option<String>,
    /// Client-wide request timeout.
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl DeliveryConfig {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            include_metadata: true,
            headers: BTreeMap::new(),
            auth_token: None,
            timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

/// Errors that can occur during delivery.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("request to delivery endpoint failed: {0}")]
    Network(String),

    #[error("delivery endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid delivery client configuration: {0}")]
    Client(String),
}

impl DeliveryError {
    /// Text to surface as the response-body diagnostic.
    pub fn diagnostic(&self) -> String {
        match self {
            DeliveryError::Status { body, .. } => body.clone(),
            other => other.to_string(),
        }
    }
}

/// Accepted delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub status: u16,
    pub body: String,
}

/// Result of one delivery attempt, success or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub success: bool,
    /// HTTP status, when a response arrived.
    pub status: Option<u16>,
    /// Response body, or the error message when no response arrived.
    pub body: Option<String>,
}

/// Posts batches to the configured endpoint.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    config: DeliveryConfig,
    http: HttpClient,
}

impl DeliveryClient {
    pub fn new(config: DeliveryConfig) -> Result<Self, DeliveryError> {
        let options = HttpOptions {
            timeout: config.timeout,
            user_agent: config.user_agent.clone(),
            default_headers: config.headers.clone(),
            auth_token: config.auth_token.clone(),
        };
        let http = HttpClient::new(&options).map_err(|e| DeliveryError::Client(e.to_string()))?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Serialize the request body for `batch`.
    pub fn render(&self, batch: &RunBatch, metadata: &RunMetadata) -> Result<String, DeliveryError> {
        let body = if self.config.include_metadata {
            serde_json::to_string(&DeliveryPayload::new(batch, metadata))?
        } else {
            serde_json::to_string(batch)?
        };
        Ok(body)
    }

    /// Post `batch`, returning the typed error on failure.
    pub async fn try_deliver(
        &self,
        batch: &RunBatch,
        metadata: &RunMetadata,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let body = self.render(batch, metadata)?;
        debug!(
            "Posting {} records ({} bytes) to {}",
            batch.len(),
            body.len(),
            self.config.endpoint
        );

        let request = HttpRequest::post(&self.config.endpoint).with_body(RequestBody::Json(body));
        let response = self.http.send(request).await.map_err(|e| match e {
            HttpError::Request(ref inner) => DeliveryError::Network(error_chain(inner)),
            other => DeliveryError::Client(other.to_string()),
        })?;

        let status = response.status.as_u16();
        if response.is_success() {
            Ok(DeliveryReceipt {
                status,
                body: response.body,
            })
        } else {
            Err(DeliveryError::Status {
                status,
                body: response.body,
            })
        }
    }

    /// Post `batch` once. Never fails; the outcome carries the diagnostics.
    pub async fn deliver(&self, batch: &RunBatch, metadata: &RunMetadata) -> DeliveryOutcome {
        match self.try_deliver(batch, metadata).await {
            Ok(receipt) => {
                info!(
                    "Delivered {} records (HTTP {})",
                    batch.len(),
                    receipt.status
                );
                DeliveryOutcome {
                    success: true,
                    status: Some(receipt.status),
                    body: Some(receipt.body),
                }
            }
            Err(e) => {
                warn!("{}", e);
                let status = match &e {
                    DeliveryError::Status { status, .. } => Some(*status),
                    _ => None,
                };
                DeliveryOutcome {
                    success: false,
                    status,
                    body: Some(e.diagnostic()),
                }
            }
        }
    }
}
