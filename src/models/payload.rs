//! JSON envelope posted to the delivery endpoint.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::RunBatch;

/// Run-level context that wraps a batch on delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunMetadata {
    /// Submitter identity reported as `UserEmail`.
    pub user_email: Option<String>,
    /// Dashboard the batch was scraped from, reported as `SourceUrl`.
    pub source_url: Option<String>,
}

impl RunMetadata {
    pub fn new(user_email: Option<String>, source_url: Option<String>) -> Self {
        Self {
            user_email,
            source_url,
        }
    }
}

/// Wrapper sent to the remote endpoint for one run.
///
/// Borrows the batch; it lives only for the duration of a delivery call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeliveryPayload<'a> {
    pub timestamp: DateTime<Utc>,
    pub user_email: Option<&'a str>,
    pub source_url: Option<&'a str>,
    pub total_projects: usize,
    pub projects: &'a RunBatch,
}

impl<'a> DeliveryPayload<'a> {
    /// Build a payload stamped with the current UTC time.
    pub fn new(batch: &'a RunBatch, metadata: &'a RunMetadata) -> Self {
        Self::at(Utc::now(), batch, metadata)
    }

    /// Build a payload with an explicit timestamp.
    pub fn at(timestamp: DateTime<Utc>, batch: &'a RunBatch, metadata: &'a RunMetadata) -> Self {
        Self {
            timestamp,
            user_email: metadata.user_email.as_deref(),
            source_url: metadata.source_url.as_deref(),
            total_projects: batch.len(),
            projects: batch,
        }
    }
}
