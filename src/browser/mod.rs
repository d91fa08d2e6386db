//! Web session capability used by the scraper and the authenticator.
//!
//! Two implementations are provided:
//! - `ChromiumSession`: a live headless Chrome tab (feature `browser`)
//! - `SnapshotSession`: saved HTML pages, for replays and tests

#[cfg(feature = "browser")]
pub mod chromium;
pub mod snapshot;

#[cfg(feature = "browser")]
pub use chromium::{ChromiumOptions, ChromiumSession};
pub use snapshot::SnapshotSession;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a web session.
///
/// Timeouts are kept separate so callers can tell a slow page from a broken one.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    #[error("no element matches selector {0:?}")]
    NotFound(String),

    #[error("invalid selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("browser protocol error: {0}")]
    Protocol(String),

    #[error("failed to launch browser: {0}")]
    Launch(String),
}

impl SessionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, SessionError::Timeout { .. })
    }
}

/// A browser cookie held by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
}

/// A DOM element handle returned by `WebSession::query_selector_all`.
#[async_trait]
pub trait PageElement: Send + Sync {
    /// Rendered text of the element.
    ///
    /// Elements with child elements are flattened to one segment per
    /// child, joined with `|`.
    async fn text_content(&self) -> Result<String, SessionError>;

    async fn click(&self) -> Result<(), SessionError>;

    /// PNG capture of the element.
    async fn screenshot(&self) -> Result<Vec<u8>, SessionError>;
}

/// One live page the pipeline drives.
#[async_trait]
pub trait WebSession: Send + Sync {
    type Element: PageElement;

    async fn navigate(&self, url: &str) -> Result<(), SessionError>;

    async fn query_selector_all(&self, selector: &str) -> Result<Vec<Self::Element>, SessionError>;

    /// Wait until at least one element matches `selector`.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration)
        -> Result<(), SessionError>;

    async fn wait_for_navigation(&self, timeout: Duration) -> Result<(), SessionError>;

    /// Focus the first element matching `selector` and type `text` into it.
    async fn type_text(&self, selector: &str, text: &str) -> Result<(), SessionError>;

    /// Full-page PNG capture.
    async fn screenshot(&self) -> Result<Vec<u8>, SessionError>;

    async fn cookies(&self) -> Result<Vec<SessionCookie>, SessionError>;

    /// Release the page and anything backing it. Safe to call more than once.
    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Run `fut` with an upper bound, mapping expiry to `SessionError::Timeout`.
pub async fn with_timeout<T, F>(what: &str, timeout: Duration, fut: F) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::Timeout {
            what: what.to_string(),
            after: timeout,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: Result<(), SessionError> = with_timeout(
            "forever",
            Duration::from_millis(10),
            std::future::pending(),
        )
        .await;

        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("forever"));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_inner_error() {
        let result: Result<(), SessionError> = with_timeout("lookup", Duration::from_secs(1), async {
            Err(SessionError::NotFound("#x".to_string()))
        })
        .await;

        assert!(matches!(result, Err(SessionError::NotFound(_))));
    }
}
