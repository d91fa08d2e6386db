//! Web session over saved HTML pages.
//!
//! Pages are static: a selector either matches now or never will, so waits
//! resolve immediately. `wait_for_navigation` steps to the next queued page,
//! which is enough to replay a multi-page login flow. Interactions are
//! recorded and can be inspected with `events()`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};

use super::{PageElement, SessionCookie, SessionError, WebSession};

/// Something a caller did to a snapshot session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Navigated(String),
    Typed { selector: String, text: String },
    Clicked(String),
}

#[derive(Debug, Default)]
struct SnapshotState {
    current: usize,
    events: Vec<SessionEvent>,
    closed: bool,
}

type SharedState = Arc<Mutex<SnapshotState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, SnapshotState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Session backed by a fixed set of HTML documents.
#[derive(Debug)]
pub struct SnapshotSession {
    pages: Vec<String>,
    queued: usize,
    routes: HashMap<String, usize>,
    /// Bytes returned by `screenshot`, when set.
    screenshot: Option<Vec<u8>>,
    state: SharedState,
}

impl SnapshotSession {
    /// Session showing a single page.
    pub fn new(html: impl Into<String>) -> Self {
        Self::from_pages(vec![html.into()])
    }

    /// Session that starts on the first page and advances on each navigation wait.
    pub fn from_pages(pages: Vec<String>) -> Self {
        Self {
            queued: pages.len(),
            pages,
            routes: HashMap::new(),
            screenshot: None,
            state: Arc::new(Mutex::new(SnapshotState::default())),
        }
    }

    /// Load a single saved page from disk.
    pub async fn from_file(path: &Path) -> std::io::Result<Self> {
        let html = tokio::fs::read_to_string(path).await?;
        Ok(Self::new(html))
    }

    /// Register a page shown when `url` is navigated to.
    pub fn with_route(mut self, url: &str, html: impl Into<String>) -> Self {
        self.pages.push(html.into());
        self.routes.insert(url.to_string(), self.pages.len() - 1);
        self
    }

    /// Return `png` from `screenshot` instead of failing.
    pub fn with_screenshot(mut self, png: Vec<u8>) -> Self {
        self.screenshot = Some(png);
        self
    }

    /// Interactions so far, in order.
    pub fn events(&self) -> Vec<SessionEvent> {
        lock(&self.state).events.clone()
    }

    /// Labels of every clicked element, in order.
    pub fn clicked(&self) -> Vec<String> {
        lock(&self.state)
            .events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Clicked(label) => Some(label.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    fn current_html(&self) -> Result<&str, SessionError> {
        let state = lock(&self.state);
        if state.closed {
            return Err(SessionError::Protocol("session is closed".to_string()));
        }
        self.pages
            .get(state.current)
            .map(String::as_str)
            .ok_or_else(|| SessionError::Navigation("no page loaded".to_string()))
    }

    fn select(&self, selector: &str) -> Result<Vec<String>, SessionError> {
        select_flattened(self.current_html()?, selector)
    }
}

/// Flattened text of every element matching `selector`, in document order.
fn select_flattened(html: &str, selector: &str) -> Result<Vec<String>, SessionError> {
    let parsed = Selector::parse(selector).map_err(|e| SessionError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })?;
    let document = Html::parse_document(html);
    Ok(document.select(&parsed).map(flatten_text).collect())
}

/// Join the text of each child element with `|`, or take the element's own text.
fn flatten_text(element: ElementRef<'_>) -> String {
    let cells: Vec<String> = element
        .children()
        .filter_map(ElementRef::wrap)
        .map(|child| child.text().collect::<String>())
        .collect();

    if cells.is_empty() {
        element.text().collect()
    } else {
        cells.join("|")
    }
}

/// Element captured from a snapshot page.
#[derive(Debug, Clone)]
pub struct SnapshotElement {
    text: String,
    state: SharedState,
}

#[async_trait]
impl PageElement for SnapshotElement {
    async fn text_content(&self) -> Result<String, SessionError> {
        Ok(self.text.clone())
    }

    async fn click(&self) -> Result<(), SessionError> {
        lock(&self.state)
            .events
            .push(SessionEvent::Clicked(self.text.trim().to_string()));
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, SessionError> {
        Err(SessionError::Protocol(
            "snapshot pages cannot be rendered".to_string(),
        ))
    }
}

#[async_trait]
impl WebSession for SnapshotSession {
    type Element = SnapshotElement;

    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        let mut state = lock(&self.state);
        if let Some(&index) = self.routes.get(url) {
            state.current = index;
        }
        state.events.push(SessionEvent::Navigated(url.to_string()));
        Ok(())
    }

    async fn query_selector_all(&self, selector: &str) -> Result<Vec<Self::Element>, SessionError> {
        Ok(self
            .select(selector)?
            .into_iter()
            .map(|text| SnapshotElement {
                text,
                state: self.state.clone(),
            })
            .collect())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        if self.select(selector)?.is_empty() {
            Err(SessionError::Timeout {
                what: format!("selector {:?}", selector),
                after: timeout,
            })
        } else {
            Ok(())
        }
    }

    async fn wait_for_navigation(&self, timeout: Duration) -> Result<(), SessionError> {
        let mut state = lock(&self.state);
        if state.current + 1 < self.queued {
            state.current += 1;
            Ok(())
        } else {
            Err(SessionError::Timeout {
                what: "navigation".to_string(),
                after: timeout,
            })
        }
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), SessionError> {
        if self.select(selector)?.is_empty() {
            return Err(SessionError::NotFound(selector.to_string()));
        }
        lock(&self.state).events.push(SessionEvent::Typed {
            selector: selector.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, SessionError> {
        self.current_html()?;
        self.screenshot.clone().ok_or_else(|| {
            SessionError::Protocol("snapshot pages cannot be rendered".to_string())
        })
    }

    async fn cookies(&self) -> Result<Vec<SessionCookie>, SessionError> {
        Ok(Vec::new())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        lock(&self.state).closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <html><body>
          <div class="row"><span>1 A St00001</span><span>1</span><span>Open</span></div>
          <div class="row">plain|text</div>
        </body></html>
    "#;

    #[tokio::test]
    async fn test_flattens_child_cells() {
        let session = SnapshotSession::new(LISTING);
        let rows = session.query_selector_all(".row").await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].text_content().await.unwrap(), "1 A St00001|1|Open");
        assert_eq!(rows[1].text_content().await.unwrap(), "plain|text");
    }

    #[tokio::test]
    async fn test_invalid_selector() {
        let session = SnapshotSession::new(LISTING);
        let err = session.query_selector_all("div[").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidSelector { .. }));
    }

    #[tokio::test]
    async fn test_wait_for_missing_selector_times_out() {
        let session = SnapshotSession::new(LISTING);
        assert!(session
            .wait_for_selector(".row", Duration::from_secs(1))
            .await
            .is_ok());

        let err = session
            .wait_for_selector("#missing", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_navigation_steps_through_pages() {
        let session = SnapshotSession::from_pages(vec![
            "<p id='one'>1</p>".to_string(),
            "<p id='two'>2</p>".to_string(),
        ]);

        session
            .wait_for_navigation(Duration::from_secs(1))
            .await
            .unwrap();
        assert!(session
            .wait_for_selector("#two", Duration::from_secs(1))
            .await
            .is_ok());

        let err = session
            .wait_for_navigation(Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_routes_and_events() {
        let mut session = SnapshotSession::new("<input name='user'>")
            .with_route("https://example.gov/archive", "<div class='row'>x</div>");

        session.type_text("input[name='user']", "alice").await.unwrap();
        session.navigate("https://example.gov/archive").await.unwrap();
        let rows = session.query_selector_all(".row").await.unwrap();
        rows[0].click().await.unwrap();

        assert_eq!(
            session.events(),
            vec![
                SessionEvent::Typed {
                    selector: "input[name='user']".to_string(),
                    text: "alice".to_string(),
                },
                SessionEvent::Navigated("https://example.gov/archive".to_string()),
                SessionEvent::Clicked("x".to_string()),
            ]
        );

        session.close().await.unwrap();
        assert!(session.is_closed());
        assert!(session.query_selector_all(".row").await.is_err());
    }

    #[tokio::test]
    async fn test_type_into_missing_field() {
        let session = SnapshotSession::new("<p></p>");
        let err = session.type_text("#user", "alice").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }
}
