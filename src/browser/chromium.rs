//! Headless Chrome session over the DevTools protocol.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{with_timeout, PageElement, SessionCookie, SessionError, WebSession};

/// How often `wait_for_selector` re-queries the DOM.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Flattens a row to one `|`-separated segment per child element.
const FLATTEN_TEXT_JS: &str = r#"function() {
    const cells = Array.from(this.children);
    if (cells.length === 0) {
        return this.innerText;
    }
    return cells.map((cell) => cell.innerText).join('|');
}"#;

/// Real browser user agents for impersonate mode.
const IMPERSONATE_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
];

/// User agent override for the tab.
/// - None => keep Chrome's own (headless Chrome advertises `HeadlessChrome`)
/// - "impersonate" => a desktop Chrome user agent, picked per launch
/// - other => used as given
pub fn browser_user_agent(config: Option<&str>) -> Option<String> {
    match config {
        None => None,
        Some("impersonate") => {
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.subsec_nanos() as usize)
                .unwrap_or(0);
            Some(IMPERSONATE_USER_AGENTS[nanos % IMPERSONATE_USER_AGENTS.len()].to_string())
        }
        Some(custom) => Some(custom.to_string()),
    }
}

/// Launch options for the browser process.
#[derive(Debug, Clone)]
pub struct ChromiumOptions {
    pub headless: bool,
    /// Timeout for individual DevTools requests.
    pub request_timeout: Duration,
    /// See `browser_user_agent`.
    pub user_agent: Option<String>,
    /// Chrome/Chromium binary; auto-detected when unset.
    pub executable: Option<PathBuf>,
}

impl Default for ChromiumOptions {
    fn default() -> Self {
        Self {
            headless: true,
            request_timeout: Duration::from_secs(30),
            user_agent: None,
            executable: None,
        }
    }
}

fn protocol(err: CdpError) -> SessionError {
    SessionError::Protocol(err.to_string())
}

/// Whether the connection to the browser is gone, as opposed to a query
/// that simply found nothing yet.
fn is_disconnect(err: &CdpError) -> bool {
    matches!(
        err,
        CdpError::Ws(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse
    )
}

/// Decide whether a failed lookup while polling is worth retrying.
fn keep_polling(err: CdpError) -> Result<(), SessionError> {
    if is_disconnect(&err) {
        Err(protocol(err))
    } else {
        Ok(())
    }
}

/// A single tab in a browser process owned by this session.
pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler: Option<JoinHandle<()>>,
    closed: bool,
}

impl ChromiumSession {
    /// Start a browser process and open a blank tab.
    pub async fn launch(options: &ChromiumOptions) -> Result<Self, SessionError> {
        let mut builder = BrowserConfig::builder().request_timeout(options.request_timeout);
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(ref path) = options.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(SessionError::Launch)?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| SessionError::Launch(e.to_string()))?;

        // The handler must be polled for the browser connection to make progress
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler stopped: {}", e);
                    break;
                }
            }
        });

        let page = match open_page(&browser, options).await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                let _ = browser.wait().await;
                handler.abort();
                return Err(e);
            }
        };

        debug!("Browser session ready");
        Ok(Self {
            browser,
            page,
            handler: Some(handler),
            closed: false,
        })
    }
}

async fn open_page(browser: &Browser, options: &ChromiumOptions) -> Result<Page, SessionError> {
    let page = browser.new_page("about:blank").await.map_err(protocol)?;
    if let Some(user_agent) = browser_user_agent(options.user_agent.as_deref()) {
        page.set_user_agent(user_agent)
            .await
            .map_err(protocol)?;
    }
    Ok(page)
}

/// Element handle inside a `ChromiumSession` tab.
pub struct ChromiumElement(Element);

#[async_trait]
impl PageElement for ChromiumElement {
    async fn text_content(&self) -> Result<String, SessionError> {
        let returns = self
            .0
            .call_js_fn(FLATTEN_TEXT_JS, false)
            .await
            .map_err(protocol)?;
        Ok(returns
            .result
            .value
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default())
    }

    async fn click(&self) -> Result<(), SessionError> {
        self.0.click().await.map(|_| ()).map_err(protocol)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, SessionError> {
        self.0
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .map_err(protocol)
    }
}

#[async_trait]
impl WebSession for ChromiumSession {
    type Element = ChromiumElement;

    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        self.page
            .goto(url)
            .await
            .map(|_| ())
            .map_err(|e| SessionError::Navigation(format!("{}: {}", url, e)))
    }

    async fn query_selector_all(&self, selector: &str) -> Result<Vec<Self::Element>, SessionError> {
        let elements = self.page.find_elements(selector).await.map_err(protocol)?;
        Ok(elements.into_iter().map(ChromiumElement).collect())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let what = format!("selector {:?}", selector);
        with_timeout(&what, timeout, async {
            loop {
                match self.page.find_element(selector).await {
                    Ok(_) => return Ok(()),
                    Err(e) => keep_polling(e)?,
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        })
        .await
    }

    async fn wait_for_navigation(&self, timeout: Duration) -> Result<(), SessionError> {
        with_timeout("navigation", timeout, async {
            self.page
                .wait_for_navigation()
                .await
                .map(|_| ())
                .map_err(|e| SessionError::Navigation(e.to_string()))
        })
        .await
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), SessionError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| SessionError::NotFound(selector.to_string()))?;
        element.click().await.map_err(protocol)?;
        element.type_str(text).await.map_err(protocol)?;
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, SessionError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        self.page.screenshot(params).await.map_err(protocol)
    }

    async fn cookies(&self) -> Result<Vec<SessionCookie>, SessionError> {
        let cookies = self.page.get_cookies().await.map_err(protocol)?;
        Ok(cookies
            .into_iter()
            .map(|c| SessionCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
            })
            .collect())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let result = self.browser.close().await.map(|_| ()).map_err(protocol);
        if let Err(ref e) = result {
            warn!("Browser did not close cleanly ({}), killing process", e);
            let _ = self.browser.kill().await;
        }
        let _ = self.browser.wait().await;

        if let Some(handler) = self.handler.take() {
            handler.abort();
            let _ = handler.await;
        }

        debug!("Browser session closed");
        result
    }
}
