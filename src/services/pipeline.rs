//! Run orchestration: navigate, log in, scrape, deliver.
//!
//! The pipeline owns the batch for the whole run and is the only place that
//! decides whether the run succeeded. Lower layers report their own failures
//! and never abort the process.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::browser::WebSession;
use crate::delivery::DeliveryClient;
use crate::models::{RunBatch, RunMetadata, ACTIVE_TAG, ARCHIVED_TAG};
use crate::scrapers::{scrape_records, Authenticator, LoginSelectors, ScrapeReport};

/// Dashboard credentials. Never printed.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where and how to log in before scraping.
#[derive(Debug, Clone)]
pub struct LoginPlan {
    pub dashboard_url: String,
    pub credentials: Credentials,
    pub selectors: LoginSelectors,
    /// Bound on each login step.
    pub timeout: Duration,
}

/// Scrape and delivery settings for a run.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub row_selector: String,
    pub schema_version: u32,
    /// Archived listing view, only visited when `harvest_archived` is set.
    pub archived_url: Option<String>,
    pub harvest_archived: bool,
    /// Deliver an empty batch instead of failing when the row query fails.
    pub deliver_on_scrape_error: bool,
    /// Directory for screenshots taken when login fails.
    pub screenshot_dir: Option<PathBuf>,
    /// Render the payload instead of posting it.
    pub dry_run: bool,
    pub metadata: RunMetadata,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            row_selector: crate::scrapers::DEFAULT_ROW_SELECTOR.to_string(),
            schema_version: crate::scrapers::SCHEMA_VERSION,
            archived_url: None,
            harvest_archived: false,
            deliver_on_scrape_error: false,
            screenshot_dir: None,
            dry_run: false,
            metadata: RunMetadata::default(),
        }
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Delivered {
        records: usize,
        skipped: usize,
        status: Option<u16>,
    },
    DryRun {
        records: usize,
        payload: String,
    },
    NavigationFailed(String),
    LoginFailed(String),
    ScrapeFailed(String),
    DeliveryFailed {
        status: Option<u16>,
        body: Option<String>,
    },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Delivered { .. } | RunOutcome::DryRun { .. })
    }

    /// Process exit code: 0 on success, 1 on any failure.
    pub fn exit_code(&self) -> u8 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Delivered {
                records,
                skipped,
                status,
            } => {
                write!(f, "delivered {} records", records)?;
                if *skipped > 0 {
                    write!(f, " ({} rows skipped)", skipped)?;
                }
                if let Some(status) = status {
                    write!(f, ", endpoint answered HTTP {}", status)?;
                }
                Ok(())
            }
            RunOutcome::DryRun { records, .. } => {
                write!(f, "dry run: {} records not delivered", records)
            }
            RunOutcome::NavigationFailed(msg) => write!(f, "could not open dashboard: {}", msg),
            RunOutcome::LoginFailed(msg) => write!(f, "login failed: {}", msg),
            RunOutcome::ScrapeFailed(msg) => write!(f, "scrape failed: {}", msg),
            RunOutcome::DeliveryFailed { status, body } => {
                write!(f, "delivery failed")?;
                if let Some(status) = status {
                    write!(f, " (HTTP {})", status)?;
                }
                if let Some(body) = body {
                    write!(f, ": {}", body)?;
                }
                Ok(())
            }
        }
    }
}

/// Sequences one run against a session.
pub struct Pipeline {
    harvest: HarvestConfig,
    delivery: DeliveryClient,
}

impl Pipeline {
    pub fn new(harvest: HarvestConfig, delivery: DeliveryClient) -> Self {
        Self { harvest, delivery }
    }

    /// Full run: open the dashboard, log in, scrape and deliver.
    ///
    /// The session is closed before returning, whatever the outcome.
    pub async fn run<S: WebSession>(&self, session: &mut S, login: &LoginPlan) -> RunOutcome {
        let outcome = self.login_and_harvest(&*session, login).await;
        close_session(session).await;
        outcome
    }

    /// Scrape and deliver from whatever page the session already shows.
    ///
    /// Used for saved pages, which need no login. Closes the session.
    pub async fn replay<S: WebSession>(&self, session: &mut S) -> RunOutcome {
        let outcome = self.harvest_and_deliver(&*session).await;
        close_session(session).await;
        outcome
    }

    async fn login_and_harvest<S: WebSession>(&self, session: &S, login: &LoginPlan) -> RunOutcome {
        info!("Opening {}", login.dashboard_url);
        if let Err(e) = session.navigate(&login.dashboard_url).await {
            warn!("{}", e);
            return RunOutcome::NavigationFailed(e.to_string());
        }

        let authenticator = Authenticator::new(login.selectors.clone(), login.timeout);
        let credentials = &login.credentials;
        if let Err(e) = authenticator
            .try_login(session, &credentials.username, &credentials.password)
            .await
        {
            warn!("{}", e);
            if let Some(ref dir) = self.harvest.screenshot_dir {
                capture_screenshot(session, dir, "login-failure").await;
            }
            return RunOutcome::LoginFailed(e.to_string());
        }

        match session.cookies().await {
            Ok(cookies) => debug!("Session holds {} cookies", cookies.len()),
            Err(e) => debug!("Could not read session cookies: {}", e),
        }

        self.harvest_and_deliver(session).await
    }

    async fn harvest_and_deliver<S: WebSession>(&self, session: &S) -> RunOutcome {
        let harvest = &self.harvest;

        let mut report = match scrape_records(
            session,
            &harvest.row_selector,
            ACTIVE_TAG,
            harvest.schema_version,
        )
        .await
        {
            Ok(report) => report,
            Err(e) if harvest.deliver_on_scrape_error => {
                warn!("{}; delivering an empty batch", e);
                ScrapeReport::default()
            }
            Err(e) => {
                warn!("{}", e);
                return RunOutcome::ScrapeFailed(e.to_string());
            }
        };

        if harvest.harvest_archived {
            match harvest.archived_url {
                Some(ref url) => self.harvest_archived(session, url, &mut report).await,
                None => warn!("Archived harvest enabled but no archived URL configured"),
            }
        }

        self.deliver(report.batch, report.skipped).await
    }

    /// Append records from the archived view. Failures here leave the active batch intact.
    async fn harvest_archived<S: WebSession>(
        &self,
        session: &S,
        url: &str,
        report: &mut ScrapeReport,
    ) {
        info!("Opening archived view {}", url);
        if let Err(e) = session.navigate(url).await {
            warn!("Skipping archived records: {}", e);
            return;
        }

        match scrape_records(
            session,
            &self.harvest.row_selector,
            ARCHIVED_TAG,
            self.harvest.schema_version,
        )
        .await
        {
            Ok(archived) => {
                report.batch.append(archived.batch);
                report.skipped += archived.skipped;
            }
            Err(e) => warn!("Skipping archived records: {}", e),
        }
    }

    async fn deliver(&self, batch: RunBatch, skipped: usize) -> RunOutcome {
        let records = batch.len();

        if self.harvest.dry_run {
            return match self.delivery.render(&batch, &self.harvest.metadata) {
                Ok(payload) => RunOutcome::DryRun { records, payload },
                Err(e) => RunOutcome::DeliveryFailed {
                    status: None,
                    body: Some(e.to_string()),
                },
            };
        }

        info!(
            "Delivering {} records to {}",
            records,
            self.delivery.config().endpoint
        );
        let outcome = self.delivery.deliver(&batch, &self.harvest.metadata).await;
        if outcome.success {
            RunOutcome::Delivered {
                records,
                skipped,
                status: outcome.status,
            }
        } else {
            RunOutcome::DeliveryFailed {
                status: outcome.status,
                body: outcome.body,
            }
        }
    }
}

async fn close_session<S: WebSession>(session: &mut S) {
    if let Err(e) = session.close().await {
        warn!("Failed to close browser session: {}", e);
    }
}

/// Save a full-page screenshot for diagnosis. Failures are logged only.
async fn capture_screenshot<S: WebSession>(session: &S, dir: &Path, label: &str) {
    let bytes = match session.screenshot().await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Could not capture screenshot: {}", e);
            return;
        }
    };

    let path = dir.join(format!(
        "{}-{}.png",
        label,
        Utc::now().format("%Y%m%dT%H%M%SZ")
    ));
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        warn!("Could not create {}: {}", dir.display(), e);
        return;
    }
    match tokio::fs::write(&path, bytes).await {
        Ok(()) => info!("Saved screenshot to {}", path.display()),
        Err(e) => warn!("Could not write {}: {}", path.display(), e),
    }
}
