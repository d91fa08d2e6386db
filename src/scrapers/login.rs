//! Dashboard login.
//!
//! The login form is a two-page flow: username first, then password. The
//! submit button text differs between dashboard deployments, so every button
//! whose label looks like a submit action is clicked. The walk is attempted
//! once; any step that errors or runs past the timeout fails the login.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::browser::{with_timeout, PageElement, SessionError, WebSession};

/// Button labels treated as "submit this step" (compared trimmed, lowercase).
pub const SUBMIT_LABELS: &[&str] = &["continue", "next", "sign in", "submit", "log in"];

/// Position in the login walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStage {
    AwaitingUsername,
    AwaitingButtonClick1,
    AwaitingNavigation1,
    AwaitingPassword,
    AwaitingButtonClick2,
    AwaitingNavigation2,
    AwaitingMarker,
    Authenticated,
}

impl fmt::Display for LoginStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoginStage::AwaitingUsername => "awaiting username field",
            LoginStage::AwaitingButtonClick1 => "submitting username",
            LoginStage::AwaitingNavigation1 => "awaiting password page",
            LoginStage::AwaitingPassword => "awaiting password field",
            LoginStage::AwaitingButtonClick2 => "submitting password",
            LoginStage::AwaitingNavigation2 => "awaiting dashboard",
            LoginStage::AwaitingMarker => "awaiting dashboard marker",
            LoginStage::Authenticated => "authenticated",
        };
        f.write_str(name)
    }
}

/// Login failure, tagged with the stage that failed.
///
/// Rejected credentials and a changed page layout look the same here.
#[derive(Debug, Error)]
#[error("login failed while {stage}: {source}")]
pub struct AuthError {
    pub stage: LoginStage,
    #[source]
    pub source: SessionError,
}

/// CSS selectors for the login form and the post-login page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSelectors {
    pub username_field: String,
    pub password_field: String,
    pub button: String,
    /// Element that only exists once authenticated.
    pub marker: String,
}

impl Default for LoginSelectors {
    fn default() -> Self {
        Self {
            username_field: "input[type='email'], input[name='username'], input#username"
                .to_string(),
            password_field: "input[type='password']".to_string(),
            button: "button".to_string(),
            marker: ".dashboard".to_string(),
        }
    }
}

/// Whether a button label reads like a submit action.
pub fn is_submit_label(label: &str) -> bool {
    let label = label.trim().to_lowercase();
    SUBMIT_LABELS.contains(&label.as_str())
}

/// Drives the login walk against a session.
#[derive(Debug, Clone)]
pub struct Authenticator {
    selectors: LoginSelectors,
    timeout: Duration,
}

impl Authenticator {
    /// `timeout` bounds every individual wait, type and click step.
    pub fn new(selectors: LoginSelectors, timeout: Duration) -> Self {
        Self { selectors, timeout }
    }

    pub fn selectors(&self) -> &LoginSelectors {
        &self.selectors
    }

    /// Log in, reporting only whether it worked. Failures are logged.
    pub async fn login<S: WebSession>(&self, session: &S, username: &str, password: &str) -> bool {
        match self.try_login(session, username, password).await {
            Ok(()) => true,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    /// Log in, returning the failed stage on error.
    pub async fn try_login<S: WebSession>(
        &self,
        session: &S,
        username: &str,
        password: &str,
    ) -> Result<(), AuthError> {
        let sel = &self.selectors;
        let timeout = self.timeout;

        let mut stage = LoginStage::AwaitingUsername;
        let fail = |stage: LoginStage| move |source: SessionError| AuthError { stage, source };

        session
            .wait_for_selector(&sel.username_field, timeout)
            .await
            .map_err(fail(stage))?;

        stage = LoginStage::AwaitingButtonClick1;
        session
            .wait_for_selector(&sel.button, timeout)
            .await
            .map_err(fail(stage))?;
        with_timeout("username entry", timeout, session.type_text(&sel.username_field, username))
            .await
            .map_err(fail(stage))?;
        self.click_submit_buttons(session).await.map_err(fail(stage))?;

        stage = LoginStage::AwaitingNavigation1;
        session
            .wait_for_navigation(timeout)
            .await
            .map_err(fail(stage))?;

        stage = LoginStage::AwaitingPassword;
        session
            .wait_for_selector(&sel.password_field, timeout)
            .await
            .map_err(fail(stage))?;
        with_timeout("password entry", timeout, session.type_text(&sel.password_field, password))
            .await
            .map_err(fail(stage))?;

        stage = LoginStage::AwaitingButtonClick2;
        self.click_submit_buttons(session).await.map_err(fail(stage))?;

        stage = LoginStage::AwaitingNavigation2;
        session
            .wait_for_navigation(timeout)
            .await
            .map_err(fail(stage))?;

        stage = LoginStage::AwaitingMarker;
        session
            .wait_for_selector(&sel.marker, timeout)
            .await
            .map_err(fail(stage))?;

        info!("Login succeeded ({})", LoginStage::Authenticated);
        Ok(())
    }

    /// Click every button with a submit-like label. Returns how many were clicked.
    async fn click_submit_buttons<S: WebSession>(&self, session: &S) -> Result<usize, SessionError> {
        with_timeout("submit button click", self.timeout, async {
            let buttons = session.query_selector_all(&self.selectors.button).await?;
            let mut clicked = 0;
            for button in &buttons {
                let label = button.text_content().await?;
                if is_submit_label(&label) {
                    debug!("Clicking button {:?}", label.trim());
                    button.click().await?;
                    clicked += 1;
                }
            }
            if clicked == 0 {
                debug!("No submit button among {} buttons", buttons.len());
            }
            Ok(clicked)
        })
        .await
    }
}
