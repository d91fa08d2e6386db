//! Configuration management for permitsync using the prefer crate.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::delivery::DeliveryConfig;
use crate::models::RunMetadata;
use crate::scrapers::{LoginSelectors, DEFAULT_ROW_SELECTOR, SCHEMA_VERSION};
use crate::services::{Credentials, HarvestConfig, LoginPlan};

/// Default timeout for each login step, in seconds.
pub const DEFAULT_LOGIN_TIMEOUT_SECS: u64 = 30;

/// Errors from resolving settings into run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid URL for {field}: {url:?} ({reason})")]
    InvalidUrl {
        field: &'static str,
        url: String,
        reason: String,
    },
}

fn require<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, ConfigError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(field))
}

fn check_url(url: &str, field: &'static str) -> Result<(), ConfigError> {
    Url::parse(url)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidUrl {
            field,
            url: url.to_string(),
            reason: e.to_string(),
        })
}

/// Application settings.
#[derive(Clone)]
pub struct Settings {
    /// Dashboard login/landing page.
    pub dashboard_url: Option<String>,
    /// Archived listing view.
    pub archived_url: Option<String>,
    /// Delivery endpoint.
    pub endpoint: Option<String>,
    /// Submitter identity sent with each delivery.
    pub user_email: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Extra headers for delivery requests.
    pub headers: BTreeMap<String, String>,
    /// Bearer token for delivery requests.
    pub auth_token: Option<String>,
    /// Wrap records with run metadata on delivery.
    pub include_metadata: bool,
    /// Per-step login timeout in seconds.
    pub login_timeout: u64,
    /// HTTP and browser request timeout in seconds.
    pub request_timeout: u64,
    /// Browser user agent: unset, "impersonate", or a custom string.
    pub user_agent: Option<String>,
    /// Custom user agent for delivery requests.
    pub delivery_user_agent: Option<String>,
    pub headless: bool,
    /// Chrome/Chromium binary, auto-detected when unset.
    pub chrome_executable: Option<PathBuf>,
    pub row_selector: String,
    pub login_selectors: LoginSelectors,
    /// Dashboard row layout version.
    pub schema_version: u32,
    pub harvest_archived: bool,
    pub deliver_on_scrape_error: bool,
    /// Directory for failure screenshots.
    pub screenshot_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dashboard_url: None,
            archived_url: None,
            endpoint: None,
            user_email: None,
            username: None,
            password: None,
            headers: BTreeMap::new(),
            auth_token: None,
            include_metadata: true,
            login_timeout: DEFAULT_LOGIN_TIMEOUT_SECS,
            request_timeout: 30,
            user_agent: None,
            delivery_user_agent: None,
            headless: true,
            chrome_executable: None,
            row_selector: DEFAULT_ROW_SELECTOR.to_string(),
            login_selectors: LoginSelectors::default(),
            schema_version: SCHEMA_VERSION,
            harvest_archived: false,
            deliver_on_scrape_error: false,
            screenshot_dir: None,
        }
    }
}

impl Settings {
    /// Delivery settings. Requires an endpoint.
    pub fn delivery_config(&self) -> Result<DeliveryConfig, ConfigError> {
        let endpoint = require(&self.endpoint, "endpoint")?;
        check_url(endpoint, "endpoint")?;

        Ok(DeliveryConfig {
            endpoint: endpoint.to_string(),
            include_metadata: self.include_metadata,
            headers: self.headers.clone(),
            auth_token: self.auth_token.clone(),
            timeout: Duration::from_secs(self.request_timeout),
            user_agent: self.delivery_user_agent.clone(),
        })
    }

    /// Login settings. Requires dashboard URL and credentials.
    pub fn login_plan(&self) -> Result<LoginPlan, ConfigError> {
        let dashboard_url = require(&self.dashboard_url, "dashboard_url")?;
        check_url(dashboard_url, "dashboard_url")?;
        let username = require(&self.username, "username")?;
        let password = require(&self.password, "password")?;

        Ok(LoginPlan {
            dashboard_url: dashboard_url.to_string(),
            credentials: Credentials::new(username, password),
            selectors: self.login_selectors.clone(),
            timeout: Duration::from_secs(self.login_timeout),
        })
    }

    /// Scrape settings. `source_url` is reported in the payload.
    pub fn harvest_config(
        &self,
        source_url: Option<String>,
        dry_run: bool,
    ) -> Result<HarvestConfig, ConfigError> {
        if let Some(ref url) = self.archived_url {
            check_url(url, "archived_url")?;
        }

        Ok(HarvestConfig {
            row_selector: self.row_selector.clone(),
            schema_version: self.schema_version,
            archived_url: self.archived_url.clone(),
            harvest_archived: self.harvest_archived,
            deliver_on_scrape_error: self.deliver_on_scrape_error,
            screenshot_dir: self.screenshot_dir.clone(),
            dry_run,
            metadata: RunMetadata::new(self.user_email.clone(), source_url),
        })
    }
}

/// Selector overrides in the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, prefer::FromValue)]
pub struct SelectorConfig {
    #[serde(default)]
    pub row: Option<String>,
    #[serde(default)]
    pub username_field: Option<String>,
    #[serde(default)]
    pub password_field: Option<String>,
    #[serde(default)]
    pub button: Option<String>,
    /// Element that only appears once logged in.
    #[serde(default)]
    pub marker: Option<String>,
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dashboard_url: Option<String>,
    #[serde(default)]
    pub archived_url: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
    /// Dashboard username. Prefer the environment for the password.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub include_metadata: Option<bool>,
    /// Per-step login timeout in seconds.
    #[serde(default)]
    pub login_timeout: Option<u64>,
    /// Request timeout in seconds.
    #[serde(default)]
    pub request_timeout: Option<u64>,
    /// Browser user agent string, or "impersonate".
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub delivery_user_agent: Option<String>,
    #[serde(default)]
    pub headless: Option<bool>,
    #[serde(default)]
    pub chrome_executable: Option<String>,
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub harvest_archived: Option<bool>,
    #[serde(default)]
    pub deliver_on_scrape_error: Option<bool>,
    #[serde(default)]
    pub screenshot_dir: Option<String>,
    #[serde(default)]
    pub selectors: SelectorConfig,
}

impl Config {
    /// Load configuration using prefer crate.
    /// Automatically discovers permitsync config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("permitsync").await {
            Ok(pref_config) => Self::from_prefer(&pref_config),
            Err(_) => {
                // No config file found, use defaults
                Self::default()
            }
        }
    }

    /// Read every known key from a loaded prefer config. Missing or
    /// mistyped keys fall back to unset.
    pub fn from_prefer(pref_config: &prefer::Config) -> Self {
        let headers: HashMap<String, String> = pref_config.get("headers").unwrap_or_default();

        Config {
            dashboard_url: pref_config.get("dashboard_url").ok(),
            archived_url: pref_config.get("archived_url").ok(),
            endpoint: pref_config.get("endpoint").ok(),
            user_email: pref_config.get("user_email").ok(),
            username: pref_config.get("username").ok(),
            headers: headers.into_iter().collect(),
            include_metadata: pref_config.get("include_metadata").ok(),
            login_timeout: pref_config.get("login_timeout").ok(),
            request_timeout: pref_config.get("request_timeout").ok(),
            user_agent: pref_config.get("user_agent").ok(),
            delivery_user_agent: pref_config.get("delivery_user_agent").ok(),
            headless: pref_config.get("headless").ok(),
            chrome_executable: pref_config.get("chrome_executable").ok(),
            schema_version: pref_config.get("schema_version").ok(),
            harvest_archived: pref_config.get("harvest_archived").ok(),
            deliver_on_scrape_error: pref_config.get("deliver_on_scrape_error").ok(),
            screenshot_dir: pref_config.get("screenshot_dir").ok(),
            selectors: pref_config.get("selectors").unwrap_or_default(),
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings) {
        if let Some(ref url) = self.dashboard_url {
            settings.dashboard_url = Some(url.clone());
        }
        if let Some(ref url) = self.archived_url {
            settings.archived_url = Some(url.clone());
        }
        if let Some(ref endpoint) = self.endpoint {
            settings.endpoint = Some(endpoint.clone());
        }
        if let Some(ref email) = self.user_email {
            settings.user_email = Some(email.clone());
        }
        if let Some(ref username) = self.username {
            settings.username = Some(username.clone());
        }
        settings
            .headers
            .extend(self.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(include) = self.include_metadata {
            settings.include_metadata = include;
        }
        if let Some(timeout) = self.login_timeout {
            settings.login_timeout = timeout;
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = Some(user_agent.clone());
        }
        if let Some(ref user_agent) = self.delivery_user_agent {
            settings.delivery_user_agent = Some(user_agent.clone());
        }
        if let Some(headless) = self.headless {
            settings.headless = headless;
        }
        if let Some(ref path) = self.chrome_executable {
            settings.chrome_executable = Some(expand_path(path));
        }
        if let Some(version) = self.schema_version {
            settings.schema_version = version;
        }
        if let Some(harvest) = self.harvest_archived {
            settings.harvest_archived = harvest;
        }
        if let Some(deliver) = self.deliver_on_scrape_error {
            settings.deliver_on_scrape_error = deliver;
        }
        if let Some(ref dir) = self.screenshot_dir {
            settings.screenshot_dir = Some(expand_path(dir));
        }

        let selectors = &self.selectors;
        if let Some(ref row) = selectors.row {
            settings.row_selector = row.clone();
        }
        if let Some(ref field) = selectors.username_field {
            settings.login_selectors.username_field = field.clone();
        }
        if let Some(ref field) = selectors.password_field {
            settings.login_selectors.password_field = field.clone();
        }
        if let Some(ref button) = selectors.button {
            settings.login_selectors.button = button.clone();
        }
        if let Some(ref marker) = selectors.marker {
            settings.login_selectors.marker = marker.clone();
        }
    }
}

/// Expand a leading `~` in a configured path.
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Load settings from configuration (async version).
pub async fn load_settings() -> Settings {
    let config = Config::load().await;
    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings);
    settings
}
