//! permitsync command-line entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

use permitsync::browser::SnapshotSession;
use permitsync::config::{expand_path, load_settings, Settings};
use permitsync::delivery::DeliveryClient;
use permitsync::services::{Pipeline, RunOutcome};

#[derive(Parser)]
#[command(name = "permitsync", version, about = "Harvest permit records from a municipal dashboard and forward them")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print the payload instead of posting it
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in to the dashboard, scrape it, and deliver the records
    Run(RunArgs),
    /// Scrape a saved dashboard page and deliver the records
    Replay(ReplayArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Dashboard URL
    #[arg(long, env = "PERMITSYNC_DASHBOARD_URL")]
    dashboard_url: Option<String>,

    /// Dashboard username
    #[arg(long, env = "PERMITSYNC_USERNAME")]
    username: Option<String>,

    /// Dashboard password
    #[arg(long, env = "PERMITSYNC_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Also scrape the archived view
    #[arg(long)]
    include_archived: bool,

    /// Archived view URL
    #[arg(long, env = "PERMITSYNC_ARCHIVED_URL")]
    archived_url: Option<String>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Per-step login timeout in seconds
    #[arg(long)]
    login_timeout: Option<u64>,

    /// Save a screenshot here when login fails
    #[arg(long)]
    screenshot_dir: Option<String>,

    #[command(flatten)]
    delivery: DeliveryArgs,
}

#[derive(Args)]
struct ReplayArgs {
    /// Saved dashboard HTML page
    file: PathBuf,

    #[command(flatten)]
    delivery: DeliveryArgs,
}

#[derive(Args)]
struct DeliveryArgs {
    /// Delivery endpoint URL
    #[arg(long, env = "PERMITSYNC_ENDPOINT")]
    endpoint: Option<String>,

    /// Submitter email sent with the payload
    #[arg(long, env = "PERMITSYNC_USER_EMAIL")]
    user_email: Option<String>,

    /// Extra delivery header as NAME=VALUE (repeatable)
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Bearer token for the delivery endpoint
    #[arg(long, env = "PERMITSYNC_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    /// Post the bare record array without run metadata
    #[arg(long)]
    no_metadata: bool,

    /// Continue with an empty batch when the row query fails
    #[arg(long)]
    deliver_on_scrape_error: bool,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got {:?}", raw)),
    }
}

impl DeliveryArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(ref endpoint) = self.endpoint {
            settings.endpoint = Some(endpoint.clone());
        }
        if let Some(ref email) = self.user_email {
            settings.user_email = Some(email.clone());
        }
        settings.headers.extend(self.headers.iter().cloned());
        if let Some(ref token) = self.auth_token {
            settings.auth_token = Some(token.clone());
        }
        if self.no_metadata {
            settings.include_metadata = false;
        }
        if self.deliver_on_scrape_error {
            settings.deliver_on_scrape_error = true;
        }
    }
}

impl RunArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(ref url) = self.dashboard_url {
            settings.dashboard_url = Some(url.clone());
        }
        if let Some(ref username) = self.username {
            settings.username = Some(username.clone());
        }
        if let Some(ref password) = self.password {
            settings.password = Some(password.clone());
        }
        if self.include_archived {
            settings.harvest_archived = true;
        }
        if let Some(ref url) = self.archived_url {
            settings.archived_url = Some(url.clone());
        }
        if self.headed {
            settings.headless = false;
        }
        if let Some(timeout) = self.login_timeout {
            settings.login_timeout = timeout;
        }
        if let Some(ref dir) = self.screenshot_dir {
            settings.screenshot_dir = Some(expand_path(dir));
        }
        self.delivery.apply(settings);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "permitsync=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Run(ref args) => run(args, cli.dry_run).await,
        Command::Replay(ref args) => replay(args, cli.dry_run).await,
    };

    match result {
        Ok(outcome) => report(&outcome),
        Err(e) => {
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn report(outcome: &RunOutcome) -> ExitCode {
    if let RunOutcome::DryRun { payload, .. } = outcome {
        println!("{}", payload);
    }

    if outcome.is_success() {
        eprintln!("{} {}", style("✓").green().bold(), outcome);
    } else {
        eprintln!("{} {}", style("✗").red().bold(), outcome);
    }
    ExitCode::from(outcome.exit_code())
}

#[cfg(feature = "browser")]
async fn run(args: &RunArgs, dry_run: bool) -> anyhow::Result<RunOutcome> {
    use permitsync::browser::{ChromiumOptions, ChromiumSession};
    use std::time::Duration;

    let mut settings = load_settings().await;
    args.apply(&mut settings);

    let login = settings.login_plan()?;
    let harvest = settings.harvest_config(Some(login.dashboard_url.clone()), dry_run)?;
    let delivery = delivery_client(&settings, dry_run)?;

    let options = ChromiumOptions {
        headless: settings.headless,
        request_timeout: Duration::from_secs(settings.request_timeout),
        user_agent: settings.user_agent.clone(),
        executable: settings.chrome_executable.clone(),
    };
    let mut session = ChromiumSession::launch(&options)
        .await
        .context("failed to start browser")?;

    let pipeline = Pipeline::new(harvest, delivery);
    Ok(pipeline.run(&mut session, &login).await)
}

#[cfg(not(feature = "browser"))]
async fn run(_args: &RunArgs, _dry_run: bool) -> anyhow::Result<RunOutcome> {
    bail!("permitsync was built without browser support; rebuild with --features browser")
}

async fn replay(args: &ReplayArgs, dry_run: bool) -> anyhow::Result<RunOutcome> {
    let mut settings = load_settings().await;
    args.delivery.apply(&mut settings);
    // Archived view is a separate page the snapshot does not have
    settings.harvest_archived = false;

    let source = std::fs::canonicalize(&args.file)
        .with_context(|| format!("cannot open {}", args.file.display()))?;
    let source_url = url::Url::from_file_path(&source)
        .map(|u| u.to_string())
        .ok();

    let harvest = settings.harvest_config(source_url, dry_run)?;
    let delivery = delivery_client(&settings, dry_run)?;

    let mut session = SnapshotSession::from_file(&source)
        .await
        .with_context(|| format!("cannot read {}", source.display()))?;

    let pipeline = Pipeline::new(harvest, delivery);
    Ok(pipeline.replay(&mut session).await)
}

/// Build the delivery client. Dry runs may omit the endpoint.
fn delivery_client(settings: &Settings, dry_run: bool) -> anyhow::Result<DeliveryClient> {
    let config = match settings.delivery_config() {
        Ok(config) => config,
        Err(_) if dry_run && settings.endpoint.is_none() => {
            let mut config = permitsync::delivery::DeliveryConfig::new("http://localhost/");
            config.include_metadata = settings.include_metadata;
            config
        }
        Err(e) => bail!(e),
    };
    Ok(DeliveryClient::new(config)?)
}
