use std::error::Error;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use mr_reviewer::config::timeout_from_secs;
use mr_reviewer::{ReviewTarget, ReviewerConfig, build_reviewer};
use tokio::{signal, sync::watch};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Automated GitLab merge-request reviews via external agents.
///
/// Without `--project-id` every open MR where you are a requested reviewer
/// is processed. Flags override the matching environment variables.
#[derive(Debug, Parser)]
#[command(name = "mr-autoreview", version, about)]
struct Cli {
    /// Project ID or "group/project" path.
    #[arg(long)]
    project_id: Option<String>,

    /// Review only this MR (needs --project-id).
    #[arg(long, requires = "project_id")]
    mr_iid: Option<u64>,

    /// GitLab instance URL [env: GITLAB_URL]
    #[arg(long)]
    gitlab_url: Option<String>,

    /// Personal access token [env: GITLAB_TOKEN]
    #[arg(long)]
    gitlab_token: Option<String>,

    /// Program used by the built-in Codex agent.
    #[arg(long)]
    codex_path: Option<String>,

    /// Artifact and history directory [env: REVIEW_LOG_DIR, default: reviews]
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Keep polling until interrupted.
    #[arg(long)]
    daemon: bool,

    /// Seconds between daemon cycles.
    #[arg(long, default_value_t = 600, value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// Run only these agents (repeatable).
    #[arg(long = "agent", value_name = "KEY")]
    agents: Vec<String>,

    /// TOML agent registry [env: REVIEW_AGENTS_FILE]
    #[arg(long)]
    agents_file: Option<PathBuf>,

    /// Prompt template [env: REVIEW_PROMPT_FILE, default: prompt.md if present]
    #[arg(long)]
    prompt_file: Option<PathBuf>,

    /// Per-agent time limit in seconds [env: REVIEW_AGENT_TIMEOUT_SECS]
    #[arg(long, value_name = "SECS")]
    agent_timeout: Option<u64>,

    /// HTTP request timeout in seconds, 0 disables [env: REVIEW_HTTP_TIMEOUT_SECS, default: 30]
    #[arg(long, value_name = "SECS")]
    http_timeout: Option<u64>,
}

impl Cli {
    fn apply(&self, cfg: &mut ReviewerConfig) {
        if let Some(v) = &self.gitlab_url {
            cfg.gitlab_url = v.clone();
        }
        if let Some(v) = &self.gitlab_token {
            cfg.gitlab_token = v.clone();
        }
        if let Some(v) = &self.codex_path {
            cfg.codex_path = v.clone();
        }
        if let Some(v) = &self.log_dir {
            cfg.log_dir = v.clone();
        }
        if let Some(v) = &self.agents_file {
            cfg.agents_file = Some(v.clone());
        }
        if let Some(v) = &self.prompt_file {
            cfg.prompt_file = Some(v.clone());
        }
        if let Some(secs) = self.agent_timeout {
            cfg.agent_timeout = timeout_from_secs(secs);
        }
        if let Some(secs) = self.http_timeout {
            cfg.http_timeout = timeout_from_secs(secs);
        }
        if !self.agents.is_empty() {
            cfg.agent_selection = self.agents.clone();
        }
    }
}

/// First interrupt asks the daemon to stop after its cycle; returns `true`
/// once a second one arrives. Returns `false` if listening fails.
async fn relay_interrupts<F, Fut>(mut next_interrupt: F, shutdown: watch::Sender<bool>) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if let Err(err) = next_interrupt().await {
        warn!(%err, "Failed to listen for shutdown signal");
        return false;
    }
    info!("Interrupt received; stopping after the current cycle (Ctrl+C again to force)");
    let _ = shutdown.send(true);

    match next_interrupt().await {
        Ok(()) => true,
        Err(err) => {
            warn!(%err, "Failed to listen for a second interrupt");
            false
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Load environment variables from .env file; a missing file is fine.
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            return Err(err.into());
        }
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,mr_reviewer=info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    let mut cfg = ReviewerConfig::from_env()?;
    cli.apply(&mut cfg);

    let target = ReviewTarget::from_options(cli.project_id.clone(), cli.mr_iid)?;
    let mut reviewer = build_reviewer(&cfg).await?;

    if cli.daemon {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            if relay_interrupts(signal::ctrl_c, tx).await {
                warn!("Second interrupt; exiting immediately");
                std::process::exit(130);
            }
        });

        reviewer
            .run_daemon(&target, Duration::from_secs(cli.interval), rx)
            .await;
    } else {
        let report = reviewer.run(&target).await?;
        info!(?report, "review run finished");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn zero_interval_is_rejected() {
        assert!(Cli::try_parse_from(["mr-autoreview", "--daemon", "--interval", "0"]).is_err());
        let cli = Cli::try_parse_from(["mr-autoreview", "--daemon", "--interval", "1"]).unwrap();
        assert_eq!(cli.interval, 1);
        assert_eq!(Cli::try_parse_from(["mr-autoreview"]).unwrap().interval, 600);
    }

    #[test]
    fn mr_iid_requires_project() {
        assert!(Cli::try_parse_from(["mr-autoreview", "--mr-iid", "7"]).is_err());
    }

    #[tokio::test]
    async fn second_interrupt_forces_exit() {
        let (tx, rx) = watch::channel(false);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let forced = relay_interrupts(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Ok(()))
            },
            tx,
        )
        .await;

        assert!(forced);
        assert!(*rx.borrow());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn listener_failure_neither_stops_nor_exits() {
        let (tx, rx) = watch::channel(false);
        let forced = relay_interrupts(
            || std::future::ready(Err(io::Error::other("no signal support"))),
            tx,
        )
        .await;

        assert!(!forced);
        assert!(!*rx.borrow());
    }
}
