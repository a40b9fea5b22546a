//! Public entry for the mr-reviewer pipeline.
//!
//! Polls GitLab for merge requests, hands each new head revision to one or
//! more external review agents and posts their output back as MR notes.
//!
//! 1) **Select** – one explicit MR, every open MR of a project, or every MR
//!    where the token's user is a requested reviewer
//! 2) **Filter** – skip MRs whose head sha is already in `history.json`
//! 3) **Assemble** – prompt template + title/description + per-file diffs
//!    (new files without a server diff are rebuilt from raw content)
//! 4) **Review** – run each active agent against the saved input file
//! 5) **Publish** – result artifact + one comment per agent, then record sha
//!
//! Like the rest of the workspace it uses `tracing` for logging and avoids
//! `async-trait` and heap trait objects: seams are plain `async fn` traits
//! with enum-dispatch over concrete clients.

pub mod artifacts;
pub mod config;
pub mod errors;
pub mod git_providers;
pub mod history;
pub mod review;
pub mod reviewer;

use std::time::Instant;

use tracing::{debug, info};

pub use artifacts::ArtifactStore;
pub use config::ReviewerConfig;
pub use errors::{Error, MrResult};
pub use git_providers::{ProviderClient, ReviewSource};
pub use history::HistoryStore;
pub use review::{AgentRunner, CommandAgentRunner};
pub use reviewer::{CycleReport, MrOutcome, ReviewTarget, Reviewer};

/// Wires the production reviewer from a validated config.
///
/// Creates the log directory, loads history and the prompt template once,
/// resolves the active agents and builds the HTTP client.
pub async fn build_reviewer(
    cfg: &ReviewerConfig,
) -> MrResult<Reviewer<ProviderClient, CommandAgentRunner>> {
    let t0 = Instant::now();
    cfg.validate()?;

    let artifacts = ArtifactStore::new(&cfg.log_dir);
    artifacts.ensure_dir().await?;

    let history = HistoryStore::load_in(&cfg.log_dir).await;
    let prompt_template = review::load_prompt_template(cfg.resolved_prompt_file().as_deref());
    let agents = cfg.active_agents()?;
    let source = ProviderClient::from_config(cfg.provider_config())?;
    let runner = CommandAgentRunner::new(cfg.agent_timeout);

    info!(
        log_dir = %cfg.log_dir.display(),
        agents = ?agents.iter().map(|a| a.key.as_str()).collect::<Vec<_>>(),
        history_entries = history.len(),
        "reviewer ready"
    );
    debug!(elapsed_ms = t0.elapsed().as_millis() as u64, "reviewer wired");

    Ok(Reviewer::new(
        source,
        runner,
        history,
        artifacts,
        prompt_template,
        agents,
    ))
}
