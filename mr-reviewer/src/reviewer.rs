//! Review orchestrator: target resolution, per-MR pipeline and daemon loop.
//!
//! Per MR: changes → assemble input → input artifact → audit record →
//! each agent in order (result artifact + comment) → history update.
//! Everything runs sequentially; one MR and one agent at a time.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::artifacts::{ArtifactStamp, ArtifactStore};
use crate::errors::{Error, MrResult};
use crate::git_providers::{MergeRequest, ReviewSource};
use crate::history::HistoryStore;
use crate::review::agent::{AgentConfig, AgentResult, AgentRunner};
use crate::review::prompt::assemble_review_input;

/// Which merge requests one cycle looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewTarget {
    /// One explicit MR; always reviewed, history is only written.
    Single { project: String, iid: u64 },
    /// Every open MR of one project not yet reviewed at its current sha.
    Project { project: String },
    /// Every open MR where the token's user is a requested reviewer.
    PendingForMe,
}

impl ReviewTarget {
    /// Maps the optional `--project-id` / `--mr-iid` pair onto a target.
    pub fn from_options(project: Option<String>, iid: Option<u64>) -> MrResult<Self> {
        match (project, iid) {
            (Some(project), Some(iid)) => Ok(Self::Single { project, iid }),
            (Some(project), None) => Ok(Self::Project { project }),
            (None, None) => Ok(Self::PendingForMe),
            (None, Some(_)) => Err(Error::Validation(
                "--mr-iid requires --project-id".to_string(),
            )),
        }
    }
}

/// Counters for one `run` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub considered: usize,
    pub skipped: usize,
    pub reviewed: usize,
    pub no_changes: usize,
    pub failed: usize,
}

/// What happened to one merge request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MrOutcome {
    /// Provider returned no changed files; nothing written or posted.
    NoChanges,
    Reviewed {
        input_artifact: PathBuf,
        results: Vec<AgentResult>,
        comments_posted: usize,
    },
}

pub struct Reviewer<S, R> {
    source: S,
    runner: R,
    history: HistoryStore,
    artifacts: ArtifactStore,
    prompt_template: String,
    agents: Vec<AgentConfig>,
}

impl<S: ReviewSource, R: AgentRunner> Reviewer<S, R> {
    pub fn new(
        source: S,
        runner: R,
        history: HistoryStore,
        artifacts: ArtifactStore,
        prompt_template: String,
        agents: Vec<AgentConfig>,
    ) -> Self {
        Self {
            source,
            runner,
            history,
            artifacts,
            prompt_template,
            agents,
        }
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Runs one cycle for `target`.
    ///
    /// Errors only when the target itself cannot be resolved (explicit MR
    /// fetch, identity lookup) or, for a single target, when its processing
    /// fails. Per-MR failures inside a batch are logged and counted.
    pub async fn run(&mut self, target: &ReviewTarget) -> MrResult<CycleReport> {
        match target {
            ReviewTarget::Single { project, iid } => {
                info!(project = %project, iid = iid, "Processing single MR");
                let mr = self.source.merge_request(project, *iid).await?;
                let outcome = self.process_mr(&mr).await?;

                let mut report = CycleReport {
                    considered: 1,
                    ..CycleReport::default()
                };
                match outcome {
                    MrOutcome::NoChanges => report.no_changes += 1,
                    MrOutcome::Reviewed { .. } => report.reviewed += 1,
                }
                Ok(report)
            }
            ReviewTarget::Project { project } => {
                info!(project = %project, "Fetching all open MRs for project");
                let mrs = self.source.open_merge_requests(project).await;
                Ok(self.process_batch(mrs).await)
            }
            ReviewTarget::PendingForMe => {
                info!("Fetching all pending reviews for current user");
                let user = self.source.current_identity().await?;
                info!(username = %user.username, id = user.id, "Authenticated");
                let mrs = self.source.pending_reviews().await;
                Ok(self.process_batch(mrs).await)
            }
        }
    }

    async fn process_batch(&mut self, mrs: Vec<MergeRequest>) -> CycleReport {
        let mut report = CycleReport::default();
        if mrs.is_empty() {
            info!("No merge requests found.");
            return report;
        }

        for mr in &mrs {
            report.considered += 1;
            if self.history.is_processed(mr) {
                debug!(project = %mr.id.project, iid = mr.id.iid, "No changes since last review; skipping");
                report.skipped += 1;
                continue;
            }

            info!(project = %mr.id.project, iid = mr.id.iid, title = %mr.title, "Processing MR");
            match self.process_mr(mr).await {
                Ok(MrOutcome::NoChanges) => report.no_changes += 1,
                Ok(MrOutcome::Reviewed { .. }) => report.reviewed += 1,
                Err(err) => {
                    error!(project = %mr.id.project, iid = mr.id.iid, %err, "MR processing failed; moving on");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Drives one MR through the whole pipeline.
    ///
    /// Only a failed changes fetch is returned as an error. Artifact writes,
    /// comment posts and the history update are each logged on failure and
    /// the pipeline continues.
    pub async fn process_mr(&mut self, mr: &MergeRequest) -> MrResult<MrOutcome> {
        info!(project = %mr.id.project, iid = mr.id.iid, "Fetching diffs");
        let changes = self.source.changes(mr).await?;
        if changes.is_empty() {
            info!(project = %mr.id.project, iid = mr.id.iid, "No changes found");
            return Ok(MrOutcome::NoChanges);
        }

        let review_input = assemble_review_input(&self.prompt_template, mr, &changes);
        let stamp = ArtifactStamp::now();

        let input_path = absolute_or_given(&self.artifacts.input_path(mr, &stamp));
        match self.artifacts.write(&input_path, &review_input).await {
            Ok(()) => info!(path = %input_path.display(), "Review input saved"),
            Err(err) => error!(%err, "Failed to save review input"),
        }

        for agent in &self.agents {
            let command_line = agent.render_command(&input_path);
            if let Err(err) = self.artifacts.append_command(&stamp, &command_line).await {
                error!(%err, "Failed to append to command log");
            }
        }

        let mut results = Vec::with_capacity(self.agents.len());
        let mut comments_posted = 0;
        for agent in &self.agents {
            info!(agent = %agent.key, "Running review agent");
            let output = self.runner.run_against_file(agent, &input_path).await;

            let result_path = self.artifacts.result_path(mr, &stamp, &agent.key);
            match self.artifacts.write(&result_path, &output).await {
                Ok(()) => info!(path = %result_path.display(), "Review result saved"),
                Err(err) => error!(agent = %agent.key, %err, "Failed to save review result"),
            }

            info!(agent = %agent.key, "Posting comment to GitLab");
            let body = comment_body(&agent.name, &output);
            match self.source.post_comment(mr, &body).await {
                Ok(()) => comments_posted += 1,
                Err(err) => {
                    error!(project = %mr.id.project, iid = mr.id.iid, agent = %agent.key, %err, "Failed to post comment")
                }
            }

            results.push(AgentResult {
                agent_key: agent.key.clone(),
                agent_name: agent.name.clone(),
                output,
            });
        }

        if let Err(err) = self.history.mark_processed(mr).await {
            error!(%err, "Error saving history file");
        }
        info!(project = %mr.id.project, iid = mr.id.iid, "Done processing MR");

        Ok(MrOutcome::Reviewed {
            input_artifact: input_path,
            results,
            comments_posted,
        })
    }

    /// Repeats `run` every `interval` until `shutdown` turns `true`.
    ///
    /// A shutdown requested mid-cycle takes effect once that cycle is done.
    /// Cycle errors are logged and retried on the next tick.
    pub async fn run_daemon(
        &mut self,
        target: &ReviewTarget,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(interval = ?interval, "Starting in daemon mode");
        loop {
            if *shutdown.borrow() {
                break;
            }

            info!(
                "--- Checking for reviews at {} ---",
                Local::now().format("%Y-%m-%d %H:%M:%S")
            );
            match self.run(target).await {
                Ok(report) => info!(?report, "review cycle finished"),
                Err(err) => warn!(%err, "review cycle failed; retrying after interval"),
            }

            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }
        info!("Daemon stopped.");
    }
}

/// Header every posted review starts with.
pub fn comment_body(agent_name: &str, output: &str) -> String {
    format!("## Automated Code Review (via {agent_name})\n\n{output}")
}

/// Resolves once the flag flips to `true`; never if the sender is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn absolute_or_given(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
