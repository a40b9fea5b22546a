//! Provider facade w/o async-trait or dynamic trait objects.
//!
//! We expose an enum `ProviderClient` with concrete implementations per provider,
//! and the `ReviewSource` seam the orchestrator is generic over.

pub mod types;
pub use types::*;

pub mod gitlab;

use std::time::Duration;

use tracing::debug;

use crate::errors::MrResult;

/// Runtime configuration for any provider client.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// API base, e.g. "https://gitlab.com/api/v4"
    pub base_api: String,
    /// Access token for the provider (PAT or bot token).
    pub token: String,
    /// Per-request timeout; `None` leaves requests unbounded.
    pub timeout: Option<Duration>,
}

/// Everything the orchestrator needs from the source-control server.
///
/// Listing calls never fail: they degrade to an empty list and log.
#[allow(async_fn_in_trait)]
pub trait ReviewSource {
    async fn current_identity(&self) -> MrResult<Identity>;
    async fn merge_request(&self, project: &str, iid: u64) -> MrResult<MergeRequest>;
    async fn open_merge_requests(&self, project: &str) -> Vec<MergeRequest>;
    async fn pending_reviews(&self) -> Vec<MergeRequest>;
    async fn changes(&self, mr: &MergeRequest) -> MrResult<Vec<Change>>;
    async fn post_comment(&self, mr: &MergeRequest, body: &str) -> MrResult<()>;
}

/// Concrete provider client (enum-dispatch).
#[derive(Debug, Clone)]
pub enum ProviderClient {
    GitLab(gitlab::GitLabClient),
}

impl ProviderClient {
    /// Constructs a concrete client from generic config.
    pub fn from_config(cfg: ProviderConfig) -> MrResult<Self> {
        debug!(
            "Initializing provider client: kind={:?}, base_api={}",
            cfg.kind, cfg.base_api
        );

        let mut builder = reqwest::Client::builder().user_agent("mr-reviewer/0.1");
        if let Some(timeout) = cfg.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(match cfg.kind {
            ProviderKind::GitLab => {
                Self::GitLab(gitlab::GitLabClient::new(client, cfg.base_api, cfg.token))
            }
        })
    }
}

impl ReviewSource for ProviderClient {
    async fn current_identity(&self) -> MrResult<Identity> {
        match self {
            Self::GitLab(c) => c.get_current_user().await,
        }
    }

    async fn merge_request(&self, project: &str, iid: u64) -> MrResult<MergeRequest> {
        match self {
            Self::GitLab(c) => c.get_merge_request(project, iid).await,
        }
    }

    async fn open_merge_requests(&self, project: &str) -> Vec<MergeRequest> {
        match self {
            Self::GitLab(c) => c.get_open_merge_requests(project).await,
        }
    }

    async fn pending_reviews(&self) -> Vec<MergeRequest> {
        match self {
            Self::GitLab(c) => c.get_pending_reviews().await,
        }
    }

    async fn changes(&self, mr: &MergeRequest) -> MrResult<Vec<Change>> {
        match self {
            Self::GitLab(c) => c.get_changes(mr).await,
        }
    }

    async fn post_comment(&self, mr: &MergeRequest, body: &str) -> MrResult<()> {
        match self {
            Self::GitLab(c) => c.post_note(mr, body).await,
        }
    }
}
