//! Provider-agnostic data model for merge requests and their changes.

use serde::{Deserialize, Serialize};

/// Supported Git providers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProviderKind {
    GitLab,
}

/// A unique reference to a merge request inside a provider.
///
/// * `project` – GitLab numeric ID or "group/project".
/// * `iid`     – GitLab MR IID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequestId {
    pub project: String,
    pub iid: u64,
}

/// The authenticated user behind the API token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Snapshot of a merge request as fetched in one poll cycle.
///
/// Never mutated locally; a fresh value is fetched every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub id: ChangeRequestId,
    pub title: String,
    pub description: Option<String>,
    /// Head revision of the source branch; the idempotency key.
    pub sha: Option<String>,
    /// Set when the MR comes from a fork.
    pub source_project_id: Option<String>,
    pub state: Option<String>,
    pub web_url: Option<String>,
}

impl MergeRequest {
    /// Project that holds the source branch (the fork for forked MRs).
    pub fn source_project(&self) -> &str {
        self.source_project_id
            .as_deref()
            .unwrap_or(&self.id.project)
    }
}

/// One file's modification within a merge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub old_path: String,
    pub new_path: String,
    /// Unified diff fragment. Empty for new files the server did not diff.
    pub diff: String,
    pub new_file: bool,
    pub deleted_file: bool,
    pub renamed_file: bool,
    pub binary: bool,
}

impl Change {
    /// New non-binary file whose diff body the server left out.
    pub fn needs_reconstruction(&self) -> bool {
        self.new_file && self.diff.is_empty() && !self.binary
    }
}
