//! Processing history: last reviewed head sha per merge request (JSON on disk).
//!
//! Key: "{project_id}:{iid}" → sha. Layout: `<log_dir>/history.json`.
//!
//! The file is read once at startup and rewritten in full after every update.
//! There is no cross-process locking; one bot instance per log dir.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::errors::PersistenceError;
use crate::git_providers::MergeRequest;

pub const HISTORY_FILE_NAME: &str = "history.json";

/// Builds the history key for a merge request.
pub fn history_key(project: &str, iid: u64) -> String {
    format!("{project}:{iid}")
}

#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl HistoryStore {
    /// Loads the history at `path`.
    ///
    /// A missing file yields an empty store; an unreadable or corrupt one is
    /// logged and also yields an empty store.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read(&path).await {
            Ok(data) => match serde_json::from_slice::<BTreeMap<String, String>>(&data) {
                Ok(map) => map,
                Err(err) => {
                    warn!(path = %path.display(), %err, "Error loading history file; starting empty");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                warn!(path = %path.display(), %err, "Error reading history file; starting empty");
                BTreeMap::new()
            }
        };
        debug!(path = %path.display(), entries = entries.len(), "history loaded");
        Self { path, entries }
    }

    /// Convenience for `<dir>/history.json`.
    pub async fn load_in(dir: &Path) -> Self {
        Self::load(dir.join(HISTORY_FILE_NAME)).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true` iff an entry exists and equals the MR's current sha.
    ///
    /// An MR without a sha is never considered processed.
    pub fn is_processed(&self, mr: &MergeRequest) -> bool {
        let Some(current) = mr.sha.as_deref() else {
            return false;
        };
        self.last_reviewed_sha(&mr.id.project, mr.id.iid) == Some(current)
    }

    pub fn last_reviewed_sha(&self, project: &str, iid: u64) -> Option<&str> {
        self.entries
            .get(&history_key(project, iid))
            .map(String::as_str)
    }

    /// Records the MR's current sha and persists the whole map.
    ///
    /// Does nothing (and writes nothing) when the MR has no sha. On a write
    /// failure the in-memory entry is kept for the rest of the process.
    pub async fn mark_processed(&mut self, mr: &MergeRequest) -> Result<(), PersistenceError> {
        let Some(sha) = mr.sha.as_deref() else {
            debug!(project = %mr.id.project, iid = mr.id.iid, "no sha; history left untouched");
            return Ok(());
        };

        self.entries
            .insert(history_key(&mr.id.project, mr.id.iid), sha.to_string());
        self.persist().await
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes the map to a sibling temp file and renames it into place.
    async fn persist(&self) -> Result<(), PersistenceError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| PersistenceError::io(dir, e))?;
        }

        let json = serde_json::to_vec_pretty(&self.entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .await
            .map_err(|e| PersistenceError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| PersistenceError::io(&self.path, e))?;
        Ok(())
    }
}
