//! On-disk audit trail: review inputs, agent results and the command log.
//!
//! Layout under the log dir:
//! - `project_<p>_mr_<iid>_<ts>_<sha8>_input.md`
//! - `project_<p>_mr_<iid>_<ts>_<sha8>_<agent>_result.md`
//! - `cmd.sh` (append-only: `# <timestamp>` + command line + blank line)
//!
//! Every write returns its own error so callers can log and carry on.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::errors::PersistenceError;
use crate::git_providers::MergeRequest;

pub const COMMAND_LOG_FILE_NAME: &str = "cmd.sh";

/// Time of one MR processing pass, shared by all its artifacts.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactStamp(DateTime<Local>);

impl ArtifactStamp {
    pub fn now() -> Self {
        Self(Local::now())
    }

    pub fn at(t: DateTime<Local>) -> Self {
        Self(t)
    }

    fn file_part(&self) -> String {
        self.0.format("%Y%m%d_%H%M%S").to_string()
    }

    fn log_line(&self) -> String {
        self.0.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub async fn ensure_dir(&self) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PersistenceError::io(&self.dir, e))
    }

    pub fn input_path(&self, mr: &MergeRequest, stamp: &ArtifactStamp) -> PathBuf {
        self.dir.join(format!("{}_input.md", base_name(mr, stamp)))
    }

    pub fn result_path(&self, mr: &MergeRequest, stamp: &ArtifactStamp, agent_key: &str) -> PathBuf {
        self.dir.join(format!(
            "{}_{}_result.md",
            base_name(mr, stamp),
            sanitize(agent_key)
        ))
    }

    pub fn command_log_path(&self) -> PathBuf {
        self.dir.join(COMMAND_LOG_FILE_NAME)
    }

    /// Writes (or replaces) one artifact file.
    pub async fn write(&self, path: &Path, content: &str) -> Result<(), PersistenceError> {
        fs::write(path, content)
            .await
            .map_err(|e| PersistenceError::io(path, e))?;
        debug!(path = %path.display(), len = content.len(), "artifact written");
        Ok(())
    }

    /// Appends one audit record to `cmd.sh`.
    pub async fn append_command(
        &self,
        stamp: &ArtifactStamp,
        command_line: &str,
    ) -> Result<(), PersistenceError> {
        let path = self.command_log_path();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| PersistenceError::io(&path, e))?;

        let record = format!("# {}\n{}\n\n", stamp.log_line(), command_line);
        file.write_all(record.as_bytes())
            .await
            .map_err(|e| PersistenceError::io(&path, e))?;
        file.flush()
            .await
            .map_err(|e| PersistenceError::io(&path, e))?;
        Ok(())
    }
}

fn base_name(mr: &MergeRequest, stamp: &ArtifactStamp) -> String {
    let sha = mr
        .sha
        .as_deref()
        .map(|s| s.chars().take(8).collect::<String>())
        .unwrap_or_else(|| "nosha".to_string());
    format!(
        "project_{}_mr_{}_{}_{}",
        sanitize(&mr.id.project),
        mr.id.iid,
        stamp.file_part(),
        sanitize(&sha)
    )
}

/// Filesystem-safe replacement for path-like segments.
fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git_providers::ChangeRequestId;
    use chrono::TimeZone;

    fn mr(project: &str, sha: Option<&str>) -> MergeRequest {
        MergeRequest {
            id: ChangeRequestId {
                project: project.into(),
                iid: 7,
            },
            title: "t".into(),
            description: None,
            sha: sha.map(str::to_string),
            source_project_id: None,
            state: None,
            web_url: None,
        }
    }

    fn stamp() -> ArtifactStamp {
        ArtifactStamp::at(Local.with_ymd_and_hms(2026, 3, 1, 9, 5, 7).unwrap())
    }

    #[test]
    fn names_carry_ids_timestamp_and_sha() {
        let store = ArtifactStore::new("reviews");
        let m = mr("group/app", Some("abc123def456"));
        assert_eq!(
            store.input_path(&m, &stamp()),
            Path::new("reviews/project_group_app_mr_7_20260301_090507_abc123de_input.md")
        );
        assert_eq!(
            store.result_path(&mr("42", None), &stamp(), "codex"),
            Path::new("reviews/project_42_mr_7_20260301_090507_nosha_codex_result.md")
        );
    }

    #[tokio::test]
    async fn command_log_is_append_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        store.append_command(&stamp(), "codex exec a.md").await.unwrap();
        store.append_command(&stamp(), "codex exec b.md").await.unwrap();

        let log = std::fs::read_to_string(store.command_log_path()).unwrap();
        assert_eq!(
            log,
            "# 2026-03-01 09:05:07.000000\ncodex exec a.md\n\n\
             # 2026-03-01 09:05:07.000000\ncodex exec b.md\n\n"
        );
    }

    #[tokio::test]
    async fn write_reports_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("missing"));
        let path = store.input_path(&mr("42", Some("abc")), &stamp());

        let err = store.write(&path, "x").await.unwrap_err();
        assert!(matches!(err, PersistenceError::Io { .. }));
    }
}
