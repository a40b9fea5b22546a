//! GitLab provider (REST v4) for identity, MR listing, changes and notes.
//!
//! Endpoints used:
//! - GET  /user
//! - GET  /projects/:id/merge_requests/:iid
//! - GET  /projects/:id/merge_requests?state=opened
//! - GET  /merge_requests?scope=all&state=opened&reviewer_id=:id
//! - GET  /projects/:id/merge_requests/:iid/changes
//! - GET  /projects/:id/repository/files/:path/raw?ref=:ref
//! - POST /projects/:id/merge_requests/:iid/notes

use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, info, warn};

use crate::errors::{MrResult, ProviderError};
use crate::git_providers::types::*;

#[derive(Debug, Clone)]
pub struct GitLabClient {
    http: Client,
    base_api: String, // e.g. "https://gitlab.com/api/v4"
    token: String,    // "PRIVATE-TOKEN"
}

impl GitLabClient {
    /// Constructs a GitLab client with a shared reqwest instance and auth token.
    pub fn new(http: Client, base_api: String, token: String) -> Self {
        debug!("Creating GitLabClient with base_api={}", base_api);
        Self {
            http,
            base_api: base_api.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Fetches the user the token belongs to.
    pub async fn get_current_user(&self) -> MrResult<Identity> {
        let url = format!("{}/user", self.base_api);
        debug!("GitLab get_current_user: {}", url);
        let user: Identity = self.get_json(self.http.get(url)).await?;
        Ok(user)
    }

    /// Fetches a single merge request.
    pub async fn get_merge_request(&self, project: &str, iid: u64) -> MrResult<MergeRequest> {
        let url = format!(
            "{}/projects/{}/merge_requests/{}",
            self.base_api,
            urlencoding::encode(project),
            iid
        );
        debug!("GitLab get_merge_request: {}", url);
        let raw: GitLabMr = self.get_json(self.http.get(url)).await?;
        Ok(raw.into())
    }

    /// Lists open merge requests of a project.
    ///
    /// Transport or decode failures are logged and yield an empty list.
    pub async fn get_open_merge_requests(&self, project: &str) -> Vec<MergeRequest> {
        let url = format!(
            "{}/projects/{}/merge_requests",
            self.base_api,
            urlencoding::encode(project)
        );
        debug!("GitLab get_open_merge_requests: {}", url);
        let req = self.http.get(url).query(&[("state", "opened")]);
        match self.get_json::<Vec<GitLabMr>>(req).await {
            Ok(list) => list.into_iter().map(MergeRequest::from).collect(),
            Err(err) => {
                warn!(project = %project, %err, "Error fetching open MRs; treating as empty");
                Vec::new()
            }
        }
    }

    /// Lists open merge requests (all projects) where the token's user is a reviewer.
    ///
    /// Same degrade-to-empty policy as [`Self::get_open_merge_requests`],
    /// including a failed identity lookup.
    pub async fn get_pending_reviews(&self) -> Vec<MergeRequest> {
        let user = match self.get_current_user().await {
            Ok(u) => u,
            Err(err) => {
                warn!(%err, "Error resolving current user for pending reviews");
                return Vec::new();
            }
        };

        let url = format!("{}/merge_requests", self.base_api);
        debug!("GitLab get_pending_reviews: {} reviewer_id={}", url, user.id);
        let reviewer_id = user.id.to_string();
        let req = self.http.get(url).query(&[
            ("scope", "all"),
            ("state", "opened"),
            ("reviewer_id", reviewer_id.as_str()),
        ]);
        match self.get_json::<Vec<GitLabMr>>(req).await {
            Ok(list) => list.into_iter().map(MergeRequest::from).collect(),
            Err(err) => {
                warn!(%err, "Error fetching pending reviews; treating as empty");
                Vec::new()
            }
        }
    }

    /// Fetches the changed files of a merge request.
    ///
    /// New text files whose diff came back empty get a synthesized all-added
    /// diff built from their raw content at the MR head.
    pub async fn get_changes(&self, mr: &MergeRequest) -> MrResult<Vec<Change>> {
        let url = format!(
            "{}/projects/{}/merge_requests/{}/changes",
            self.base_api,
            urlencoding::encode(&mr.id.project),
            mr.id.iid
        );
        debug!("GitLab get_changes: {}", url);
        let raw: GitLabMrChanges = self.get_json(self.http.get(url)).await?;

        let mut changes: Vec<Change> = raw.changes.into_iter().map(Change::from).collect();
        for change in changes.iter_mut().filter(|c| c.needs_reconstruction()) {
            let Some(sha) = mr.sha.as_deref() else {
                debug!(path = %change.new_path, "no head sha; cannot fetch new file content");
                continue;
            };

            info!(path = %change.new_path, "Fetching raw content for new file");
            match self
                .get_file_raw(mr.source_project(), &change.new_path, sha)
                .await
            {
                Some(content) if !content.is_empty() => {
                    change.diff = reconstruct_new_file_diff(&content);
                }
                _ => {
                    info!(path = %change.new_path, "Skipping binary or undecodable content");
                }
            }
        }

        Ok(changes)
    }

    /// Fetches a file at a ref and decodes it as UTF-8.
    ///
    /// Returns `None` when the file is missing, the call fails, or the bytes
    /// are not valid UTF-8.
    pub async fn get_file_raw(
        &self,
        project: &str,
        repo_relative_path: &str,
        git_ref: &str,
    ) -> Option<String> {
        let url = format!(
            "{}/projects/{}/repository/files/{}/raw",
            self.base_api,
            urlencoding::encode(project),
            urlencoding::encode(repo_relative_path),
        );
        debug!("GitLab get_file_raw: {} ref={}", url, git_ref);

        let resp = match self
            .http
            .get(url)
            .query(&[("ref", git_ref)])
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
        {
            Ok(r) => r,
            Err(err) => {
                warn!(path = %repo_relative_path, %err, "GitLab raw file request failed");
                return None;
            }
        };

        if resp.status().as_u16() == 404 {
            debug!("GitLab file not found at given ref");
            return None;
        }

        let bytes = match resp.error_for_status() {
            Ok(r) => match r.bytes().await {
                Ok(b) => b,
                Err(err) => {
                    warn!(path = %repo_relative_path, %err, "GitLab raw file body read failed");
                    return None;
                }
            },
            Err(err) => {
                warn!(path = %repo_relative_path, %err, "GitLab raw file request failed");
                return None;
            }
        };

        match String::from_utf8(bytes.to_vec()) {
            Ok(s) => Some(s),
            Err(_) => {
                warn!(path = %repo_relative_path, "Failed to decode content as UTF-8; treating as binary");
                None
            }
        }
    }

    /// Posts a general note on the merge request.
    pub async fn post_note(&self, mr: &MergeRequest, body: &str) -> MrResult<()> {
        let url = format!(
            "{}/projects/{}/merge_requests/{}/notes",
            self.base_api,
            urlencoding::encode(&mr.id.project),
            mr.id.iid
        );
        debug!("GitLab post_note: {} len={}", url, body.len());

        self.http
            .post(url)
            .header("PRIVATE-TOKEN", &self.token)
            .json(&GitLabNoteCreate { body })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Sends an authenticated request and decodes the JSON body.
    async fn get_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ProviderError> {
        let body = req
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Turns the full content of a new file into an all-added diff body.
///
/// `"a\nb\n"` becomes `"+a\n+b"`: one `+` per line, joined by newlines,
/// nothing appended. `\n`, `\r\n` and a lone `\r` all end a line; Unicode
/// separators (U+2028, U+0085, ...) stay inside the line.
pub fn reconstruct_new_file_diff(content: &str) -> String {
    content
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .lines()
        .map(|line| format!("+{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// --- GitLab response shapes (subset of fields we actually use) ---

#[derive(Debug, Deserialize)]
struct GitLabMr {
    project_id: u64,
    iid: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    sha: Option<String>,
    #[serde(default)]
    source_project_id: Option<u64>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    web_url: Option<String>,
}

impl From<GitLabMr> for MergeRequest {
    fn from(raw: GitLabMr) -> Self {
        MergeRequest {
            id: ChangeRequestId {
                project: raw.project_id.to_string(),
                iid: raw.iid,
            },
            title: raw.title,
            description: raw.description,
            sha: raw.sha.filter(|s| !s.is_empty()),
            source_project_id: raw.source_project_id.map(|p| p.to_string()),
            state: raw.state,
            web_url: raw.web_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitLabMrChanges {
    #[serde(default)]
    changes: Vec<GitLabChange>,
}

#[derive(Debug, Deserialize)]
struct GitLabChange {
    #[serde(default)]
    old_path: String,
    new_path: String,
    #[serde(default)]
    diff: Option<String>,
    #[serde(default)]
    new_file: bool,
    #[serde(default)]
    renamed_file: bool,
    #[serde(default)]
    deleted_file: bool,
    #[serde(default)]
    binary: bool,
}

impl From<GitLabChange> for Change {
    fn from(raw: GitLabChange) -> Self {
        Change {
            old_path: raw.old_path,
            new_path: raw.new_path,
            diff: raw.diff.unwrap_or_default(),
            new_file: raw.new_file,
            deleted_file: raw.deleted_file,
            renamed_file: raw.renamed_file,
            binary: raw.binary,
        }
    }
}

#[derive(Debug, Serialize)]
struct GitLabNoteCreate<'a> {
    body: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server, ServerGuard};
    use serde_json::json;

    const TOKEN: &str = "test_token";

    fn client_for(server: &ServerGuard) -> GitLabClient {
        GitLabClient::new(
            Client::new(),
            format!("{}/api/v4", server.url()),
            TOKEN.to_string(),
        )
    }

    fn mr(sha: Option<&str>, source_project_id: Option<&str>) -> MergeRequest {
        MergeRequest {
            id: ChangeRequestId {
                project: "42".into(),
                iid: 7,
            },
            title: "Add feature".into(),
            description: None,
            sha: sha.map(str::to_string),
            source_project_id: source_project_id.map(str::to_string),
            state: Some("opened".into()),
            web_url: None,
        }
    }

    #[test]
    fn reconstructs_added_lines_without_trailing_newline() {
        assert_eq!(reconstruct_new_file_diff("a\nb\n"), "+a\n+b");
        assert_eq!(reconstruct_new_file_diff("single"), "+single");
        assert_eq!(reconstruct_new_file_diff("x\n\ny"), "+x\n+\n+y");
    }

    #[test]
    fn reconstruction_splits_on_every_line_ending() {
        assert_eq!(reconstruct_new_file_diff("a\r\nb\r\n"), "+a\n+b");
        assert_eq!(reconstruct_new_file_diff("a\rb\r"), "+a\n+b");
        assert_eq!(reconstruct_new_file_diff("a\r\rb"), "+a\n+\n+b");
    }

    #[tokio::test]
    async fn decodes_current_user() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/api/v4/user")
            .match_header("PRIVATE-TOKEN", TOKEN)
            .with_status(200)
            .with_body(json!({"id": 99, "username": "review-bot", "name": "Bot"}).to_string())
            .create_async()
            .await;

        let user = client_for(&server).get_current_user().await.unwrap();
        assert_eq!(user.id, 99);
        assert_eq!(user.username, "review-bot");
        m.assert_async().await;
    }

    #[tokio::test]
    async fn single_fetch_propagates_transport_and_decode_errors() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/v4/projects/42/merge_requests/7")
            .with_status(401)
            .create_async()
            .await;
        server
            .mock("GET", "/api/v4/projects/42/merge_requests/8")
            .with_status(200)
            .with_body("<html>not json</html>")
            .create_async()
            .await;
        server
            .mock("GET", "/api/v4/projects/42/merge_requests/9")
            .with_status(429)
            .with_header("Retry-After", "30")
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client.get_merge_request("42", 7).await.unwrap_err();
        assert!(matches!(
            err,
            crate::errors::Error::Provider(ProviderError::Unauthorized)
        ));

        let err = client.get_merge_request("42", 8).await.unwrap_err();
        match err {
            crate::errors::Error::Provider(p) => assert!(p.is_decode()),
            other => panic!("unexpected error: {other:?}"),
        }

        let err = client.get_merge_request("42", 9).await.unwrap_err();
        assert!(matches!(
            err,
            crate::errors::Error::Provider(ProviderError::RateLimited)
        ));
    }

    #[tokio::test]
    async fn open_merge_requests_degrade_to_empty_on_malformed_body() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/v4/projects/42/merge_requests")
            .match_query(Matcher::UrlEncoded("state".into(), "opened".into()))
            .with_status(200)
            .with_body(json!({"message": "404 Project Not Found"}).to_string())
            .create_async()
            .await;

        let mrs = client_for(&server).get_open_merge_requests("42").await;
        assert!(mrs.is_empty());
    }

    #[tokio::test]
    async fn pending_reviews_filter_by_current_user() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/v4/user")
            .with_status(200)
            .with_body(json!({"id": 99, "username": "review-bot"}).to_string())
            .create_async()
            .await;
        let list = server
            .mock("GET", "/api/v4/merge_requests")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("scope".into(), "all".into()),
                Matcher::UrlEncoded("state".into(), "opened".into()),
                Matcher::UrlEncoded("reviewer_id".into(), "99".into()),
            ]))
            .with_status(200)
            .with_body(
                json!([
                    {"project_id": 42, "iid": 7, "title": "A", "sha": "abc123"},
                    {"project_id": 5, "iid": 1, "title": "B", "description": "d", "sha": null}
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let mrs = client_for(&server).get_pending_reviews().await;
        list.assert_async().await;
        assert_eq!(mrs.len(), 2);
        assert_eq!(mrs[0].id.project, "42");
        assert_eq!(mrs[0].sha.as_deref(), Some("abc123"));
        assert_eq!(mrs[1].sha, None);
        assert_eq!(mrs[1].description.as_deref(), Some("d"));
    }

    #[tokio::test]
    async fn pending_reviews_empty_when_identity_fails() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/v4/user")
            .with_status(500)
            .create_async()
            .await;

        assert!(client_for(&server).get_pending_reviews().await.is_empty());
    }

    #[tokio::test]
    async fn reconstructs_new_file_from_source_project_at_head() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/v4/projects/42/merge_requests/7/changes")
            .with_status(200)
            .with_body(
                json!({"changes": [
                    {"old_path": "foo.py", "new_path": "foo.py", "diff": "@@ -1 +1 @@\n-a\n+b\n", "new_file": false},
                    {"old_path": "new.py", "new_path": "new.py", "diff": "", "new_file": true}
                ]})
                .to_string(),
            )
            .create_async()
            .await;
        let raw = server
            .mock("GET", "/api/v4/projects/100/repository/files/new.py/raw")
            .match_query(Matcher::UrlEncoded("ref".into(), "abc123".into()))
            .with_status(200)
            .with_body("a\nb\n")
            .create_async()
            .await;

        let changes = client_for(&server)
            .get_changes(&mr(Some("abc123"), Some("100")))
            .await
            .unwrap();

        raw.assert_async().await;
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].diff, "@@ -1 +1 @@\n-a\n+b\n");
        assert_eq!(changes[1].diff, "+a\n+b");
    }

    #[tokio::test]
    async fn binary_new_file_is_never_reconstructed() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/v4/projects/42/merge_requests/7/changes")
            .with_status(200)
            .with_body(
                json!({"changes": [
                    {"old_path": "logo.png", "new_path": "logo.png", "diff": "", "new_file": true, "binary": true}
                ]})
                .to_string(),
            )
            .create_async()
            .await;
        let raw = server
            .mock("GET", Matcher::Regex(r"^/api/v4/projects/.*/raw$".into()))
            .expect(0)
            .create_async()
            .await;

        let changes = client_for(&server)
            .get_changes(&mr(Some("abc123"), None))
            .await
            .unwrap();

        raw.assert_async().await;
        assert_eq!(changes[0].diff, "");
    }

    #[tokio::test]
    async fn undecodable_raw_content_leaves_diff_empty() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/v4/projects/42/merge_requests/7/changes")
            .with_status(200)
            .with_body(
                json!({"changes": [
                    {"old_path": "blob.bin", "new_path": "blob.bin", "diff": null, "new_file": true}
                ]})
                .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("GET", "/api/v4/projects/42/repository/files/blob.bin/raw")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(vec![0xff, 0xfe, 0x00, 0x81])
            .create_async()
            .await;

        let changes = client_for(&server)
            .get_changes(&mr(Some("abc123"), None))
            .await
            .unwrap();
        assert_eq!(changes[0].diff, "");
    }

    #[tokio::test]
    async fn posts_note_body() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/api/v4/projects/42/merge_requests/7/notes")
            .match_header("PRIVATE-TOKEN", TOKEN)
            .match_body(Matcher::Json(json!({"body": "hello"})))
            .with_status(201)
            .with_body(json!({"id": 1}).to_string())
            .create_async()
            .await;

        client_for(&server)
            .post_note(&mr(Some("abc123"), None), "hello")
            .await
            .unwrap();
        m.assert_async().await;
    }
}
