//! Runtime configuration: environment first, CLI flags override.
//!
//! Env vars:
//! - `GITLAB_URL`, `GITLAB_TOKEN` (required after overrides)
//! - `REVIEW_LOG_DIR` (default `reviews`)
//! - `REVIEW_PROMPT_FILE`, `REVIEW_AGENTS_FILE`
//! - `REVIEW_AGENT_TIMEOUT_SECS` (unset or `0` = no timeout)
//! - `REVIEW_HTTP_TIMEOUT_SECS` (default 30, `0` = no timeout)

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;
use crate::git_providers::{ProviderConfig, ProviderKind};
use crate::review::agent::{AgentConfig, AgentRegistry};

pub const DEFAULT_LOG_DIR: &str = "reviews";
pub const DEFAULT_PROMPT_FILE: &str = "prompt.md";
pub const DEFAULT_CODEX_PATH: &str = "codex";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewerConfig {
    /// Instance root, e.g. "https://gitlab.example.com".
    pub gitlab_url: String,
    pub gitlab_token: String,
    /// Where history, artifacts and `cmd.sh` live.
    pub log_dir: PathBuf,
    pub prompt_file: Option<PathBuf>,
    /// TOML agent registry; the built-in Codex agent when unset.
    pub agents_file: Option<PathBuf>,
    /// Program used by the built-in Codex agent.
    pub codex_path: String,
    /// Explicit agent keys; empty means "all enabled".
    pub agent_selection: Vec<String>,
    pub agent_timeout: Option<Duration>,
    pub http_timeout: Option<Duration>,
}

impl Default for ReviewerConfig {
    fn default() -> Self {
        Self {
            gitlab_url: String::new(),
            gitlab_token: String::new(),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            prompt_file: None,
            agents_file: None,
            codex_path: DEFAULT_CODEX_PATH.to_string(),
            agent_selection: Vec::new(),
            agent_timeout: None,
            http_timeout: Some(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS)),
        }
    }
}

impl ReviewerConfig {
    /// Reads the process environment. Required values are checked later by
    /// [`ReviewerConfig::validate`] so CLI flags can still fill them in.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`ReviewerConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = env_opt(&lookup, "GITLAB_URL") {
            cfg.gitlab_url = v;
        }
        if let Some(v) = env_opt(&lookup, "GITLAB_TOKEN") {
            cfg.gitlab_token = v;
        }
        if let Some(v) = env_opt(&lookup, "REVIEW_LOG_DIR") {
            cfg.log_dir = PathBuf::from(v);
        }
        cfg.prompt_file = env_opt(&lookup, "REVIEW_PROMPT_FILE").map(PathBuf::from);
        cfg.agents_file = env_opt(&lookup, "REVIEW_AGENTS_FILE").map(PathBuf::from);
        cfg.agent_timeout =
            env_opt_u64(&lookup, "REVIEW_AGENT_TIMEOUT_SECS")?.and_then(timeout_from_secs);
        if let Some(secs) = env_opt_u64(&lookup, "REVIEW_HTTP_TIMEOUT_SECS")? {
            cfg.http_timeout = timeout_from_secs(secs);
        }

        Ok(cfg)
    }

    /// Fails on an empty URL or token.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gitlab_url.trim().is_empty() {
            return Err(ConfigError::MissingVar("GITLAB_URL"));
        }
        if self.gitlab_token.trim().is_empty() {
            return Err(ConfigError::MissingVar("GITLAB_TOKEN"));
        }
        Ok(())
    }

    /// REST base: `<gitlab_url>/api/v4`.
    pub fn api_base(&self) -> String {
        format!("{}/api/v4", self.gitlab_url.trim().trim_end_matches('/'))
    }

    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            kind: ProviderKind::GitLab,
            base_api: self.api_base(),
            token: self.gitlab_token.trim().to_string(),
            timeout: self.http_timeout,
        }
    }

    /// Explicit prompt file, else `prompt.md` in the working dir if present.
    pub fn resolved_prompt_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.prompt_file {
            return Some(path.clone());
        }
        let fallback = Path::new(DEFAULT_PROMPT_FILE);
        fallback.is_file().then(|| fallback.to_path_buf())
    }

    pub fn agent_registry(&self) -> Result<AgentRegistry, ConfigError> {
        match &self.agents_file {
            Some(path) => AgentRegistry::from_toml_file(path),
            None => Ok(AgentRegistry::builtin(&self.codex_path)),
        }
    }

    /// Ordered agents to run for every MR; never empty.
    pub fn active_agents(&self) -> Result<Vec<AgentConfig>, ConfigError> {
        let active = self
            .agent_registry()?
            .resolve_active(&self.agent_selection)?;
        if active.is_empty() {
            return Err(ConfigError::NoActiveAgents);
        }
        Ok(active)
    }
}

/// `0` disables the timeout.
pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn env_opt<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).filter(|v| !v.trim().is_empty())
}

fn env_opt_u64<F>(lookup: &F, name: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match env_opt(lookup, name) {
        Some(v) => v
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber {
                var: name,
                reason: "expected a non-negative integer",
            }),
        None => Ok(None),
    }
}
