//! External review agents: registry, command rendering and subprocess runner.
//!
//! An agent is a command template with a single `{file_path}` placeholder.
//! The runner never fails: every execution problem comes back as text so the
//! pipeline can post it like any other review.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::ConfigError;

/// Placeholder substituted with the review input path.
pub const FILE_PATH_PLACEHOLDER: &str = "{file_path}";

/// Static descriptor of one review agent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentConfig {
    /// Stable identifier used for CLI selection and artifact names.
    pub key: String,
    /// Display name used in the posted comment header.
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(rename = "command")]
    pub command_template: String,
}

fn default_enabled() -> bool {
    true
}

impl AgentConfig {
    pub fn new(key: &str, name: &str, enabled: bool, command_template: &str) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            enabled,
            command_template: command_template.to_string(),
        }
    }

    /// Substitutes the placeholder with the literal path.
    pub fn render_command(&self, file_path: &Path) -> String {
        self.command_template
            .replace(FILE_PATH_PLACEHOLDER, &file_path.to_string_lossy())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.command_template.matches(FILE_PATH_PLACEHOLDER).count() {
            1 => Ok(()),
            0 => Err(ConfigError::InvalidAgentTemplate {
                key: self.key.clone(),
                reason: "missing {file_path} placeholder",
            }),
            _ => Err(ConfigError::InvalidAgentTemplate {
                key: self.key.clone(),
                reason: "more than one {file_path} placeholder",
            }),
        }
    }
}

/// Raw output of one agent for one merge request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentResult {
    pub agent_key: String,
    pub agent_name: String,
    pub output: String,
}

/// Ordered set of known agents, built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRegistry {
    agents: Vec<AgentConfig>,
}

#[derive(Debug, Deserialize)]
struct AgentsFile {
    #[serde(default)]
    agents: Vec<AgentConfig>,
}

impl AgentRegistry {
    pub fn new(agents: Vec<AgentConfig>) -> Result<Self, ConfigError> {
        for agent in &agents {
            agent.validate()?;
        }
        Ok(Self { agents })
    }

    /// The default registry: Codex CLI only, enabled.
    pub fn builtin(codex_path: &str) -> Self {
        let program = shlex::try_quote(codex_path)
            .map(|q| q.into_owned())
            .unwrap_or_else(|_| codex_path.to_string());
        Self {
            agents: vec![AgentConfig::new(
                "codex",
                "Codex",
                true,
                &format!("{program} exec {FILE_PATH_PLACEHOLDER} --skip-git-repo-check"),
            )],
        }
    }

    /// Parses `[[agents]]` tables (`key`, `name`, `enabled`, `command`).
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let parsed: AgentsFile = toml::from_str(src).map_err(|e| ConfigError::AgentsFile {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        Self::new(parsed.agents)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path).map_err(|e| ConfigError::AgentsFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&src).map_err(|e| match e {
            ConfigError::AgentsFile { reason, .. } => ConfigError::AgentsFile {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    pub fn get(&self, key: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.key == key)
    }

    pub fn agents(&self) -> &[AgentConfig] {
        &self.agents
    }

    /// Resolves the agents to run, in registry order.
    ///
    /// With an explicit selection only those keys run (enabled flag ignored);
    /// otherwise every enabled agent runs.
    pub fn resolve_active(&self, selection: &[String]) -> Result<Vec<AgentConfig>, ConfigError> {
        if selection.is_empty() {
            return Ok(self.agents.iter().filter(|a| a.enabled).cloned().collect());
        }

        if let Some(unknown) = selection.iter().find(|k| self.get(k).is_none()) {
            return Err(ConfigError::UnknownAgent(unknown.clone()));
        }
        Ok(self
            .agents
            .iter()
            .filter(|a| selection.iter().any(|k| k == &a.key))
            .cloned()
            .collect())
    }
}

/// Runs one agent against a prepared input file.
#[allow(async_fn_in_trait)]
pub trait AgentRunner {
    /// Returns the agent's stdout, or a descriptive error text.
    async fn run_against_file(&self, agent: &AgentConfig, file_path: &Path) -> String;
}

/// Spawns the agent's command line as a subprocess.
#[derive(Debug, Clone, Default)]
pub struct CommandAgentRunner {
    /// `None` waits for the agent indefinitely.
    pub timeout: Option<Duration>,
}

impl CommandAgentRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl AgentRunner for CommandAgentRunner {
    async fn run_against_file(&self, agent: &AgentConfig, file_path: &Path) -> String {
        let command_line = agent.render_command(file_path);
        debug!(agent = %agent.key, command = %command_line, "running agent");
        run_command_line(&command_line, self.timeout).await
    }
}

/// Tokenizes a shell-style command line and runs it, capturing stdout.
pub async fn run_command_line(command_line: &str, timeout: Option<Duration>) -> String {
    let Some(args) = shlex::split(command_line) else {
        return format!("Error: could not parse agent command: {command_line}");
    };
    let Some((program, rest)) = args.split_first() else {
        return format!("Error: Command not found in: {command_line}");
    };

    let mut cmd = Command::new(program);
    cmd.args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
            Ok(res) => res,
            Err(_) => {
                warn!(program = %program, ?limit, "agent timed out");
                return format!("Error: agent timed out after {limit:?}");
            }
        },
        None => cmd.output().await,
    };

    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).into_owned(),
        Ok(out) => {
            warn!(program = %program, status = %out.status, "agent exited with failure");
            format!(
                "Error running agent: {}",
                String::from_utf8_lossy(&out.stderr)
            )
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(program = %program, "agent executable not found");
            format!("Error: Command not found in: {program}")
        }
        Err(err) => {
            warn!(program = %program, %err, "agent failed to run");
            format!("Error: {err}")
        }
    }
}
