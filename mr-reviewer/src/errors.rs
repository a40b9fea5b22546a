//! Crate-wide error hierarchy for mr-reviewer.
//!
//! - Single root `Error` for all public functions.
//! - Provider-aware mapping (401→Unauthorized, 429→RateLimited, 5xx→Server, etc.).
//! - Agent failures are not errors here: the runner turns them into text.

use std::path::PathBuf;

use thiserror::Error;

/// Convenient alias for crate-wide results.
pub type MrResult<T> = Result<T, Error>;

/// Root error type for the mr-reviewer crate.
#[derive(Debug, Error)]
pub enum Error {
    /// GitLab API related failure (transport or decoding).
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Local history/artifact write failure.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Configuration problems (missing token, bad agent registry, etc.).
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Input validation errors (bad IDs, unsupported flavors, etc.).
    #[error("validation error: {0}")]
    Validation(String),
}

/// Provider-specific error used inside the source-control client.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Unauthorized (HTTP 401).
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden (HTTP 403).
    #[error("forbidden")]
    Forbidden,

    /// Not found (HTTP 404).
    #[error("not found")]
    NotFound,

    /// Rate limited (HTTP 429).
    #[error("rate limited")]
    RateLimited,

    /// Gateway/Server error (HTTP 5xx).
    #[error("server error: status {0}")]
    Server(u16),

    /// Other HTTP status (4xx/3xx) not covered above.
    #[error("http status error: {0}")]
    HttpStatus(u16),

    /// Timeout at transport level.
    #[error("timeout")]
    Timeout,

    /// Network/transport failure without status (DNS/connect/reset).
    #[error("network error: {0}")]
    Network(String),

    /// Response body did not have the expected shape.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ProviderError {
    /// `true` for the decode family, `false` for transport failures.
    pub fn is_decode(&self) -> bool {
        matches!(self, ProviderError::Decode(_))
    }
}

/// History / artifact persistence errors.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Configuration and setup errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable / flag is missing or empty.
    #[error("missing required setting: {0}")]
    MissingVar(&'static str),

    /// A number failed to parse (timeouts, intervals).
    #[error("invalid number in {var}: {reason}")]
    InvalidNumber {
        var: &'static str,
        reason: &'static str,
    },

    /// Agent command template without exactly one `{file_path}` placeholder.
    #[error("agent `{key}` has an invalid command template: {reason}")]
    InvalidAgentTemplate { key: String, reason: &'static str },

    /// Selected agent key is not in the registry.
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// Registry/selection left nothing to run.
    #[error("no review agent is enabled or selected")]
    NoActiveAgents,

    /// Agent registry file could not be read or parsed.
    #[error("agents file {}: {reason}", path.display())]
    AgentsFile { path: PathBuf, reason: String },
}

// ===== Conversions for `?` ergonomics =====

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Provider(ProviderError::from(e))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return ProviderError::Timeout;
        }
        if e.is_decode() {
            return ProviderError::Decode(e.to_string());
        }
        if let Some(status) = e.status() {
            let code = status.as_u16();
            return match code {
                401 => ProviderError::Unauthorized,
                403 => ProviderError::Forbidden,
                404 => ProviderError::NotFound,
                429 => ProviderError::RateLimited,
                500..=599 => ProviderError::Server(code),
                _ => ProviderError::HttpStatus(code),
            };
        }
        ProviderError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        ProviderError::Decode(e.to_string())
    }
}
