//! Error types for the session host

use thiserror::Error;

/// Result type for session host operations
pub type Result<T> = std::result::Result<T, HostError>;

/// Session host error types
#[derive(Debug, Error)]
pub enum HostError {
    /// Orchestration agent could not be reached
    #[error("Orchestration agent unavailable: {0}")]
    AgentUnavailable(String),

    /// A required key was absent from the agent configuration
    #[error("Cannot find {0} in agent config settings")]
    MissingConfigKey(String),

    /// The configured port could not be parsed
    #[error("Invalid port {value:?} for key {key}")]
    InvalidPort { key: String, value: String },

    /// Listening socket could not be bound
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Filesystem or socket error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Match membership lookup failed
    #[error("Match lookup failed: {0}")]
    MatchLookup(String),

    /// Certificate store lookup failed
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Agent rejected or failed an operation
    #[error("Agent error: {0}")]
    Agent(String),
}

impl From<serde_json::Error> for HostError {
    fn from(err: serde_json::Error) -> Self {
        HostError::Serialization(err.to_string())
    }
}

impl HostError {
    /// Whether this error must stop startup before the listener serves
    pub fn is_fatal_startup(&self) -> bool {
        matches!(
            self,
            HostError::AgentUnavailable(_)
                | HostError::MissingConfigKey(_)
                | HostError::InvalidPort { .. }
                | HostError::Bind { .. }
        )
    }
}
