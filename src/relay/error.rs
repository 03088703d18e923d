use thiserror::Error;
use std::io;

/// Result type for relay operations
pub type RelayResult<T> = std::result::Result<T, RelayError>;

/// Errors that can occur while resolving, connecting to, or running commands on the remote host
#[derive(Error, Debug)]
pub enum RelayError {
    /// A required setting is missing, empty, or malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// The remote session could not be established
    #[error("Connection error: {0}")]
    Connection(String),

    /// The remote host presented a key that does not match the pinned fingerprint
    #[error("Host key mismatch: expected {expected}, got {presented}")]
    HostKeyMismatch { expected: String, presented: String },

    /// Reading the remote process output failed mid-stream
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote command exited with a non-zero status
    #[error("Remote command failed with exit code {exit_code}: {output}")]
    RemoteCommandFailure { exit_code: i32, output: String },

    /// A command argument is missing or out of bounds
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Create a new configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// Create a configuration error for a required key that is not set
    pub fn missing_field(key: &str) -> Self {
        Self::Config(format!("missing field: {}", key))
    }

    /// Create a new connection error
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection(reason.into())
    }

    /// Create a new transport error
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport(reason.into())
    }

    /// Create a new invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }

    /// Create a new internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }

    /// Whether the failure happened before a session existed
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::HostKeyMismatch { .. })
    }
}

impl From<toml::de::Error> for RelayError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}
