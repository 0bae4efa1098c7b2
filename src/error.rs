//! Error types for the remote execution service

use thiserror::Error;

/// Main error type for remote shell execution
#[derive(Debug, Error)]
pub enum ExecError {
    /// Malformed target URL or unsupported scheme
    #[error("invalid target: {0}")]
    Resource(String),

    /// Credential resolution or SSH auth failure
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Connect or open-shell failure
    #[error("transport error: {0}")]
    Connection(String),

    /// The remote shell dropped mid-command; recovered once via reconnect
    #[error("shell terminated")]
    Terminated,

    /// A run exceeded its timeout without matching a terminator
    #[error("command timeout after {0}ms")]
    Timeout(u64),

    /// Stdout matched an error fragment or missed every success fragment
    #[error("{0}")]
    Validation(String),

    /// A checked command left a non-zero `$?`
    #[error("exit code: {code}, command: {command}")]
    ExitCode { code: i32, command: String },

    /// An extraction rule failed to compile or apply
    #[error("extraction failed: {0}")]
    Extract(String),

    /// The facade received a request of the wrong shape
    #[error("unsupported request: {0}")]
    Dispatch(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH key parsing error
    #[error("SSH key error: {0}")]
    SshKey(String),
}

/// Result type alias using ExecError
pub type Result<T> = std::result::Result<T, ExecError>;

impl ExecError {
    /// Create a resource error from a string
    pub fn resource(msg: impl Into<String>) -> Self {
        ExecError::Resource(msg.into())
    }

    /// Create an authentication error from a string
    pub fn auth(msg: impl Into<String>) -> Self {
        ExecError::Authentication(msg.into())
    }

    /// Create a transport error from a string
    pub fn connection(msg: impl Into<String>) -> Self {
        ExecError::Connection(msg.into())
    }

    /// Create a validation error from a string
    pub fn validation(msg: impl Into<String>) -> Self {
        ExecError::Validation(msg.into())
    }

    /// Create a dispatch error from a string
    pub fn dispatch(msg: impl Into<String>) -> Self {
        ExecError::Dispatch(msg.into())
    }

    /// True when the error is the distinguished shell-terminated kind
    pub fn is_terminated(&self) -> bool {
        matches!(self, ExecError::Terminated)
    }
}
