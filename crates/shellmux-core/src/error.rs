use thiserror::Error;

/// Errors produced by the shellmux session layer.
#[derive(Debug, Error)]
pub enum ShellmuxError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("max sessions ({max}) reached")]
    ResourceExhausted { max: usize },

    #[error("failed to spawn process: {0}")]
    ProcessSpawnFailure(String),

    #[error("invalid terminal size {rows}x{cols}")]
    InvalidResize { rows: i64, cols: i64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Other(String),
}

impl ShellmuxError {
    /// Stable, wire-facing name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            ShellmuxError::NotFound(_) => "not_found",
            ShellmuxError::ResourceExhausted { .. } => "resource_exhausted",
            ShellmuxError::ProcessSpawnFailure(_) => "process_spawn_failure",
            ShellmuxError::InvalidResize { .. } => "invalid_resize",
            ShellmuxError::Io(_) => "io_failure",
            ShellmuxError::Config(_) => "config",
            ShellmuxError::InvalidRequest(_) => "invalid_request",
            ShellmuxError::Other(_) => "other",
        }
    }

    /// Whether the caller may retry the same operation later and expect success.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ShellmuxError::ResourceExhausted { .. } | ShellmuxError::Io(_)
        )
    }
}

pub type ShellmuxResult<T> = Result<T, ShellmuxError>;
