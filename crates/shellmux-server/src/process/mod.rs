//! Process capability: a shell attached to a pseudo-terminal.
//!
//! Sessions only ever talk to a [`Process`] through this trait, so the
//! session and manager logic runs unchanged against the portable-pty backed
//! [`PtyProcess`] and against the scripted fake used in tests.

pub mod pty;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use shellmux_core::ShellmuxResult;
use std::path::PathBuf;
use std::time::Duration;

pub use pty::{PtyProcess, PtySpawner};

/// Result of one bounded read attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes produced by the process.
    Data(Vec<u8>),
    /// Nothing arrived within the timeout. Not an error.
    Timeout,
    /// The process closed its output; no more data will follow.
    EndOfStream,
}

/// What to launch and how big the terminal is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub shell: String,
    pub working_directory: PathBuf,
    pub rows: u16,
    pub cols: u16,
}

/// A running interactive process.
///
/// Reads and writes use independent internal locks, so a pending read never
/// blocks input.
#[async_trait]
pub trait Process: Send + Sync {
    /// Wait at most `timeout` for output, returning at most `max_bytes`.
    async fn read(&self, max_bytes: usize, timeout: Duration) -> ShellmuxResult<ReadOutcome>;

    /// Write raw bytes to the process input.
    fn write(&self, data: &[u8]) -> ShellmuxResult<()>;

    fn set_window_size(&self, rows: u16, cols: u16) -> ShellmuxResult<()>;

    fn is_alive(&self) -> bool;

    /// OS process id, when the platform exposes one.
    fn pid(&self) -> Option<u32> {
        None
    }

    /// Ask the process to exit and wait for it, force-killing it once
    /// `grace` has elapsed. Returns once the process is gone.
    async fn terminate(&self, grace: Duration) -> ShellmuxResult<()>;
}

/// Creates processes for new sessions.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, request: &SpawnRequest) -> ShellmuxResult<Box<dyn Process>>;
}
