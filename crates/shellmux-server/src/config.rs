//! Manager configuration: TOML file + CLI overrides.

use serde::Deserialize;
use shellmux_core::{ShellmuxError, ShellmuxResult};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub manager: ManagerSection,
    #[serde(default)]
    pub session: SessionSection,
}

/// `[manager]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerSection {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            monitor_interval_secs: default_monitor_interval(),
        }
    }
}

/// `[session]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default = "default_rows")]
    pub rows: u16,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_read_chunk_bytes")]
    pub read_chunk_bytes: usize,
    #[serde(default = "default_io_backoff_ms")]
    pub io_backoff_ms: u64,
    #[serde(default = "default_terminate_grace_ms")]
    pub terminate_grace_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            shell: None,
            working_dir: None,
            max_history: default_max_history(),
            rows: default_rows(),
            cols: default_cols(),
            read_timeout_ms: default_read_timeout_ms(),
            read_chunk_bytes: default_read_chunk_bytes(),
            io_backoff_ms: default_io_backoff_ms(),
            terminate_grace_ms: default_terminate_grace_ms(),
        }
    }
}

fn default_max_sessions() -> usize {
    10
}
fn default_monitor_interval() -> u64 {
    5
}
fn default_max_history() -> usize {
    crate::session::history::DEFAULT_MAX_HISTORY
}
fn default_rows() -> u16 {
    24
}
fn default_cols() -> u16 {
    80
}
fn default_read_timeout_ms() -> u64 {
    100
}
fn default_read_chunk_bytes() -> usize {
    4096
}
fn default_io_backoff_ms() -> u64 {
    100
}
fn default_terminate_grace_ms() -> u64 {
    2000
}

/// The environment's interactive shell.
pub fn default_shell() -> String {
    if cfg!(windows) {
        "cmd.exe".to_string()
    } else {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }
}

/// Per-session knobs, resolved.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub shell: String,
    pub max_history: usize,
    pub rows: u16,
    pub cols: u16,
    /// Upper bound on one read-loop wait for output.
    pub read_timeout: Duration,
    pub read_chunk: usize,
    /// Pause after a read fault before retrying.
    pub io_backoff: Duration,
    /// How long `stop` waits for the process before giving up on it.
    pub terminate_grace: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_section(&SessionSection::default())
    }
}

impl SessionSettings {
    fn from_section(s: &SessionSection) -> Self {
        Self {
            shell: s.shell.clone().unwrap_or_else(default_shell),
            max_history: s.max_history,
            rows: s.rows,
            cols: s.cols,
            read_timeout: Duration::from_millis(s.read_timeout_ms),
            read_chunk: s.read_chunk_bytes,
            io_backoff: Duration::from_millis(s.io_backoff_ms),
            terminate_grace: Duration::from_millis(s.terminate_grace_ms),
        }
    }
}

/// Resolved manager configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub max_sessions: usize,
    pub monitor_interval: Duration,
    /// Where sessions start when the caller names no directory. `None`
    /// means the daemon's current directory.
    pub default_working_directory: Option<PathBuf>,
    pub session: SessionSettings,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            monitor_interval: Duration::from_secs(default_monitor_interval()),
            default_working_directory: None,
            session: SessionSettings::default(),
        }
    }
}

/// Values given on the command line; each wins over the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub max_sessions: Option<usize>,
    pub monitor_interval_secs: Option<u64>,
    pub shell: Option<String>,
    pub working_dir: Option<String>,
}

impl ManagerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    ///
    /// A missing file means defaults; an unreadable or malformed one is an
    /// error.
    pub fn load(config_path: Option<&Path>, overrides: &CliOverrides) -> ShellmuxResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    parse(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };
        Self::resolve(file_config, overrides)
    }

    /// Merge a parsed file with CLI overrides and validate the result.
    pub fn resolve(file: ConfigFile, overrides: &CliOverrides) -> ShellmuxResult<Self> {
        let mut session = SessionSettings::from_section(&file.session);
        if let Some(shell) = &overrides.shell {
            session.shell = shell.clone();
        }

        let working_dir = overrides
            .working_dir
            .clone()
            .or(file.session.working_dir)
            .map(|d| expand_tilde_str(&d));

        let config = Self {
            max_sessions: overrides
                .max_sessions
                .unwrap_or(file.manager.max_sessions),
            monitor_interval: Duration::from_secs(
                overrides
                    .monitor_interval_secs
                    .unwrap_or(file.manager.monitor_interval_secs),
            ),
            default_working_directory: working_dir,
            session,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ShellmuxResult<()> {
        if self.max_sessions == 0 {
            return Err(ShellmuxError::Config("max_sessions must be at least 1".into()));
        }
        if self.monitor_interval.is_zero() {
            return Err(ShellmuxError::Config(
                "monitor_interval_secs must be at least 1".into(),
            ));
        }
        if self.session.rows == 0 || self.session.cols == 0 {
            return Err(ShellmuxError::Config(format!(
                "terminal size {}x{} is invalid",
                self.session.rows, self.session.cols
            )));
        }
        if self.session.read_chunk == 0 {
            return Err(ShellmuxError::Config("read_chunk_bytes must be positive".into()));
        }
        if self.session.read_timeout.is_zero() {
            return Err(ShellmuxError::Config("read_timeout_ms must be positive".into()));
        }
        if self.session.shell.trim().is_empty() {
            return Err(ShellmuxError::Config("shell must not be empty".into()));
        }
        Ok(())
    }
}

fn parse(content: &str) -> ShellmuxResult<ConfigFile> {
    toml::from_str::<ConfigFile>(content)
        .map_err(|e| ShellmuxError::Config(format!("config parse error: {e}")))
}

/// Expand `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
