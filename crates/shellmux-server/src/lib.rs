//! shellmux-server: pty-backed terminal sessions.
//!
//! A [`TerminalManager`] owns a bounded set of [`TerminalSession`]s, each an
//! interactive shell on a pseudo-terminal, and publishes their output and
//! lifecycle as [`TerminalEvent`](shellmux_core::TerminalEvent)s. The
//! [`driver`] exposes the manager over a line-delimited JSON protocol.

pub mod config;
pub mod driver;
pub mod process;
pub mod session;

pub use config::{CliOverrides, ManagerConfig, SessionSettings};
pub use process::{Process, ProcessSpawner, PtySpawner};
pub use session::{SessionServices, TerminalManager, TerminalSession};
