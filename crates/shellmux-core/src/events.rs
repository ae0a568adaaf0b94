//! Terminal event schema and status snapshots.
//!
//! Events are serialized as JSON objects tagged by `type`
//! (`terminal_output`, `terminal_created`, ...) with camelCase fields.

use serde::{Deserialize, Serialize};

/// Point-in-time view of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub id: String,
    pub active: bool,
    pub working_directory: String,
    pub shell: String,
    pub process_alive: bool,
    /// OS pid of the session's process, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub history_length: usize,
    pub rows: u16,
    pub cols: u16,
    pub created_at: String,
}

/// Point-in-time view of a manager and all of its sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStatus {
    pub running: bool,
    pub active_count: usize,
    pub max_sessions: usize,
    pub sessions: Vec<SessionStatus>,
}

/// One command submitted to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub command: String,
    pub timestamp: String,
}

/// Event published to the broadcaster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalEvent {
    /// Output read from a session's pty.
    #[serde(rename_all = "camelCase")]
    TerminalOutput {
        session_id: String,
        data: String,
        timestamp: String,
    },
    /// A session was started and registered.
    #[serde(rename_all = "camelCase")]
    TerminalCreated {
        session_id: String,
        working_directory: String,
        timestamp: String,
    },
    /// A session was stopped and removed from the registry.
    #[serde(rename_all = "camelCase")]
    TerminalDestroyed {
        session_id: String,
        timestamp: String,
    },
    /// Periodic snapshot from the monitor.
    #[serde(rename_all = "camelCase")]
    TerminalStatus {
        sessions: Vec<SessionStatus>,
        timestamp: String,
    },
    /// The session's process is up and its read loop is running.
    #[serde(rename_all = "camelCase")]
    TerminalReady {
        session_id: String,
        shell: String,
        working_directory: String,
        timestamp: String,
    },
    /// The session's process closed its output.
    #[serde(rename_all = "camelCase")]
    TerminalExited {
        session_id: String,
        timestamp: String,
    },
}

impl TerminalEvent {
    /// Wire name of the event (`type` field).
    pub fn event_type(&self) -> &'static str {
        match self {
            TerminalEvent::TerminalOutput { .. } => "terminal_output",
            TerminalEvent::TerminalCreated { .. } => "terminal_created",
            TerminalEvent::TerminalDestroyed { .. } => "terminal_destroyed",
            TerminalEvent::TerminalStatus { .. } => "terminal_status",
            TerminalEvent::TerminalReady { .. } => "terminal_ready",
            TerminalEvent::TerminalExited { .. } => "terminal_exited",
        }
    }

    /// Session the event is about, if it concerns exactly one.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            TerminalEvent::TerminalOutput { session_id, .. }
            | TerminalEvent::TerminalCreated { session_id, .. }
            | TerminalEvent::TerminalDestroyed { session_id, .. }
            | TerminalEvent::TerminalReady { session_id, .. }
            | TerminalEvent::TerminalExited { session_id, .. } => Some(session_id),
            TerminalEvent::TerminalStatus { .. } => None,
        }
    }

    pub fn timestamp(&self) -> &str {
        match self {
            TerminalEvent::TerminalOutput { timestamp, .. }
            | TerminalEvent::TerminalCreated { timestamp, .. }
            | TerminalEvent::TerminalDestroyed { timestamp, .. }
            | TerminalEvent::TerminalStatus { timestamp, .. }
            | TerminalEvent::TerminalReady { timestamp, .. }
            | TerminalEvent::TerminalExited { timestamp, .. } => timestamp,
        }
    }
}
