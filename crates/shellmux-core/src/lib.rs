//! shellmux-core: shared types for the shellmux terminal session manager.
//!
//! Provides the error taxonomy, the terminal event schema and status
//! snapshots, the UTC clock used for every timestamp, and the broadcaster
//! capability events are published through.

pub mod broadcast;
pub mod clock;
pub mod error;
pub mod events;

// Re-export commonly used items at crate root.
pub use broadcast::{Broadcaster, ChannelBroadcaster};
pub use clock::{format_timestamp, Clock, ManualClock, SystemClock};
pub use error::{ShellmuxError, ShellmuxResult};
pub use events::{HistoryEntry, ManagerStatus, SessionStatus, TerminalEvent};
