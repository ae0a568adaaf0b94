//! Session management: terminal sessions, their history, and the manager
//! that owns them.

pub mod history;
pub mod manager;
pub mod terminal;

pub use history::CommandHistory;
pub use manager::TerminalManager;
pub use terminal::TerminalSession;

use crate::process::ProcessSpawner;
use shellmux_core::{Broadcaster, Clock};
use std::sync::Arc;

/// Collaborators every session needs: where processes come from, where
/// events go, and what time it is.
#[derive(Clone)]
pub struct SessionServices {
    pub spawner: Arc<dyn ProcessSpawner>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub clock: Arc<dyn Clock>,
}

impl SessionServices {
    pub fn new(
        spawner: Arc<dyn ProcessSpawner>,
        broadcaster: Arc<dyn Broadcaster>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            spawner,
            broadcaster,
            clock,
        }
    }
}
