//! Session lifecycle management.
//!
//! Tracks all live terminal sessions, handles creation and destruction,
//! enforces the session cap, and runs the monitor that reaps sessions whose
//! process has died.

use super::terminal::TerminalSession;
use super::SessionServices;
use crate::config::ManagerConfig;
use futures_util::future::join_all;
use shellmux_core::{
    HistoryEntry, ManagerStatus, SessionStatus, ShellmuxError, ShellmuxResult, TerminalEvent,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument};

struct Registered {
    /// Creation order, for listing.
    seq: u64,
    session: Arc<TerminalSession>,
}

/// Owns every terminal session.
///
/// All registry mutation goes through the `sessions` lock. Create, destroy,
/// sweep and shutdown additionally serialize on `lifecycle`, so the capacity
/// check and the insert that follows it cannot interleave with another
/// create, and `stop` cannot return while a destroy is still terminating.
pub struct TerminalManager {
    config: ManagerConfig,
    services: SessionServices,
    sessions: RwLock<HashMap<String, Registered>>,
    lifecycle: tokio::sync::Mutex<()>,
    next_seq: AtomicU64,
    running: AtomicBool,
    monitor: Mutex<Option<Monitor>>,
}

/// A running monitor task and the signal that ends it. Each `start` gets a
/// fresh `Notify`, so a permit left by an earlier `stop` cannot end it.
struct Monitor {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl TerminalManager {
    pub fn new(config: ManagerConfig, services: SessionServices) -> Self {
        Self {
            config,
            services,
            sessions: RwLock::new(HashMap::new()),
            lifecycle: tokio::sync::Mutex::new(()),
            next_seq: AtomicU64::new(0),
            running: AtomicBool::new(false),
            monitor: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Mark the manager running and launch the monitor loop.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("terminal manager already running");
            return;
        }

        let manager = Arc::downgrade(self);
        let shutdown = Arc::new(Notify::new());
        let signal = Arc::clone(&shutdown);
        let period = self.config.monitor_interval;
        let handle = tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick completes immediately.
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = interval.tick() => {}
                        _ = signal.notified() => break,
                    }
                    let Some(manager) = manager.upgrade() else {
                        break;
                    };
                    if !manager.is_running() {
                        break;
                    }
                    // A panicking tick is logged and the next tick runs as usual.
                    let tick = tokio::spawn(async move { manager.monitor_tick().await });
                    if let Err(e) = tick.await {
                        error!(error = %e, "monitor tick failed");
                    }
                }
                debug!("monitor stopped");
            }
            .instrument(info_span!("monitor")),
        );
        *self.monitor.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(Monitor { handle, shutdown });

        info!(
            max_sessions = self.config.max_sessions,
            interval = ?period,
            "terminal manager started"
        );
    }

    /// Stop the monitor and every session, leaving the registry empty.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(monitor) = monitor {
            monitor.shutdown.notify_one();
            let _ = monitor.handle.await;
        }

        let _serial = self.lifecycle.lock().await;
        let drained: Vec<Arc<TerminalSession>> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, r)| r.session).collect()
        };
        join_all(drained.iter().map(|s| s.stop())).await;
        for session in &drained {
            self.announce_destroyed(session.id());
        }
        info!(count = drained.len(), "terminal manager stopped");
    }

    /// Create and start a session, returning its id.
    ///
    /// At capacity, dead sessions are swept first; if that frees nothing the
    /// call fails with `ResourceExhausted`.
    pub async fn create_session(
        &self,
        working_directory: Option<PathBuf>,
    ) -> ShellmuxResult<String> {
        let _serial = self.lifecycle.lock().await;

        if self.count().await >= self.config.max_sessions {
            let reaped = self.sweep_locked().await;
            debug!(reaped = reaped.len(), "swept sessions under capacity pressure");
            if self.count().await >= self.config.max_sessions {
                warn!(max = self.config.max_sessions, "session limit reached");
                return Err(ShellmuxError::ResourceExhausted {
                    max: self.config.max_sessions,
                });
            }
        }

        let working_directory = resolve_working_directory(
            working_directory,
            self.config.default_working_directory.as_ref(),
            std::env::current_dir,
        )?;

        let session_id = {
            let sessions = self.sessions.read().await;
            loop {
                let id = generate_session_id();
                if !sessions.contains_key(&id) {
                    break id;
                }
            }
        };

        let session = Arc::new(TerminalSession::new(
            session_id.clone(),
            working_directory,
            self.config.session.clone(),
            self.services.clone(),
        ));
        session.start()?;

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.sessions.write().await.insert(
            session_id.clone(),
            Registered {
                seq,
                session: Arc::clone(&session),
            },
        );

        self.services
            .broadcaster
            .broadcast(TerminalEvent::TerminalCreated {
                session_id: session_id.clone(),
                working_directory: session.working_directory().display().to_string(),
                timestamp: self.services.clock.timestamp(),
            });
        info!(session_id = %session_id, "session created");
        Ok(session_id)
    }

    /// Stop and remove a session. Returns `false` if there was no such
    /// session.
    pub async fn destroy_session(&self, session_id: &str) -> bool {
        let _serial = self.lifecycle.lock().await;
        self.destroy_locked(session_id).await
    }

    /// Caller holds `lifecycle`.
    async fn destroy_locked(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id);
        let Some(entry) = removed else {
            debug!(session_id, "destroy of unknown session");
            return false;
        };
        entry.session.stop().await;
        self.announce_destroyed(session_id);
        info!(session_id, "session destroyed");
        true
    }

    /// Like [`destroy_session`](Self::destroy_session), but the session must
    /// exist.
    pub async fn close_session(&self, session_id: &str) -> ShellmuxResult<()> {
        if self.destroy_session(session_id).await {
            Ok(())
        } else {
            Err(ShellmuxError::NotFound(session_id.to_string()))
        }
    }

    pub async fn send_input(&self, session_id: &str, data: &str) -> ShellmuxResult<()> {
        self.lookup(session_id).await?.send_input(data)
    }

    pub async fn resize_session(
        &self,
        session_id: &str,
        rows: u16,
        cols: u16,
    ) -> ShellmuxResult<()> {
        self.lookup(session_id).await?.resize(rows, cols)
    }

    /// Start a fresh session and submit `command` to it.
    ///
    /// Results only arrive as output events for the returned session.
    pub async fn execute_command(
        &self,
        command: &str,
        working_directory: Option<PathBuf>,
    ) -> ShellmuxResult<String> {
        let session_id = self.create_session(working_directory).await?;
        self.send_input(&session_id, &format!("{command}\n")).await?;
        debug!(session_id = %session_id, command, "command submitted");
        Ok(session_id)
    }

    pub async fn get_session(&self, session_id: &str) -> Option<Arc<TerminalSession>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|r| Arc::clone(&r.session))
    }

    pub async fn session_history(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> ShellmuxResult<Vec<HistoryEntry>> {
        Ok(self.lookup(session_id).await?.history(limit))
    }

    /// Status of every registered session, oldest first.
    pub async fn list_sessions(&self) -> Vec<SessionStatus> {
        let mut sessions: Vec<(u64, Arc<TerminalSession>)> = self
            .sessions
            .read()
            .await
            .values()
            .map(|r| (r.seq, Arc::clone(&r.session)))
            .collect();
        sessions.sort_by_key(|(seq, _)| *seq);
        sessions.iter().map(|(_, s)| s.status()).collect()
    }

    pub async fn get_status(&self) -> ManagerStatus {
        let sessions = self.list_sessions().await;
        ManagerStatus {
            running: self.is_running(),
            active_count: sessions.iter().filter(|s| s.active).count(),
            max_sessions: self.config.max_sessions,
            sessions,
        }
    }

    /// Destroy every session that is inactive or whose process has died.
    ///
    /// Returns the ids that were reaped.
    pub async fn sweep_inactive(&self) -> Vec<String> {
        let _serial = self.lifecycle.lock().await;
        self.sweep_locked().await
    }

    /// Caller holds `lifecycle`.
    async fn sweep_locked(&self) -> Vec<String> {
        let dead: Vec<String> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, r)| !r.session.is_active() || !r.session.is_process_alive())
            .map(|(id, _)| id.clone())
            .collect();

        let mut reaped = Vec::with_capacity(dead.len());
        for session_id in dead {
            if self.destroy_locked(&session_id).await {
                warn!(session_id = %session_id, "reaped dead session");
                reaped.push(session_id);
            }
        }
        reaped
    }

    /// Number of registered sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn monitor_tick(&self) {
        let reaped = self.sweep_inactive().await;
        if !reaped.is_empty() {
            debug!(count = reaped.len(), "monitor reaped sessions");
        }
        let sessions = self.list_sessions().await;
        if !sessions.is_empty() {
            self.services
                .broadcaster
                .broadcast(TerminalEvent::TerminalStatus {
                    sessions,
                    timestamp: self.services.clock.timestamp(),
                });
        }
    }

    async fn lookup(&self, session_id: &str) -> ShellmuxResult<Arc<TerminalSession>> {
        self.get_session(session_id)
            .await
            .ok_or_else(|| ShellmuxError::NotFound(session_id.to_string()))
    }

    fn announce_destroyed(&self, session_id: &str) {
        self.services
            .broadcaster
            .broadcast(TerminalEvent::TerminalDestroyed {
                session_id: session_id.to_string(),
                timestamp: self.services.clock.timestamp(),
            });
    }
}

/// Pick the directory a new session starts in: the requested one, else the
/// configured default, else the daemon's own working directory.
fn resolve_working_directory(
    requested: Option<PathBuf>,
    default: Option<&PathBuf>,
    current_dir: impl FnOnce() -> std::io::Result<PathBuf>,
) -> ShellmuxResult<PathBuf> {
    if let Some(dir) = requested.or_else(|| default.cloned()) {
        return Ok(dir);
    }
    current_dir().map_err(|e| {
        ShellmuxError::ProcessSpawnFailure(format!(
            "no working directory given and current directory unavailable: {e}"
        ))
    })
}

/// Generate a random session ID (hex-encoded, 16 bytes = 32 hex chars).
fn generate_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionSettings;
    use crate::process::fake::FakeSpawner;
    use shellmux_core::{ChannelBroadcaster, SystemClock};
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::sync::broadcast::Receiver;

    const WAIT: Duration = Duration::from_secs(2);

    fn config(max_sessions: usize) -> ManagerConfig {
        ManagerConfig {
            max_sessions,
            monitor_interval: Duration::from_millis(50),
            default_working_directory: Some(PathBuf::from("/work")),
            session: SessionSettings {
                shell: "/bin/fake-sh".into(),
                max_history: 1000,
                rows: 24,
                cols: 80,
                read_timeout: Duration::from_millis(10),
                read_chunk: 4096,
                io_backoff: Duration::from_millis(10),
                terminate_grace: Duration::from_millis(200),
            },
        }
    }

    fn manager_with(
        spawner: Arc<FakeSpawner>,
        max_sessions: usize,
    ) -> (Arc<TerminalManager>, Receiver<TerminalEvent>) {
        let broadcaster = Arc::new(ChannelBroadcaster::new(1024));
        let rx = broadcaster.subscribe();
        let services = SessionServices::new(spawner, broadcaster, Arc::new(SystemClock));
        (
            Arc::new(TerminalManager::new(config(max_sessions), services)),
            rx,
        )
    }

    async fn next_matching(
        rx: &mut Receiver<TerminalEvent>,
        pred: impl Fn(&TerminalEvent) -> bool,
    ) -> TerminalEvent {
        tokio::time::timeout(WAIT, async {
            loop {
                let ev = rx.recv().await.expect("event channel closed");
                if pred(&ev) {
                    return ev;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    #[tokio::test]
    async fn create_registers_and_announces() {
        let spawner = FakeSpawner::new();
        let (mgr, mut rx) = manager_with(spawner.clone(), 10);

        let id = mgr.create_session(None).await.unwrap();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(mgr.count().await, 1);
        assert_eq!(
            spawner.last_request().unwrap().working_directory,
            PathBuf::from("/work")
        );

        let ev = next_matching(&mut rx, |e| e.event_type() == "terminal_created").await;
        assert_eq!(
            ev,
            TerminalEvent::TerminalCreated {
                session_id: id.clone(),
                working_directory: "/work".into(),
                timestamp: ev.timestamp().to_string(),
            }
        );

        let session = mgr.get_session(&id).await.unwrap();
        assert_eq!(session.id(), id);
        assert!(session.is_active());
        mgr.stop().await;
    }

    #[tokio::test]
    async fn explicit_working_directory_wins() {
        let spawner = FakeSpawner::new();
        let (mgr, _rx) = manager_with(spawner.clone(), 10);
        mgr.create_session(Some("/elsewhere".into())).await.unwrap();
        assert_eq!(
            spawner.last_request().unwrap().working_directory,
            PathBuf::from("/elsewhere")
        );
        mgr.stop().await;
    }

    #[tokio::test]
    async fn spawn_failure_is_not_registered() {
        let spawner = FakeSpawner::new();
        spawner.fail_spawns(true);
        let (mgr, _rx) = manager_with(spawner, 10);

        let err = mgr.create_session(None).await.unwrap_err();
        assert!(matches!(err, ShellmuxError::ProcessSpawnFailure(_)));
        assert_eq!(mgr.count().await, 0);
        assert!(mgr.list_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn capacity_is_enforced_and_recovers() {
        let spawner = FakeSpawner::new();
        let (mgr, _rx) = manager_with(spawner, 10);

        let mut ids = HashSet::new();
        for _ in 0..10 {
            ids.insert(mgr.create_session(None).await.unwrap());
        }
        assert_eq!(ids.len(), 10);

        let err = mgr.create_session(None).await.unwrap_err();
        assert!(matches!(err, ShellmuxError::ResourceExhausted { max: 10 }));
        assert!(err.is_retryable());
        assert_eq!(mgr.count().await, 10);

        let victim = ids.iter().next().unwrap().clone();
        assert!(mgr.destroy_session(&victim).await);
        mgr.create_session(None).await.unwrap();
        assert_eq!(mgr.count().await, 10);
        mgr.stop().await;
    }

    #[tokio::test]
    async fn dead_session_is_swept_to_make_room() {
        let spawner = FakeSpawner::new();
        let (mgr, mut rx) = manager_with(spawner.clone(), 2);

        let first = mgr.create_session(None).await.unwrap();
        mgr.create_session(None).await.unwrap();
        spawner.process(0).exit();

        let third = mgr.create_session(None).await.unwrap();
        assert_eq!(mgr.count().await, 2);
        assert!(mgr.get_session(&first).await.is_none());
        assert!(mgr.get_session(&third).await.is_some());

        let ev = next_matching(&mut rx, |e| e.event_type() == "terminal_destroyed").await;
        assert_eq!(ev.session_id(), Some(first.as_str()));
        mgr.stop().await;
    }

    #[tokio::test]
    async fn concurrent_creates_never_overshoot() {
        let spawner = FakeSpawner::new();
        let (mgr, _rx) = manager_with(spawner, 3);

        let attempts = (0..8).map(|_| {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move { mgr.create_session(None).await })
        });
        let results: Vec<_> = join_all(attempts).await;
        let ok = results
            .iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();
        assert_eq!(ok, 3);
        assert_eq!(mgr.count().await, 3);
        mgr.stop().await;
    }

    #[tokio::test]
    async fn destroy_unknown_is_false_and_harmless() {
        let spawner = FakeSpawner::new();
        let (mgr, _rx) = manager_with(spawner.clone(), 10);
        let id = mgr.create_session(None).await.unwrap();

        assert!(!mgr.destroy_session("never-issued").await);
        assert_eq!(mgr.count().await, 1);

        assert!(mgr.destroy_session(&id).await);
        assert!(spawner.process(0).was_terminated());
        assert!(!mgr.destroy_session(&id).await);
        assert_eq!(mgr.count().await, 0);

        assert!(matches!(
            mgr.close_session(&id).await,
            Err(ShellmuxError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let spawner = FakeSpawner::new();
        let (mgr, _rx) = manager_with(spawner.clone(), 10);
        mgr.create_session(None).await.unwrap();

        assert!(matches!(
            mgr.send_input("nope", "ls\n").await,
            Err(ShellmuxError::NotFound(id)) if id == "nope"
        ));
        assert!(matches!(
            mgr.resize_session("nope", 24, 80).await,
            Err(ShellmuxError::NotFound(_))
        ));
        assert!(matches!(
            mgr.session_history("nope", None).await,
            Err(ShellmuxError::NotFound(_))
        ));

        let control = spawner.process(0);
        assert!(control.writes().is_empty());
        assert_eq!(control.sizes(), [(24, 80)]);
        mgr.stop().await;
    }

    #[tokio::test]
    async fn input_and_resize_are_delegated() {
        let spawner = FakeSpawner::echoing();
        let (mgr, mut rx) = manager_with(spawner.clone(), 10);
        let id = mgr.create_session(None).await.unwrap();

        mgr.send_input(&id, "echo hi\n").await.unwrap();
        let history: Vec<String> = mgr
            .session_history(&id, None)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.command)
            .collect();
        assert_eq!(history, ["echo hi"]);

        let ev = next_matching(&mut rx, |e| e.event_type() == "terminal_output").await;
        match ev {
            TerminalEvent::TerminalOutput { session_id, data, .. } => {
                assert_eq!(session_id, id);
                assert!(data.contains("hi"));
            }
            other => panic!("unexpected event {other:?}"),
        }

        mgr.resize_session(&id, 24, 80).await.unwrap();
        assert!(matches!(
            mgr.resize_session(&id, 0, 80).await,
            Err(ShellmuxError::InvalidResize { .. })
        ));
        let status = mgr.get_session(&id).await.unwrap().status();
        assert!(status.active);
        assert!(status.process_alive);
        mgr.stop().await;
    }

    #[tokio::test]
    async fn execute_command_submits_a_line() {
        let spawner = FakeSpawner::new();
        let (mgr, _rx) = manager_with(spawner.clone(), 10);

        let id = mgr.execute_command("make test", None).await.unwrap();
        assert_eq!(spawner.process(0).writes(), [b"make test\n".to_vec()]);
        let history = mgr.session_history(&id, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].command, "make test");
        mgr.stop().await;
    }

    #[tokio::test]
    async fn list_is_in_creation_order_and_status_counts() {
        let spawner = FakeSpawner::new();
        let (mgr, _rx) = manager_with(spawner.clone(), 10);
        let a = mgr.create_session(None).await.unwrap();
        let b = mgr.create_session(None).await.unwrap();
        let c = mgr.create_session(None).await.unwrap();

        let listed: Vec<String> = mgr.list_sessions().await.into_iter().map(|s| s.id).collect();
        assert_eq!(listed, [a, b.clone(), c]);

        spawner.process(1).exit();
        tokio::time::timeout(WAIT, async {
            while mgr.get_session(&b).await.unwrap().is_active() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let status = mgr.get_status().await;
        assert!(!status.running);
        assert_eq!(status.max_sessions, 10);
        assert_eq!(status.sessions.len(), 3);
        assert_eq!(status.active_count, 2);
        mgr.stop().await;
    }

    #[tokio::test]
    async fn monitor_reaps_exited_sessions() {
        let spawner = FakeSpawner::new();
        let (mgr, mut rx) = manager_with(spawner.clone(), 10);
        mgr.start();
        assert!(mgr.get_status().await.running);

        let doomed = mgr.create_session(None).await.unwrap();
        let survivor = mgr.create_session(None).await.unwrap();
        spawner.process(0).exit();

        let ev = next_matching(&mut rx, |e| e.event_type() == "terminal_destroyed").await;
        assert_eq!(ev.session_id(), Some(doomed.as_str()));

        let listed: Vec<String> = mgr.list_sessions().await.into_iter().map(|s| s.id).collect();
        assert_eq!(listed, [survivor.clone()]);

        let ev = next_matching(&mut rx, |e| e.event_type() == "terminal_status").await;
        match ev {
            TerminalEvent::TerminalStatus { sessions, .. } => {
                assert_eq!(sessions.len(), 1);
                assert_eq!(sessions[0].id, survivor);
            }
            other => panic!("unexpected event {other:?}"),
        }
        mgr.stop().await;
    }

    #[tokio::test]
    async fn monitor_reaps_silently_dead_process() {
        let spawner = FakeSpawner::new();
        let (mgr, mut rx) = manager_with(spawner.clone(), 10);
        mgr.start();

        let id = mgr.create_session(None).await.unwrap();
        spawner.process(0).die_silently();

        let ev = next_matching(&mut rx, |e| e.event_type() == "terminal_destroyed").await;
        assert_eq!(ev.session_id(), Some(id.as_str()));
        assert_eq!(mgr.count().await, 0);
        mgr.stop().await;
    }

    #[tokio::test]
    async fn sweep_leaves_live_sessions_alone() {
        let spawner = FakeSpawner::new();
        let (mgr, _rx) = manager_with(spawner.clone(), 10);
        let a = mgr.create_session(None).await.unwrap();
        let b = mgr.create_session(None).await.unwrap();
        spawner.process(1).die_silently();

        let reaped = mgr.sweep_inactive().await;
        assert_eq!(reaped, [b]);
        assert!(mgr.get_session(&a).await.is_some());
        assert!(!spawner.process(0).was_terminated());
        mgr.stop().await;
    }

    #[tokio::test]
    async fn stop_drains_everything() {
        let spawner = FakeSpawner::new();
        let (mgr, mut rx) = manager_with(spawner.clone(), 10);
        mgr.start();
        for _ in 0..3 {
            mgr.create_session(None).await.unwrap();
        }

        mgr.stop().await;
        assert!(!mgr.is_running());
        assert_eq!(mgr.count().await, 0);
        for i in 0..3 {
            let control = spawner.process(i);
            assert!(control.was_terminated());
            assert!(!control.is_alive());
        }

        let mut destroyed = 0;
        while destroyed < 3 {
            next_matching(&mut rx, |e| e.event_type() == "terminal_destroyed").await;
            destroyed += 1;
        }

        // A second stop has nothing left to do.
        mgr.stop().await;
        assert_eq!(mgr.count().await, 0);
    }

    #[tokio::test]
    async fn start_twice_is_harmless() {
        let spawner = FakeSpawner::new();
        let (mgr, _rx) = manager_with(spawner, 10);
        mgr.start();
        mgr.start();
        assert!(mgr.is_running());
        mgr.stop().await;
        assert!(!mgr.is_running());
    }

    #[tokio::test]
    async fn timestamps_come_from_the_injected_clock() {
        use chrono::TimeZone;
        use shellmux_core::ManualClock;

        let clock = Arc::new(ManualClock::new(
            chrono::Utc.with_ymd_and_hms(2026, 10, 19, 8, 15, 30).unwrap(),
        ));
        let broadcaster = Arc::new(ChannelBroadcaster::new(64));
        let mut rx = broadcaster.subscribe();
        let services = SessionServices::new(FakeSpawner::new(), broadcaster, clock.clone());
        let mgr = TerminalManager::new(config(10), services);

        let id = mgr.create_session(None).await.unwrap();
        let ev = next_matching(&mut rx, |e| e.event_type() == "terminal_created").await;
        assert_eq!(ev.timestamp(), "2026-10-19T08:15:30.000Z");

        clock.advance(chrono::Duration::milliseconds(1500));
        mgr.send_input(&id, "ls\n").await.unwrap();
        let history = mgr.session_history(&id, None).await.unwrap();
        assert_eq!(history[0].timestamp, "2026-10-19T08:15:31.500Z");

        let status = &mgr.list_sessions().await[0];
        assert_eq!(status.created_at, "2026-10-19T08:15:30.000Z");
        mgr.stop().await;
    }

    #[tokio::test]
    async fn monitor_runs_again_after_stop_then_start() {
        let spawner = FakeSpawner::new();
        let (mgr, mut rx) = manager_with(spawner.clone(), 10);
        // A stop with no monitor running must not poison the next start.
        mgr.stop().await;
        mgr.start();
        mgr.stop().await;
        mgr.stop().await;
        mgr.start();
        assert!(mgr.is_running());

        let id = mgr.create_session(None).await.unwrap();
        spawner.process(0).die_silently();

        let ev = next_matching(&mut rx, |e| e.event_type() == "terminal_destroyed").await;
        assert_eq!(ev.session_id(), Some(id.as_str()));
        assert_eq!(mgr.count().await, 0);
        mgr.stop().await;
    }

    #[tokio::test]
    async fn stop_waits_for_an_in_flight_destroy() {
        let spawner = FakeSpawner::new();
        let (mgr, _rx) = manager_with(spawner.clone(), 10);
        let id = mgr.create_session(None).await.unwrap();
        let control = spawner.process(0);
        control.slow_terminate(Duration::from_millis(200));

        let destroy = {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move { mgr.destroy_session(&id).await })
        };
        // Let the destroy take the session out of the registry first.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(control.was_terminated());

        mgr.stop().await;
        assert!(!control.is_alive());
        assert!(destroy.await.unwrap());
    }

    #[test]
    fn working_directory_falls_back_in_order() {
        let requested = PathBuf::from("/req");
        let default = PathBuf::from("/default");
        let cwd = || -> std::io::Result<PathBuf> { Ok(PathBuf::from("/cwd")) };

        assert_eq!(
            resolve_working_directory(Some(requested.clone()), Some(&default), cwd).unwrap(),
            requested
        );
        assert_eq!(
            resolve_working_directory(None, Some(&default), cwd).unwrap(),
            default
        );
        assert_eq!(
            resolve_working_directory(None, None, cwd).unwrap(),
            PathBuf::from("/cwd")
        );
    }

    #[test]
    fn unavailable_current_dir_is_a_spawn_failure() {
        let err = resolve_working_directory(None, None, || {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "cwd removed"))
        })
        .unwrap_err();
        assert!(matches!(err, ShellmuxError::ProcessSpawnFailure(_)));
        assert_eq!(err.kind(), "process_spawn_failure");
    }

    #[test]
    fn session_ids_are_hex_and_distinct() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
