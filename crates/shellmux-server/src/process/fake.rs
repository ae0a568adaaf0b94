//! Scripted in-memory process for session and manager tests.

use super::{Process, ProcessSpawner, ReadOutcome, SpawnRequest};
use async_trait::async_trait;
use shellmux_core::{ShellmuxError, ShellmuxResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

enum Scripted {
    Data(Vec<u8>),
    Error(std::io::ErrorKind),
    End,
}

/// Test-side handle to a fake process: script its output, flip its
/// liveness, inspect what the session did to it.
pub(crate) struct FakeControl {
    tx: mpsc::UnboundedSender<Scripted>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Scripted>>,
    alive: AtomicBool,
    ended: AtomicBool,
    terminated: AtomicBool,
    echo: bool,
    pid: u32,
    /// Next write fails; `Some(true)` means the process dies with it.
    broken_write: Mutex<Option<bool>>,
    terminate_delay: Mutex<Duration>,
    writes: Mutex<Vec<Vec<u8>>>,
    sizes: Mutex<Vec<(u16, u16)>>,
}

impl FakeControl {
    fn new(echo: bool, pid: u32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            alive: AtomicBool::new(true),
            ended: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            echo,
            pid,
            broken_write: Mutex::new(None),
            terminate_delay: Mutex::new(Duration::ZERO),
            writes: Mutex::new(Vec::new()),
            sizes: Mutex::new(Vec::new()),
        }
    }

    /// Queue output for the next read.
    pub(crate) fn emit(&self, data: &[u8]) {
        let _ = self.tx.send(Scripted::Data(data.to_vec()));
    }

    /// Make the next read fail with an I/O error.
    pub(crate) fn fail_read(&self, kind: std::io::ErrorKind) {
        let _ = self.tx.send(Scripted::Error(kind));
    }

    /// The process exits and closes its output.
    pub(crate) fn exit(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.tx.send(Scripted::End);
    }

    /// The process dies without its output ever reporting end-of-stream.
    pub(crate) fn die_silently(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Make the next write fail with a broken pipe. With `exits`, the
    /// process is already gone by the time the error is reported.
    pub(crate) fn break_next_write(&self, exits: bool) {
        *self.broken_write.lock().unwrap() = Some(exits);
    }

    /// Make `terminate` take this long before the process exits.
    pub(crate) fn slow_terminate(&self, delay: Duration) {
        *self.terminate_delay.lock().unwrap() = delay;
    }

    pub(crate) fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    pub(crate) fn sizes(&self) -> Vec<(u16, u16)> {
        self.sizes.lock().unwrap().clone()
    }

    pub(crate) fn was_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

pub(crate) struct FakeProcess {
    control: Arc<FakeControl>,
}

#[async_trait]
impl Process for FakeProcess {
    async fn read(&self, _max_bytes: usize, timeout: Duration) -> ShellmuxResult<ReadOutcome> {
        if self.control.ended.load(Ordering::SeqCst) {
            return Ok(ReadOutcome::EndOfStream);
        }
        let mut rx = self.control.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Err(_) => Ok(ReadOutcome::Timeout),
            Ok(Some(Scripted::Data(bytes))) => Ok(ReadOutcome::Data(bytes)),
            Ok(Some(Scripted::Error(kind))) => {
                Err(ShellmuxError::Io(std::io::Error::new(kind, "scripted failure")))
            }
            Ok(Some(Scripted::End)) | Ok(None) => {
                self.control.ended.store(true, Ordering::SeqCst);
                Ok(ReadOutcome::EndOfStream)
            }
        }
    }

    fn write(&self, data: &[u8]) -> ShellmuxResult<()> {
        if !self.control.is_alive() {
            return Err(ShellmuxError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "process exited",
            )));
        }
        if let Some(exits) = self.control.broken_write.lock().unwrap().take() {
            if exits {
                self.control.die_silently();
            }
            return Err(ShellmuxError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "pipe closed mid-write",
            )));
        }
        self.control.writes.lock().unwrap().push(data.to_vec());
        if self.control.echo {
            self.control.emit(data);
        }
        Ok(())
    }

    fn set_window_size(&self, rows: u16, cols: u16) -> ShellmuxResult<()> {
        self.control.sizes.lock().unwrap().push((rows, cols));
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.control.is_alive()
    }

    fn pid(&self) -> Option<u32> {
        Some(self.control.pid)
    }

    async fn terminate(&self, _grace: Duration) -> ShellmuxResult<()> {
        self.control.terminated.store(true, Ordering::SeqCst);
        let delay = *self.control.terminate_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.control.is_alive() {
            self.control.exit();
        }
        Ok(())
    }
}

/// Hands out [`FakeProcess`]es and keeps their controls for the test.
#[derive(Default)]
pub(crate) struct FakeSpawner {
    echo: bool,
    fail: AtomicBool,
    spawned: Mutex<Vec<Arc<FakeControl>>>,
    requests: Mutex<Vec<SpawnRequest>>,
}

impl FakeSpawner {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Processes that echo every write back as output, like a tty in
    /// cooked mode.
    pub(crate) fn echoing() -> Arc<Self> {
        Arc::new(Self {
            echo: true,
            ..Self::default()
        })
    }

    pub(crate) fn fail_spawns(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Control of the `index`-th process spawned.
    pub(crate) fn process(&self, index: usize) -> Arc<FakeControl> {
        Arc::clone(&self.spawned.lock().unwrap()[index])
    }

    pub(crate) fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }

    pub(crate) fn last_request(&self) -> Option<SpawnRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, request: &SpawnRequest) -> ShellmuxResult<Box<dyn Process>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ShellmuxError::ProcessSpawnFailure(format!(
                "scripted failure for {}",
                request.shell
            )));
        }
        let mut spawned = self.spawned.lock().unwrap();
        let control = Arc::new(FakeControl::new(self.echo, 1000 + spawned.len() as u32));
        spawned.push(Arc::clone(&control));
        drop(spawned);
        self.requests.lock().unwrap().push(request.clone());
        Ok(Box::new(FakeProcess { control }))
    }
}
