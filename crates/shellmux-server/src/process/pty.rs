//! PTY-backed process using portable-pty.
//!
//! Opens a pseudo-terminal, spawns the shell on its slave side and pumps the
//! master's output from a dedicated reader thread into a bounded channel,
//! which gives the async side timeout-bounded reads.

use super::{Process, ProcessSpawner, ReadOutcome, SpawnRequest};
use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use shellmux_core::{ShellmuxError, ShellmuxResult};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Chunks buffered between the reader thread and the session.
const OUTPUT_QUEUE_DEPTH: usize = 64;
/// Size of a single blocking read on the PTY master.
const READ_BUFFER_SIZE: usize = 8192;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

type OutputChunk = std::io::Result<Vec<u8>>;

struct OutputQueue {
    rx: mpsc::Receiver<OutputChunk>,
    /// Remainder of a chunk larger than the caller's `max_bytes`.
    pending: Vec<u8>,
    closed: bool,
}

impl OutputQueue {
    fn take(&mut self, max_bytes: usize) -> Vec<u8> {
        let n = max_bytes.min(self.pending.len());
        let rest = self.pending.split_off(n);
        std::mem::replace(&mut self.pending, rest)
    }
}

/// A shell running on a pseudo-terminal.
pub struct PtyProcess {
    output: tokio::sync::Mutex<OutputQueue>,
    writer: Mutex<Box<dyn Write + Send>>,
    /// Kept for resize (Mutex because MasterPty is not Sync).
    master: Mutex<Box<dyn MasterPty + Send>>,
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
    pid: Option<u32>,
}

impl PtyProcess {
    /// Spawn `request.shell` in `request.working_directory` on a new PTY.
    ///
    /// The shell string may carry arguments (`"bash --noprofile"`).
    pub fn spawn(request: &SpawnRequest) -> ShellmuxResult<Self> {
        if !request.working_directory.is_dir() {
            return Err(ShellmuxError::ProcessSpawnFailure(format!(
                "working directory {} does not exist",
                request.working_directory.display()
            )));
        }

        let parts: Vec<&str> = request.shell.split_whitespace().collect();
        let Some((program, args)) = parts.split_first() else {
            return Err(ShellmuxError::ProcessSpawnFailure("empty shell command".into()));
        };

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: request.rows,
                cols: request.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ShellmuxError::ProcessSpawnFailure(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        cmd.cwd(&request.working_directory);
        cmd.env("TERM", "xterm-256color");

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            ShellmuxError::ProcessSpawnFailure(format!("failed to spawn {}: {e}", request.shell))
        })?;
        // Our copy of the slave must go, or the master never sees EOF.
        drop(pair.slave);

        let pid = child.process_id();
        let child = Arc::new(Mutex::new(child));
        let reader = pair.master.try_clone_reader();
        let writer = pair.master.take_writer();
        let (reader, writer) = match (reader, writer) {
            (Ok(r), Ok(w)) => (r, w),
            (Err(e), _) | (_, Err(e)) => {
                kill_quietly(&child);
                return Err(ShellmuxError::ProcessSpawnFailure(format!(
                    "failed to attach to PTY: {e}"
                )));
            }
        };

        let (tx, rx) = mpsc::channel(OUTPUT_QUEUE_DEPTH);
        let process = Self {
            output: tokio::sync::Mutex::new(OutputQueue {
                rx,
                pending: Vec::new(),
                closed: false,
            }),
            writer: Mutex::new(writer),
            master: Mutex::new(pair.master),
            child,
            pid,
        };

        std::thread::Builder::new()
            .name("pty-reader".into())
            .spawn(move || pump_output(reader, tx))
            .map_err(|e| {
                ShellmuxError::ProcessSpawnFailure(format!("failed to start reader thread: {e}"))
            })?;

        info!(shell = %request.shell, pid = ?pid, rows = request.rows, cols = request.cols, "PTY spawned");
        Ok(process)
    }
}

/// Blocking loop run on the reader thread. Ends on EOF, on a read error, or
/// when the receiving side is gone.
fn pump_output(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<OutputChunk>) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            // EIO: every slave fd is closed, i.e. the shell is gone.
            Err(e) if cfg!(unix) && e.raw_os_error() == Some(5) => break,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                break;
            }
        }
    }
    debug!("PTY reader finished");
}

fn kill_quietly(child: &Mutex<Box<dyn Child + Send + Sync>>) {
    let mut child = child.lock().unwrap_or_else(|e| e.into_inner());
    if matches!(child.try_wait(), Ok(None)) {
        let _ = child.kill();
    }
}

#[async_trait]
impl Process for PtyProcess {
    async fn read(&self, max_bytes: usize, timeout: Duration) -> ShellmuxResult<ReadOutcome> {
        let max_bytes = max_bytes.max(1);
        let mut guard = self.output.lock().await;
        let queue = &mut *guard;

        if !queue.pending.is_empty() {
            return Ok(ReadOutcome::Data(queue.take(max_bytes)));
        }
        if queue.closed {
            return Ok(ReadOutcome::EndOfStream);
        }

        match tokio::time::timeout(timeout, queue.rx.recv()).await {
            Err(_) => Ok(ReadOutcome::Timeout),
            Ok(None) => {
                queue.closed = true;
                Ok(ReadOutcome::EndOfStream)
            }
            Ok(Some(Ok(chunk))) => {
                queue.pending = chunk;
                Ok(ReadOutcome::Data(queue.take(max_bytes)))
            }
            Ok(Some(Err(e))) => Err(ShellmuxError::Io(e)),
        }
    }

    fn write(&self, data: &[u8]) -> ShellmuxResult<()> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    fn set_window_size(&self, rows: u16, cols: u16) -> ShellmuxResult<()> {
        let master = self.master.lock().unwrap_or_else(|e| e.into_inner());
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ShellmuxError::Other(format!("PTY resize failed: {e}")))?;
        debug!(rows, cols, "PTY resized");
        Ok(())
    }

    fn is_alive(&self) -> bool {
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        matches!(child.try_wait(), Ok(None))
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn terminate(&self, grace: Duration) -> ShellmuxResult<()> {
        if !self.is_alive() {
            return Ok(());
        }

        // portable-pty sends SIGHUP first and escalates to SIGKILL itself;
        // it sleeps while doing so, hence the blocking pool.
        let child = Arc::clone(&self.child);
        let killed = tokio::task::spawn_blocking(move || {
            let mut child = child.lock().unwrap_or_else(|e| e.into_inner());
            child.kill()
        })
        .await
        .map_err(|e| ShellmuxError::Other(format!("join error: {e}")))?;
        if let Err(e) = killed {
            if self.is_alive() {
                return Err(ShellmuxError::Io(e));
            }
        }

        let deadline = Instant::now() + grace;
        while self.is_alive() {
            if Instant::now() >= deadline {
                warn!(pid = ?self.pid, "PTY child still running after grace period");
                return Err(ShellmuxError::Other(format!(
                    "process {:?} did not exit within {grace:?}",
                    self.pid
                )));
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
        info!(pid = ?self.pid, "PTY child exited");
        Ok(())
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        kill_quietly(&self.child);
    }
}

/// Spawns [`PtyProcess`]es on the native PTY system.
#[derive(Debug, Default, Clone, Copy)]
pub struct PtySpawner;

impl ProcessSpawner for PtySpawner {
    fn spawn(&self, request: &SpawnRequest) -> ShellmuxResult<Box<dyn Process>> {
        Ok(Box::new(PtyProcess::spawn(request)?))
    }
}
