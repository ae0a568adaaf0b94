//! A single shell session: one process, its read loop and its history.

use super::history::CommandHistory;
use super::SessionServices;
use crate::config::SessionSettings;
use crate::process::{Process, ReadOutcome, SpawnRequest};
use shellmux_core::{
    Broadcaster, Clock, HistoryEntry, SessionStatus, ShellmuxError, ShellmuxResult, TerminalEvent,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument, Span};

/// An interactive shell on a pseudo-terminal.
///
/// The session exclusively owns its process. Output is pushed to the
/// broadcaster by a read-loop task started in [`start`](Self::start);
/// input, resize and stop are delegated straight to the process.
pub struct TerminalSession {
    id: String,
    working_directory: PathBuf,
    settings: SessionSettings,
    services: SessionServices,
    process: OnceLock<Arc<dyn Process>>,
    active: Arc<AtomicBool>,
    history: Mutex<CommandHistory>,
    size: Mutex<(u16, u16)>,
    reader: Mutex<Option<JoinHandle<()>>>,
    created_at: String,
    span: Span,
}

impl TerminalSession {
    pub fn new(
        id: String,
        working_directory: PathBuf,
        settings: SessionSettings,
        services: SessionServices,
    ) -> Self {
        let span = info_span!("terminal", session_id = %id);
        let created_at = services.clock.timestamp();
        Self {
            history: Mutex::new(CommandHistory::new(settings.max_history)),
            size: Mutex::new((settings.rows, settings.cols)),
            id,
            working_directory,
            settings,
            services,
            process: OnceLock::new(),
            active: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(None),
            created_at,
            span,
        }
    }

    /// Spawn the process and begin streaming its output.
    ///
    /// On failure the session stays unstarted and should be discarded.
    pub fn start(&self) -> ShellmuxResult<()> {
        let _enter = self.span.enter();
        if self.process.get().is_some() {
            return Err(ShellmuxError::Other(format!(
                "session {} already started",
                self.id
            )));
        }

        let (rows, cols) = self.size();
        let request = SpawnRequest {
            shell: self.settings.shell.clone(),
            working_directory: self.working_directory.clone(),
            rows,
            cols,
        };
        let process: Arc<dyn Process> = Arc::from(self.services.spawner.spawn(&request)?);
        if let Err(e) = process.set_window_size(rows, cols) {
            warn!(error = %e, "initial window size not applied");
        }
        if self.process.set(Arc::clone(&process)).is_err() {
            return Err(ShellmuxError::Other(format!(
                "session {} already started",
                self.id
            )));
        }
        self.active.store(true, Ordering::SeqCst);
        let pid = process.pid();

        // Ready goes out before the loop can publish any output.
        self.services.broadcaster.broadcast(TerminalEvent::TerminalReady {
            session_id: self.id.clone(),
            shell: self.settings.shell.clone(),
            working_directory: self.working_directory.display().to_string(),
            timestamp: self.services.clock.timestamp(),
        });

        let read_loop = ReadLoop {
            session_id: self.id.clone(),
            process,
            active: Arc::clone(&self.active),
            broadcaster: Arc::clone(&self.services.broadcaster),
            clock: Arc::clone(&self.services.clock),
            read_chunk: self.settings.read_chunk,
            read_timeout: self.settings.read_timeout,
            io_backoff: self.settings.io_backoff,
        };
        let handle = tokio::spawn(read_loop.run().instrument(self.span.clone()));
        *self.reader.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        info!(
            pid = ?pid,
            shell = %self.settings.shell,
            cwd = %self.working_directory.display(),
            rows,
            cols,
            "terminal session started"
        );
        Ok(())
    }

    /// Cancel the read loop and make sure the process is gone. Idempotent.
    pub async fn stop(&self) {
        async {
            let Some(process) = self.process.get() else {
                return;
            };
            let reader = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take();
            if reader.is_none() && !self.is_active() && !process.is_alive() {
                return;
            }

            if let Some(handle) = reader {
                handle.abort();
                let _ = handle.await;
            }
            if process.is_alive() {
                if let Err(e) = process.terminate(self.settings.terminate_grace).await {
                    warn!(error = %e, "process did not terminate cleanly");
                }
            }
            self.active.store(false, Ordering::SeqCst);
            info!("terminal session stopped");
        }
        .instrument(self.span.clone())
        .await
    }

    /// Forward raw input to the process.
    ///
    /// A line-terminated submission is also recorded in history. Input for a
    /// process that is no longer alive is dropped with a warning.
    pub fn send_input(&self, data: &str) -> ShellmuxResult<()> {
        let _enter = self.span.enter();
        let Some(process) = self.live_process() else {
            warn!(bytes = data.len(), "input dropped, process not running");
            return Ok(());
        };

        if let Err(e) = process.write(data.as_bytes()) {
            // The process may exit between the liveness check and the write.
            if process.is_alive() {
                return Err(e);
            }
            warn!(error = %e, "input dropped, process exited during write");
            return Ok(());
        }

        if data.ends_with('\n') || data.ends_with('\r') {
            let command = data.trim();
            if !command.is_empty() {
                self.history
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .record(command, self.services.clock.timestamp());
            }
        }
        Ok(())
    }

    /// Change the pty window size. Ignored when the process is not alive.
    pub fn resize(&self, rows: u16, cols: u16) -> ShellmuxResult<()> {
        let _enter = self.span.enter();
        if rows == 0 || cols == 0 {
            return Err(ShellmuxError::InvalidResize {
                rows: rows.into(),
                cols: cols.into(),
            });
        }
        let Some(process) = self.live_process() else {
            debug!(rows, cols, "resize ignored, process not running");
            return Ok(());
        };
        process.set_window_size(rows, cols)?;
        *self.size.lock().unwrap_or_else(|e| e.into_inner()) = (rows, cols);
        Ok(())
    }

    /// The last `limit` commands (all if `None`), newest last.
    pub fn history(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .recent(limit)
    }

    pub fn status(&self) -> SessionStatus {
        let (rows, cols) = self.size();
        SessionStatus {
            id: self.id.clone(),
            active: self.is_active(),
            working_directory: self.working_directory.display().to_string(),
            shell: self.settings.shell.clone(),
            process_alive: self.is_process_alive(),
            pid: self.process.get().and_then(|p| p.pid()),
            history_length: self.history.lock().unwrap_or_else(|e| e.into_inner()).len(),
            rows,
            cols,
            created_at: self.created_at.clone(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// `(rows, cols)`
    pub fn size(&self) -> (u16, u16) {
        *self.size.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_process_alive(&self) -> bool {
        self.process.get().is_some_and(|p| p.is_alive())
    }

    fn live_process(&self) -> Option<&Arc<dyn Process>> {
        self.process.get().filter(|p| p.is_alive())
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        // Dropping the loop's handle on the process lets the process
        // implementation kill whatever is still running.
        if let Some(handle) = self.reader.get_mut().ok().and_then(Option::take) {
            handle.abort();
        }
    }
}

/// State moved into a session's read-loop task.
struct ReadLoop {
    session_id: String,
    process: Arc<dyn Process>,
    active: Arc<AtomicBool>,
    broadcaster: Arc<dyn Broadcaster>,
    clock: Arc<dyn Clock>,
    read_chunk: usize,
    read_timeout: Duration,
    io_backoff: Duration,
}

impl ReadLoop {
    async fn run(self) {
        let mut decoder = Utf8Stream::default();
        while self.active.load(Ordering::SeqCst) {
            match self.process.read(self.read_chunk, self.read_timeout).await {
                Ok(ReadOutcome::Data(bytes)) => {
                    let text = decoder.decode(&bytes);
                    self.publish(text);
                }
                Ok(ReadOutcome::Timeout) => {
                    if !self.process.is_alive() {
                        debug!("process exited without closing its output");
                        self.finish(&mut decoder);
                        break;
                    }
                }
                Ok(ReadOutcome::EndOfStream) => {
                    self.finish(&mut decoder);
                    break;
                }
                Err(e) => {
                    warn!(error = %e, backoff = ?self.io_backoff, "read failed, retrying");
                    tokio::time::sleep(self.io_backoff).await;
                }
            }
        }
        debug!("read loop finished");
    }

    fn publish(&self, data: String) {
        if data.is_empty() {
            return;
        }
        self.broadcaster.broadcast(TerminalEvent::TerminalOutput {
            session_id: self.session_id.clone(),
            data,
            timestamp: self.clock.timestamp(),
        });
    }

    fn finish(&self, decoder: &mut Utf8Stream) {
        self.publish(decoder.flush());
        self.active.store(false, Ordering::SeqCst);
        self.broadcaster.broadcast(TerminalEvent::TerminalExited {
            session_id: self.session_id.clone(),
            timestamp: self.clock.timestamp(),
        });
        info!("process closed its output");
    }
}

/// Incremental UTF-8 decoding that carries an incomplete trailing sequence
/// over to the next chunk. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Stream {
    carry: Vec<u8>,
}

impl Utf8Stream {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.carry) {
                Ok(s) => {
                    out.push_str(s);
                    self.carry.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.carry[..valid]).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.carry.drain(..valid + bad);
                        }
                        None => {
                            self.carry.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Whatever is still held back, decoded lossily.
    fn flush(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        rest
    }
}
