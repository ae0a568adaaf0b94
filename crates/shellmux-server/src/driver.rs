//! Line-delimited JSON control protocol.
//!
//! Each input line is one request; each request gets exactly one response
//! line. Broadcast events are interleaved on the same output as they occur.

use crate::session::TerminalManager;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shellmux_core::{ShellmuxError, ShellmuxResult, TerminalEvent};
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

/// A decoded request line.
#[derive(Debug, Deserialize)]
pub struct Request {
    /// Opaque correlation id, echoed in the response.
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(flatten)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    #[serde(rename_all = "camelCase")]
    Create {
        #[serde(default)]
        working_directory: Option<PathBuf>,
    },
    #[serde(rename_all = "camelCase")]
    Destroy { session_id: String },
    #[serde(rename_all = "camelCase")]
    Input { session_id: String, data: String },
    #[serde(rename_all = "camelCase")]
    Resize {
        session_id: String,
        rows: i64,
        cols: i64,
    },
    #[serde(rename_all = "camelCase")]
    Execute {
        command: String,
        #[serde(default)]
        working_directory: Option<PathBuf>,
    },
    List,
    Status,
    #[serde(rename_all = "camelCase")]
    History {
        session_id: String,
        #[serde(default)]
        limit: Option<usize>,
    },
}

/// Error body carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    /// The same request may succeed later (capacity, transient I/O).
    pub retryable: bool,
}

impl From<&ShellmuxError> for ErrorBody {
    fn from(e: &ShellmuxError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
            retryable: e.is_retryable(),
        }
    }
}

/// One response line: `{"type":"response","id":..,"ok":..,"result"|"error":..}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            kind: "response",
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Option<Value>, error: &ShellmuxError) -> Self {
        Self {
            kind: "response",
            id,
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Parse one input line and execute it. Blank lines produce no response.
pub async fn handle_line(manager: &TerminalManager, line: &str) -> Option<Response> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let raw: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            let err = ShellmuxError::InvalidRequest(format!("malformed JSON: {e}"));
            return Some(Response::failure(None, &err));
        }
    };
    // Recover the id before validating the rest so even a bad request can be
    // correlated.
    let id = raw.get("id").cloned();
    let request: Request = match serde_json::from_value(raw) {
        Ok(r) => r,
        Err(e) => {
            let err = ShellmuxError::InvalidRequest(e.to_string());
            return Some(Response::failure(id, &err));
        }
    };

    Some(match dispatch(manager, request.command).await {
        Ok(result) => Response::success(request.id, result),
        Err(e) => {
            debug!(error = %e, kind = e.kind(), "request failed");
            Response::failure(request.id, &e)
        }
    })
}

/// Execute a single command against the manager.
pub async fn dispatch(manager: &TerminalManager, command: Command) -> ShellmuxResult<Value> {
    match command {
        Command::Create { working_directory } => {
            let session_id = manager.create_session(working_directory).await?;
            Ok(json!({ "sessionId": session_id }))
        }
        Command::Destroy { session_id } => {
            let destroyed = manager.destroy_session(&session_id).await;
            Ok(json!({ "destroyed": destroyed }))
        }
        Command::Input { session_id, data } => {
            manager.send_input(&session_id, &data).await?;
            Ok(Value::Null)
        }
        Command::Resize {
            session_id,
            rows,
            cols,
        } => {
            let (r, c) = match (u16::try_from(rows), u16::try_from(cols)) {
                (Ok(r), Ok(c)) if r > 0 && c > 0 => (r, c),
                _ => return Err(ShellmuxError::InvalidResize { rows, cols }),
            };
            manager.resize_session(&session_id, r, c).await?;
            Ok(Value::Null)
        }
        Command::Execute {
            command,
            working_directory,
        } => {
            let session_id = manager
                .execute_command(&command, working_directory)
                .await?;
            Ok(json!({ "sessionId": session_id }))
        }
        Command::List => to_value(&manager.list_sessions().await),
        Command::Status => to_value(&manager.get_status().await),
        Command::History { session_id, limit } => {
            to_value(&manager.session_history(&session_id, limit).await?)
        }
    }
}

/// Serve requests from `input` until it reaches EOF, forwarding every event
/// from `events` to `output` in between.
pub async fn run<R, W>(
    manager: &TerminalManager,
    mut events: broadcast::Receiver<TerminalEvent>,
    input: R,
    output: &mut W,
) -> ShellmuxResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut events_open = true;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if let Some(response) = handle_line(manager, &line).await {
                            write_line(output, &response).await?;
                        }
                    }
                    None => {
                        debug!("control input closed");
                        break;
                    }
                }
            }

            event = events.recv(), if events_open => {
                match event {
                    Ok(event) => write_line(output, &event).await?,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event output lagging, events dropped");
                    }
                    Err(RecvError::Closed) => {
                        info!("event stream closed");
                        events_open = false;
                    }
                }
            }
        }
    }

    output.flush().await?;
    Ok(())
}

fn to_value<T: Serialize>(value: &T) -> ShellmuxResult<Value> {
    serde_json::to_value(value).map_err(|e| ShellmuxError::Other(format!("encode failed: {e}")))
}

async fn write_line<W, T>(output: &mut W, value: &T) -> ShellmuxResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(value)
        .map_err(|e| ShellmuxError::Other(format!("encode failed: {e}")))?;
    line.push(b'\n');
    output.write_all(&line).await?;
    output.flush().await?;
    Ok(())
}
