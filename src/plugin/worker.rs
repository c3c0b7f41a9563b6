// ABOUTME: One live worker process -- spawn, line-protocol reader task, and pending-call bookkeeping.
// ABOUTME: Call ids are monotonic per worker; a late result after timeout is discarded with a log line.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};

use switchyard_core::ToolDefinition;

use super::manifest::PluginManifest;
use super::protocol::{encode_line, parse_line, HostMessage, WorkerMessage};

/// Out-of-band worker activity surfaced to the host's monitor task.
/// `result` messages are not here; they resolve pending calls directly.
#[derive(Debug)]
pub enum WorkerSignal {
    Ready(Vec<ToolDefinition>),
    RegisterTool(ToolDefinition),
    Fatal(String),
    EmitEvent { event: String, payload: Value },
    /// The worker's stdout closed; the process is gone or going.
    Exited,
}

/// What a worker answered for one call.
#[derive(Debug, Clone)]
pub struct CallOutput {
    pub output: Value,
    pub is_error: bool,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<CallOutput>>>>;

/// Removes a call's pending entry when its future is dropped, covering
/// timeouts, write failures, and a caller's cancellation arm winning a
/// `select!`. Removal after the reader already resolved the call is a no-op.
struct PendingEntryGuard {
    pending: PendingMap,
    id: u64,
}

impl Drop for PendingEntryGuard {
    fn drop(&mut self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(&self.id);
    }
}

/// Handle to a spawned worker process.
pub struct WorkerHandle {
    name: String,
    child: tokio::sync::Mutex<Child>,
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: PendingMap,
    next_call_id: AtomicU64,
    call_timeout: Duration,
}

impl WorkerHandle {
    /// Spawn the worker described by `manifest` in `dir`. The returned
    /// receiver carries the handshake and everything after it; the caller
    /// must first await [`WorkerSignal::Ready`] on it.
    pub fn spawn(
        manifest: &PluginManifest,
        dir: &Path,
        call_timeout: Duration,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<WorkerSignal>)> {
        let entry = manifest.entry_path(dir);
        tracing::info!(
            plugin = %manifest.name,
            command = %manifest.command,
            entry = %entry.display(),
            "Spawning plugin worker"
        );

        let mut child = Command::new(&manifest.command)
            .args(&manifest.args)
            .arg(&entry)
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn worker for plugin '{}'", manifest.name))?;

        let stdin = child
            .stdin
            .take()
            .context("Worker stdin not captured")?;
        let stdout = child
            .stdout
            .take()
            .context("Worker stdout not captured")?;
        let stderr = child
            .stderr
            .take()
            .context("Worker stderr not captured")?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        // Reader task: one line, one protocol message.
        let reader_pending = Arc::clone(&pending);
        let reader_name = manifest.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Some(parsed) = parse_line(&line) else {
                            continue;
                        };
                        let message = match parsed {
                            Ok(message) => message,
                            Err(error) => {
                                tracing::warn!(
                                    plugin = %reader_name,
                                    error = %error,
                                    line = %line.chars().take(200).collect::<String>(),
                                    "Ignoring malformed worker line"
                                );
                                continue;
                            }
                        };
                        match message {
                            WorkerMessage::Result { id, output, is_error } => {
                                let sender = {
                                    let mut pending = reader_pending
                                        .lock()
                                        .unwrap_or_else(|e| e.into_inner());
                                    pending.remove(&id)
                                };
                                match sender {
                                    Some(sender) => {
                                        let _ = sender.send(CallOutput { output, is_error });
                                    }
                                    None => {
                                        tracing::warn!(
                                            plugin = %reader_name,
                                            call_id = id,
                                            "Discarding late or unknown tool result"
                                        );
                                    }
                                }
                            }
                            WorkerMessage::Ready { tools } => {
                                let _ = signal_tx.send(WorkerSignal::Ready(tools));
                            }
                            WorkerMessage::RegisterTool { tool } => {
                                let _ = signal_tx.send(WorkerSignal::RegisterTool(tool));
                            }
                            WorkerMessage::Error { message } => {
                                let _ = signal_tx.send(WorkerSignal::Fatal(message));
                            }
                            WorkerMessage::EmitEvent { event, payload } => {
                                let _ = signal_tx.send(WorkerSignal::EmitEvent { event, payload });
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        tracing::warn!(plugin = %reader_name, error = %error, "Worker stdout read failed");
                        break;
                    }
                }
            }
            let _ = signal_tx.send(WorkerSignal::Exited);
        });

        // Stderr goes straight to the log, attributed to the plugin.
        let stderr_name = manifest.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(plugin = %stderr_name, "worker stderr: {}", line);
            }
        });

        let handle = Arc::new(Self {
            name: manifest.name.clone(),
            child: tokio::sync::Mutex::new(child),
            stdin: tokio::sync::Mutex::new(stdin),
            pending,
            next_call_id: AtomicU64::new(1),
            call_timeout,
        });
        Ok((handle, signal_rx))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send one `execute` and wait for the matching `result`.
    ///
    /// Timeout resolves as an error here; the reader discards the late
    /// answer if it ever arrives. A crash mid-call is resolved by
    /// [`WorkerHandle::fail_pending`], not by this timeout.
    pub async fn call(&self, tool: &str, params: Value) -> Result<CallOutput> {
        let id = self.next_call_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.insert(id, tx);
        }
        let _guard = PendingEntryGuard {
            pending: Arc::clone(&self.pending),
            id,
        };

        let line = encode_line(&HostMessage::Execute {
            id,
            tool: tool.to_string(),
            params,
        })
        .context("Failed to encode execute message")?;

        let write_result = {
            let mut stdin = self.stdin.lock().await;
            async {
                stdin.write_all(line.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.flush().await
            }
            .await
        };
        if let Err(error) = write_result {
            return Err(error).with_context(|| {
                format!("Failed to write to worker '{}' for tool '{}'", self.name, tool)
            });
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(_)) => {
                anyhow::bail!("worker '{}' went away before answering call {}", self.name, id)
            }
            Err(_) => {
                tracing::warn!(
                    plugin = %self.name,
                    tool = %tool,
                    call_id = id,
                    timeout = ?self.call_timeout,
                    "Tool call timed out"
                );
                anyhow::bail!(
                    "tool '{}' timed out after {:?} in plugin '{}'",
                    tool,
                    self.call_timeout,
                    self.name
                )
            }
        }
    }

    /// Resolve every outstanding call as an error ToolResult-to-be. Used on
    /// crash and stop so callers never wait out the full timeout.
    pub fn fail_pending(&self, reason: &str) {
        let drained: Vec<(u64, oneshot::Sender<CallOutput>)> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain().collect()
        };
        if !drained.is_empty() {
            tracing::warn!(
                plugin = %self.name,
                count = drained.len(),
                reason = %reason,
                "Failing outstanding tool calls"
            );
        }
        for (_, sender) in drained {
            let _ = sender.send(CallOutput {
                output: Value::String(reason.to_string()),
                is_error: true,
            });
        }
    }

    pub fn pending_count(&self) -> usize {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.len()
    }

    /// Kill the process. Idempotent; an already-dead child is not an error.
    pub async fn kill(&self) {
        let mut child = self.child.lock().await;
        if let Err(error) = child.kill().await {
            tracing::debug!(plugin = %self.name, error = %error, "Kill failed (worker already gone)");
        }
        let _ = child.wait().await;
    }
}
