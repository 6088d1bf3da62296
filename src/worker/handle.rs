//! Worker process handle and state machine

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::ManagerConfig;
use crate::correlate::RequestCorrelator;
use crate::error::{AgentError, Result};

use super::command::build_command;
use super::reader::{spawn_output_pump, spawn_stderr_drain};

/// Grace period for the process to exit after stdin closes before it is
/// forcibly killed
const GRACEFUL_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle state of a worker process
///
/// `Ready` covers both busy and idle workers; requests are correlated by
/// id, so in-flight work is tracked per request, not as a process state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Process spawned, readiness signal not yet observed
    Spawning,
    /// Worker signaled readiness and accepts requests
    Ready,
    /// Process exited, crashed, or was killed
    Terminated,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawning => f.write_str("spawning"),
            Self::Ready => f.write_str("ready"),
            Self::Terminated => f.write_str("terminated"),
        }
    }
}

/// State shared between the handle and its background tasks
pub(super) struct WorkerShared {
    pub(super) key: String,
    pub(super) state_tx: watch::Sender<WorkerState>,
    pub(super) exit: parking_lot::Mutex<Option<ExitStatus>>,
    pub(super) correlator: Arc<RequestCorrelator>,
    pub(super) exit_notify: mpsc::UnboundedSender<String>,
}

impl WorkerShared {
    /// Flip Spawning to Ready exactly once
    ///
    /// A readiness signal observed after termination (or a duplicate one)
    /// is ignored.
    pub(super) fn mark_ready(&self) {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == WorkerState::Spawning {
                *state = WorkerState::Ready;
                true
            } else {
                false
            }
        });
        if changed {
            log::info!("[{}] Worker ready", self.key);
        }
    }

    /// Transition to Terminated and reject all outstanding requests
    ///
    /// Idempotent: the kill path and the output pump's EOF path may both
    /// arrive here; only the first has any effect.
    pub(super) fn finalize(&self, exit: Option<ExitStatus>) {
        {
            let mut slot = self.exit.lock();
            if slot.is_none() {
                *slot = exit;
            }
        }
        let previous = self.state_tx.send_replace(WorkerState::Terminated);
        if previous == WorkerState::Terminated {
            return;
        }

        log::info!(
            "[{}] Worker terminated{}",
            self.key,
            exit.map(|s| format!(" ({s})")).unwrap_or_default()
        );
        self.correlator.fail_all(*self.exit.lock());
        let _ = self.exit_notify.send(self.key.clone());
    }
}

/// Handle to one external worker process
///
/// Owned exclusively by its session. Spawning pipes all three stdio
/// streams, starts the output pump and stderr drain tasks, and leaves the
/// handle in `Spawning` until the readiness signal is decoded.
pub struct WorkerHandle {
    pid: Option<u32>,
    stdin: Mutex<Option<ChildStdin>>,
    child: Arc<Mutex<Option<Child>>>,
    shared: Arc<WorkerShared>,
    state_rx: watch::Receiver<WorkerState>,
    pump_task: Option<JoinHandle<()>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn a worker process for the given session key
    ///
    /// Responses and progress decoded from the worker's stdout are routed
    /// through `correlator`; `exit_notify` receives the session key once
    /// the process terminates.
    ///
    /// # Errors
    /// Returns `SpawnFailure` if the process cannot be started
    pub(crate) async fn spawn(
        key: &str,
        config: &ManagerConfig,
        correlator: Arc<RequestCorrelator>,
        exit_notify: mpsc::UnboundedSender<String>,
    ) -> Result<Self> {
        let mut cmd = build_command(config)?;
        let mut child = cmd.spawn().map_err(|e| {
            if !config.runtime_dir.exists() {
                return AgentError::spawn_failure(format!(
                    "Runtime directory does not exist: {}",
                    config.runtime_dir.display()
                ));
            }
            AgentError::spawn_failure(format!("Failed to start worker: {e}"))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::spawn_failure("Failed to get stdin handle"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::spawn_failure("Failed to get stdout handle"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::spawn_failure("Failed to get stderr handle"))?;

        let pid = child.id();
        log::info!("[{key}] Spawned worker process (pid {pid:?})");

        let (state_tx, state_rx) = watch::channel(WorkerState::Spawning);
        let shared = Arc::new(WorkerShared {
            key: key.to_string(),
            state_tx,
            exit: parking_lot::Mutex::new(None),
            correlator,
            exit_notify,
        });

        let child = Arc::new(Mutex::new(Some(child)));
        let pump_task = spawn_output_pump(
            stdout,
            Arc::clone(&child),
            Arc::clone(&shared),
            config.max_line_length,
            config.ready_sentinel.clone(),
        );
        let stderr_task = spawn_stderr_drain(
            stderr,
            Arc::clone(&shared),
            config.ready_sentinel.clone(),
        );

        Ok(Self {
            pid,
            stdin: Mutex::new(Some(stdin)),
            child,
            shared,
            state_rx,
            pump_task: Some(pump_task),
            stderr_task: Some(stderr_task),
        })
    }

    /// OS process id, if the process started
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state_rx.borrow()
    }

    /// Whether the process has terminated
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.state() == WorkerState::Terminated
    }

    /// Exit status, once the process has been reaped
    #[must_use]
    pub fn exit_status(&self) -> Option<ExitStatus> {
        *self.shared.exit.lock()
    }

    /// Wait for the readiness signal within the startup deadline
    ///
    /// Resolves as soon as the decoded `ready` event (or the configured
    /// sentinel) flips the state; no polling is involved.
    ///
    /// # Errors
    /// Returns `StartupTimeout` if the deadline passes first, or
    /// `WorkerTerminated` if the process dies before signaling
    pub async fn wait_ready(&self, deadline: Duration) -> Result<()> {
        let mut rx = self.state_rx.clone();
        match tokio::time::timeout(deadline, rx.wait_for(|s| *s != WorkerState::Spawning)).await {
            Ok(Ok(state)) if *state == WorkerState::Ready => Ok(()),
            Ok(_) => Err(AgentError::worker_terminated(self.exit_status())),
            Err(_) => Err(AgentError::startup_timeout(deadline)),
        }
    }

    /// Write one encoded request line to the worker's stdin
    ///
    /// # Errors
    /// Returns `WorkerTerminated` if the process is gone, or an I/O error
    /// if the write fails
    pub async fn send_line(&self, line: &str) -> Result<()> {
        if self.is_terminated() {
            return Err(AgentError::worker_terminated(self.exit_status()));
        }

        let mut stdin = self.stdin.lock().await;
        let Some(stdin) = stdin.as_mut() else {
            return Err(AgentError::worker_terminated(self.exit_status()));
        };
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Terminate the worker process
    ///
    /// Closes stdin so the wrapper can exit on EOF, escalates to a kill
    /// after a grace period, and rejects all outstanding requests with
    /// `WorkerTerminated`. Safe to call more than once.
    pub async fn kill(&self) {
        if let Some(mut stdin) = self.stdin.lock().await.take() {
            let _ = stdin.shutdown().await;
        }

        let exit = {
            let mut guard = self.child.lock().await;
            match guard.take() {
                Some(mut child) => {
                    match tokio::time::timeout(GRACEFUL_EXIT_TIMEOUT, child.wait()).await {
                        Ok(status) => status.ok(),
                        Err(_) => {
                            let _ = child.start_kill();
                            child.wait().await.ok()
                        }
                    }
                }
                // Output pump already reaped it.
                None => None,
            }
        };

        self.shared.finalize(exit);
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.pump_task.take() {
            task.abort();
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        // Best effort without blocking; kill_on_drop covers a held lock.
        if let Ok(mut guard) = self.child.try_lock()
            && let Some(mut child) = guard.take()
        {
            let _ = child.start_kill();
        }
        self.shared.finalize(None);
    }
}
