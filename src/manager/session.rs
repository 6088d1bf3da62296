//! Per-key session state
//!
//! A session pairs one caller key with exactly one live worker process and
//! the correlation table for its in-flight requests.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::config::ManagerConfig;
use crate::correlate::{ProgressSink, RequestCorrelator};
use crate::error::{AgentError, Result};
use crate::protocol::{Mode, RequestId, WorkerRequest};
use crate::worker::{WorkerHandle, WorkerState};

/// Snapshot of one session's externally visible state
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Caller key the session belongs to
    pub key: String,
    /// Worker lifecycle state
    pub state: WorkerState,
    /// OS process id of the worker, if it started
    pub pid: Option<u32>,
    /// When the session was created (wall-clock time)
    pub created_at: DateTime<Utc>,
    /// Time since the last request activity
    pub idle_for: Duration,
    /// Number of requests currently awaiting responses
    pub in_flight: usize,
}

/// One live conversation session backed by a warm worker process
///
/// Requests may be pipelined: responses correlate by request id, not send
/// order, so concurrent operations on the same session are legal and none
/// blocks another beyond the worker's own processing.
pub struct Session {
    key: String,
    worker: WorkerHandle,
    correlator: Arc<RequestCorrelator>,
    created_at: DateTime<Utc>,
    last_activity: parking_lot::Mutex<Instant>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Spawn a worker and wait for it to become ready
    ///
    /// A worker that fails to signal readiness within the startup deadline
    /// is torn down before the error is returned, so a failed creation
    /// leaves nothing behind.
    ///
    /// # Errors
    /// Returns `SpawnFailure`, `StartupTimeout`, or `WorkerTerminated` if
    /// the worker cannot be brought up
    pub(crate) async fn create(
        key: &str,
        config: &ManagerConfig,
        exit_notify: mpsc::UnboundedSender<String>,
    ) -> Result<Arc<Self>> {
        let correlator = Arc::new(RequestCorrelator::new());
        let worker =
            WorkerHandle::spawn(key, config, Arc::clone(&correlator), exit_notify).await?;

        if let Err(e) = worker.wait_ready(config.startup_timeout).await {
            worker.kill().await;
            return Err(e);
        }

        Ok(Arc::new(Self {
            key: key.to_string(),
            worker,
            correlator,
            created_at: Utc::now(),
            last_activity: parking_lot::Mutex::new(Instant::now()),
        }))
    }

    /// Caller key this session belongs to
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the backing worker has terminated
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.worker.is_terminated()
    }

    /// Time since the last request activity
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Number of requests currently awaiting responses
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.correlator.len()
    }

    pub(crate) fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Send one request and await its correlated response
    ///
    /// Registers a pending entry, writes the encoded line, and waits up to
    /// `deadline` for settlement. On expiry the entry is removed and
    /// `RequestTimeout` returned; the worker itself is left alone - a slow
    /// request must not cost the warm-process investment. Worker death
    /// settles the request with `WorkerTerminated` instead.
    ///
    /// `progress` optionally receives incremental output for this request,
    /// always strictly before the settlement.
    ///
    /// # Errors
    /// Returns `RequestTimeout`, `WorkerTerminated`, `WorkerReported`, or
    /// an I/O error from the write
    pub async fn request(
        &self,
        mode: Mode,
        prompt: String,
        deadline: Duration,
        progress: Option<ProgressSink>,
    ) -> Result<serde_json::Value> {
        self.touch();

        let request_id = RequestId::generate();
        let reply_rx = self
            .correlator
            .register(request_id.clone(), mode, deadline, progress);

        let line = WorkerRequest {
            prompt,
            mode,
            request_id: request_id.clone(),
        }
        .encode()?;

        log::debug!("[{}] Sending {mode} request {request_id}", self.key);
        if let Err(e) = self.worker.send_line(&line).await {
            // The request never reached the worker; don't leave the entry
            // for the timer to expire.
            self.correlator.discard(&request_id);
            return Err(e);
        }

        match reply_rx.await {
            Ok(reply) => {
                self.touch();
                reply
            }
            // Sender dropped without settling: the worker died and the
            // table was drained concurrently with our receive.
            Err(_) => Err(AgentError::worker_terminated(self.worker.exit_status())),
        }
    }

    /// Terminate the backing worker
    ///
    /// All outstanding requests settle with `WorkerTerminated`.
    pub(crate) async fn shutdown(&self) {
        self.worker.kill().await;
    }

    /// Snapshot the session's externally visible state
    #[must_use]
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            key: self.key.clone(),
            state: self.worker.state(),
            pid: self.worker.pid(),
            created_at: self.created_at,
            idle_for: self.idle_for(),
            in_flight: self.in_flight(),
        }
    }
}
