//! Request correlation for in-flight worker operations
//!
//! Each request sent down a worker's stdin registers an entry here keyed by
//! its request id; the worker's output pump settles entries as correlated
//! response lines arrive, and a per-request timer expires entries whose
//! deadline passes first. Settlement is exactly-once by construction: an
//! entry is removed from the table before its caller is resolved, and the
//! oneshot channel cannot deliver twice. A timeout racing a late response is
//! therefore a logged no-op, whichever side loses, and an entry is always
//! eventually removed - settled, expired, or rejected at worker death -
//! even when its caller has gone away.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::error::{AgentError, Result};
use crate::protocol::{Mode, RequestId, ResponseOutcome};

/// Sink receiving incremental progress text for one request
pub type ProgressSink = mpsc::UnboundedSender<String>;

struct Pending {
    mode: Mode,
    reply_tx: oneshot::Sender<Result<serde_json::Value>>,
    progress: Option<ProgressSink>,
}

impl Pending {
    /// Resolve the caller, closing the progress channel first so every
    /// streamed event is observable strictly before the settlement
    fn resolve(self, reply: Result<serde_json::Value>, request_id: &RequestId) {
        drop(self.progress);
        if self.reply_tx.send(reply).is_err() {
            log::debug!(
                "Caller for {} request {request_id} went away before settlement",
                self.mode
            );
        }
    }
}

/// Table of outstanding requests awaiting correlated responses
///
/// All mutations happen under one lock with short, non-async critical
/// sections; channel sends occur after the entry has left the table.
#[derive(Default)]
pub struct RequestCorrelator {
    pending: Mutex<HashMap<RequestId, Pending>>,
}

impl RequestCorrelator {
    /// Create an empty correlator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request and return the caller's settlement future
    ///
    /// A timer task expires the entry with `RequestTimeout` once `deadline`
    /// passes, so the entry is removed on schedule even if the caller has
    /// stopped waiting. `progress` optionally receives incremental output
    /// for this request.
    pub fn register(
        self: &Arc<Self>,
        request_id: RequestId,
        mode: Mode,
        deadline: Duration,
        progress: Option<ProgressSink>,
    ) -> oneshot::Receiver<Result<serde_json::Value>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let previous = self.pending.lock().insert(
            request_id.clone(),
            Pending {
                mode,
                reply_tx,
                progress,
            },
        );
        // Ids are uuid-generated; a collision would mean a caller reused one.
        if previous.is_some() {
            log::error!("Duplicate pending request id {request_id}; evicting older entry");
        }

        let correlator = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            correlator.expire(&request_id, deadline);
        });

        reply_rx
    }

    /// Settle a pending request with a worker response
    ///
    /// Unknown ids are ignored: the entry may already have been removed by a
    /// timeout or by worker death, and a late response must not fail anyone.
    pub fn settle(&self, request_id: &RequestId, outcome: ResponseOutcome) {
        let Some(entry) = self.pending.lock().remove(request_id) else {
            log::debug!("Dropping response for unknown or already-settled request {request_id}");
            return;
        };

        let reply = match outcome {
            ResponseOutcome::Result(value) => Ok(value),
            ResponseOutcome::Error(message) => Err(AgentError::worker_reported(message)),
        };
        entry.resolve(reply, request_id);
    }

    /// Expire a pending request whose deadline passed
    ///
    /// Settles the caller with `RequestTimeout` and removes the entry. The
    /// worker is deliberately left alone: a slow request must not cost the
    /// warm-process investment. No-op if a response won the race.
    pub fn expire(&self, request_id: &RequestId, deadline: Duration) {
        let Some(entry) = self.pending.lock().remove(request_id) else {
            return;
        };
        log::warn!(
            "{} request {request_id} expired after {}s without a response",
            entry.mode,
            deadline.as_secs()
        );
        let mode = entry.mode;
        entry.resolve(Err(AgentError::request_timeout(mode, deadline)), request_id);
    }

    /// Remove a pending request without settling it
    ///
    /// Used when the request never reached the worker (the write failed);
    /// the caller already holds the original error.
    pub fn discard(&self, request_id: &RequestId) {
        self.pending.lock().remove(request_id);
    }

    /// Reject every outstanding request because the worker died
    ///
    /// Drains the whole table atomically; the pending table is empty when
    /// this returns.
    pub fn fail_all(&self, exit: Option<ExitStatus>) {
        let drained: Vec<(RequestId, Pending)> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };
        if drained.is_empty() {
            return;
        }

        log::warn!(
            "Worker terminated with {} request(s) outstanding",
            drained.len()
        );
        for (request_id, entry) in drained {
            entry.resolve(Err(AgentError::worker_terminated(exit)), &request_id);
        }
    }

    /// Forward a progress message to the matching sink(s)
    ///
    /// A message tied to a request id goes only to that request; an untied
    /// message goes to every registered sink (there is normally at most one
    /// streaming execute in flight). Disconnected sinks are ignored - a
    /// dropped consumer must not disturb the request itself.
    pub fn forward_progress(&self, request_id: Option<&RequestId>, message: &str) {
        let pending = self.pending.lock();
        match request_id {
            Some(id) => {
                if let Some(entry) = pending.get(id)
                    && let Some(sink) = &entry.progress
                {
                    let _ = sink.send(message.to_string());
                }
            }
            None => {
                for entry in pending.values() {
                    if let Some(sink) = &entry.progress {
                        let _ = sink.send(message.to_string());
                    }
                }
            }
        }
    }

    /// Number of outstanding requests
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether no requests are outstanding
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
