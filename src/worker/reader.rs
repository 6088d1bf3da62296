//! Output pumping for worker processes
//!
//! Two background tasks per worker: the stdout pump decodes protocol events
//! and routes them, and the stderr drain keeps the runtime's logging from
//! blocking the process while forwarding it to our logs.

use futures::StreamExt;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::protocol::{WorkerEvent, decode_line};

use super::handle::WorkerShared;

/// How long to wait for the process to exit after its stdout closes before
/// escalating to a kill
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Spawn the stdout pump task
///
/// Reads newline-delimited records (partial trailing records are buffered
/// by the codec until completed), decodes each complete line, and routes:
/// readiness to the state machine, responses to the correlator, progress to
/// the registered sinks, and everything else to the logs. On EOF the
/// process is reaped and the handle finalized, which rejects every
/// outstanding request.
pub(super) fn spawn_output_pump(
    stdout: ChildStdout,
    child: Arc<Mutex<Option<Child>>>,
    shared: Arc<WorkerShared>,
    max_line_length: usize,
    ready_sentinel: Option<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(max_line_length));

        while let Some(item) = lines.next().await {
            match item {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    route_event(&line, &shared, max_line_length, ready_sentinel.as_deref());
                }
                Err(e) => {
                    // Codec errors are per-line; decoding continues.
                    log::warn!("[{}] Discarded unreadable output line: {e}", shared.key);
                }
            }
        }

        let exit = reap(&child).await;
        shared.finalize(exit);
    })
}

/// Spawn the stderr drain task
///
/// The runtime logs freely on stderr; draining prevents pipe-buffer stalls.
/// Legacy runtime builds print their readiness banner here, so the sentinel
/// shim applies to these lines too.
pub(super) fn spawn_stderr_drain(
    stderr: ChildStderr,
    shared: Arc<WorkerShared>,
    ready_sentinel: Option<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(sentinel) = ready_sentinel.as_deref()
                && line.contains(sentinel)
            {
                shared.mark_ready();
            }
            log::debug!("[{}] worker stderr: {line}", shared.key);
        }
    })
}

fn route_event(
    line: &str,
    shared: &WorkerShared,
    max_line_length: usize,
    ready_sentinel: Option<&str>,
) {
    match decode_line(line, max_line_length) {
        WorkerEvent::Ready => shared.mark_ready(),
        WorkerEvent::Response {
            request_id,
            outcome,
        } => shared.correlator.settle(&request_id, outcome),
        WorkerEvent::Progress {
            request_id,
            message,
        } => shared
            .correlator
            .forward_progress(request_id.as_ref(), &message),
        WorkerEvent::Diagnostic(text) => {
            // Compatibility shim: free-text readiness marker from legacy
            // runtime builds that predate the structured ready event.
            if let Some(sentinel) = ready_sentinel
                && text.contains(sentinel)
            {
                shared.mark_ready();
            }
            // Free-text output doubles as progress for streaming callers.
            shared.correlator.forward_progress(None, &text);
            log::debug!("[{}] worker: {text}", shared.key);
        }
    }
}

/// Wait for the exited process and collect its status
///
/// The kill path may have taken the child already; in that case the status
/// is recorded there.
async fn reap(child: &Mutex<Option<Child>>) -> Option<ExitStatus> {
    let mut guard = child.lock().await;
    let mut child = guard.take()?;
    match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
        Ok(status) => status.ok(),
        Err(_) => {
            // stdout closed but the process lingers; force it down.
            let _ = child.start_kill();
            child.wait().await.ok()
        }
    }
}
