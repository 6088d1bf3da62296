//! Wire codec for worker stdio messages
//!
//! Requests are encoded as single JSON lines of the form
//! `{"prompt": ..., "mode": ..., "requestId": ...}`. Output lines are a
//! mixture of structured protocol events and free-text diagnostics from the
//! runtime's own logging; [`decode_line`] classifies one complete line.
//! Anything that is not a recognizable protocol event decodes to
//! [`WorkerEvent::Diagnostic`] and must never reach a pending request.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::Result;

/// Identifier correlating a request with its response
///
/// Unique within a session's lifetime; generated from a v4 UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh request id
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// View the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Logical operation requested from the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Decide whether a prompt is simple chat or a task
    Classify,
    /// Produce a short execution plan for a task
    Plan,
    /// Run the full agent loop on the prompt
    Execute,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classify => f.write_str("classify"),
            Self::Plan => f.write_str("plan"),
            Self::Execute => f.write_str("execute"),
        }
    }
}

/// Request envelope written to the worker's stdin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Prompt text for the worker
    pub prompt: String,
    /// Operation mode
    pub mode: Mode,
    /// Correlation id echoed back in the response
    #[serde(rename = "requestId")]
    pub request_id: RequestId,
}

impl WorkerRequest {
    /// Encode the request as one newline-terminated wire line
    ///
    /// # Errors
    /// Returns error if JSON serialization fails
    pub fn encode(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Final outcome carried by a correlated response line
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    /// Worker produced a result payload
    Result(serde_json::Value),
    /// Worker reported an error string
    Error(String),
}

/// One decoded line of worker output
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Worker finished initialization and accepts requests
    Ready,
    /// Incremental progress, optionally tied to a specific request
    Progress {
        /// Request the progress belongs to, when the worker says so
        request_id: Option<RequestId>,
        /// Human-readable progress text
        message: String,
    },
    /// Correlated response settling a pending request
    Response {
        /// Id of the request being settled
        request_id: RequestId,
        /// Result payload or error string
        outcome: ResponseOutcome,
    },
    /// Unstructured diagnostic output; logged, never routed to a caller
    Diagnostic(String),
}

/// Decode one complete output line into a [`WorkerEvent`]
///
/// Decoding is total: lines that are not valid JSON, exceed
/// `max_line_length`, or lack a recognizable discriminator all become
/// [`WorkerEvent::Diagnostic`]. A parse failure is non-fatal by contract.
#[must_use]
pub fn decode_line(line: &str, max_line_length: usize) -> WorkerEvent {
    let trimmed = line.trim();
    if trimmed.len() > max_line_length {
        log::warn!(
            "Discarding wire line of {} bytes (limit {})",
            trimmed.len(),
            max_line_length
        );
        return WorkerEvent::Diagnostic(String::from("<oversized line>"));
    }

    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return WorkerEvent::Diagnostic(trimmed.to_string());
    };
    let Some(obj) = value.as_object() else {
        return WorkerEvent::Diagnostic(trimmed.to_string());
    };

    match obj.get("type").and_then(serde_json::Value::as_str) {
        Some("ready") => return WorkerEvent::Ready,
        Some("activity" | "progress") => {
            let request_id = obj
                .get("requestId")
                .and_then(serde_json::Value::as_str)
                .map(RequestId::from);
            let message = obj
                .get("message")
                .or_else(|| obj.get("text"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or(trimmed)
                .to_string();
            return WorkerEvent::Progress {
                request_id,
                message,
            };
        }
        _ => {}
    }

    let Some(request_id) = obj.get("requestId").and_then(serde_json::Value::as_str) else {
        return WorkerEvent::Diagnostic(trimmed.to_string());
    };

    if let Some(result) = obj.get("result") {
        return WorkerEvent::Response {
            request_id: RequestId::from(request_id),
            outcome: ResponseOutcome::Result(result.clone()),
        };
    }
    if let Some(error) = obj.get("error") {
        let message = match error.as_str() {
            Some(s) => s.to_string(),
            None => error.to_string(),
        };
        return WorkerEvent::Response {
            request_id: RequestId::from(request_id),
            outcome: ResponseOutcome::Error(message),
        };
    }

    // A requestId with neither result nor error is not a settlement.
    WorkerEvent::Diagnostic(trimmed.to_string())
}
