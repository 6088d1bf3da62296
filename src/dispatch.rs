//! Typed classify / plan / execute operations
//!
//! `AgentService` layers the three logical operations over the session
//! manager. The operations are independent calls, not a mandated sequence:
//! callers may classify, then plan, then execute, or skip straight to
//! execute. Each call acquires the caller's session, sends one correlated
//! request with a mode-specific deadline, and decodes the worker's reply
//! into a typed result.

use futures::Stream;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::LazyLock;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::manager::SessionManager;
use crate::protocol::Mode;

/// Intent classification of a user prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Classification {
    /// Simple conversational prompt; the worker already produced the reply
    #[serde(rename = "CHAT")]
    Chat {
        /// Ready-to-send conversational response
        response: String,
    },
    /// Prompt requiring real agent work
    #[serde(rename = "TASK")]
    Task {
        /// Brief description of the task
        description: String,
    },
}

/// Short execution plan for a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPlan {
    /// User-facing plan steps
    #[serde(alias = "plan")]
    pub steps: Vec<String>,
    /// Rough time estimate, e.g. "30 seconds"
    #[serde(default, alias = "estimated_time")]
    pub estimated_time: String,
}

/// Final result of an execute operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteOutcome {
    /// The worker's final answer text
    pub result: String,
    /// File names the worker appears to have produced
    ///
    /// Mined from the answer text by matching against a known
    /// file-extension vocabulary. The wire protocol has no structured
    /// artifacts field, so this is a heuristic and may miss files the
    /// worker phrased unusually.
    pub output_files: Vec<String>,
}

/// One item of a streaming execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteEvent {
    /// Incremental progress text, delivered in arrival order
    Progress(String),
    /// Terminal item: the final outcome
    Completed(ExecuteOutcome),
}

/// Typed operations over warm worker sessions
///
/// Cheap to clone; clones share the same manager.
#[derive(Clone)]
pub struct AgentService {
    manager: Arc<SessionManager>,
}

impl AgentService {
    /// Create a service over an existing session manager
    #[must_use]
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// The underlying session manager
    #[must_use]
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Decide whether a prompt is simple chat or a task
    ///
    /// # Errors
    /// Returns a session or request fault; check
    /// [`is_retryable`](crate::AgentError::is_retryable) before surfacing
    pub async fn classify(&self, key: &str, prompt: &str) -> Result<Classification> {
        let session = self.manager.acquire(key).await?;
        let deadline = self.manager.config().classify_timeout;
        let value = session
            .request(Mode::Classify, prompt.to_string(), deadline, None)
            .await?;
        Ok(parse_classification(&value, prompt))
    }

    /// Produce a short execution plan for a task
    ///
    /// # Errors
    /// Returns a session or request fault
    pub async fn plan(&self, key: &str, prompt: &str) -> Result<TaskPlan> {
        let session = self.manager.acquire(key).await?;
        let deadline = self.manager.config().plan_timeout;
        let value = session
            .request(Mode::Plan, prompt.to_string(), deadline, None)
            .await?;
        Ok(parse_plan(&value))
    }

    /// Run the full agent loop on a prompt
    ///
    /// `files` lists uploaded file references to inject into the prompt
    /// context.
    ///
    /// # Errors
    /// Returns a session or request fault
    pub async fn execute(
        &self,
        key: &str,
        prompt: &str,
        files: &[String],
    ) -> Result<ExecuteOutcome> {
        let session = self.manager.acquire(key).await?;
        let deadline = self.manager.config().execute_timeout;
        let value = session
            .request(Mode::Execute, compose_prompt(prompt, files), deadline, None)
            .await?;
        Ok(outcome_from_value(&value))
    }

    /// Run the full agent loop, relaying progress as it arrives
    ///
    /// Yields `Progress` items in worker arrival order, all strictly before
    /// the terminal `Completed` item (or the error). Dropping the stream
    /// stops the relay but leaves the request and the worker session
    /// running; other callers are unaffected.
    pub fn execute_streaming(
        &self,
        key: &str,
        prompt: &str,
        files: &[String],
    ) -> impl Stream<Item = Result<ExecuteEvent>> + Send + use<> {
        let manager = Arc::clone(&self.manager);
        let key = key.to_string();
        let prompt = compose_prompt(prompt, files);

        async_stream::try_stream! {
            let session = manager.acquire(&key).await?;
            let deadline = manager.config().execute_timeout;
            let (sink, mut progress_rx) = mpsc::unbounded_channel();

            let request = session.request(Mode::Execute, prompt, deadline, Some(sink));
            tokio::pin!(request);

            let value = loop {
                tokio::select! {
                    maybe = progress_rx.recv() => {
                        match maybe {
                            Some(message) => yield ExecuteEvent::Progress(message),
                            // Sink closed: settlement is being delivered.
                            None => break (&mut request).await,
                        }
                    }
                    result = &mut request => {
                        // Drain progress already queued before the close so
                        // every streamed event precedes the outcome.
                        while let Ok(message) = progress_rx.try_recv() {
                            yield ExecuteEvent::Progress(message);
                        }
                        break result;
                    }
                }
            }?;

            yield ExecuteEvent::Completed(outcome_from_value(&value));
        }
    }
}

/// Decode a classify reply, tolerating the worker's looser output shapes
///
/// The worker normally returns a structured object, but older runtime
/// builds answer with raw model text that may wrap the JSON in code fences
/// or prose. The final fallback mirrors the runtime's own: greetings become
/// chat, everything else a task described by the prompt itself.
fn parse_classification(value: &serde_json::Value, prompt: &str) -> Classification {
    if let Ok(classification) = serde_json::from_value(value.clone()) {
        return classification;
    }
    if let Some(text) = value.as_str()
        && let Some(embedded) = extract_json_object(text)
        && let Ok(classification) = serde_json::from_value(embedded)
    {
        return classification;
    }

    const GREETINGS: &[&str] = &["HI", "HELLO", "HEY", "THANKS", "THANK YOU", "BYE", "GOODBYE"];
    let upper = prompt.to_uppercase();
    if GREETINGS.iter().any(|g| upper.contains(g)) {
        Classification::Chat {
            response: "Hello! How can I help you today?".to_string(),
        }
    } else {
        Classification::Task {
            description: prompt.to_string(),
        }
    }
}

/// Decode a plan reply, falling back to a generic three-step plan
fn parse_plan(value: &serde_json::Value) -> TaskPlan {
    if let Ok(plan) = serde_json::from_value(value.clone()) {
        return plan;
    }
    if let Some(text) = value.as_str()
        && let Some(embedded) = extract_json_object(text)
        && let Ok(plan) = serde_json::from_value(embedded)
    {
        return plan;
    }

    TaskPlan {
        steps: vec![
            "Analyze the request".to_string(),
            "Execute the task".to_string(),
            "Return results".to_string(),
        ],
        estimated_time: "30 seconds".to_string(),
    }
}

fn outcome_from_value(value: &serde_json::Value) -> ExecuteOutcome {
    let result = match value.as_str() {
        Some(text) => text.to_string(),
        None => value.to_string(),
    };
    let output_files = extract_output_files(&result);
    ExecuteOutcome {
        result,
        output_files,
    }
}

/// Pull the first JSON object out of free-form model text
///
/// Strips markdown code fences (with an optional `json` language tag) and
/// surrounding prose, the way the runtime's own wrappers clean up model
/// output.
fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    let mut candidate = text.trim();

    if candidate.contains("```") {
        let mut parts = candidate.split("```");
        candidate = parts.nth(1).unwrap_or(candidate).trim();
        candidate = candidate.strip_prefix("json").unwrap_or(candidate).trim();
    }

    let start = candidate.find('{')?;
    let end = candidate.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&candidate[start..=end]).ok()
}

/// Prefix the prompt with uploaded-file context, if any
fn compose_prompt(prompt: &str, files: &[String]) -> String {
    if files.is_empty() {
        return prompt.to_string();
    }
    let mut composed = String::from("The user has uploaded these files for this request:\n");
    for file in files {
        composed.push_str("- ");
        composed.push_str(file);
        composed.push('\n');
    }
    composed.push('\n');
    composed.push_str(prompt);
    composed
}

static FILE_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b[\w][\w.\-]*\.(?:pdf|pptx?|docx?|xlsx?|csv|tsv|txt|md|html?|png|jpe?g|gif|svg|json|ya?ml|zip|tar|gz|py|js|ts|wav|mp3|mp4)\b",
    )
    .expect("file-name pattern is valid")
});

/// Mine produced-file names from the worker's answer text
///
/// Matches words ending in a known file extension, preserving first-seen
/// order and deduplicating repeats.
fn extract_output_files(text: &str) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for found in FILE_NAME_PATTERN.find_iter(text) {
        let name = found.as_str().to_string();
        if !files.contains(&name) {
            files.push(name);
        }
    }
    files
}
