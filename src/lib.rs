//! # Vazal Worker Session Manager
//!
//! Keeps one long-lived Vazal agent worker process warm per user session,
//! multiplexes concurrent classify/plan/execute requests onto each worker's
//! stdio pipe with a newline-delimited JSON protocol, correlates responses
//! back to the right caller by request id, enforces per-request and startup
//! deadlines, recovers from worker crashes, and evicts idle sessions.
//!
//! The agent runtime itself is an opaque external process; this crate owns
//! everything between "a caller wants an operation for a user" and "the
//! worker's correlated response line settles that caller".
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vazal_agent::{AgentService, Classification, ManagerConfig, SessionManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = Arc::new(SessionManager::new(ManagerConfig::from_env()));
//!     let service = AgentService::new(manager.clone());
//!
//!     match service.classify("user-42", "Hi there!").await? {
//!         Classification::Chat { response } => log::info!("chat: {response}"),
//!         Classification::Task { description } => {
//!             let plan = service.plan("user-42", &description).await?;
//!             log::info!("plan: {:?}", plan.steps);
//!             let outcome = service.execute("user-42", &description, &[]).await?;
//!             log::info!("result: {} files: {:?}", outcome.result, outcome.output_files);
//!         }
//!     }
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming progress
//!
//! While an execute request is in flight, incremental worker output can be
//! relayed to the caller ahead of the final result:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use vazal_agent::{AgentService, ExecuteEvent, ManagerConfig, SessionManager};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # let service = AgentService::new(Arc::new(SessionManager::new(ManagerConfig::default())));
//! let stream = service.execute_streaming("user-42", "research rust codecs", &[]);
//! let mut stream = Box::pin(stream);
//! while let Some(event) = stream.next().await {
//!     match event? {
//!         ExecuteEvent::Progress(line) => log::info!("... {line}"),
//!         ExecuteEvent::Completed(outcome) => log::info!("done: {}", outcome.result),
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - Concurrent first requests for one key spawn exactly one worker; every
//!   caller shares the resulting session.
//! - Every registered request settles exactly once: success, worker error,
//!   timeout, or `WorkerTerminated` when the process dies.
//! - A request timeout never kills the warm worker; worker death never
//!   leaks a pending request.
//! - Streamed progress for a request is delivered in arrival order,
//!   strictly before that request's settlement.

pub mod config;
pub mod correlate;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod worker;

pub use config::ManagerConfig;
pub use correlate::RequestCorrelator;
pub use dispatch::{AgentService, Classification, ExecuteEvent, ExecuteOutcome, TaskPlan};
pub use error::{AgentError, Result};
pub use manager::{Session, SessionInfo, SessionManager};
pub use protocol::{Mode, RequestId, WorkerEvent, WorkerRequest};
pub use worker::{WorkerHandle, WorkerState};

/// Crate version, exported to workers via `VAZAL_MANAGER_VERSION`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
