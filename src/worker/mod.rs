//! Worker process lifecycle
//!
//! Owns one external agent runtime process per session: spawning, readiness
//! detection, stdout/stderr pumping, and termination reporting.
//!
//! # Module Structure
//!
//! - `command` - Worker command construction and env filtering
//! - `handle` - `WorkerHandle` lifecycle and state machine
//! - `reader` - Background output pump and stderr drain tasks

mod command;
mod handle;
mod reader;

pub use handle::{WorkerHandle, WorkerState};
