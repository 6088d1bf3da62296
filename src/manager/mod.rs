//! Session management
//!
//! Provides `SessionManager`, which keeps one warm worker process per
//! caller key, serializes session creation per key, evicts idle sessions,
//! and prunes sessions whose worker has died.
//!
//! # Module Structure
//!
//! - `registry` - `SessionManager` with the keyed session table
//! - `session` - Per-session state and request execution

mod registry;
mod session;

pub use registry::SessionManager;
pub use session::{Session, SessionInfo};
