//! Wire protocol for the persistent worker
//!
//! The worker speaks newline-delimited JSON over its stdio pipes: one
//! request per line on stdin, one event per line on stdout. This module
//! defines the request/response envelope and the decoder that classifies
//! each complete output line.

mod wire;

pub use wire::{Mode, RequestId, ResponseOutcome, WorkerEvent, WorkerRequest, decode_line};
