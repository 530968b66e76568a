//! Client for the agent CLI worker process.
//!
//! The worker is a child process that exchanges newline-delimited JSON
//! records over its stdio. This crate owns the three layers below the
//! bridge: line framing, the wire protocol types, and process supervision
//! with generation-fenced restarts.

pub mod framing;
pub mod protocol;
pub mod supervisor;

pub use framing::LineFramer;
pub use protocol::{AssistantMessage, ContentBlock, UserEnvelope, WorkerEvent};
pub use supervisor::{WorkerConfig, WorkerEvents, WorkerSupervisor};
