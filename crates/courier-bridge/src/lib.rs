//! Bridge core: the glue between a chat channel and the worker process.
//!
//! `Bridge` coordinates turns (single-flight dispatch, FIFO backlog,
//! readiness state machine); `StatusTracker` runs the ephemeral per-turn
//! progress indicator; `format` converts worker markdown into the
//! channel's HTML subset and splits long responses. The chat channel and
//! the worker link are trait seams so the coordinator can be exercised
//! against recording mocks.

pub mod bridge;
pub mod channel;
pub mod format;
pub mod status;

pub use bridge::{Bridge, BridgeConfig, BridgeSnapshot, InboundDisposition, Readiness, WorkerLink};
pub use channel::{ChannelApi, ChannelError, ChatId, DeliveryMode, MessageId, PresenceKind};
pub use status::{StatusConfig, StatusTracker};
