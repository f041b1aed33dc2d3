//! # Core Fan-out Engine
//!
//! Everything between "an event was read from the log" and "a frame sits in a
//! subscriber's outbound queue".
//!
//! ## Core Components:
//!
//! - **`event`**: the immutable `Event`, its log `Position`, and the closed
//!   `Channel` set subscribers select from.
//! - **`classifier`**: a pure function tagging each event with the channels
//!   (and per-channel frames) it belongs to.
//! - **`registry`**: the live subscriber set per channel, with exactly-once
//!   teardown of each connection.
//! - **`broadcaster`**: non-blocking fan-out of classified frames into every
//!   subscriber queue, evicting the ones that cannot keep up.
//! - **`stats`**: lock-free pipeline counters.

#![forbid(unsafe_code)]

/// Event, position and channel types.
pub mod event;
/// Pure event → channel routing.
pub mod classifier;
/// Per-channel subscriber connection registry.
pub mod registry;
/// Fail-fast fan-out into subscriber queues.
pub mod broadcaster;
/// Atomic pipeline counters.
pub mod stats;

// --- Public API Re-exports ---
pub use broadcaster::{BroadcastReport, Broadcaster};
pub use classifier::{classify, Classified, Route, TransactionRecord, TransactionStatus};
pub use event::{Channel, ChannelSet, Event, Position};
pub use registry::{ConnectionId, ConnectionRegistry, EvictReason, SubscriberHandle};
pub use stats::{PipelineStats, StatsSnapshot};
