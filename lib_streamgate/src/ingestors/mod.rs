//! # Event Ingestion
//!
//! Pulling events off the log and pushing them through the fan-out engine.
//!
//! - **`backoff`**: capped exponential reconnect delays with jitter.
//! - **`source`**: the `LogConnector`/`LogSession` seam and the retrying,
//!   resuming `EventSourceClient` built on it.
//! - **`pipeline`**: the single consumer loop (source → classify → broadcast →
//!   commit).
//! - **`kafka`**: the rdkafka-backed connector (feature `kafka`).

pub mod backoff;
pub mod pipeline;
pub mod source;

#[cfg(feature = "kafka")]
pub mod kafka;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::Backoff;
pub use pipeline::Pipeline;
pub use source::{CommittedPositions, EventSourceClient, LogConnector, LogSession, SourceSettings};
