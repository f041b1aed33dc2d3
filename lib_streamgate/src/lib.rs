//! # lib_streamgate
//!
//! Building blocks shared by the `server_live` and `server_gateway` binaries.
//! Every top-level folder is gated behind a cargo feature of the same name so
//! that binaries only pull in the dependencies they use.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Error taxonomy shared by every pipeline stage.
#[cfg(feature = "core")]
pub mod error;

/// Event model, classifier, connection registry and broadcaster.
#[cfg(feature = "core")]
pub mod core;

/// Fingerprinted, single-flight response cache.
#[cfg(feature = "core")]
pub mod cache;

/// Event log consumption: retrying source client, pipeline and log bindings.
#[cfg(feature = "core")]
pub mod ingestors;

/// Upstream forwarding: HTTP cache-fill client and WebSocket tunnel.
#[cfg(feature = "retrieve")]
pub mod retrieve;

/// Axum routers for the live-data and gateway services.
#[cfg(feature = "server")]
pub mod routes;

/// Layered CLI / environment / file configuration.
#[cfg(feature = "configs")]
pub mod configs;

/// tracing subscriber setup.
#[cfg(feature = "loggers")]
pub mod loggers;
