//! # HTTP / WebSocket Surfaces
//!
//! Axum routers for the two services. Each router takes its state by value
//! and is ready to be served or layered by the binaries.
//!
//! - **`live`**: `/ws/{channel}` subscriber sockets plus `/health` and `/stats`.
//! - **`gateway`**: `/gateway/v1` query proxy (cached) and live tunnel.

pub mod error;
pub mod frames;
pub mod gateway;
pub mod live;

pub use error::QueryError;
pub use gateway::GatewayState;
pub use live::LiveState;
