//! # Upstream Retrieval
//!
//! - **`forwarder`**: cache-fill GETs against the upstream query service.
//! - **`tunnel`**: frame-for-frame relay between a client WebSocket and an
//!   upstream one.

pub mod forwarder;
pub mod tunnel;

pub use forwarder::UpstreamClient;
pub use tunnel::{connect_upstream, relay, upstream_legs, CloseInfo, RelayEnd, RelayFrame};
