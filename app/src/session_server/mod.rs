//! Command bridge for external control of the workbench.
//!
//! Exposes a local TCP endpoint that lets scripts and tools drive a running
//! workbench:
//!
//! - One JSON request per line, one JSON response per line
//! - Requests are executed on the host thread, in arrival order
//! - Each connection remembers the plot it last addressed

mod bridge;
pub mod dispatch;
mod error;
pub mod framing;
mod server;
mod target;

pub use bridge::{oneshot, BridgeError, SessionBridgeHandle, SessionRequest};
pub use error::CommandError;
pub use server::{ServerMetrics, SessionServer, SessionServerConfig, MAX_PARSE_FAILURES};
pub use target::{ConnectionId, SessionTargets};
