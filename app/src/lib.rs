//! Tidemark workbench host.
//!
//! Owns every open plot's state through a [`Workbench`] and exposes it to
//! out-of-process scripts over the command bridge.

pub mod client;
pub mod exit_codes;
pub mod session_server;
pub mod workbench;

pub use workbench::{Workbench, WorkbenchError};
