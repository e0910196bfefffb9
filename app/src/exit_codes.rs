//! Exit Code Registry
//!
//! Single source of truth for the `tidemark` binary's exit codes.
//! Scripts rely on them, so codes are never renumbered.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain    | Description                              |
//! |---------|-----------|------------------------------------------|
//! | 0       | Universal | Success                                  |
//! | 1       | Universal | General error (unspecified)              |
//! | 2       | Universal | Usage error (bad args, bad params JSON)  |
//! | 20-29   | bridge    | Command bridge client codes              |
//! | 30-39   | plot      | Plot file load/save codes                |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above

use serde::Serialize;
use tidemark_protocol::ErrorCode;

use crate::client::ClientError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, params that are not JSON.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Bridge (20-29)
// =============================================================================

/// Cannot reach the bridge (no workbench running, connection refused,
/// connect retries exhausted).
pub const EXIT_BRIDGE_CONNECT: u8 = 20;

/// Protocol error (bad framing, malformed reply, oversized message).
pub const EXIT_BRIDGE_PROTOCOL: u8 = 21;

/// Target ambiguity: several plots open, or the named plot is not open.
pub const EXIT_BRIDGE_TARGET: u8 = 22;

/// No plots open at all.
pub const EXIT_BRIDGE_NO_PLOTS: u8 = 23;

/// Request rejected: unknown command, invalid params, failed validation.
pub const EXIT_BRIDGE_INPUT: u8 = 24;

/// The workbench did not answer in time.
pub const EXIT_BRIDGE_TIMEOUT: u8 = 25;

/// The workbench failed internally or is shutting down.
pub const EXIT_BRIDGE_SERVER: u8 = 26;

// =============================================================================
// Plot files (30-39)
// =============================================================================

/// A plot file given on the command line could not be read or decoded.
pub const EXIT_PLOT_LOAD: u8 = 30;

/// The bridge port could not be bound.
pub const EXIT_BIND: u8 = 31;

/// Map a bridge error code to its exit code.
pub fn error_code_exit(code: ErrorCode) -> u8 {
    match code {
        ErrorCode::MultiplePlots | ErrorCode::EditorNotFound | ErrorCode::NoActiveEditor => EXIT_BRIDGE_TARGET,
        ErrorCode::NoEditorsOpen => EXIT_BRIDGE_NO_PLOTS,
        ErrorCode::InvalidRequest
        | ErrorCode::UnknownCommand
        | ErrorCode::ValidationError
        | ErrorCode::NotFound => EXIT_BRIDGE_INPUT,
        ErrorCode::MessageTooLarge => EXIT_BRIDGE_PROTOCOL,
        ErrorCode::Timeout => EXIT_BRIDGE_TIMEOUT,
        ErrorCode::RetriesExceeded => EXIT_BRIDGE_CONNECT,
        ErrorCode::ServiceUnavailable | ErrorCode::InternalError => EXIT_BRIDGE_SERVER,
    }
}

/// Map a client error to its exit code.
pub fn client_exit_code(err: &ClientError) -> u8 {
    match err {
        ClientError::ConnectionFailed(_) | ClientError::ConnectionClosed | ClientError::Io(_) => EXIT_BRIDGE_CONNECT,
        ClientError::RetriesExceeded { .. } => error_code_exit(ErrorCode::RetriesExceeded),
        ClientError::Timeout => EXIT_BRIDGE_TIMEOUT,
        ClientError::Protocol(_) => EXIT_BRIDGE_PROTOCOL,
        ClientError::Server { code, .. } => ErrorCode::from_code(code).map(error_code_exit).unwrap_or(EXIT_ERROR),
    }
}

/// Structured error output for `tidemark call`.
#[derive(Debug, Serialize)]
pub struct CallErrorOutput {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub exit_code: u8,
}

impl CallErrorOutput {
    pub fn from_client_error(err: &ClientError) -> Self {
        let (error, message, data) = match err {
            ClientError::ConnectionFailed(msg) => ("connect_failed".to_string(), msg.clone(), None),
            ClientError::ConnectionClosed => ("connection_closed".to_string(), err.to_string(), None),
            ClientError::Timeout => ("timeout".to_string(), err.to_string(), None),
            ClientError::Io(e) => ("io_error".to_string(), e.to_string(), None),
            ClientError::Protocol(msg) => ("protocol_error".to_string(), msg.clone(), None),
            ClientError::RetriesExceeded { .. } => {
                (ErrorCode::RetriesExceeded.code().to_string(), err.to_string(), None)
            }
            ClientError::Server { code, message, data } => (code.clone(), message.clone(), data.clone()),
        };
        Self {
            error,
            message,
            data,
            exit_code: client_exit_code(err),
        }
    }

    /// Print to stderr, as JSON or as a one-line message.
    pub fn print(&self, json: bool) {
        if json {
            if let Ok(output) = serde_json::to_string(self) {
                eprintln!("{}", output);
            }
            return;
        }
        eprintln!("error: {}", self.message);
        if let Some(plots) = self.data.as_ref().and_then(|d| d.get("available_plots")).and_then(|p| p.as_array()) {
            for plot in plots.iter().filter_map(|p| p.as_str()) {
                eprintln!("  {}", plot);
            }
        }
    }
}
