//! Tidemark Command Bridge Protocol
//!
//! Wire types shared by the bridge (inside the workbench) and script clients.
//! The transport is JSONL (newline-delimited JSON) over TCP localhost: each
//! request is one line, each reply is one line.
//!
//! # Shape
//!
//! ```text
//! → {"command": "set_selected_features", "params": {"ids": ["f1"]}, "filename": "a.plot", "id": 7}
//! ← {"id": 7, "result": {"ids": ["f1"]}}
//! ← {"id": 7, "error": {"code": "multiple_plots", "message": "...", "data": {"available_plots": [...]}}}
//! ```
//!
//! The envelope is parsed first; `params` is then validated against the
//! typed [`Command`] union so nothing untyped reaches the workbench.

mod command;

pub use command::*;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Envelopes
// =============================================================================

/// One request line from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    /// Target plot. May also be given as `params.filename`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Echoed back verbatim in the reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl Request {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            params: Value::Null,
            filename: None,
            id: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Explicit target: top-level `filename`, else `params.filename`.
    pub fn target_filename(&self) -> Result<Option<String>, CommandParseError> {
        if let Some(name) = &self.filename {
            return Ok(Some(name.clone()));
        }
        match self.params.get("filename") {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(CommandParseError::InvalidParams {
                command: self.command.clone(),
                message: "filename must be a string".to_string(),
            }),
        }
    }

    /// Validate `params` against the command's typed shape.
    pub fn parse_command(&self) -> Result<Command, CommandParseError> {
        Command::from_request(&self.command, self.params.clone())
    }
}

/// One reply line. Exactly one of `result` and `error` is meaningful; a
/// reply with neither is a successful `null` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, error: ErrorBody) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn into_result(self) -> Result<Value, ErrorBody> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code().to_string(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Parsed code, if it is one this version knows.
    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(&self.code)
    }
}

// =============================================================================
// Error codes
// =============================================================================

/// Stable error codes carried in `error.code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Malformed JSON, bad envelope, or params that do not fit the command.
    InvalidRequest,
    UnknownCommand,
    /// Params parsed but the values are not acceptable (e.g. time out of order).
    ValidationError,
    /// More than one plot is open and no target was given. `data.available_plots` lists them.
    MultiplePlots,
    NoEditorsOpen,
    NoActiveEditor,
    /// The named plot is not open, or was closed mid-request.
    EditorNotFound,
    /// A referenced feature does not exist.
    NotFound,
    /// The workbench did not answer in time. The request may still be applied.
    Timeout,
    MessageTooLarge,
    /// The workbench is shutting down or not pumping requests.
    ServiceUnavailable,
    /// A client gave up after its retry budget ran out. Never sent by the workbench.
    RetriesExceeded,
    InternalError,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 13] = [
        ErrorCode::InvalidRequest,
        ErrorCode::UnknownCommand,
        ErrorCode::ValidationError,
        ErrorCode::MultiplePlots,
        ErrorCode::NoEditorsOpen,
        ErrorCode::NoActiveEditor,
        ErrorCode::EditorNotFound,
        ErrorCode::NotFound,
        ErrorCode::Timeout,
        ErrorCode::MessageTooLarge,
        ErrorCode::ServiceUnavailable,
        ErrorCode::RetriesExceeded,
        ErrorCode::InternalError,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::UnknownCommand => "unknown_command",
            Self::ValidationError => "validation_error",
            Self::MultiplePlots => "multiple_plots",
            Self::NoEditorsOpen => "no_editors_open",
            Self::NoActiveEditor => "no_active_editor",
            Self::EditorNotFound => "editor_not_found",
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::MessageTooLarge => "message_too_large",
            Self::ServiceUnavailable => "service_unavailable",
            Self::RetriesExceeded => "retries_exceeded",
            Self::InternalError => "internal_error",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Default human-readable message.
    pub fn message(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "Malformed request",
            Self::UnknownCommand => "Unknown command",
            Self::ValidationError => "Invalid value",
            Self::MultiplePlots => "Multiple plots are open; specify a filename",
            Self::NoEditorsOpen => "No plots are open",
            Self::NoActiveEditor => "No active plot",
            Self::EditorNotFound => "Plot is not open",
            Self::NotFound => "Not found",
            Self::Timeout => "Timed out waiting for the workbench",
            Self::MessageTooLarge => "Message exceeds maximum size",
            Self::ServiceUnavailable => "Workbench is not accepting commands",
            Self::RetriesExceeded => "Gave up after repeated attempts",
            Self::InternalError => "Internal error",
        }
    }

    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody::new(*self, self.message())
    }
}
