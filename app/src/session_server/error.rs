//! Bridge-level failures and their wire form.

use serde_json::json;
use thiserror::Error;
use tidemark_engine::StateError;
use tidemark_protocol::{CommandParseError, ErrorBody, ErrorCode};

use crate::WorkbenchError;

/// Everything that can go wrong between reading a request and replying.
/// Converted to an [`ErrorBody`] once, at the bridge boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("no plots are open")]
    NoEditorsOpen,

    #[error("{} plots are open; specify one with 'filename'", filenames.len())]
    MultiplePlots { filenames: Vec<String> },

    #[error("plot '{0}' is not open")]
    EditorNotFound(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("no active plot")]
    NoActiveEditor,

    #[error("timed out waiting for the workbench")]
    Timeout,

    #[error("workbench is not accepting commands")]
    Unavailable,

    #[error("internal error: {0}")]
    Internal(String),
}

impl CommandError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::UnknownCommand(_) => ErrorCode::UnknownCommand,
            Self::NoEditorsOpen => ErrorCode::NoEditorsOpen,
            Self::MultiplePlots { .. } => ErrorCode::MultiplePlots,
            Self::EditorNotFound(_) => ErrorCode::EditorNotFound,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::NoActiveEditor => ErrorCode::NoActiveEditor,
            Self::Timeout => ErrorCode::Timeout,
            Self::Unavailable => ErrorCode::ServiceUnavailable,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    pub fn to_error_body(&self) -> ErrorBody {
        let body = ErrorBody::new(self.code(), self.to_string());
        match self {
            Self::MultiplePlots { filenames } => body.with_data(json!({ "available_plots": filenames })),
            _ => body,
        }
    }
}

impl From<CommandParseError> for CommandError {
    fn from(e: CommandParseError) -> Self {
        match e {
            CommandParseError::UnknownCommand(name) => Self::UnknownCommand(name),
            other @ CommandParseError::InvalidParams { .. } => Self::InvalidRequest(other.to_string()),
        }
    }
}

impl From<StateError> for CommandError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::UnknownEditor(id) => Self::EditorNotFound(id.to_string()),
            StateError::NoActiveEditor => Self::NoActiveEditor,
            StateError::InvalidTime | StateError::InvalidViewport => Self::Validation(e.to_string()),
            StateError::DuplicateEditor(_) => Self::Internal(e.to_string()),
        }
    }
}

impl From<WorkbenchError> for CommandError {
    fn from(e: WorkbenchError) -> Self {
        match e {
            WorkbenchError::State(state) => state.into(),
            WorkbenchError::NoPath(_) => Self::Validation(e.to_string()),
            WorkbenchError::Codec(codec) => Self::Internal(codec.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_core::EditorId;

    #[test]
    fn test_multiple_plots_carries_filenames() {
        let err = CommandError::MultiplePlots {
            filenames: vec!["a.plot".to_string(), "b.plot".to_string()],
        };
        let body = err.to_error_body();
        assert_eq!(body.code, "multiple_plots");
        assert_eq!(body.data, Some(json!({"available_plots": ["a.plot", "b.plot"]})));
        assert!(body.message.contains("specify"));
    }

    #[test]
    fn test_state_errors_map_to_wire_codes() {
        let closed: CommandError = StateError::UnknownEditor(EditorId::from("e1")).into();
        assert_eq!(closed.code(), ErrorCode::EditorNotFound);
        let time: CommandError = StateError::InvalidTime.into();
        assert_eq!(time.code(), ErrorCode::ValidationError);
        let none: CommandError = StateError::NoActiveEditor.into();
        assert_eq!(none.code(), ErrorCode::NoActiveEditor);
    }

    #[test]
    fn test_parse_errors_map_to_wire_codes() {
        let unknown: CommandError = CommandParseError::UnknownCommand("x".into()).into();
        assert_eq!(unknown.to_error_body().code, "unknown_command");
        let bad: CommandError = CommandParseError::InvalidParams {
            command: "set_time".into(),
            message: "bad".into(),
        }
        .into();
        assert_eq!(bad.code(), ErrorCode::InvalidRequest);
    }
}
