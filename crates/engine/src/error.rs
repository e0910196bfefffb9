use thiserror::Error;

use tidemark_core::EditorId;

/// Errors returned by the registry and history to their immediate caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("unknown editor '{0}'")]
    UnknownEditor(EditorId),

    #[error("no active editor")]
    NoActiveEditor,

    /// Registering the same id twice is a programming error in the host.
    #[error("editor '{0}' is already registered")]
    DuplicateEditor(EditorId),

    #[error("time state out of order (expected start <= current <= end)")]
    InvalidTime,

    #[error("viewport bounds must be finite with south <= north")]
    InvalidViewport,
}
