//! Editor state engine.
//!
//! Owns the per-editor state of every open plot and the machinery around it:
//! the event bus, the undo history, document identity and focus tracking.
//! Nothing in here knows about sockets or files.

pub mod activation;
pub mod error;
pub mod events;
pub mod history;
pub mod identity;
pub mod registry;

pub use activation::ActivationTracker;
pub use error::StateError;
pub use events::{
    ActiveEditorChangedEvent, EditorClosedEvent, EditorOpenedEvent, EventBus, EventCallback,
    EventCollector, EventFilter, EventKind, NoticeEvent, NoticeLevel, StateChangedEvent, StateEvent,
    SubscriptionHandle,
};
pub use history::{HistoryEntry, HistoryManager, HistoryOutcome, HistoryStatus, DEFAULT_HISTORY_CAPACITY};
pub use identity::{DocumentHandle, EditorIdentityResolver};
pub use registry::{OpenEditor, StateRegistry};
