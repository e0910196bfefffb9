//! State registry: the single owner of every open editor's state.
//!
//! The registry is constructed by the host's composition root and passed
//! explicitly to whoever needs it. All writes go through [`StateRegistry::update`]
//! (or `restore`, for history), and each write emits exactly one
//! [`StateEvent::StateChanged`] before returning.
//!
//! # Debug Invariants
//!
//! In debug builds the registry validates after every structural change:
//! - No duplicate editor ids
//! - The active editor, if any, is registered

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tidemark_core::{EditorId, EditorState, SliceKind, SliceValue};

use crate::error::StateError;
use crate::events::{
    ActiveEditorChangedEvent, EditorClosedEvent, EditorOpenedEvent, EventBus, EventCallback,
    EventFilter, NoticeEvent, NoticeLevel, StateChangedEvent, StateEvent, SubscriptionHandle,
};

struct EditorEntry {
    id: EditorId,
    state: Arc<EditorState>,
}

/// Summary of one open editor, in open order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenEditor {
    pub editor_id: EditorId,
    pub filename: String,
}

#[derive(Default)]
pub struct StateRegistry {
    editors: Vec<EditorEntry>,
    active: Option<EditorId>,
    bus: EventBus,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Register a default-initialized state for a newly recognized document.
    pub fn register(&mut self, editor_id: EditorId, filename: &str) -> Result<Arc<EditorState>, StateError> {
        self.register_with_state(editor_id, EditorState::for_file(filename))
    }

    /// Register a document whose state was decoded from disk. Seeding is not
    /// an edit: it emits `EditorOpened` only and records no history.
    pub fn register_with_state(
        &mut self,
        editor_id: EditorId,
        state: EditorState,
    ) -> Result<Arc<EditorState>, StateError> {
        if self.contains(&editor_id) {
            return Err(StateError::DuplicateEditor(editor_id));
        }
        if let Some(time) = &state.time {
            if !time.is_ordered() {
                return Err(StateError::InvalidTime);
            }
        }

        let filename = state.metadata.filename.clone();
        let state = Arc::new(state);
        self.editors.push(EditorEntry {
            id: editor_id.clone(),
            state: Arc::clone(&state),
        });

        #[cfg(debug_assertions)]
        self.debug_check_invariants();

        log::debug!("Registered editor {} ({})", editor_id, filename);
        self.bus.emit(&StateEvent::EditorOpened(EditorOpenedEvent { editor_id, filename }));
        Ok(state)
    }

    /// Drop an editor's state. Unknown ids are ignored so closing twice is harmless.
    ///
    /// Emits `EditorClosed`, then `ActiveEditorChanged` if the closed editor was active.
    /// Returns the final state so the host can still save it.
    pub fn unregister(&mut self, editor_id: &EditorId) -> Option<Arc<EditorState>> {
        let index = self.editors.iter().position(|e| &e.id == editor_id)?;
        let entry = self.editors.remove(index);
        let was_active = self.active.as_ref() == Some(editor_id);
        if was_active {
            self.active = None;
        }

        #[cfg(debug_assertions)]
        self.debug_check_invariants();

        log::debug!("Unregistered editor {}", editor_id);
        self.bus.emit(&StateEvent::EditorClosed(EditorClosedEvent {
            editor_id: editor_id.clone(),
            filename: entry.state.metadata.filename.clone(),
        }));
        if was_active {
            self.bus.emit(&StateEvent::ActiveEditorChanged(ActiveEditorChangedEvent {
                previous: Some(editor_id.clone()),
                current: None,
            }));
        }
        Some(entry.state)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn contains(&self, editor_id: &EditorId) -> bool {
        self.editors.iter().any(|e| &e.id == editor_id)
    }

    pub fn state(&self, editor_id: &EditorId) -> Result<Arc<EditorState>, StateError> {
        self.entry(editor_id).map(|e| Arc::clone(&e.state))
    }

    pub fn get_slice(&self, editor_id: &EditorId, kind: SliceKind) -> Result<SliceValue, StateError> {
        self.entry(editor_id).map(|e| e.state.slice(kind))
    }

    pub fn len(&self) -> usize {
        self.editors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.editors.is_empty()
    }

    /// Open editors in the order they were registered.
    pub fn open_editors(&self) -> Vec<OpenEditor> {
        self.editors
            .iter()
            .map(|e| OpenEditor {
                editor_id: e.id.clone(),
                filename: e.state.metadata.filename.clone(),
            })
            .collect()
    }

    /// Open editors whose filename matches `name`. Exact matches win; only
    /// when there are none is `name` compared by final path component.
    pub fn editors_matching(&self, name: &str) -> Vec<OpenEditor> {
        let exact: Vec<OpenEditor> = self
            .open_editors()
            .into_iter()
            .filter(|e| e.filename == name)
            .collect();
        if !exact.is_empty() {
            return exact;
        }
        self.open_editors()
            .into_iter()
            .filter(|e| basename(&e.filename) == basename(name))
            .collect()
    }

    /// The open editor `name` refers to, exactly or by basename. `None` when
    /// nothing matches or when several plots share the name.
    pub fn find_by_filename(&self, name: &str) -> Option<EditorId> {
        match self.editors_matching(name).as_slice() {
            [only] => Some(only.editor_id.clone()),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Replace one slice. See [`StateRegistry::update_described`].
    pub fn update(&mut self, editor_id: &EditorId, value: SliceValue) -> Result<Arc<EditorState>, StateError> {
        let description = format!("Update {}", value.kind());
        self.update_described(editor_id, value, description)
    }

    /// Replace one slice and emit one `StateChanged`. Calls are never merged:
    /// each one is its own undoable step.
    pub fn update_described(
        &mut self,
        editor_id: &EditorId,
        value: SliceValue,
        description: impl Into<String>,
    ) -> Result<Arc<EditorState>, StateError> {
        validate_slice(&value)?;
        let kind = value.kind();
        let entry = self.entry_mut(editor_id)?;
        let previous = Arc::clone(&entry.state);
        let next = Arc::new(previous.with_slice(value));
        entry.state = Arc::clone(&next);

        self.bus.emit(&StateEvent::StateChanged(StateChangedEvent {
            editor_id: editor_id.clone(),
            slices: vec![kind],
            previous,
            next: Arc::clone(&next),
            description: description.into(),
        }));
        Ok(next)
    }

    /// Replace every undoable slice from `snapshot` in one step.
    pub fn restore(
        &mut self,
        editor_id: &EditorId,
        snapshot: &EditorState,
        description: impl Into<String>,
    ) -> Result<Arc<EditorState>, StateError> {
        let entry = self.entry_mut(editor_id)?;
        let previous = Arc::clone(&entry.state);
        let next = Arc::new(previous.restored_from(snapshot));
        entry.state = Arc::clone(&next);

        let slices = previous.changed_slices(&next);
        self.bus.emit(&StateEvent::StateChanged(StateChangedEvent {
            editor_id: editor_id.clone(),
            slices,
            previous,
            next: Arc::clone(&next),
            description: description.into(),
        }));
        Ok(next)
    }

    // ------------------------------------------------------------------
    // Active editor
    // ------------------------------------------------------------------

    pub fn active_editor(&self) -> Option<&EditorId> {
        self.active.as_ref()
    }

    /// Make `editor_id` the default command target and stamp its
    /// `last_active_at`. The stamp is bookkeeping: no `StateChanged`, no history.
    pub fn set_active_editor(&mut self, editor_id: &EditorId) -> Result<(), StateError> {
        let entry = self.entry_mut(editor_id)?;
        Arc::make_mut(&mut entry.state).metadata.last_active_at = Some(Utc::now());

        if self.active.as_ref() == Some(editor_id) {
            return Ok(());
        }
        let previous = self.active.replace(editor_id.clone());
        self.bus.emit(&StateEvent::ActiveEditorChanged(ActiveEditorChangedEvent {
            previous,
            current: Some(editor_id.clone()),
        }));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Emit a user-visible notice. No state effect.
    pub fn notify(&mut self, editor_id: Option<&EditorId>, level: NoticeLevel, message: impl Into<String>) {
        self.bus.emit(&StateEvent::Notice(NoticeEvent {
            editor_id: editor_id.cloned(),
            level,
            message: message.into(),
        }));
    }

    pub fn on(&mut self, filter: impl Into<EventFilter>, callback: EventCallback) -> SubscriptionHandle {
        self.bus.subscribe(filter.into(), callback)
    }

    pub fn off(&mut self, handle: SubscriptionHandle) -> bool {
        self.bus.unsubscribe(handle)
    }

    // ------------------------------------------------------------------

    fn entry(&self, editor_id: &EditorId) -> Result<&EditorEntry, StateError> {
        self.editors
            .iter()
            .find(|e| &e.id == editor_id)
            .ok_or_else(|| StateError::UnknownEditor(editor_id.clone()))
    }

    fn entry_mut(&mut self, editor_id: &EditorId) -> Result<&mut EditorEntry, StateError> {
        self.editors
            .iter_mut()
            .find(|e| &e.id == editor_id)
            .ok_or_else(|| StateError::UnknownEditor(editor_id.clone()))
    }

    #[cfg(debug_assertions)]
    fn debug_check_invariants(&self) {
        let mut seen = std::collections::HashSet::new();
        for editor in &self.editors {
            debug_assert!(
                seen.insert(&editor.id),
                "StateRegistry invariant violation: duplicate editor id"
            );
        }
        if let Some(active) = &self.active {
            debug_assert!(
                seen.contains(active),
                "StateRegistry invariant violation: active editor not registered"
            );
        }
    }
}

fn validate_slice(value: &SliceValue) -> Result<(), StateError> {
    match value {
        SliceValue::Time(Some(time)) if !time.is_ordered() => Err(StateError::InvalidTime),
        SliceValue::Viewport(Some(viewport)) if !viewport.is_valid() => Err(StateError::InvalidViewport),
        _ => Ok(()),
    }
}

fn basename(name: &str) -> &str {
    Path::new(name)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
}
