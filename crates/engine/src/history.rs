//! Unified undo/redo history, one stack per editor.
//!
//! The manager listens to `StateChanged` events and records every mutation as
//! a before/after pair, regardless of which slice changed or who changed it
//! (panel, script, tool). Undo and redo write back through
//! [`StateRegistry::restore`] with a reentrancy flag raised, so the restoring
//! write is not itself recorded. Metadata is outside the undoable set, so a
//! write that only touches metadata leaves the stack alone.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tidemark_core::{EditorId, EditorState, SliceKind};

use crate::error::StateError;
use crate::events::{EventKind, NoticeLevel, StateEvent, SubscriptionHandle};
use crate::registry::StateRegistry;

/// Default number of entries kept per editor.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub editor_id: EditorId,
    pub previous_state: Arc<EditorState>,
    pub new_state: Arc<EditorState>,
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

/// Where an editor's cursor sits relative to its stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStatus {
    Empty,
    HasUndo,
    HasUndoAndRedo,
    HasRedoOnly,
}

/// Result of an undo/redo request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryOutcome {
    Applied { description: String },
    NothingToUndo,
    NothingToRedo,
}

/// Entries `[0, cursor)` are applied and undoable; `[cursor, len)` are redoable.
#[derive(Default)]
struct EditorHistory {
    entries: VecDeque<HistoryEntry>,
    cursor: usize,
}

impl EditorHistory {
    fn push(&mut self, entry: HistoryEntry, capacity: usize) {
        self.entries.truncate(self.cursor);
        self.entries.push_back(entry);
        self.cursor += 1;

        while self.entries.len() > capacity {
            self.entries.pop_front();
            self.cursor -= 1;
        }
    }

    fn status(&self) -> HistoryStatus {
        let can_undo = self.cursor > 0;
        let can_redo = self.cursor < self.entries.len();
        match (can_undo, can_redo) {
            (false, false) => HistoryStatus::Empty,
            (true, false) => HistoryStatus::HasUndo,
            (true, true) => HistoryStatus::HasUndoAndRedo,
            (false, true) => HistoryStatus::HasRedoOnly,
        }
    }
}

struct Shared {
    stacks: Mutex<FxHashMap<EditorId, EditorHistory>>,
    capacity: usize,
    /// Raised while undo/redo writes back, so that write is not recorded.
    restoring: AtomicBool,
}

impl Shared {
    fn on_event(&self, event: &StateEvent) {
        match event {
            StateEvent::StateChanged(change) => {
                if self.restoring.load(Ordering::SeqCst) {
                    return;
                }
                // Undo cannot rewind metadata, so a change confined to it is not a step
                let undoable = change
                    .previous
                    .changed_slices(&change.next)
                    .iter()
                    .any(SliceKind::is_undoable);
                if !undoable {
                    return;
                }
                let mut stacks = self.stacks.lock();
                let history = stacks.entry(change.editor_id.clone()).or_default();
                history.push(
                    HistoryEntry {
                        editor_id: change.editor_id.clone(),
                        previous_state: Arc::clone(&change.previous),
                        new_state: Arc::clone(&change.next),
                        timestamp: Utc::now(),
                        description: change.description.clone(),
                    },
                    self.capacity,
                );
            }
            StateEvent::EditorClosed(closed) => {
                if self.stacks.lock().remove(&closed.editor_id).is_some() {
                    log::debug!("Discarded history for {}", closed.editor_id);
                }
            }
            _ => {}
        }
    }
}

/// Clears the reentrancy flag however the restoring write ends.
struct RestoreGuard<'a>(&'a AtomicBool);

impl<'a> RestoreGuard<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RestoreGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Undo,
    Redo,
}

pub struct HistoryManager {
    shared: Arc<Shared>,
    subscriptions: Vec<SubscriptionHandle>,
}

impl HistoryManager {
    /// Create a manager and subscribe it to `registry`.
    pub fn attach(registry: &mut StateRegistry, capacity: usize) -> Self {
        let shared = Arc::new(Shared {
            stacks: Mutex::new(FxHashMap::default()),
            capacity: capacity.max(1),
            restoring: AtomicBool::new(false),
        });

        let subscriptions = [EventKind::StateChanged, EventKind::EditorClosed]
            .into_iter()
            .map(|kind| {
                let shared = Arc::clone(&shared);
                registry.on(kind, Box::new(move |event: &StateEvent| shared.on_event(event)))
            })
            .collect();

        Self { shared, subscriptions }
    }

    /// Unsubscribe from `registry`. Recorded stacks are dropped with `self`.
    pub fn detach(self, registry: &mut StateRegistry) {
        for handle in self.subscriptions {
            registry.off(handle);
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Undo on `editor`, or on the active editor when `None`.
    pub fn undo(
        &self,
        registry: &mut StateRegistry,
        editor: Option<&EditorId>,
    ) -> Result<HistoryOutcome, StateError> {
        self.step(registry, editor, Direction::Undo)
    }

    /// Redo on `editor`, or on the active editor when `None`.
    pub fn redo(
        &self,
        registry: &mut StateRegistry,
        editor: Option<&EditorId>,
    ) -> Result<HistoryOutcome, StateError> {
        self.step(registry, editor, Direction::Redo)
    }

    pub fn status(&self, editor: &EditorId) -> HistoryStatus {
        self.shared
            .stacks
            .lock()
            .get(editor)
            .map_or(HistoryStatus::Empty, EditorHistory::status)
    }

    pub fn can_undo(&self, editor: &EditorId) -> bool {
        matches!(self.status(editor), HistoryStatus::HasUndo | HistoryStatus::HasUndoAndRedo)
    }

    pub fn can_redo(&self, editor: &EditorId) -> bool {
        matches!(self.status(editor), HistoryStatus::HasRedoOnly | HistoryStatus::HasUndoAndRedo)
    }

    /// Number of entries held for `editor` (both directions).
    pub fn len(&self, editor: &EditorId) -> usize {
        self.shared.stacks.lock().get(editor).map_or(0, |h| h.entries.len())
    }

    /// Entries oldest first, with the cursor position.
    pub fn entries(&self, editor: &EditorId) -> (Vec<HistoryEntry>, usize) {
        self.shared.stacks.lock().get(editor).map_or((Vec::new(), 0), |h| {
            (h.entries.iter().cloned().collect(), h.cursor)
        })
    }

    fn step(
        &self,
        registry: &mut StateRegistry,
        editor: Option<&EditorId>,
        direction: Direction,
    ) -> Result<HistoryOutcome, StateError> {
        let target = match editor {
            Some(id) => id.clone(),
            None => registry.active_editor().cloned().ok_or(StateError::NoActiveEditor)?,
        };
        if !registry.contains(&target) {
            return Err(StateError::UnknownEditor(target));
        }

        let entry = {
            let stacks = self.shared.stacks.lock();
            stacks.get(&target).and_then(|h| match direction {
                Direction::Undo if h.cursor > 0 => h.entries.get(h.cursor - 1).cloned(),
                Direction::Redo => h.entries.get(h.cursor).cloned(),
                Direction::Undo => None,
            })
        };

        let Some(entry) = entry else {
            let (outcome, message) = match direction {
                Direction::Undo => (HistoryOutcome::NothingToUndo, "Nothing to undo"),
                Direction::Redo => (HistoryOutcome::NothingToRedo, "Nothing to redo"),
            };
            registry.notify(Some(&target), NoticeLevel::Info, message);
            return Ok(outcome);
        };

        let (snapshot, label) = match direction {
            Direction::Undo => (&entry.previous_state, "Undo"),
            Direction::Redo => (&entry.new_state, "Redo"),
        };
        {
            let _guard = RestoreGuard::raise(&self.shared.restoring);
            registry.restore(&target, snapshot, format!("{}: {}", label, entry.description))?;
        }

        if let Some(history) = self.shared.stacks.lock().get_mut(&target) {
            match direction {
                Direction::Undo => history.cursor -= 1,
                Direction::Redo => history.cursor += 1,
            }
        }

        Ok(HistoryOutcome::Applied {
            description: entry.description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventCollector;
    use proptest::prelude::*;
    use tidemark_core::{EditorMetadata, Feature, FeatureCollection, SelectionState, SliceValue, ViewportState};

    fn setup(capacity: usize) -> (StateRegistry, HistoryManager, EditorId) {
        let mut registry = StateRegistry::new();
        let history = HistoryManager::attach(&mut registry, capacity);
        let id = EditorId::generate();
        registry.register(id.clone(), "a.plot").unwrap();
        registry.set_active_editor(&id).unwrap();
        (registry, history, id)
    }

    fn select(registry: &mut StateRegistry, id: &EditorId, ids: &[&str]) {
        registry
            .update(id, SliceValue::Selection(SelectionState::new(ids.iter().copied())))
            .unwrap();
    }

    #[test]
    fn test_state_machine_transitions() {
        let (mut registry, history, id) = setup(DEFAULT_HISTORY_CAPACITY);
        assert_eq!(history.status(&id), HistoryStatus::Empty);

        select(&mut registry, &id, &["f1"]);
        assert_eq!(history.status(&id), HistoryStatus::HasUndo);

        select(&mut registry, &id, &["f2"]);
        history.undo(&mut registry, None).unwrap();
        assert_eq!(history.status(&id), HistoryStatus::HasUndoAndRedo);

        history.undo(&mut registry, None).unwrap();
        assert_eq!(history.status(&id), HistoryStatus::HasRedoOnly);

        history.redo(&mut registry, None).unwrap();
        history.redo(&mut registry, None).unwrap();
        assert_eq!(history.status(&id), HistoryStatus::HasUndo);
    }

    #[test]
    fn test_selection_undo_redo() {
        let (mut registry, history, id) = setup(DEFAULT_HISTORY_CAPACITY);
        select(&mut registry, &id, &["f1", "f2"]);

        history.undo(&mut registry, Some(&id)).unwrap();
        assert!(registry.state(&id).unwrap().selection.is_empty());

        history.redo(&mut registry, Some(&id)).unwrap();
        assert_eq!(
            registry.state(&id).unwrap().selection,
            SelectionState::new(["f1", "f2"])
        );
    }

    #[test]
    fn test_restoring_write_is_not_recorded() {
        let (mut registry, history, id) = setup(DEFAULT_HISTORY_CAPACITY);
        select(&mut registry, &id, &["f1"]);
        select(&mut registry, &id, &["f2"]);
        assert_eq!(history.len(&id), 2);

        history.undo(&mut registry, None).unwrap();
        history.undo(&mut registry, None).unwrap();
        history.redo(&mut registry, None).unwrap();
        assert_eq!(history.len(&id), 2);
    }

    #[test]
    fn test_new_edit_truncates_redo_tail() {
        let (mut registry, history, id) = setup(DEFAULT_HISTORY_CAPACITY);
        select(&mut registry, &id, &["a"]);
        select(&mut registry, &id, &["b"]);
        history.undo(&mut registry, None).unwrap();

        select(&mut registry, &id, &["c"]);
        assert_eq!(history.len(&id), 2);
        assert_eq!(history.status(&id), HistoryStatus::HasUndo);
        assert_eq!(
            history.redo(&mut registry, None).unwrap(),
            HistoryOutcome::NothingToRedo
        );
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let (mut registry, history, id) = setup(DEFAULT_HISTORY_CAPACITY);
        for i in 0..(DEFAULT_HISTORY_CAPACITY + 10) {
            let vp = ViewportState::new(0.0, 0.0, i as f64 + 1.0, 1.0);
            registry.update(&id, SliceValue::Viewport(Some(vp))).unwrap();
        }
        assert_eq!(history.len(&id), DEFAULT_HISTORY_CAPACITY);

        let (entries, cursor) = history.entries(&id);
        assert_eq!(cursor, DEFAULT_HISTORY_CAPACITY);
        // The oldest surviving entry is the eleventh edit
        assert_eq!(
            entries[0].new_state.viewport,
            Some(ViewportState::new(0.0, 0.0, 11.0, 1.0))
        );
    }

    #[test]
    fn test_empty_undo_is_noop_with_notice() {
        let (mut registry, history, id) = setup(DEFAULT_HISTORY_CAPACITY);
        let collector = EventCollector::new();
        registry.on(EventKind::Notice, collector.callback());

        let before = registry.state(&id).unwrap();
        assert_eq!(history.undo(&mut registry, None).unwrap(), HistoryOutcome::NothingToUndo);
        assert_eq!(registry.state(&id).unwrap(), before);

        match &collector.events()[0] {
            StateEvent::Notice(n) => assert_eq!(n.message, "Nothing to undo"),
            other => panic!("Expected notice, got {:?}", other),
        }
    }

    #[test]
    fn test_no_active_editor() {
        let mut registry = StateRegistry::new();
        let history = HistoryManager::attach(&mut registry, 10);
        assert_eq!(history.undo(&mut registry, None), Err(StateError::NoActiveEditor));
    }

    #[test]
    fn test_close_discards_stack() {
        let (mut registry, history, id) = setup(DEFAULT_HISTORY_CAPACITY);
        select(&mut registry, &id, &["f1"]);
        registry.unregister(&id);
        assert_eq!(history.len(&id), 0);
        assert_eq!(
            history.undo(&mut registry, Some(&id)),
            Err(StateError::UnknownEditor(id.clone()))
        );
    }

    #[test]
    fn test_identical_write_not_recorded() {
        let (mut registry, history, id) = setup(DEFAULT_HISTORY_CAPACITY);
        select(&mut registry, &id, &[]);
        assert_eq!(history.status(&id), HistoryStatus::Empty);
    }

    #[test]
    fn test_metadata_change_is_not_a_step() {
        let (mut registry, history, id) = setup(DEFAULT_HISTORY_CAPACITY);
        select(&mut registry, &id, &["f1"]);
        let renamed = EditorMetadata {
            filename: "renamed.plot".to_string(),
            last_active_at: None,
        };
        registry.update(&id, SliceValue::Metadata(renamed)).unwrap();
        assert_eq!(history.len(&id), 1);

        // Undo rewinds the selection edit, not the rename
        assert_eq!(
            history.undo(&mut registry, None).unwrap(),
            HistoryOutcome::Applied {
                description: "Update selection".to_string()
            }
        );
        let state = registry.state(&id).unwrap();
        assert!(state.selection.is_empty());
        assert_eq!(state.metadata.filename, "renamed.plot");
        assert_eq!(history.undo(&mut registry, None).unwrap(), HistoryOutcome::NothingToUndo);
    }

    #[test]
    fn test_detach_stops_recording() {
        let (mut registry, history, id) = setup(DEFAULT_HISTORY_CAPACITY);
        history.detach(&mut registry);
        select(&mut registry, &id, &["f1"]);
        let fresh = HistoryManager::attach(&mut registry, 5);
        assert_eq!(fresh.len(&id), 0);
    }

    #[derive(Debug, Clone)]
    enum Edit {
        Select(Vec<String>),
        Viewport(f64, f64),
        AddFeature(String),
        Rename(String),
    }

    fn edit_strategy() -> impl Strategy<Value = Edit> {
        prop_oneof![
            prop::collection::vec("[a-f]{1,3}", 0..4).prop_map(Edit::Select),
            (-170.0f64..170.0, 1.0f64..9.0).prop_map(|(w, span)| Edit::Viewport(w, span)),
            "[a-z]{1,6}".prop_map(Edit::AddFeature),
            "[a-z]{1,6}\\.plot".prop_map(Edit::Rename),
        ]
    }

    fn apply(registry: &mut StateRegistry, id: &EditorId, edit: &Edit) {
        let value = match edit {
            Edit::Select(ids) => SliceValue::Selection(SelectionState::new(ids.iter().cloned())),
            Edit::Viewport(w, span) => {
                SliceValue::Viewport(Some(ViewportState::new(*w, -10.0, w + span, 10.0)))
            }
            Edit::AddFeature(fid) => {
                let mut fc: FeatureCollection = registry.state(id).unwrap().feature_collection.clone();
                fc.features.push(Feature::with_id(fid.as_str()));
                SliceValue::FeatureCollection(fc)
            }
            Edit::Rename(filename) => SliceValue::Metadata(EditorMetadata {
                filename: filename.clone(),
                last_active_at: registry.state(id).unwrap().metadata.last_active_at,
            }),
        };
        registry.update(id, value).unwrap();
    }

    proptest! {
        #[test]
        fn prop_undo_then_redo_restores_identical_state(edits in prop::collection::vec(edit_strategy(), 1..20)) {
            let (mut registry, history, id) = setup(DEFAULT_HISTORY_CAPACITY);
            for edit in &edits {
                apply(&mut registry, &id, edit);
            }
            let before = registry.state(&id).unwrap();
            let undone = history.undo(&mut registry, None).unwrap();
            let redone = history.redo(&mut registry, None).unwrap();
            prop_assert_eq!(undone == HistoryOutcome::NothingToUndo, redone == HistoryOutcome::NothingToRedo);
            prop_assert_eq!(&*registry.state(&id).unwrap(), &*before);
        }

        #[test]
        fn prop_stack_never_exceeds_capacity(count in 0usize..80, capacity in 1usize..60) {
            let (mut registry, history, id) = setup(capacity);
            for i in 0..count {
                apply(&mut registry, &id, &Edit::Viewport(i as f64, 1.0));
            }
            prop_assert!(history.len(&id) <= capacity);
        }
    }
}
