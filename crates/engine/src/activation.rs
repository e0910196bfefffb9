//! Activation tracking: which editor untargeted commands go to.
//!
//! Focus follows a most-recently-used list. The active editor is the most
//! recently focused editor whose document is still open. Losing focus to a
//! panel or another application does not change it; closing it falls back to
//! the previous one.

use std::sync::Arc;

use parking_lot::Mutex;
use tidemark_core::EditorId;

use crate::error::StateError;
use crate::events::{EventKind, StateEvent, SubscriptionHandle};
use crate::registry::StateRegistry;

pub struct ActivationTracker {
    /// Most recently focused first.
    recent: Arc<Mutex<Vec<EditorId>>>,
    subscription: SubscriptionHandle,
}

impl ActivationTracker {
    /// Create a tracker that prunes closed editors as `registry` reports them.
    pub fn attach(registry: &mut StateRegistry) -> Self {
        let recent: Arc<Mutex<Vec<EditorId>>> = Arc::new(Mutex::new(Vec::new()));
        let pruned = Arc::clone(&recent);
        let subscription = registry.on(
            EventKind::EditorClosed,
            Box::new(move |event: &StateEvent| {
                if let StateEvent::EditorClosed(closed) = event {
                    pruned.lock().retain(|id| id != &closed.editor_id);
                }
            }),
        );
        Self { recent, subscription }
    }

    pub fn detach(self, registry: &mut StateRegistry) {
        registry.off(self.subscription);
    }

    /// A document gained focus: it becomes the active editor.
    pub fn focus_gained(&self, registry: &mut StateRegistry, editor_id: &EditorId) -> Result<(), StateError> {
        registry.set_active_editor(editor_id)?;
        let mut recent = self.recent.lock();
        recent.retain(|id| id != editor_id);
        recent.insert(0, editor_id.clone());
        Ok(())
    }

    /// Focus moved elsewhere. The last focused editor stays active.
    pub fn focus_lost(&self, editor_id: &EditorId) {
        log::trace!("Focus lost by {}", editor_id);
    }

    /// A panel attached to an editor's view. Activates it only when nothing
    /// else is active, so opening a side panel never steals the target.
    pub fn panel_attached(&self, registry: &mut StateRegistry, editor_id: &EditorId) -> Result<(), StateError> {
        if registry.active_editor().is_none() {
            self.focus_gained(registry, editor_id)?;
        }
        Ok(())
    }

    pub fn panel_detached(&self, editor_id: &EditorId) {
        log::trace!("Panel detached from {}", editor_id);
    }

    /// Reapply the policy after a close: if nothing is active, promote the
    /// most recently focused editor that is still open.
    pub fn document_closed(&self, registry: &mut StateRegistry) {
        if registry.active_editor().is_some() {
            return;
        }
        let fallback = self
            .recent
            .lock()
            .iter()
            .find(|id| registry.contains(id))
            .cloned();
        if let Some(id) = fallback {
            if registry.set_active_editor(&id).is_ok() {
                log::debug!("Active editor fell back to {}", id);
            }
        }
    }

    /// Most recently focused first.
    pub fn recent(&self) -> Vec<EditorId> {
        self.recent.lock().clone()
    }
}
