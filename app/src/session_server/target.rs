//! Per-connection target cache.
//!
//! Each bridge connection remembers the last plot it addressed, so a script
//! that names a plot once can keep issuing untargeted commands. Entries hold
//! the editor id rather than a filename: ids are never reused, so a closed
//! plot can never alias a later one with the same name. Entries are dropped
//! on disconnect and whenever the cached plot closes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tidemark_core::EditorId;

/// Bridge connection id, assigned by the server on accept.
pub type ConnectionId = u64;

/// Cached editor per connection. Cheap to clone; clones share the map.
#[derive(Clone, Default)]
pub struct SessionTargets {
    inner: Arc<Mutex<HashMap<ConnectionId, EditorId>>>,
}

impl SessionTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, conn: ConnectionId) -> Option<EditorId> {
        self.inner.lock().get(&conn).cloned()
    }

    pub fn set(&self, conn: ConnectionId, editor_id: EditorId) {
        self.inner.lock().insert(conn, editor_id);
    }

    pub fn clear(&self, conn: ConnectionId) -> Option<EditorId> {
        self.inner.lock().remove(&conn)
    }

    /// Drop every entry whose editor is no longer open.
    /// Returns how many were dropped.
    pub fn retain_open(&self, is_open: impl Fn(&EditorId) -> bool) -> usize {
        let mut map = self.inner.lock();
        let before = map.len();
        map.retain(|conn, editor_id| {
            let keep = is_open(editor_id);
            if !keep {
                log::debug!("Connection {} target {} closed; cache cleared", conn, editor_id);
            }
            keep
        });
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
