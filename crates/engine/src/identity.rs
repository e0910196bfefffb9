//! Maps live document handles to stable editor ids.

use std::path::Path;

use rustc_hash::FxHashMap;
use tidemark_core::EditorId;

/// The host's handle for one open document instance.
///
/// `instance` is unique per open instance (the host's own object identity);
/// `uri` is where the document lives. Two handles with the same uri but
/// different instances are different documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentHandle {
    instance: u64,
    uri: String,
}

impl DocumentHandle {
    pub fn new(instance: u64, uri: impl Into<String>) -> Self {
        Self {
            instance,
            uri: uri.into(),
        }
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Final path component of the uri.
    pub fn filename(&self) -> &str {
        Path::new(&self.uri)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.uri)
    }
}

/// Resolves document handles to editor ids for the lifetime of each instance.
///
/// Ids are not persisted; a restarted process mints new ones.
#[derive(Default)]
pub struct EditorIdentityResolver {
    by_instance: FxHashMap<u64, EditorId>,
    by_editor: FxHashMap<EditorId, u64>,
}

impl EditorIdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for `handle`, minting one the first time the instance is seen.
    pub fn resolve(&mut self, handle: &DocumentHandle) -> EditorId {
        if let Some(id) = self.by_instance.get(&handle.instance) {
            return id.clone();
        }
        let id = EditorId::generate();
        self.by_instance.insert(handle.instance, id.clone());
        self.by_editor.insert(id.clone(), handle.instance);
        log::debug!("Resolved {} to {}", handle.uri, id);
        id
    }

    /// Id for `handle` if it has been resolved. Never mints.
    pub fn lookup(&self, handle: &DocumentHandle) -> Option<EditorId> {
        self.by_instance.get(&handle.instance).cloned()
    }

    /// Instance behind an editor id.
    pub fn instance_of(&self, editor_id: &EditorId) -> Option<u64> {
        self.by_editor.get(editor_id).copied()
    }

    /// Forget a disposed document. Returns the retired id.
    pub fn dispose(&mut self, handle: &DocumentHandle) -> Option<EditorId> {
        let id = self.by_instance.remove(&handle.instance)?;
        self.by_editor.remove(&id);
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.by_instance.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_instance.is_empty()
    }
}
