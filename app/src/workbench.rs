//! Workbench: the composition root for open plots.
//!
//! One `Workbench` lives on the host thread and owns the state registry, the
//! undo history, document identity and focus tracking. The document host
//! (a GUI shell, or the headless `serve` loop) reports open/close/focus here;
//! the command bridge reaches it only through [`Workbench::pump_requests`].
//!
//! # Debug Invariants
//!
//! In debug builds, after every open/close:
//! - Each document's editor is registered, and nothing else is
//! - No two documents share a document instance

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tidemark_config::Settings;
use tidemark_core::{EditorId, EditorState};
use tidemark_engine::{
    ActivationTracker, DocumentHandle, EditorIdentityResolver, HistoryManager, HistoryOutcome,
    StateError, StateRegistry,
};
use tidemark_io::CodecError;

use crate::session_server::{dispatch, SessionRequest, SessionTargets};

#[derive(Debug, Error)]
pub enum WorkbenchError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("plot '{0}' has never been saved; give a path")]
    NoPath(String),
}

/// An open document as the host sees it.
#[derive(Debug, Clone)]
struct Document {
    handle: DocumentHandle,
    editor_id: EditorId,
    /// Backing file, if the document has one.
    path: Option<PathBuf>,
}

pub struct Workbench {
    registry: StateRegistry,
    history: HistoryManager,
    identity: EditorIdentityResolver,
    activation: ActivationTracker,
    targets: SessionTargets,
    documents: Vec<Document>,
    next_instance: u64,
}

impl Workbench {
    pub fn new(history_capacity: usize) -> Self {
        let mut registry = StateRegistry::new();
        let history = HistoryManager::attach(&mut registry, history_capacity);
        let activation = ActivationTracker::attach(&mut registry);
        Self {
            registry,
            history,
            identity: EditorIdentityResolver::new(),
            activation,
            targets: SessionTargets::new(),
            documents: Vec::new(),
            next_instance: 1,
        }
    }

    pub fn with_settings(settings: &Settings) -> Self {
        Self::new(settings.history_capacity)
    }

    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }

    /// Mutable registry access for panels that write through `update`.
    pub fn registry_mut(&mut self) -> &mut StateRegistry {
        &mut self.registry
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn activation(&self) -> &ActivationTracker {
        &self.activation
    }

    /// The bridge's per-connection target cache. Hand a clone to the server.
    pub fn session_targets(&self) -> SessionTargets {
        self.targets.clone()
    }

    // ------------------------------------------------------------------
    // Document lifecycle
    // ------------------------------------------------------------------

    /// Mint a handle for a document the host is about to open.
    pub fn new_handle(&mut self, uri: impl Into<String>) -> DocumentHandle {
        let handle = DocumentHandle::new(self.next_instance, uri);
        self.next_instance += 1;
        handle
    }

    /// Recognize an opened document and register its initial state.
    /// Opening the same instance twice returns the existing editor.
    pub fn open_document(
        &mut self,
        handle: DocumentHandle,
        state: EditorState,
        path: Option<PathBuf>,
    ) -> Result<EditorId, StateError> {
        if let Some(existing) = self.identity.lookup(&handle) {
            return Ok(existing);
        }
        let editor_id = self.identity.resolve(&handle);
        if let Err(e) = self.registry.register_with_state(editor_id.clone(), state) {
            self.identity.dispose(&handle);
            return Err(e);
        }
        log::info!("Opened {} as {}", handle.uri(), editor_id);
        self.documents.push(Document {
            handle,
            editor_id: editor_id.clone(),
            path,
        });

        #[cfg(debug_assertions)]
        self.debug_check_invariants();

        Ok(editor_id)
    }

    /// Open an empty, unsaved plot named `filename`.
    pub fn open_untitled(&mut self, filename: &str) -> Result<EditorId, StateError> {
        let handle = self.new_handle(filename);
        self.open_document(handle, EditorState::for_file(filename), None)
    }

    /// Load a plot file and open it.
    pub fn open_file(&mut self, path: &Path) -> Result<EditorId, WorkbenchError> {
        let decoded = tidemark_io::load_plot(path)?;
        let uri = path.display().to_string();
        let state = decoded.into_state(uri.clone());
        let handle = self.new_handle(uri);
        Ok(self.open_document(handle, state, Some(path.to_path_buf()))?)
    }

    /// The host disposed a document. Drops its state, history, focus entry and
    /// any bridge cache entries pointing at it. Closing twice is harmless.
    pub fn close_document(&mut self, editor_id: &EditorId) -> Option<Arc<EditorState>> {
        let index = self.documents.iter().position(|d| &d.editor_id == editor_id)?;
        let document = self.documents.remove(index);
        self.identity.dispose(&document.handle);

        let final_state = self.registry.unregister(editor_id);
        self.activation.document_closed(&mut self.registry);

        let registry = &self.registry;
        let dropped = self
            .targets
            .retain_open(|cached| registry.contains(cached));
        if dropped > 0 {
            log::debug!("Cleared {} bridge target(s) for closed {}", dropped, document.handle.uri());
        }
        log::info!("Closed {}", document.handle.uri());

        #[cfg(debug_assertions)]
        self.debug_check_invariants();

        final_state
    }

    // ------------------------------------------------------------------
    // Focus
    // ------------------------------------------------------------------

    pub fn focus(&mut self, editor_id: &EditorId) -> Result<(), StateError> {
        self.activation.focus_gained(&mut self.registry, editor_id)
    }

    pub fn blur(&self, editor_id: &EditorId) {
        self.activation.focus_lost(editor_id);
    }

    pub fn attach_panel(&mut self, editor_id: &EditorId) -> Result<(), StateError> {
        self.activation.panel_attached(&mut self.registry, editor_id)
    }

    pub fn detach_panel(&self, editor_id: &EditorId) {
        self.activation.panel_detached(editor_id);
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    pub fn undo(&mut self, editor_id: Option<&EditorId>) -> Result<HistoryOutcome, StateError> {
        self.history.undo(&mut self.registry, editor_id)
    }

    pub fn redo(&mut self, editor_id: Option<&EditorId>) -> Result<HistoryOutcome, StateError> {
        self.history.redo(&mut self.registry, editor_id)
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn document_path(&self, editor_id: &EditorId) -> Option<&Path> {
        self.documents
            .iter()
            .find(|d| &d.editor_id == editor_id)
            .and_then(|d| d.path.as_deref())
    }

    /// Encode the editor's state into its document. With `path`, saves there
    /// and makes it the document's file from now on.
    pub fn save_document(&mut self, editor_id: &EditorId, path: Option<&Path>) -> Result<PathBuf, WorkbenchError> {
        let state = self.registry.state(editor_id)?;
        let target = match path {
            Some(p) => p.to_path_buf(),
            None => self
                .document_path(editor_id)
                .map(Path::to_path_buf)
                .ok_or_else(|| WorkbenchError::NoPath(state.metadata.filename.clone()))?,
        };

        tidemark_io::save_plot(&target, &state)?;

        if let Some(document) = self.documents.iter_mut().find(|d| &d.editor_id == editor_id) {
            document.path = Some(target.clone());
        }
        log::info!("Saved {} to {}", editor_id, target.display());
        Ok(target)
    }

    // ------------------------------------------------------------------
    // Bridge pumping
    // ------------------------------------------------------------------

    /// Handle every request already queued. Returns how many were handled.
    pub fn pump_requests(&mut self, rx: &Receiver<SessionRequest>) -> usize {
        let mut handled = 0;
        while let Ok(request) = rx.try_recv() {
            dispatch::handle_request(self, request);
            handled += 1;
        }
        handled
    }

    /// Block handling requests until `keep_running` returns false or every
    /// sender is gone. Checks `keep_running` at least every `tick`.
    pub fn serve(&mut self, rx: &Receiver<SessionRequest>, tick: Duration, keep_running: impl Fn() -> bool) {
        while keep_running() {
            match rx.recv_timeout(tick) {
                Ok(request) => dispatch::handle_request(self, request),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    #[cfg(debug_assertions)]
    fn debug_check_invariants(&self) {
        debug_assert_eq!(
            self.documents.len(),
            self.registry.len(),
            "Workbench invariant violation: documents and registry disagree"
        );
        for document in &self.documents {
            debug_assert!(
                self.registry.contains(&document.editor_id),
                "Workbench invariant violation: document editor not registered"
            );
        }
        let mut instances = std::collections::HashSet::new();
        for document in &self.documents {
            debug_assert!(
                instances.insert(document.handle.instance()),
                "Workbench invariant violation: duplicate document instance"
            );
        }
    }
}

impl Default for Workbench {
    fn default() -> Self {
        Self::new(tidemark_engine::DEFAULT_HISTORY_CAPACITY)
    }
}
