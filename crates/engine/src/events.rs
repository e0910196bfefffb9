//! Event types and the synchronous event bus behind the state registry.
//!
//! Panels, the history manager and the activation tracker all learn about
//! changes through these events. Delivery is synchronous on the mutation
//! thread, in registration order, one listener after another, so every
//! listener observes events in exactly the order the mutations happened.
//!
//! Listeners receive `&StateEvent` and cannot reach the registry from inside
//! the callback; anything that needs to write back does so after `emit`
//! returns.

use std::sync::Arc;

use parking_lot::Mutex;
use tidemark_core::{EditorId, EditorState, SliceKind};

/// Events emitted by the state registry.
#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent {
    /// A document was recognized and its state registered.
    EditorOpened(EditorOpenedEvent),

    /// One atomic mutation of an editor's state.
    StateChanged(StateChangedEvent),

    /// An editor's state was dropped. Listeners must release any reference to it.
    EditorClosed(EditorClosedEvent),

    /// The default command target changed.
    ActiveEditorChanged(ActiveEditorChangedEvent),

    /// User-visible message with no state effect.
    Notice(NoticeEvent),
}

impl StateEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StateEvent::EditorOpened(_) => EventKind::EditorOpened,
            StateEvent::StateChanged(_) => EventKind::StateChanged,
            StateEvent::EditorClosed(_) => EventKind::EditorClosed,
            StateEvent::ActiveEditorChanged(_) => EventKind::ActiveEditorChanged,
            StateEvent::Notice(_) => EventKind::Notice,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditorOpenedEvent {
    pub editor_id: EditorId,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateChangedEvent {
    pub editor_id: EditorId,
    /// Slices that were written. One entry for `update`, possibly several for a restore.
    pub slices: Vec<SliceKind>,
    pub previous: Arc<EditorState>,
    pub next: Arc<EditorState>,
    /// Human-readable label, shown in the history panel.
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditorClosedEvent {
    pub editor_id: EditorId,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveEditorChangedEvent {
    pub previous: Option<EditorId>,
    pub current: Option<EditorId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoticeEvent {
    pub editor_id: Option<EditorId>,
    pub level: NoticeLevel,
    pub message: String,
}

/// Discriminant of [`StateEvent`], used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    EditorOpened,
    StateChanged,
    EditorClosed,
    ActiveEditorChanged,
    Notice,
}

/// Which events a listener wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    All,
    Only(EventKind),
}

impl EventFilter {
    fn matches(&self, event: &StateEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Only(kind) => event.kind() == *kind,
        }
    }
}

impl From<EventKind> for EventFilter {
    fn from(kind: EventKind) -> Self {
        EventFilter::Only(kind)
    }
}

/// Callback type for receiving state events.
pub type EventCallback = Box<dyn FnMut(&StateEvent) + Send>;

/// Returned by `subscribe`; pass it back to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

struct Listener {
    handle: SubscriptionHandle,
    filter: EventFilter,
    callback: EventCallback,
}

/// Ordered list of listeners.
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<Listener>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, filter: EventFilter, callback: EventCallback) -> SubscriptionHandle {
        self.next_id += 1;
        let handle = SubscriptionHandle(self.next_id);
        self.listeners.push(Listener {
            handle,
            filter,
            callback,
        });
        handle
    }

    /// Remove a listener. Returns false if the handle was already gone.
    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| l.handle != handle);
        self.listeners.len() != before
    }

    /// Deliver to every matching listener, in registration order.
    pub fn emit(&mut self, event: &StateEvent) {
        for listener in self.listeners.iter_mut() {
            if listener.filter.matches(event) {
                (listener.callback)(event);
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

/// Shared sink that records every event it is fed. Handy for panels that
/// drain changes on their own schedule, and for tests.
#[derive(Clone, Default)]
pub struct EventCollector {
    events: Arc<Mutex<Vec<StateEvent>>>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback that appends into this collector.
    pub fn callback(&self) -> EventCallback {
        let events = Arc::clone(&self.events);
        Box::new(move |event| events.lock().push(event.clone()))
    }

    pub fn events(&self) -> Vec<StateEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(StateEvent::kind).collect()
    }

    /// Take everything collected so far.
    pub fn drain(&self) -> Vec<StateEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Only the StateChanged events.
    pub fn state_changes(&self) -> Vec<StateChangedEvent> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                StateEvent::StateChanged(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }
}
