//! Visibility tracking.
//!
//! A [`VisibilityContext`] is an optional side table of per-object
//! visibility flags with change listeners. The dependency manager never
//! reads it; callers turn it into the `visible` set for a dispatch, and
//! visibility-aware objects raise their own visibility-change events.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::trace;

use crate::dependency::DependencyManager;
use crate::events::Event;
use crate::graph::ObjectId;

/// Objects that expose a visibility flag.
pub trait VisibilityAware {
    fn is_visible(&self) -> bool;
    fn set_visible(&self, visible: bool);
}

/// Identifier returned by [`VisibilityContext::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

type Listener = Arc<dyn Fn(ObjectId, bool) + Send + Sync>;

/// Side table mapping objects to visibility.
///
/// Keyed by [`ObjectId`], so tracking an object never keeps it alive.
#[derive(Default)]
pub struct VisibilityContext {
    states: DashMap<ObjectId, bool>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
}

impl VisibilityContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an object without notifying listeners.
    pub fn track(&self, object: ObjectId, visible: bool) {
        self.states.insert(object, visible);
    }

    /// Stop tracking an object, returning its last flag.
    pub fn untrack(&self, object: ObjectId) -> Option<bool> {
        self.states.remove(&object).map(|(_, visible)| visible)
    }

    /// Update an object's flag. Listeners run only when the flag changes,
    /// and never while the table is locked.
    pub fn set_visible(&self, object: ObjectId, visible: bool) -> bool {
        let previous = self.states.insert(object, visible);
        if previous == Some(visible) {
            return false;
        }

        trace!(object = %object, visible, "visibility changed");
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(object, visible);
        }
        true
    }

    pub fn is_visible(&self, object: ObjectId) -> Option<bool> {
        self.states.get(&object).map(|entry| *entry.value())
    }

    /// Every tracked object currently flagged visible.
    pub fn visible_set(&self) -> HashSet<ObjectId> {
        self.states
            .iter()
            .filter(|entry| *entry.value())
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(ObjectId, bool) + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }
}

impl std::fmt::Debug for VisibilityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisibilityContext")
            .field("tracked", &self.states.len())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

/// A visibility flag bound to one object.
///
/// Changing the flag raises a visibility-change event on the manager and
/// mirrors the new value into the context, if one is attached.
pub struct VisibilityFlag {
    object: ObjectId,
    visible: AtomicBool,
    manager: Arc<DependencyManager>,
    context: Option<Arc<VisibilityContext>>,
}

impl VisibilityFlag {
    pub fn new(object: ObjectId, manager: Arc<DependencyManager>, visible: bool) -> Self {
        Self {
            object,
            visible: AtomicBool::new(visible),
            manager,
            context: None,
        }
    }

    /// Mirror this flag into `context`, starting with the current value.
    pub fn with_context(mut self, context: Arc<VisibilityContext>) -> Self {
        context.track(self.object, self.visible.load(Ordering::Acquire));
        self.context = Some(context);
        self
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }
}

impl VisibilityAware for VisibilityFlag {
    fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Acquire)
    }

    fn set_visible(&self, visible: bool) {
        if self.visible.swap(visible, Ordering::AcqRel) == visible {
            return;
        }
        if let Some(context) = &self.context {
            context.set_visible(self.object, visible);
        }
        self.manager
            .raise_event(Event::visibility_change(self.object, visible));
    }
}

impl Drop for VisibilityFlag {
    fn drop(&mut self) {
        if let Some(context) = &self.context {
            context.untrack(self.object);
        }
    }
}
