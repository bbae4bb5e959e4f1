//! Namespaced managers.
//!
//! A [`NamespacedDependencyManager`] is a filtered view over a shared
//! [`DependencyManager`]: registrations and events made through it are
//! tagged with its namespace, and its dispatch only reaches handles tagged
//! with that namespace. Global (untagged) events are seen by every
//! namespace exactly once.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::error::DependencyError;
use crate::events::Event;
use crate::graph::{ObjectId, ObjectRef};

use super::manager::{DependencyManager, DispatchOptions, DispatchReport};
use super::subscription::SubscriptionHandle;

/// A manager view scoped to one namespace.
pub struct NamespacedDependencyManager {
    namespace_id: Arc<str>,
    manager: Arc<DependencyManager>,
}

impl NamespacedDependencyManager {
    /// Create a namespace over `global_manager`, or over a private manager
    /// when none is given.
    pub fn new(
        namespace_id: impl Into<String>,
        global_manager: Option<Arc<DependencyManager>>,
    ) -> Self {
        let namespace_id: Arc<str> = Arc::from(namespace_id.into());
        let manager = global_manager.unwrap_or_default();
        manager.attach_namespace(&namespace_id);
        debug!(namespace = %namespace_id, "attached namespace");
        Self {
            namespace_id,
            manager,
        }
    }

    pub fn namespace_id(&self) -> &str {
        &self.namespace_id
    }

    /// The manager this namespace is layered over.
    pub fn global(&self) -> &Arc<DependencyManager> {
        &self.manager
    }

    pub fn register(
        &self,
        dependent: &ObjectRef,
        observable: &ObjectRef,
    ) -> Result<SubscriptionHandle, DependencyError> {
        self.manager
            .register_in(Some(self.namespace_id.clone()), dependent, observable)
    }

    pub fn register_all<'a, I>(
        &self,
        dependent: &ObjectRef,
        observables: I,
    ) -> Result<Vec<SubscriptionHandle>, DependencyError>
    where
        I: IntoIterator<Item = &'a ObjectRef>,
    {
        self.manager
            .register_all_in(Some(self.namespace_id.clone()), dependent, observables)
    }

    pub fn unregister(&self, handle: &SubscriptionHandle) -> bool {
        self.manager.unregister(handle)
    }

    /// Remove `dependent`'s registrations made through this namespace.
    pub fn unregister_all(&self, dependent: ObjectId) -> usize {
        self.manager.unregister_all_in(dependent, Some(self.namespace_id.as_ref()))
    }

    /// Dependents registered against `observable` through this namespace.
    pub fn get_dependents(&self, observable: ObjectId) -> HashSet<ObjectId> {
        self.manager.dependents_in(observable, Some(self.namespace_id.as_ref()))
    }

    /// Queue an event tagged with this namespace.
    pub fn raise_event(&self, mut event: Event) {
        event.set_namespace(Some(self.namespace_id.to_string()));
        self.manager.raise_event(event);
    }

    /// Dispatch this namespace's events plus global events it has not seen.
    ///
    /// Only `visible` and `intra_tick_cascade` apply; a namespace never
    /// filters further or delegates.
    pub fn dispatch_events(&self, options: DispatchOptions) -> DispatchReport {
        self.manager.dispatch_namespace(
            &self.namespace_id,
            options.visible.as_ref(),
            options.intra_tick_cascade,
        )
    }

    /// Dispatch with default options.
    pub fn dispatch(&self) -> DispatchReport {
        self.dispatch_events(self.manager.default_options())
    }

    /// Remove this namespace's registrations only.
    pub fn clear(&self) {
        self.manager.clear(Some(self.namespace_id.as_ref()));
    }
}

impl Drop for NamespacedDependencyManager {
    fn drop(&mut self) {
        self.manager.detach_namespace(&self.namespace_id);
    }
}

impl std::fmt::Debug for NamespacedDependencyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespacedDependencyManager")
            .field("namespace_id", &self.namespace_id)
            .finish()
    }
}
