//! Subscription handles.
//!
//! A [`SubscriptionHandle`] identifies one registered edge
//! `dependent -> observable`. Registering the same pair twice yields two
//! distinct handles; delivery is still batched per dependent.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::graph::{ObjectId, ObjectRef};

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(u64);

impl HandleId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// One registered dependency edge.
///
/// Clones share the same registration state: unregistering through any
/// clone invalidates all of them.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: HandleId,
    dependent: ObjectRef,
    observable: ObjectRef,
    namespace: Option<Arc<str>>,
    registered: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        dependent: ObjectRef,
        observable: ObjectRef,
        namespace: Option<Arc<str>>,
    ) -> Self {
        Self {
            id: HandleId::next(),
            dependent,
            observable,
            namespace,
            registered: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn dependent(&self) -> &ObjectRef {
        &self.dependent
    }

    pub fn observable(&self) -> &ObjectRef {
        &self.observable
    }

    pub fn dependent_id(&self) -> ObjectId {
        self.dependent.id()
    }

    pub fn observable_id(&self) -> ObjectId {
        self.observable.id()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// A handle is valid while it is registered and both endpoints are alive.
    pub fn is_valid(&self) -> bool {
        self.registered.load(Ordering::Acquire)
            && self.dependent.is_alive()
            && self.observable.is_alive()
    }

    /// Mark the handle as removed from the graph.
    pub(crate) fn invalidate(&self) {
        self.registered.store(false, Ordering::Release);
    }
}

impl PartialEq for SubscriptionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SubscriptionHandle {}

impl Hash for SubscriptionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("dependent", &self.dependent.id())
            .field("observable", &self.observable.id())
            .field("namespace", &self.namespace)
            .field("valid", &self.is_valid())
            .finish()
    }
}
