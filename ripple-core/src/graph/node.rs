//! Graph Nodes
//!
//! This module defines the identities that live in the dependency graph and
//! the capability a node must expose to receive change deliveries.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::error::ProcessingError;
use crate::events::Event;

/// Unique identifier for an object tracked by the dependency graph.
///
/// The engine never interprets what an object is; it only compares ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Generate a new unique object ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for ObjectId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

/// A dependent that can receive batched change notifications.
///
/// The manager invokes `process_change` at most once per dependent per
/// dispatch pass, with every event accumulated for it in that pass.
pub trait ChangeProcessor: Send + Sync {
    /// Handle a batch of change events.
    fn process_change(&self, events: &[Event]) -> Result<(), ProcessingError>;

    /// Whether this processor re-emits events of its own when it receives
    /// changes. Visibility pruning keeps upstream paths into relays alive
    /// even when the relay itself is not visible.
    fn is_relay(&self) -> bool {
        false
    }
}

/// A reference to an object participating in the graph.
///
/// The processor is held weakly so the graph never keeps an application
/// object alive on its own. Once the processor is dropped the reference is
/// dead and every subscription touching it becomes invalid.
#[derive(Clone)]
pub struct ObjectRef {
    id: ObjectId,
    processor: Option<Weak<dyn ChangeProcessor>>,
}

impl ObjectRef {
    /// Create a passive reference with a fresh ID.
    ///
    /// Passive objects can be observed and can depend on others, but
    /// never receive deliveries.
    pub fn new() -> Self {
        Self::with_id(ObjectId::new())
    }

    /// Create a passive reference for an existing ID.
    pub fn with_id(id: ObjectId) -> Self {
        Self { id, processor: None }
    }

    /// Create a reference backed by a change processor.
    pub fn processor<P>(id: ObjectId, processor: &Arc<P>) -> Self
    where
        P: ChangeProcessor + 'static,
    {
        let processor: Arc<dyn ChangeProcessor> = processor.clone();
        Self {
            id,
            processor: Some(Arc::downgrade(&processor)),
        }
    }

    /// Get the object's ID.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Check whether the referenced object still exists.
    pub fn is_alive(&self) -> bool {
        match &self.processor {
            Some(weak) => weak.strong_count() > 0,
            None => true,
        }
    }

    /// Upgrade to the live processor, if this object has one.
    pub fn processor_handle(&self) -> Option<Arc<dyn ChangeProcessor>> {
        self.processor.as_ref().and_then(Weak::upgrade)
    }

    /// Whether this object is a live processor that re-emits events.
    pub fn is_relay(&self) -> bool {
        self.processor_handle().is_some_and(|p| p.is_relay())
    }
}

impl Default for ObjectRef {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ObjectRef {}

impl Hash for ObjectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("id", &self.id)
            .field("processor", &self.processor.is_some())
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl From<ObjectId> for ObjectRef {
    fn from(id: ObjectId) -> Self {
        Self::with_id(id)
    }
}
