//! Change Events
//!
//! An [`Event`] records that an observable changed. Events are raised into a
//! [`DependencyManager`](crate::dependency::DependencyManager) queue and
//! delivered in batches during dispatch.
//!
//! Visibility changes are ordinary events with the reserved kind
//! [`VISIBILITY_CHANGE`]; the flag is mirrored into `metadata["visible"]`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::ObjectId;

/// Event kind reserved for visibility-change notifications.
pub const VISIBILITY_CHANGE: &str = "visibility_change";

/// Free-form event metadata.
pub type Metadata = serde_json::Map<String, Value>;

/// Sequence number identifying one queued event instance.
///
/// Used to track which namespaces have already consumed a global event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventSeq(u64);

impl EventSeq {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw sequence value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A change notification raised by an observable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    kind: String,
    source: ObjectId,
    metadata: Metadata,
    timestamp: SystemTime,
    namespace: Option<String>,
    id: Option<String>,
    visible: Option<bool>,
    seq: EventSeq,
}

impl Event {
    /// Create an event of the given kind raised by `source`.
    pub fn new(kind: impl Into<String>, source: ObjectId) -> Self {
        Self {
            kind: kind.into(),
            source,
            metadata: Metadata::new(),
            timestamp: SystemTime::now(),
            namespace: None,
            id: None,
            visible: None,
            seq: EventSeq::next(),
        }
    }

    /// Create a visibility-change event.
    pub fn visibility_change(source: ObjectId, visible: bool) -> Self {
        let mut event = Self::new(VISIBILITY_CHANGE, source);
        event.visible = Some(visible);
        event.metadata.insert("visible".to_owned(), Value::Bool(visible));
        event
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Insert a single metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Tag the event with a namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Attach a caller-supplied identity.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn source(&self) -> ObjectId {
        self.source
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn seq(&self) -> EventSeq {
        self.seq
    }

    /// The visibility flag, for visibility-change events.
    pub fn visible(&self) -> Option<bool> {
        self.visible
    }

    pub fn is_visibility_change(&self) -> bool {
        self.kind == VISIBILITY_CHANGE
    }

    /// Copy of this event under a fresh sequence number.
    ///
    /// Used when leftover cascade events are deferred to a later dispatch.
    pub fn requeued(&self) -> Self {
        Self {
            seq: EventSeq::next(),
            ..self.clone()
        }
    }

    pub(crate) fn set_namespace(&mut self, namespace: Option<String>) {
        self.namespace = namespace;
    }

    /// Merge a duplicate's metadata into this event; the duplicate wins on
    /// key collisions.
    pub(crate) fn merge_metadata(&mut self, other: &Event) {
        for (key, value) in &other.metadata {
            self.metadata.insert(key.clone(), value.clone());
        }
        if other.visible.is_some() {
            self.visible = other.visible;
        }
    }
}
