//! Ripple Core
//!
//! This crate provides a dependency and change-event propagation engine.
//! It implements:
//!
//! - A mutable dependency graph of `dependent -> observable` registrations
//! - Event queues with deduplication and metadata merging
//! - Batched, topologically ordered delivery with automatic cycle breaking
//! - Bounded intra-tick cascades for events raised during delivery
//! - Visibility pruning that keeps relay chains through hidden objects
//! - Namespaces layered over a shared graph
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Object identities and pure graph algorithms
//! - `events`: Change events
//! - `dependency`: The manager, delivery, pruning and namespaces
//! - `visibility`: Optional visibility side table
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ripple_core::{DependencyManager, Event, ObjectId, ObjectRef};
//!
//! let manager = DependencyManager::new();
//! let label = Arc::new(Label::default()); // implements ChangeProcessor
//! let label_ref = ObjectRef::processor(ObjectId::new(), &label);
//! let clock = ObjectRef::new();
//!
//! manager.register(&label_ref, &clock)?;
//! manager.raise_event(Event::new("tick", clock.id()));
//!
//! // Label::process_change runs once with the "tick" event.
//! manager.dispatch();
//! ```

pub mod config;
pub mod dependency;
pub mod error;
pub mod events;
pub mod graph;
pub mod visibility;

pub use config::ManagerConfig;
pub use dependency::{
    global_manager, reset_global_manager, DependencyManager, DispatchOptions, DispatchReport,
    NamespacedDependencyManager, PerformanceMetrics, SubscriptionHandle,
};
pub use error::{ConfigError, DeliveryFailure, DependencyError, ProcessingError};
pub use events::{Event, VISIBILITY_CHANGE};
pub use graph::{ChangeProcessor, ObjectId, ObjectRef};
pub use visibility::{VisibilityAware, VisibilityContext, VisibilityFlag};
