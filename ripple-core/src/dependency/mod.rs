//! Dependency Management
//!
//! This module implements the propagation engine: a graph of
//! `dependent -> observable` registrations, event queues, and the dispatcher
//! that delivers batched, deduplicated, ordered notifications.
//!
//! # Concepts
//!
//! ## Registrations
//!
//! A dependent registers against an observable and gets a
//! [`SubscriptionHandle`]. Handles are indexed both by observable and by
//! dependent, and either index can be used to tear them down.
//!
//! ## Dispatch
//!
//! Observables raise [`Event`](crate::events::Event)s; nothing is delivered
//! until the caller runs [`DependencyManager::dispatch_events`]. Each
//! dependent receives at most one batch per pass, after every source it
//! depends on within that batch.
//!
//! ## Namespaces
//!
//! A [`NamespacedDependencyManager`] layers an isolated view over a shared
//! manager. Per-namespace dispatch only reaches that namespace's
//! registrations, while a full dispatch reaches everything.

mod context;
mod delivery;
mod global;
mod manager;
mod metrics;
mod namespace;
mod pruning;
mod subscription;

pub use global::{global_manager, reset_global_manager};
pub use manager::{DependencyManager, DispatchOptions, DispatchReport};
pub use metrics::PerformanceMetrics;
pub use namespace::NamespacedDependencyManager;
pub use pruning::PrunedGraph;
pub use subscription::{HandleId, SubscriptionHandle};
