//! Dependency Graph
//!
//! This module defines the identities tracked by the engine and the pure
//! graph algorithms the dispatcher relies on.
//!
//! # Overview
//!
//! The dependency graph is a directed graph where:
//!
//! - Nodes are opaque objects identified by [`ObjectId`]
//! - Edges are dependencies: if D depends on O, D is notified when O changes
//!
//! Unlike a strict DAG, the live graph may contain cycles. They are a normal
//! state, not an error: the dispatcher detects them per dispatch pass with
//! [`strongly_connected_components`] and removes feedback edges with
//! [`break_cycles`] before ordering delivery with [`topological_sort`].
//!
//! # Design Decisions
//!
//! 1. Objects are referenced by ID, with processors held weakly, so the
//!    graph never owns application objects.
//!
//! 2. Algorithms operate on plain `IndexMap` adjacency maps so that results
//!    are deterministic for a given insertion order.

mod algorithms;
mod node;

pub use algorithms::{
    break_cycles, find_cycles, strongly_connected_components, topological_sort,
    DependencyGraph, TopologicalOrder,
};
pub use node::{ChangeProcessor, ObjectId, ObjectRef};
