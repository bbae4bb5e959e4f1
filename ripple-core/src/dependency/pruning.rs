//! Visibility Pruning
//!
//! Computes the part of the graph that can still reach a visible object, so
//! that dispatch can skip invisible subtrees with a single lookup per source.
//!
//! # Algorithm
//!
//! 1. Walk backward from every visible object along reverse-dependency
//!    edges, recording `source -> dependent` for each edge crossed. The walk
//!    continues past a source only when that source is an active relay:
//!    a relay re-emits what it receives, so its own inputs matter even when
//!    the relay itself is hidden. A plain hidden dependent would only swallow
//!    events, so nothing upstream of it is pulled in on its behalf.
//!
//! 2. For every visible relay, make sure each of its direct sources feeds it,
//!    and that any visible relay feeding one of those sources is connected
//!    too, so relay chains stay connected end to end.
//!
//! The result is cached against the visible set it was computed for and
//! dropped whenever the graph changes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::trace;

use crate::graph::{ObjectId, ObjectRef};

use super::manager::{DependencyManager, State};
use super::subscription::SubscriptionHandle;

/// Pruned graph: observable -> visible-reachable dependents.
pub type PrunedGraph = HashMap<ObjectId, HashSet<ObjectId>>;

/// Memoized pruning result.
pub(crate) struct PrunedCache {
    visible: HashSet<ObjectId>,
    graph: Arc<PrunedGraph>,
}

/// Reverse edges and relay flags copied out of the manager state.
///
/// Relay flags are read from user processors, so they are gathered after
/// the state lock is released.
struct PruneInput {
    /// dependent -> valid sources
    sources: HashMap<ObjectId, Vec<ObjectId>>,
    relays: HashSet<ObjectId>,
}

impl PruneInput {
    fn sources_of(&self, dependent: ObjectId) -> &[ObjectId] {
        self.sources.get(&dependent).map_or(&[], Vec::as_slice)
    }

    fn is_relay(&self, object: ObjectId) -> bool {
        self.relays.contains(&object)
    }

    fn compute(&self, visible: &HashSet<ObjectId>) -> PrunedGraph {
        let mut pruned = PrunedGraph::new();
        let mut expanded: HashSet<ObjectId> = visible.clone();
        let mut queue: VecDeque<ObjectId> = visible.iter().copied().collect();

        while let Some(dependent) = queue.pop_front() {
            for &source in self.sources_of(dependent) {
                pruned.entry(source).or_default().insert(dependent);
                if !expanded.contains(&source) && self.is_relay(source) {
                    expanded.insert(source);
                    queue.push_back(source);
                }
            }
        }

        for &relay in visible.iter().filter(|&&id| self.is_relay(id)) {
            for &source in self.sources_of(relay) {
                pruned.entry(source).or_default().insert(relay);
                for &up in self.sources_of(source) {
                    if visible.contains(&up) && self.is_relay(up) {
                        pruned.entry(up).or_default().insert(source);
                    }
                }
            }
        }

        pruned
    }
}

impl State {
    /// Copy the reverse index, plus one reference per graph member for the
    /// relay check.
    fn prune_snapshot(&self) -> (HashMap<ObjectId, Vec<ObjectId>>, Vec<ObjectRef>) {
        let mut sources = HashMap::with_capacity(self.reverse_dependencies.len());
        let mut members = Vec::with_capacity(self.reverse_dependencies.len());
        for (&dependent, handles) in &self.reverse_dependencies {
            let valid: Vec<ObjectId> = handles
                .iter()
                .filter(|handle| handle.is_valid())
                .map(SubscriptionHandle::observable_id)
                .collect();
            if let Some(handle) = handles.first() {
                members.push(handle.dependent().clone());
            }
            sources.insert(dependent, valid);
        }
        for (observable, handles) in &self.dependencies {
            if self.reverse_dependencies.contains_key(observable) {
                continue;
            }
            if let Some(handle) = handles.first() {
                members.push(handle.observable().clone());
            }
        }
        (sources, members)
    }
}

impl DependencyManager {
    /// Compute the visibility-pruned graph for `visible`.
    ///
    /// Maps each observable to the dependents that should still hear about
    /// it. Reuses the cached result when `visible` equals the set it was
    /// computed for.
    pub fn compute_pruned_dependencies(&self, visible: &HashSet<ObjectId>) -> PrunedGraph {
        self.pruned_graph(visible).as_ref().clone()
    }

    pub(crate) fn pruned_graph(&self, visible: &HashSet<ObjectId>) -> Arc<PrunedGraph> {
        let (sources, members, generation) = {
            let state = self.state.lock();
            if let Some(cache) = &state.pruned {
                if cache.visible == *visible {
                    return Arc::clone(&cache.graph);
                }
            }
            let (sources, members) = state.prune_snapshot();
            (sources, members, state.generation)
        };

        let relays = members
            .iter()
            .filter(|object| object.is_relay())
            .map(ObjectRef::id)
            .collect();
        let graph = Arc::new(PruneInput { sources, relays }.compute(visible));
        trace!(
            visible = visible.len(),
            observables = graph.len(),
            "recomputed pruned dependencies"
        );

        let mut state = self.state.lock();
        if state.generation == generation {
            state.pruned = Some(PrunedCache {
                visible: visible.clone(),
                graph: Arc::clone(&graph),
            });
        }
        graph
    }

    /// Whether a pruned graph is cached for exactly `visible`.
    pub fn has_cached_pruning(&self, visible: &HashSet<ObjectId>) -> bool {
        self.state
            .lock()
            .pruned
            .as_ref()
            .is_some_and(|cache| cache.visible == *visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::ProcessingError;
    use crate::events::Event;
    use crate::graph::ChangeProcessor;

    struct Node {
        relay: bool,
    }

    impl ChangeProcessor for Node {
        fn process_change(&self, _events: &[Event]) -> Result<(), ProcessingError> {
            Ok(())
        }

        fn is_relay(&self) -> bool {
            self.relay
        }
    }

    fn node(relay: bool, keep: &mut Vec<Arc<Node>>) -> ObjectRef {
        let node = Arc::new(Node { relay });
        let object = ObjectRef::processor(ObjectId::new(), &node);
        keep.push(node);
        object
    }

    #[test]
    fn relay_chain_survives_hidden_relay() {
        let manager = DependencyManager::new();
        let mut keep = Vec::new();
        let source = ObjectRef::new();
        let relay1 = node(true, &mut keep);
        let relay2 = node(true, &mut keep);
        let end = node(false, &mut keep);
        manager.register(&relay1, &source).unwrap();
        manager.register(&relay2, &relay1).unwrap();
        manager.register(&end, &relay2).unwrap();

        let visible = HashSet::from([end.id(), relay2.id()]);
        let pruned = manager.compute_pruned_dependencies(&visible);

        assert_eq!(pruned[&source.id()], HashSet::from([relay1.id()]));
        assert_eq!(pruned[&relay1.id()], HashSet::from([relay2.id()]));
        assert_eq!(pruned[&relay2.id()], HashSet::from([end.id()]));
    }

    #[test]
    fn hidden_plain_dependent_is_pruned() {
        let manager = DependencyManager::new();
        let mut keep = Vec::new();
        let source = ObjectRef::new();
        let hidden = node(false, &mut keep);
        let relay = node(true, &mut keep);
        let end = node(false, &mut keep);
        manager.register(&hidden, &source).unwrap();
        manager.register(&relay, &hidden).unwrap();
        manager.register(&end, &relay).unwrap();

        let visible = HashSet::from([end.id(), relay.id()]);
        let pruned = manager.compute_pruned_dependencies(&visible);

        assert!(!pruned.contains_key(&source.id()));
        assert_eq!(pruned[&hidden.id()], HashSet::from([relay.id()]));
    }

    #[test]
    fn cache_follows_visible_set_and_graph_changes() {
        let manager = DependencyManager::new();
        let mut keep = Vec::new();
        let source = ObjectRef::new();
        let a = node(false, &mut keep);
        let b = node(false, &mut keep);
        manager.register(&a, &source).unwrap();

        let visible = HashSet::from([a.id()]);
        let first = manager.pruned_graph(&visible);
        let second = manager.pruned_graph(&visible.clone());
        assert!(Arc::ptr_eq(&first, &second));
        assert!(manager.has_cached_pruning(&visible));

        let other = HashSet::from([b.id()]);
        manager.pruned_graph(&other);
        assert!(!manager.has_cached_pruning(&visible));
        assert!(manager.has_cached_pruning(&other));

        manager.register(&b, &source).unwrap();
        assert!(!manager.has_cached_pruning(&other));
        let pruned = manager.compute_pruned_dependencies(&other);
        assert_eq!(pruned[&source.id()], HashSet::from([b.id()]));
    }

    #[test]
    fn visible_relays_connect_through_plain_source() {
        let manager = DependencyManager::new();
        let mut keep = Vec::new();
        let up = node(true, &mut keep);
        let plain = node(false, &mut keep);
        let relay = node(true, &mut keep);
        manager.register(&plain, &up).unwrap();
        manager.register(&relay, &plain).unwrap();

        let visible = HashSet::from([up.id(), relay.id()]);
        let pruned = manager.compute_pruned_dependencies(&visible);

        assert_eq!(pruned[&plain.id()], HashSet::from([relay.id()]));
        assert_eq!(pruned[&up.id()], HashSet::from([plain.id()]));
    }

    /// Answers the relay check by calling back into its manager.
    struct Introspective {
        manager: Arc<DependencyManager>,
    }

    impl ChangeProcessor for Introspective {
        fn process_change(&self, _events: &[Event]) -> Result<(), ProcessingError> {
            Ok(())
        }

        fn is_relay(&self) -> bool {
            self.manager.handle_count() > 0
        }
    }

    #[test]
    fn relay_check_runs_outside_state_lock() {
        let manager = Arc::new(DependencyManager::new());
        let source = ObjectRef::new();
        let relay = Arc::new(Introspective {
            manager: manager.clone(),
        });
        let relay_ref = ObjectRef::processor(ObjectId::new(), &relay);
        let end = ObjectRef::new();
        manager.register(&relay_ref, &source).unwrap();
        manager.register(&end, &relay_ref).unwrap();

        let visible = HashSet::from([end.id()]);
        let pruned = manager.compute_pruned_dependencies(&visible);

        assert_eq!(pruned[&relay_ref.id()], HashSet::from([end.id()]));
        assert_eq!(pruned[&source.id()], HashSet::from([relay_ref.id()]));
    }
}
