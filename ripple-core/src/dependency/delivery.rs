//! Batch delivery.
//!
//! Turns a list of queued events into at most one `process_change` call per
//! dependent, ordered so that a dependent runs after every source it depends
//! on within the same batch.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::error::{DeliveryFailure, ProcessingError};
use crate::events::{Event, EventSeq};
use crate::graph::{break_cycles, topological_sort, DependencyGraph, ObjectId, ObjectRef};

use super::manager::{DependencyManager, DispatchReport, Scope};
use super::pruning::PrunedGraph;
use super::subscription::SubscriptionHandle;

/// An event collected for delivery.
#[derive(Debug, Clone)]
pub(crate) struct Pending {
    pub(crate) event: Event,
    /// Namespaces that already consumed this event. Handles tagged with one
    /// of them are skipped.
    pub(crate) skip: HashSet<String>,
}

impl Pending {
    pub(crate) fn new(event: Event) -> Self {
        Self {
            event,
            skip: HashSet::new(),
        }
    }

    fn skips(&self, handle: &SubscriptionHandle) -> bool {
        handle.namespace().is_some_and(|ns| self.skip.contains(ns))
    }
}

/// Fold events sharing `(kind, source)` into the first occurrence.
///
/// Metadata of later duplicates overwrites earlier values. A merged event
/// is skipped only for namespaces that every duplicate was skipped for.
/// Returns the survivors and the number of events folded away.
pub(crate) fn deduplicate(batch: Vec<Pending>) -> (Vec<Pending>, usize) {
    let total = batch.len();
    let mut unique: IndexMap<(String, ObjectId), Pending> = IndexMap::with_capacity(total);

    for pending in batch {
        let key = (pending.event.kind().to_owned(), pending.event.source());
        match unique.get_mut(&key) {
            Some(kept) => {
                kept.event.merge_metadata(&pending.event);
                kept.skip.retain(|ns| pending.skip.contains(ns));
            }
            None => {
                unique.insert(key, pending);
            }
        }
    }

    let survivors: Vec<Pending> = unique.into_values().collect();
    let removed = total - survivors.len();
    (survivors, removed)
}

/// How regular events are restricted by visibility.
#[derive(Clone, Copy)]
pub(crate) enum VisibilityFilter<'a> {
    Unfiltered,
    /// Look dependents up in the cached pruned graph.
    Pruned(&'a PrunedGraph),
}

impl VisibilityFilter<'_> {
    fn allows(&self, source: ObjectId, dependent: ObjectId, bypass: bool) -> bool {
        if bypass {
            return true;
        }
        match self {
            VisibilityFilter::Unfiltered => true,
            VisibilityFilter::Pruned(graph) => graph
                .get(&source)
                .is_some_and(|dependents| dependents.contains(&dependent)),
        }
    }
}

/// Events accumulated for one dependent.
struct Batch {
    target: ObjectRef,
    events: Vec<Event>,
    seen: HashSet<EventSeq>,
}

impl Batch {
    fn new(target: ObjectRef) -> Self {
        Self {
            target,
            events: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Add an event once, however many handles lead to it.
    fn push(&mut self, event: &Event) -> bool {
        if self.seen.insert(event.seq()) {
            self.events.push(event.clone());
            true
        } else {
            false
        }
    }
}

impl DependencyManager {
    /// Deliver visibility changes unfiltered, then regular events through
    /// the pruned graph, if any.
    pub(crate) fn deliver_split(
        &self,
        batch: Vec<Pending>,
        scope: &Scope,
        pruned: Option<&PrunedGraph>,
        report: &mut DispatchReport,
    ) {
        let (visibility, regular): (Vec<Pending>, Vec<Pending>) = batch
            .into_iter()
            .partition(|pending| pending.event.is_visibility_change());

        self.deliver(visibility, scope, VisibilityFilter::Unfiltered, report);

        let filter = pruned.map_or(VisibilityFilter::Unfiltered, VisibilityFilter::Pruned);
        self.deliver(regular, scope, filter, report);
    }

    pub(crate) fn deliver(
        &self,
        batch: Vec<Pending>,
        scope: &Scope,
        filter: VisibilityFilter<'_>,
        report: &mut DispatchReport,
    ) {
        if batch.is_empty() {
            return;
        }

        let (events, folded) = deduplicate(batch);
        report.deduplicated += folded;
        report.events_dispatched += events.len();

        let mut by_source: IndexMap<ObjectId, Vec<Pending>> = IndexMap::new();
        for pending in events {
            by_source.entry(pending.event.source()).or_default().push(pending);
        }

        let mut batches: IndexMap<ObjectId, Batch> = IndexMap::new();
        let mut subgraph: DependencyGraph<ObjectId> = DependencyGraph::new();
        {
            let mut state = self.state.lock();
            let mut stale: SmallVec<[SubscriptionHandle; 4]> = SmallVec::new();

            for (&source, pending) in &by_source {
                subgraph.entry(source).or_default();
                let Some(handles) = state.dependencies.get(&source) else {
                    continue;
                };
                let bypass = pending.iter().any(|p| p.event.is_visibility_change());

                for handle in handles {
                    if !handle.is_valid() {
                        stale.push(handle.clone());
                        continue;
                    }
                    let dependent = handle.dependent_id();
                    if !scope.admits(handle.namespace())
                        || !filter.allows(source, dependent, bypass)
                    {
                        continue;
                    }

                    let batch = batches
                        .entry(dependent)
                        .or_insert_with(|| Batch::new(handle.dependent().clone()));
                    let mut added = false;
                    for p in pending.iter().filter(|p| !p.skips(handle)) {
                        added |= batch.push(&p.event);
                    }
                    if added {
                        subgraph.entry(dependent).or_default().insert(source);
                    }
                }
            }

            for handle in &stale {
                state.remove_handle(handle);
            }
            if !stale.is_empty() {
                debug!(count = stale.len(), "dropped stale subscriptions");
            }
        }

        let removed = break_cycles(&mut subgraph);
        if !removed.is_empty() {
            debug!(edges = ?removed, "broke dependency cycles");
            report.broken_cycle_edges += removed.len();
        }

        let mut order = topological_sort(&subgraph).order;
        let ordered: HashSet<ObjectId> = order.iter().copied().collect();
        order.extend(batches.keys().copied().filter(|d| !ordered.contains(d)));

        let verbose = self.debug_mode();
        for node in order {
            let Some(batch) = batches.swap_remove(&node) else {
                continue;
            };
            if batch.events.is_empty() {
                continue;
            }
            let Some(processor) = batch.target.processor_handle() else {
                continue;
            };

            if verbose {
                debug!(dependent = %node, events = batch.events.len(), "delivering batch");
            } else {
                trace!(dependent = %node, events = batch.events.len(), "delivering batch");
            }

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                processor.process_change(&batch.events)
            }));
            report.delivered_batches += 1;

            let error = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(error)) => Some(error),
                Err(payload) => Some(ProcessingError::from_panic(payload.as_ref())),
            };
            if let Some(error) = error {
                warn!(dependent = %node, error = %error, "change processor failed");
                report.failures.push(DeliveryFailure {
                    dependent: node,
                    events: batch.events.len(),
                    error,
                });
            }
        }
    }
}
