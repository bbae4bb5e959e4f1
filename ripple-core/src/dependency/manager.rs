//! Dependency Manager
//!
//! The manager owns the dependency graph and the event queues. Observables
//! raise events into it; callers drive delivery with
//! [`DependencyManager::dispatch_events`].
//!
//! # How Dispatch Works
//!
//! 1. Queued events are collected according to the dispatch scope (full,
//!    filtered by namespace set, or a single namespace's view).
//!
//! 2. Visibility-change events are delivered first, without any visibility
//!    filter. Regular events follow, filtered through the pruned graph for
//!    the caller's visible set.
//!
//! 3. Events raised by processors during delivery land in the secondary
//!    queue and are delivered in further cascade rounds, up to
//!    `max_iterations`. Leftovers are deferred to the next dispatch.
//!
//! 4. A full dispatch then delegates to every attached namespace.
//!
//! # Thread Safety
//!
//! Graph and queue state sit behind one `parking_lot::Mutex` that is never
//! held while a processor runs, so processors may freely raise events,
//! register dependencies or dispatch again. Whole dispatch passes are
//! serialized by a reentrant lock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, trace, warn};

use crate::config::ManagerConfig;
use crate::error::{ConfigError, DeliveryFailure, DependencyError};
use crate::events::{Event, EventSeq};
use crate::graph::{ObjectId, ObjectRef};

use super::context::{DispatchContext, ManagerId, Phase};
use super::delivery::Pending;
use super::metrics::PerformanceMetrics;
use super::pruning::PrunedCache;
use super::subscription::SubscriptionHandle;

/// Which handles and queues a dispatch pass covers.
#[derive(Debug, Clone)]
pub(crate) enum Scope {
    /// Every queue and every handle.
    Full,
    /// Only handles tagged with one of these namespaces.
    Filtered(HashSet<String>),
    /// One namespace's view: its own queue plus unseen global events.
    Namespace(String),
}

impl Scope {
    /// Whether a handle's namespace is covered by this scope.
    pub(crate) fn admits(&self, namespace: Option<&str>) -> bool {
        match self {
            Scope::Full => true,
            Scope::Filtered(set) => namespace.is_some_and(|ns| set.contains(ns)),
            Scope::Namespace(own) => namespace == Some(own.as_str()),
        }
    }

    /// Namespaces marked as having consumed a global event in this scope.
    fn consumers(&self) -> Vec<String> {
        match self {
            Scope::Full => Vec::new(),
            Scope::Filtered(set) => set.iter().cloned().collect(),
            Scope::Namespace(own) => vec![own.clone()],
        }
    }
}

/// Options for a single [`DependencyManager::dispatch_events`] call.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Objects currently visible. `None` disables visibility filtering.
    pub visible: Option<HashSet<ObjectId>>,
    /// Restrict delivery to handles registered under these namespaces.
    pub namespace_filter: Option<HashSet<String>>,
    /// Deliver events raised during this dispatch in the same call.
    pub intra_tick_cascade: bool,
    /// Run each attached namespace's dispatch afterwards.
    pub delegate_to_namespaces: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            visible: None,
            namespace_filter: None,
            intra_tick_cascade: true,
            delegate_to_namespaces: true,
        }
    }
}

impl DispatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn visible<I>(mut self, visible: I) -> Self
    where
        I: IntoIterator<Item = ObjectId>,
    {
        self.visible = Some(visible.into_iter().collect());
        self
    }

    pub fn namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.namespace_filter = Some(namespaces.into_iter().map(Into::into).collect());
        self
    }

    pub fn intra_tick_cascade(mut self, enabled: bool) -> Self {
        self.intra_tick_cascade = enabled;
        self
    }

    pub fn delegate_to_namespaces(mut self, enabled: bool) -> Self {
        self.delegate_to_namespaces = enabled;
        self
    }
}

/// Outcome of one dispatch call.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// `process_change` calls made.
    pub delivered_batches: usize,
    /// Events delivered after deduplication.
    pub events_dispatched: usize,
    /// Duplicate events folded away.
    pub deduplicated: usize,
    /// Cascade rounds run after the initial batch.
    pub cascade_rounds: usize,
    /// Events deferred to the next dispatch by the iteration cap.
    pub deferred_events: usize,
    /// Feedback edges removed while ordering delivery.
    pub broken_cycle_edges: usize,
    /// Processors that failed.
    pub failures: Vec<DeliveryFailure>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn absorb(&mut self, other: DispatchReport) {
        self.delivered_batches += other.delivered_batches;
        self.events_dispatched += other.events_dispatched;
        self.deduplicated += other.deduplicated;
        self.cascade_rounds += other.cascade_rounds;
        self.deferred_events += other.deferred_events;
        self.broken_cycle_edges += other.broken_cycle_edges;
        self.failures.extend(other.failures);
    }
}

/// Mutable graph and queue state.
#[derive(Default)]
pub(crate) struct State {
    /// observable -> handles registered against it
    pub(crate) dependencies: HashMap<ObjectId, IndexSet<SubscriptionHandle>>,
    /// dependent -> handles it registered
    pub(crate) reverse_dependencies: HashMap<ObjectId, IndexSet<SubscriptionHandle>>,
    pub(crate) primary_queue: VecDeque<Event>,
    pub(crate) secondary_queue: VecDeque<Event>,
    pub(crate) namespace_queues: HashMap<String, VecDeque<Event>>,
    /// global event -> namespaces that already consumed it
    pub(crate) processed_events: HashMap<EventSeq, HashSet<String>>,
    /// attached namespace -> number of live wrappers
    pub(crate) namespaces: IndexMap<String, usize>,
    pub(crate) pruned: Option<PrunedCache>,
    /// Bumped on every graph mutation.
    pub(crate) generation: u64,
    /// Nested dispatch passes in progress. Events raised while non-zero go
    /// to the secondary queue.
    pub(crate) batch_depth: usize,
    pub(crate) metrics: PerformanceMetrics,
}

impl State {
    pub(crate) fn processing_batch(&self) -> bool {
        self.batch_depth > 0
    }

    fn graph_changed(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.pruned = None;
    }

    /// Put an event on the queue its namespace selects.
    pub(crate) fn route(&mut self, event: Event) {
        match event.namespace().map(str::to_owned) {
            None => self.primary_queue.push_back(event),
            Some(ns) => self.namespace_queues.entry(ns).or_default().push_back(event),
        }
    }

    fn insert_handle(&mut self, handle: SubscriptionHandle) {
        self.dependencies
            .entry(handle.observable_id())
            .or_default()
            .insert(handle.clone());
        self.reverse_dependencies
            .entry(handle.dependent_id())
            .or_default()
            .insert(handle);
        self.graph_changed();
    }

    /// Remove a handle from both indices, dropping emptied entries.
    pub(crate) fn remove_handle(&mut self, handle: &SubscriptionHandle) -> bool {
        let mut removed = false;
        let observable = handle.observable_id();
        if let Some(set) = self.dependencies.get_mut(&observable) {
            removed |= set.shift_remove(handle);
            if set.is_empty() {
                self.dependencies.remove(&observable);
            }
        }
        let dependent = handle.dependent_id();
        if let Some(set) = self.reverse_dependencies.get_mut(&dependent) {
            removed |= set.shift_remove(handle);
            if set.is_empty() {
                self.reverse_dependencies.remove(&dependent);
            }
        }
        handle.invalidate();
        if removed {
            self.graph_changed();
        }
        removed
    }

    fn handles_of(&self, dependent: ObjectId) -> Vec<SubscriptionHandle> {
        self.reverse_dependencies
            .get(&dependent)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Collect the events a pass in `scope` should deliver.
    fn collect(&mut self, scope: &Scope) -> Vec<Pending> {
        let mut batch = Vec::new();
        match scope {
            Scope::Full => {
                let processed = std::mem::take(&mut self.processed_events);
                for event in self.primary_queue.drain(..) {
                    let skip = processed.get(&event.seq()).cloned().unwrap_or_default();
                    batch.push(Pending { event, skip });
                }
                for queue in self.namespace_queues.values_mut() {
                    batch.extend(queue.drain(..).map(Pending::new));
                }
                self.namespace_queues.clear();
            }
            Scope::Filtered(set) => {
                for ns in set {
                    if let Some(queue) = self.namespace_queues.remove(ns) {
                        batch.extend(queue.into_iter().map(Pending::new));
                    }
                }
                let targets: Vec<&str> = set.iter().map(String::as_str).collect();
                batch.extend(self.select_unseen(&targets));
            }
            Scope::Namespace(own) => {
                if let Some(queue) = self.namespace_queues.remove(own) {
                    batch.extend(queue.into_iter().map(Pending::new));
                }
                batch.extend(self.select_unseen(&[own.as_str()]));
            }
        }
        batch
    }

    /// Global events not yet consumed by at least one of `namespaces`.
    ///
    /// The primary queue is left in place. Selected events are marked as
    /// consumed by every target, and skip the namespaces that had them
    /// already.
    fn select_unseen(&mut self, namespaces: &[&str]) -> Vec<Pending> {
        let live: HashSet<EventSeq> = self.primary_queue.iter().map(Event::seq).collect();
        self.processed_events.retain(|seq, _| live.contains(seq));

        let mut batch = Vec::new();
        for event in &self.primary_queue {
            let seen = self.processed_events.entry(event.seq()).or_default();
            let skip = seen.clone();
            let mut fresh = false;
            for &ns in namespaces {
                fresh |= seen.insert(ns.to_owned());
            }
            if fresh {
                batch.push(Pending {
                    event: event.clone(),
                    skip,
                });
            }
        }
        batch
    }

    /// Drain the secondary queue for the next cascade round.
    ///
    /// Events tagged with a namespace outside `scope` go back to their own
    /// queue. Untagged events raised during a scoped pass are delivered in
    /// scope and also queued globally, marked as consumed by the scope.
    fn take_cascade(&mut self, scope: &Scope) -> Vec<Pending> {
        let drained: Vec<Event> = self.secondary_queue.drain(..).collect();
        if matches!(scope, Scope::Full) {
            return drained.into_iter().map(Pending::new).collect();
        }

        let mut batch = Vec::with_capacity(drained.len());
        for event in drained {
            let namespace = event.namespace().map(str::to_owned);
            match namespace.as_deref() {
                Some(ns) if scope.admits(Some(ns)) => batch.push(Pending::new(event)),
                Some(_) => self.route(event),
                None => {
                    self.processed_events
                        .entry(event.seq())
                        .or_default()
                        .extend(scope.consumers());
                    self.primary_queue.push_back(event.clone());
                    batch.push(Pending::new(event));
                }
            }
        }
        batch
    }
}

/// The dependency/event propagation engine.
pub struct DependencyManager {
    id: ManagerId,
    config: ManagerConfig,
    debug_mode: AtomicBool,
    pub(crate) state: Mutex<State>,
    dispatch_lock: ReentrantMutex<()>,
}

impl DependencyManager {
    /// Create a manager with the default configuration.
    pub fn new() -> Self {
        Self::build(ManagerConfig::default())
    }

    /// Create a manager with a validated configuration.
    pub fn with_config(config: ManagerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: ManagerConfig) -> Self {
        Self {
            id: ManagerId::new(),
            debug_mode: AtomicBool::new(config.debug_mode),
            config,
            state: Mutex::new(State::default()),
            dispatch_lock: ReentrantMutex::new(()),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Dispatch options seeded from this manager's configuration.
    pub fn default_options(&self) -> DispatchOptions {
        DispatchOptions::new()
            .intra_tick_cascade(self.config.intra_tick_cascade)
            .delegate_to_namespaces(self.config.delegate_to_namespaces)
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register `dependent` as depending on `observable`.
    ///
    /// Registering the same pair twice yields two handles; the dependent is
    /// still called once per dispatch pass.
    pub fn register(
        &self,
        dependent: &ObjectRef,
        observable: &ObjectRef,
    ) -> Result<SubscriptionHandle, DependencyError> {
        self.register_in(None, dependent, observable)
    }

    /// Register `dependent` against each distinct observable.
    pub fn register_all<'a, I>(
        &self,
        dependent: &ObjectRef,
        observables: I,
    ) -> Result<Vec<SubscriptionHandle>, DependencyError>
    where
        I: IntoIterator<Item = &'a ObjectRef>,
    {
        self.register_all_in(None, dependent, observables)
    }

    pub(crate) fn register_in(
        &self,
        namespace: Option<Arc<str>>,
        dependent: &ObjectRef,
        observable: &ObjectRef,
    ) -> Result<SubscriptionHandle, DependencyError> {
        check_endpoint("dependent", dependent)?;
        check_endpoint("observable", observable)?;

        let handle = SubscriptionHandle::new(dependent.clone(), observable.clone(), namespace);
        self.state.lock().insert_handle(handle.clone());
        trace!(
            dependent = %dependent.id(),
            observable = %observable.id(),
            namespace = handle.namespace(),
            "registered dependency"
        );
        Ok(handle)
    }

    pub(crate) fn register_all_in<'a, I>(
        &self,
        namespace: Option<Arc<str>>,
        dependent: &ObjectRef,
        observables: I,
    ) -> Result<Vec<SubscriptionHandle>, DependencyError>
    where
        I: IntoIterator<Item = &'a ObjectRef>,
    {
        check_endpoint("dependent", dependent)?;
        let distinct: IndexSet<&ObjectRef> = observables.into_iter().collect();
        for observable in &distinct {
            check_endpoint("observable", observable)?;
        }

        let handles: Vec<SubscriptionHandle> = distinct
            .into_iter()
            .map(|observable| {
                SubscriptionHandle::new(dependent.clone(), observable.clone(), namespace.clone())
            })
            .collect();

        let mut state = self.state.lock();
        for handle in &handles {
            state.insert_handle(handle.clone());
        }
        Ok(handles)
    }

    /// Remove one registration. Returns `false` if it was already gone.
    pub fn unregister(&self, handle: &SubscriptionHandle) -> bool {
        self.state.lock().remove_handle(handle)
    }

    /// Remove every registration of `dependent` on `observable`.
    pub fn unregister_pair(&self, dependent: ObjectId, observable: ObjectId) -> usize {
        let mut state = self.state.lock();
        let matching: Vec<SubscriptionHandle> = state
            .handles_of(dependent)
            .into_iter()
            .filter(|h| h.observable_id() == observable)
            .collect();
        matching.iter().filter(|h| state.remove_handle(h)).count()
    }

    /// Remove every registration of `dependent`.
    pub fn unregister_all(&self, dependent: ObjectId) -> usize {
        self.unregister_all_in(dependent, None)
    }

    /// Remove `dependent`'s registrations, optionally only those tagged
    /// with `namespace`.
    pub(crate) fn unregister_all_in(&self, dependent: ObjectId, namespace: Option<&str>) -> usize {
        let mut state = self.state.lock();
        let matching: Vec<SubscriptionHandle> = state
            .handles_of(dependent)
            .into_iter()
            .filter(|h| namespace.is_none() || h.namespace() == namespace)
            .collect();
        matching.iter().filter(|h| state.remove_handle(h)).count()
    }

    /// Distinct dependents registered directly against `observable`.
    pub fn get_dependents(&self, observable: ObjectId) -> HashSet<ObjectId> {
        self.dependents_in(observable, None)
    }

    pub(crate) fn dependents_in(
        &self,
        observable: ObjectId,
        namespace: Option<&str>,
    ) -> HashSet<ObjectId> {
        let state = self.state.lock();
        state
            .dependencies
            .get(&observable)
            .into_iter()
            .flatten()
            .filter(|h| namespace.is_none() || h.namespace() == namespace)
            .map(SubscriptionHandle::dependent_id)
            .collect()
    }

    /// Distinct observables `dependent` is registered against.
    pub fn get_dependencies(&self, dependent: ObjectId) -> HashSet<ObjectId> {
        let state = self.state.lock();
        state
            .reverse_dependencies
            .get(&dependent)
            .into_iter()
            .flatten()
            .map(SubscriptionHandle::observable_id)
            .collect()
    }

    /// Number of live registrations.
    pub fn handle_count(&self) -> usize {
        self.state.lock().dependencies.values().map(IndexSet::len).sum()
    }

    /// Clear the graph.
    ///
    /// With no namespace, drops every registration plus the primary and
    /// secondary queues. With a namespace, only that namespace's
    /// registrations are removed.
    pub fn clear(&self, namespace: Option<&str>) {
        let mut state = self.state.lock();
        match namespace {
            None => {
                for handle in state.dependencies.values().flatten() {
                    handle.invalidate();
                }
                state.dependencies.clear();
                state.reverse_dependencies.clear();
                state.primary_queue.clear();
                state.secondary_queue.clear();
                state.processed_events.clear();
                state.graph_changed();
                debug!("cleared dependency graph");
            }
            Some(ns) => {
                let tagged: Vec<SubscriptionHandle> = state
                    .dependencies
                    .values()
                    .flatten()
                    .filter(|h| h.namespace() == Some(ns))
                    .cloned()
                    .collect();
                for handle in &tagged {
                    state.remove_handle(handle);
                }
                debug!(namespace = ns, removed = tagged.len(), "cleared namespace");
            }
        }
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Queue an event for the next dispatch.
    ///
    /// While a dispatch is running the event joins the cascade queue
    /// instead, whatever its namespace.
    pub fn raise_event(&self, event: Event) {
        let mut state = self.state.lock();
        if state.processing_batch() {
            state.secondary_queue.push_back(event);
        } else {
            state.route(event);
        }
    }

    /// Events waiting in any queue.
    pub fn pending_event_count(&self) -> usize {
        let state = self.state.lock();
        state.primary_queue.len()
            + state.secondary_queue.len()
            + state.namespace_queues.values().map(VecDeque::len).sum::<usize>()
    }

    /// Dispatch with the configured defaults.
    pub fn dispatch(&self) -> DispatchReport {
        self.dispatch_events(self.default_options())
    }

    /// Deliver queued events to their dependents.
    pub fn dispatch_events(&self, options: DispatchOptions) -> DispatchReport {
        let _serial = self.dispatch_lock.lock();
        let started = Instant::now();

        let scope = match &options.namespace_filter {
            None => Scope::Full,
            Some(set) => Scope::Filtered(set.clone()),
        };
        let mut report = self.run_pass(
            &scope,
            options.visible.as_ref(),
            options.intra_tick_cascade,
        );

        if options.delegate_to_namespaces && !DispatchContext::is_delegating(self.id) {
            let targets: Vec<String> = {
                let state = self.state.lock();
                state
                    .namespaces
                    .keys()
                    .filter(|ns| {
                        options
                            .namespace_filter
                            .as_ref()
                            .map_or(true, |filter| filter.contains(*ns))
                    })
                    .cloned()
                    .collect()
            };
            if !targets.is_empty() {
                let _ctx = DispatchContext::enter(self.id, Phase::Delegating);
                for ns in targets {
                    let delegated = self.run_pass(
                        &Scope::Namespace(ns),
                        options.visible.as_ref(),
                        options.intra_tick_cascade,
                    );
                    report.absorb(delegated);
                }
            }
        }

        self.record(started, &report);
        report
    }

    /// Dispatch one namespace's view of the queues.
    pub(crate) fn dispatch_namespace(
        &self,
        namespace: &str,
        visible: Option<&HashSet<ObjectId>>,
        intra_tick_cascade: bool,
    ) -> DispatchReport {
        let _serial = self.dispatch_lock.lock();
        let started = Instant::now();
        let report = self.run_pass(
            &Scope::Namespace(namespace.to_owned()),
            visible,
            intra_tick_cascade,
        );
        self.record(started, &report);
        report
    }

    /// Dispatch an attached namespace's view from the shared manager.
    pub fn dispatch_in_namespace(
        &self,
        namespace: &str,
        options: DispatchOptions,
    ) -> Result<DispatchReport, DependencyError> {
        if !self.state.lock().namespaces.contains_key(namespace) {
            return Err(DependencyError::UnknownNamespace(namespace.to_owned()));
        }
        Ok(self.dispatch_namespace(
            namespace,
            options.visible.as_ref(),
            options.intra_tick_cascade,
        ))
    }

    /// One pass: initial batch, cascade rounds, then deferral of leftovers.
    fn run_pass(
        &self,
        scope: &Scope,
        visible: Option<&HashSet<ObjectId>>,
        intra_tick_cascade: bool,
    ) -> DispatchReport {
        let _ctx = DispatchContext::enter(self.id, Phase::Dispatching);
        let pruned = visible.map(|v| self.pruned_graph(v));

        let batch = {
            let mut state = self.state.lock();
            state.batch_depth += 1;
            state.collect(scope)
        };

        let mut report = DispatchReport::default();
        debug!(
            scope = ?scope,
            events = batch.len(),
            depth = DispatchContext::dispatch_depth(self.id),
            "dispatch pass"
        );
        self.deliver_split(batch, scope, pruned.as_deref(), &mut report);

        loop {
            let cascade = {
                let mut state = self.state.lock();
                let capped = report.cascade_rounds >= self.config.max_iterations;
                if !intra_tick_cascade || capped || state.secondary_queue.is_empty() {
                    // Leaving the batch under the same lock as the last check,
                    // so late producers go straight to their own queues.
                    state.batch_depth = state.batch_depth.saturating_sub(1);
                    if !state.processing_batch() && !state.secondary_queue.is_empty() {
                        let leftovers: Vec<Event> = state.secondary_queue.drain(..).collect();
                        report.deferred_events = leftovers.len();
                        if intra_tick_cascade && capped {
                            warn!(
                                deferred = leftovers.len(),
                                max_iterations = self.config.max_iterations,
                                "cascade limit reached, deferring events to next dispatch"
                            );
                        }
                        for event in leftovers {
                            state.route(event.requeued());
                        }
                    }
                    break;
                }
                state.take_cascade(scope)
            };
            report.cascade_rounds += 1;
            trace!(round = report.cascade_rounds, events = cascade.len(), "cascade round");
            self.deliver_split(cascade, scope, pruned.as_deref(), &mut report);
        }

        report
    }

    fn record(&self, started: Instant, report: &DispatchReport) {
        let mut state = self.state.lock();
        let metrics = &mut state.metrics;
        metrics.total_dispatch_time += started.elapsed();
        metrics.dispatch_count += 1;
        metrics.events_processed += report.events_dispatched as u64;
        metrics.deduplication_savings += report.deduplicated as u64;
        metrics.processing_errors += report.failures.len() as u64;
        metrics.cycle_edges_broken += report.broken_cycle_edges as u64;
    }

    // ------------------------------------------------------------------
    // Namespaces
    // ------------------------------------------------------------------

    pub(crate) fn attach_namespace(&self, namespace: &str) {
        let mut state = self.state.lock();
        *state.namespaces.entry(namespace.to_owned()).or_insert(0) += 1;
    }

    pub(crate) fn detach_namespace(&self, namespace: &str) {
        let mut state = self.state.lock();
        if let Some(count) = state.namespaces.get_mut(namespace) {
            *count -= 1;
            if *count == 0 {
                state.namespaces.shift_remove(namespace);
            }
        }
    }

    /// Namespaces currently attached for delegation.
    pub fn namespaces(&self) -> Vec<String> {
        self.state.lock().namespaces.keys().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    pub fn set_debug_mode(&self, enabled: bool) {
        self.debug_mode.store(enabled, Ordering::Relaxed);
    }

    pub fn debug_mode(&self) -> bool {
        self.debug_mode.load(Ordering::Relaxed)
    }

    pub fn get_performance_metrics(&self) -> PerformanceMetrics {
        self.state.lock().metrics.clone()
    }

    pub fn reset_metrics(&self) {
        self.state.lock().metrics = PerformanceMetrics::default();
    }
}

impl Default for DependencyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DependencyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DependencyManager")
            .field("id", &self.id)
            .field("observables", &state.dependencies.len())
            .field("dependents", &state.reverse_dependencies.len())
            .field("primary_queue", &state.primary_queue.len())
            .field("namespaces", &state.namespaces.len())
            .finish()
    }
}

fn check_endpoint(role: &str, object: &ObjectRef) -> Result<(), DependencyError> {
    if object.is_alive() {
        Ok(())
    } else {
        Err(DependencyError::InvalidArgument(format!(
            "{role} {} is no longer alive",
            object.id()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::NamespacedDependencyManager;
    use crate::error::ProcessingError;
    use crate::graph::ChangeProcessor;

    #[derive(Default)]
    struct Recorder {
        batches: Mutex<Vec<Vec<Event>>>,
    }

    impl ChangeProcessor for Recorder {
        fn process_change(&self, events: &[Event]) -> Result<(), ProcessingError> {
            self.batches.lock().push(events.to_vec());
            Ok(())
        }
    }

    fn recorder() -> (Arc<Recorder>, ObjectRef) {
        let recorder = Arc::new(Recorder::default());
        let object = ObjectRef::processor(ObjectId::new(), &recorder);
        (recorder, object)
    }

    #[test]
    fn register_updates_both_indices() {
        let manager = DependencyManager::new();
        let (_rec, dependent) = recorder();
        let observable = ObjectRef::new();

        let handle = manager.register(&dependent, &observable).unwrap();
        assert!(handle.is_valid());
        assert_eq!(manager.get_dependents(observable.id()), HashSet::from([dependent.id()]));
        assert_eq!(manager.get_dependencies(dependent.id()), HashSet::from([observable.id()]));

        assert!(manager.unregister(&handle));
        assert!(!handle.is_valid());
        assert!(manager.get_dependents(observable.id()).is_empty());
        let state = manager.state.lock();
        assert!(state.dependencies.is_empty());
        assert!(state.reverse_dependencies.is_empty());
    }

    #[test]
    fn register_rejects_dead_dependent() {
        let manager = DependencyManager::new();
        let (rec, dependent) = recorder();
        drop(rec);
        let err = manager.register(&dependent, &ObjectRef::new()).unwrap_err();
        assert!(matches!(err, DependencyError::InvalidArgument(_)));
        assert_eq!(manager.handle_count(), 0);
    }

    #[test]
    fn register_all_deduplicates_observables() {
        let manager = DependencyManager::new();
        let (_rec, dependent) = recorder();
        let a = ObjectRef::new();
        let b = ObjectRef::new();

        let handles = manager.register_all(&dependent, [&a, &b, &a]).unwrap();
        assert_eq!(handles.len(), 2);
        assert_eq!(manager.handle_count(), 2);
    }

    #[test]
    fn unregister_is_idempotent() {
        let manager = DependencyManager::new();
        let (_rec, dependent) = recorder();
        let observable = ObjectRef::new();
        let handle = manager.register(&dependent, &observable).unwrap();

        assert!(manager.unregister(&handle));
        assert!(!manager.unregister(&handle));
        assert_eq!(manager.unregister_pair(dependent.id(), ObjectId::new()), 0);
        assert_eq!(manager.unregister_all(ObjectId::new()), 0);
    }

    #[test]
    fn duplicate_registrations_are_separate_handles() {
        let manager = DependencyManager::new();
        let (_rec, dependent) = recorder();
        let observable = ObjectRef::new();
        let first = manager.register(&dependent, &observable).unwrap();
        let _second = manager.register(&dependent, &observable).unwrap();
        assert_eq!(manager.handle_count(), 2);

        manager.unregister(&first);
        assert_eq!(manager.handle_count(), 1);
        assert_eq!(manager.unregister_pair(dependent.id(), observable.id()), 1);
        assert_eq!(manager.handle_count(), 0);
    }

    #[test]
    fn raise_routes_by_namespace() {
        let manager = DependencyManager::new();
        let source = ObjectId::new();
        manager.raise_event(Event::new("changed", source));
        manager.raise_event(Event::new("changed", source).with_namespace("a"));

        let state = manager.state.lock();
        assert_eq!(state.primary_queue.len(), 1);
        assert_eq!(state.namespace_queues.get("a").map(VecDeque::len), Some(1));
        assert!(state.secondary_queue.is_empty());
    }

    #[test]
    fn raise_during_batch_goes_to_secondary() {
        let manager = DependencyManager::new();
        manager.state.lock().batch_depth = 1;
        manager.raise_event(Event::new("changed", ObjectId::new()).with_namespace("a"));
        let state = manager.state.lock();
        assert_eq!(state.secondary_queue.len(), 1);
        assert!(state.namespace_queues.is_empty());
    }

    #[test]
    fn clear_namespace_keeps_other_registrations() {
        let manager = DependencyManager::new();
        let (_rec, dependent) = recorder();
        let observable = ObjectRef::new();
        let global = manager.register(&dependent, &observable).unwrap();
        let tagged = manager
            .register_in(Some(Arc::from("panel")), &dependent, &observable)
            .unwrap();

        manager.clear(Some("panel"));
        assert!(global.is_valid());
        assert!(!tagged.is_valid());
        assert_eq!(manager.handle_count(), 1);

        manager.raise_event(Event::new("changed", observable.id()));
        manager.clear(None);
        assert!(!global.is_valid());
        assert_eq!(manager.handle_count(), 0);
        assert_eq!(manager.pending_event_count(), 0);
    }

    #[test]
    fn dispatch_delivers_single_event() {
        let manager = DependencyManager::new();
        let (rec, dependent) = recorder();
        let observable = ObjectRef::new();
        manager.register(&dependent, &observable).unwrap();

        manager.raise_event(Event::new("changed", observable.id()));
        let report = manager.dispatch();

        assert!(report.is_clean());
        assert_eq!(report.delivered_batches, 1);
        let batches = rec.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].kind(), "changed");
        assert_eq!(batches[0][0].source(), observable.id());
    }

    #[test]
    fn metrics_accumulate() {
        let manager = DependencyManager::new();
        let (_rec, dependent) = recorder();
        let observable = ObjectRef::new();
        manager.register(&dependent, &observable).unwrap();

        for _ in 0..3 {
            manager.raise_event(Event::new("changed", observable.id()));
        }
        manager.dispatch();
        manager.dispatch();

        let metrics = manager.get_performance_metrics();
        assert_eq!(metrics.dispatch_count, 2);
        assert_eq!(metrics.events_processed, 1);
        assert_eq!(metrics.deduplication_savings, 2);

        manager.reset_metrics();
        assert_eq!(manager.get_performance_metrics(), PerformanceMetrics::default());
    }

    /// Re-raises through its namespace on every delivery.
    struct NamespacedRelay {
        id: ObjectId,
        namespace: Arc<NamespacedDependencyManager>,
    }

    impl ChangeProcessor for NamespacedRelay {
        fn process_change(&self, _events: &[Event]) -> Result<(), ProcessingError> {
            self.namespace.raise_event(Event::new("relayed", self.id));
            Ok(())
        }

        fn is_relay(&self) -> bool {
            true
        }
    }

    fn relay_chain(
        namespace: &Arc<NamespacedDependencyManager>,
        source: &ObjectRef,
        len: usize,
    ) -> (Vec<Arc<NamespacedRelay>>, Vec<ObjectRef>) {
        let relays: Vec<Arc<NamespacedRelay>> = (0..len)
            .map(|_| {
                Arc::new(NamespacedRelay {
                    id: ObjectId::new(),
                    namespace: namespace.clone(),
                })
            })
            .collect();
        let refs: Vec<ObjectRef> = relays
            .iter()
            .map(|relay| ObjectRef::processor(relay.id, relay))
            .collect();
        let mut upstream = source;
        for object in &refs {
            namespace.register(object, upstream).unwrap();
            upstream = object;
        }
        (relays, refs)
    }

    #[test]
    fn filtered_dispatch_selects_unseen_global_events() {
        let manager = DependencyManager::new();
        let (rec, dependent) = recorder();
        let observable = ObjectRef::new();
        manager
            .register_in(Some(Arc::from("a")), &dependent, &observable)
            .unwrap();
        manager.raise_event(Event::new("changed", observable.id()));

        let options = DispatchOptions::new()
            .namespaces(["a"])
            .delegate_to_namespaces(false);
        manager.dispatch_events(options.clone());
        manager.dispatch_events(options);
        assert_eq!(rec.batches.lock().len(), 1);
        {
            let state = manager.state.lock();
            assert_eq!(state.primary_queue.len(), 1);
            let seq = state.primary_queue[0].seq();
            assert_eq!(state.processed_events[&seq], HashSet::from(["a".to_owned()]));
        }

        manager.dispatch();
        assert_eq!(rec.batches.lock().len(), 1);
        assert_eq!(manager.pending_event_count(), 0);
    }

    #[test]
    fn deferred_namespace_events_return_to_their_queue() {
        let config = ManagerConfig {
            max_iterations: 1,
            ..Default::default()
        };
        let manager = Arc::new(DependencyManager::with_config(config).unwrap());
        let ns = Arc::new(NamespacedDependencyManager::new("panel", Some(manager.clone())));
        let source = ObjectRef::new();
        let (_relays, refs) = relay_chain(&ns, &source, 3);

        ns.raise_event(Event::new("changed", source.id()));
        let report = ns.dispatch();
        assert_eq!(report.cascade_rounds, 1);
        assert_eq!(report.deferred_events, 1);

        let state = manager.state.lock();
        assert!(state.primary_queue.is_empty());
        assert!(state.secondary_queue.is_empty());
        let queued = &state.namespace_queues["panel"];
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].namespace(), Some("panel"));
        assert_eq!(queued[0].source(), refs[1].id());
    }

    #[test]
    fn nothing_deferred_below_cascade_cap() {
        let manager = Arc::new(DependencyManager::new());
        let ns = Arc::new(NamespacedDependencyManager::new("panel", Some(manager.clone())));
        let source = ObjectRef::new();
        let (_relays, _refs) = relay_chain(&ns, &source, 3);

        ns.raise_event(Event::new("changed", source.id()));
        let report = ns.dispatch();
        assert_eq!(report.cascade_rounds, 3);
        assert_eq!(report.deferred_events, 0);
        assert_eq!(manager.pending_event_count(), 0);

        assert!(!manager.state.lock().processing_batch());
        manager.raise_event(Event::new("late", source.id()));
        assert_eq!(manager.state.lock().primary_queue.len(), 1);
    }

    #[test]
    fn unknown_namespace_is_rejected() {
        let manager = DependencyManager::new();
        let err = manager
            .dispatch_in_namespace("missing", DispatchOptions::new())
            .unwrap_err();
        assert_eq!(err, DependencyError::UnknownNamespace("missing".to_owned()));

        manager.attach_namespace("panel");
        assert!(manager
            .dispatch_in_namespace("panel", DispatchOptions::new())
            .is_ok());
        manager.detach_namespace("panel");
        assert_eq!(manager.namespaces(), Vec::<String>::new());
    }

    #[test]
    fn with_config_validates() {
        let config = ManagerConfig {
            max_iterations: 0,
            ..Default::default()
        };
        assert!(DependencyManager::with_config(config).is_err());

        let manager = DependencyManager::with_config(ManagerConfig {
            debug_mode: true,
            ..Default::default()
        })
        .unwrap();
        assert!(manager.debug_mode());
        manager.set_debug_mode(false);
        assert!(!manager.debug_mode());
    }
}
