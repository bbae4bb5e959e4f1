//! Dispatch Context
//!
//! Tracks, per thread, which managers are currently delegating dispatch to
//! their namespaces. The manager consults this before delegating so that a
//! namespace pass can never trigger another round of delegation on the same
//! manager.
//!
//! # Implementation
//!
//! A thread-local stack of entries, pushed by [`DispatchContext::enter`] and
//! popped when the returned guard drops. The guard keeps the stack balanced
//! even if a processor panics through a dispatch call.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a manager instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ManagerId(u64);

impl ManagerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// What the manager on the stack is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Dispatching,
    Delegating,
}

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<(ManagerId, Phase)>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the context when dropped.
pub(crate) struct DispatchContext {
    manager: ManagerId,
    phase: Phase,
}

impl DispatchContext {
    pub(crate) fn enter(manager: ManagerId, phase: Phase) -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push((manager, phase)));
        Self { manager, phase }
    }

    /// Whether `manager` is delegating anywhere up this thread's stack.
    pub(crate) fn is_delegating(manager: ManagerId) -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .any(|&(id, phase)| id == manager && phase == Phase::Delegating)
        })
    }

    /// Number of dispatch passes of `manager` active on this thread.
    pub(crate) fn dispatch_depth(manager: ManagerId) -> usize {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .filter(|&&(id, phase)| id == manager && phase == Phase::Dispatching)
                .count()
        })
    }
}

impl Drop for DispatchContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry,
                    (self.manager, self.phase),
                    "DispatchContext mismatch"
                );
            }
        });
    }
}
